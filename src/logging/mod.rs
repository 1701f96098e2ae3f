// SPDX-License-Identifier: Apache-2.0 OR MIT
// Facility/severity logging for the PIM daemon
//
// Every component logs through a cloned `Logger` handle. Filtering happens in
// the handle (global level plus per-facility overrides); formatting and output
// are delegated to a `LogWriter`.

mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;
mod writer;

pub use entry::LogEntry;
pub use facility::Facility;
pub use logger::{LogWriter, Logger};
pub use severity::Severity;
pub use writer::{JsonStderrWriter, MemoryWriter, StderrWriter};
