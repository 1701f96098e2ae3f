// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle with global and per-facility level filtering

use super::entry::LogEntry;
use super::writer::{JsonStderrWriter, MemoryWriter, StderrWriter};
use super::{Facility, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Destination for log entries that passed level filtering
pub trait LogWriter: Send + Sync {
    fn write(&self, entry: LogEntry);
}

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// Clones share the writer and the level configuration.
pub struct Logger {
    writer: Arc<dyn LogWriter>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels
    facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
}

impl Logger {
    /// Create a logger on top of an arbitrary writer
    pub fn new(writer: Arc<dyn LogWriter>) -> Self {
        Self {
            writer,
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Human-readable lines on stderr
    pub fn stderr() -> Self {
        Self::new(Arc::new(StderrWriter))
    }

    /// One JSON object per line on stderr
    pub fn stderr_json() -> Self {
        Self::new(Arc::new(JsonStderrWriter))
    }

    /// Capture entries in memory; the returned writer can be inspected later.
    /// Captures everything down to Debug.
    pub fn memory() -> (Self, Arc<MemoryWriter>) {
        let writer = Arc::new(MemoryWriter::default());
        let logger = Self::new(writer.clone());
        logger.set_global_level(Severity::Debug);
        (logger, writer)
    }

    /// Check if a log message should be written based on severity filtering
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        // Facility-specific level overrides global
        let levels = self
            .facility_min_levels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&min_level) = levels.get(&facility) {
            return severity <= min_level;
        }
        drop(levels);

        let global_min = self.global_min_level.load(Ordering::Relaxed);
        (severity as u8) <= global_min
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.writer.write(LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value pairs
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }

        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.writer.write(entry);
    }

    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Current global minimum log level
    pub fn global_level(&self) -> Severity {
        Severity::from_u8(self.global_min_level.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&facility);
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            global_min_level: Arc::clone(&self.global_min_level),
            facility_min_levels: Arc::clone(&self.facility_min_levels),
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("global_min_level", &self.global_level())
            .finish_non_exhaustive()
    }
}
