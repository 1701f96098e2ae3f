// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log writers: plain stderr, JSON stderr and in-memory capture

use super::entry::LogEntry;
use super::logger::LogWriter;
use super::{Facility, Severity};
use std::sync::Mutex;

/// Plain text lines on stderr
pub struct StderrWriter;

impl LogWriter for StderrWriter {
    fn write(&self, entry: LogEntry) {
        let mut line = format!(
            "{} [{}] [{}] {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.severity,
            entry.facility,
            entry.message
        );
        for (key, value) in &entry.kvs {
            line.push_str(&format!(" {}={}", key, value));
        }
        eprintln!("{}", line);
    }
}

/// Simple stderr JSON logger, one object per line
pub struct JsonStderrWriter;

impl LogWriter for JsonStderrWriter {
    fn write(&self, entry: LogEntry) {
        let mut log_msg = serde_json::json!({
            "timestamp": entry.timestamp.to_rfc3339(),
            "level": entry.severity.as_str(),
            "facility": entry.facility.as_str(),
            "message": entry.get_message(),
        });
        if let Some(obj) = log_msg.as_object_mut() {
            for (key, value) in &entry.kvs {
                obj.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
        eprintln!("{}", log_msg);
    }
}

/// Keeps every entry in memory; used by tests to assert on log output
#[derive(Default)]
pub struct MemoryWriter {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryWriter {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// True if any entry at `severity` or more severe contains `needle`
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.severity <= severity && e.message.contains(needle))
    }

    pub fn count_facility(&self, facility: Facility) -> usize {
        self.lock().iter().filter(|e| e.facility == facility).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogWriter for MemoryWriter {
    fn write(&self, entry: LogEntry) {
        self.lock().push(entry);
    }
}
