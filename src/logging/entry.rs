// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use super::{Facility, Severity};
use chrono::{DateTime, Utc};

/// A single formatted log record handed to a `LogWriter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    /// Structured fields (`neighbor=fe80::1`, `ifindex=2`, ...)
    pub kvs: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    pub fn add_kv(&mut self, key: &str, value: &str) {
        self.kvs.push((key.to_string(), value.to_string()));
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }

    /// Look up a structured field by key
    pub fn kv(&self, key: &str) -> Option<&str> {
        self.kvs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
