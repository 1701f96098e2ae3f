// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for pim6d.
//!
//! JSON5 configuration format supporting:
//! - Log level and output format
//! - Per-interface PIM settings keyed by interface name
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::logging::Severity;
use crate::protocols::interface::{DEFAULT_DR_PRIORITY, DEFAULT_HELLO_INTERVAL, MAX_HELLO_INTERVAL};

pub const DEFAULT_LINK_POLL_INTERVAL_MS: u64 = 1000;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_link_poll_interval_ms() -> u64 {
    DEFAULT_LINK_POLL_INTERVAL_MS
}

fn default_enabled() -> bool {
    true
}

fn default_hello_interval() -> u16 {
    DEFAULT_HELLO_INTERVAL
}

fn default_dr_priority() -> u32 {
    DEFAULT_DR_PRIORITY
}

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Global minimum severity name ("debug", "info", "warning", ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json_logs: bool,

    /// How often the link list is polled for changes
    #[serde(default = "default_link_poll_interval_ms")]
    pub link_poll_interval_ms: u64,

    /// PIM settings per interface name
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            link_poll_interval_ms: DEFAULT_LINK_POLL_INTERVAL_MS,
            interfaces: BTreeMap::new(),
        }
    }
}

/// PIM settings for one interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between Hellos
    #[serde(default = "default_hello_interval")]
    pub hello_interval: u16,

    #[serde(default = "default_dr_priority")]
    pub dr_priority: u32,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hello_interval: DEFAULT_HELLO_INTERVAL,
            dr_priority: DEFAULT_DR_PRIORITY,
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration (JSON, which is valid JSON5)
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Severity::from_name(&self.log_level).is_none() {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        if self.link_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(self.link_poll_interval_ms));
        }

        for (name, settings) in &self.interfaces {
            validate_interface_name(name)?;
            if !(1..=MAX_HELLO_INTERVAL).contains(&settings.hello_interval) {
                return Err(ConfigError::InvalidHelloInterval {
                    interface: name.clone(),
                    hello_interval: settings.hello_interval,
                });
            }
        }
        Ok(())
    }

    /// Parsed `log_level`; Info if the name is unknown
    pub fn severity(&self) -> Severity {
        Severity::from_name(&self.log_level).unwrap_or(Severity::Info)
    }

    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms)
    }

    /// Settings for `name`, if the file mentions it
    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.get(name)
    }
}

fn validate_interface_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot be empty".to_string(),
        });
    }
    if name.len() > 15 {
        // Linux IFNAMSIZ limit
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name too long (max 15 chars)".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name contains invalid characters".to_string(),
        });
    }
    if name.chars().next().map(|c| c.is_ascii_digit()) == Some(true) {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot start with a digit".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(std::path::PathBuf, String),
    ParseError(String),
    InvalidInterfaceName { name: String, reason: String },
    InvalidHelloInterval { interface: String, hello_interval: u16 },
    InvalidLogLevel(String),
    InvalidPollInterval(u64),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, msg) => {
                write!(
                    f,
                    "failed to read config file '{}': {}",
                    path.display(),
                    msg
                )
            }
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::InvalidInterfaceName { name, reason } => {
                write!(f, "invalid interface name '{}': {}", name, reason)
            }
            ConfigError::InvalidHelloInterval {
                interface,
                hello_interval,
            } => write!(
                f,
                "invalid hello_interval {} on '{}': must be between 1 and {} seconds",
                hello_interval, interface, MAX_HELLO_INTERVAL
            ),
            ConfigError::InvalidLogLevel(level) => {
                write!(f, "unknown log_level '{}'", level)
            }
            ConfigError::InvalidPollInterval(ms) => {
                write!(f, "link_poll_interval_ms must be positive, got {}", ms)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
