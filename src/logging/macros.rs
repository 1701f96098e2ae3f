// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging
//
// Each macro accepts either a plain message expression or format!-style
// arguments starting with a string literal.

/// Log a message with emergency severity
///
/// # Examples
/// ```ignore
/// log_emergency!(logger, Facility::Daemon, "PIM socket unavailable");
/// ```
#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.emergency($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.emergency($facility, $msg)
    };
}

/// Log a message with alert severity
#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.alert($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.alert($facility, $msg)
    };
}

/// Log a message with critical severity
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.critical($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.critical($facility, $msg)
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, Facility::Codec, "truncated Hello from {}", src);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.error($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.error($facility, $msg)
    };
}

/// Log a message with warning severity
///
/// # Examples
/// ```ignore
/// log_warning!(logger, Facility::Transport, "join failed on ifindex {}", ifindex);
/// ```
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.warning($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.warning($facility, $msg)
    };
}

/// Log a message with notice severity
///
/// # Examples
/// ```ignore
/// log_notice!(logger, Facility::Election, "DR changed to {}", dr);
/// ```
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.notice($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.notice($facility, $msg)
    };
}

/// Log a message with info severity
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.info($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.info($facility, $msg)
    };
}

/// Log a message with debug severity
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.debug($facility, &format!($fmt $(, $arg)*))
    };
    ($logger:expr, $facility:expr, $msg:expr) => {
        $logger.debug($facility, $msg)
    };
}

/// Log a message with key-value pairs
///
/// # Examples
/// ```ignore
/// log_kv!(logger, Severity::Notice, Facility::Neighbor, "neighbor up", "neighbor" => addr);
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+ $(,)?) => {{
        let owned: Vec<(&str, String)> = vec![$(($key, $value.to_string())),+];
        let pairs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        $logger.log_kv($severity, $facility, $msg, &pairs)
    }};
}
