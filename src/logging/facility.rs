// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Run loop, startup and shutdown
    Daemon = 0,
    /// Raw socket, multicast membership, send/receive
    Transport = 1,
    /// Header sanity checks and message decoding
    Codec = 2,
    /// Hello transmission and reception
    Hello = 3,
    /// Neighbor creation, refresh and expiry
    Neighbor = 4,
    /// Designated Router election
    Election = 5,
    /// Join/Prune reception
    JoinPrune = 6,
    /// Link and address notifications
    Link = 7,
    /// Configuration loading and mutation
    Config = 8,
}

impl Facility {
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Daemon => "Daemon",
            Facility::Transport => "Transport",
            Facility::Codec => "Codec",
            Facility::Hello => "Hello",
            Facility::Neighbor => "Neighbor",
            Facility::Election => "Election",
            Facility::JoinPrune => "JoinPrune",
            Facility::Link => "Link",
            Facility::Config => "Config",
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
