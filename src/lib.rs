use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

pub mod config;
pub mod daemon;
pub mod logging;
pub mod protocols;

/// Read-only view of one neighbor, as shown by `show ipv6 pim neighbor`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NeighborInfo {
    pub ifindex: u32,
    pub address: Ipv6Addr,
    pub uptime_secs: u64,
    /// None while the advertised holdtime is infinite
    pub expires_in_secs: Option<u64>,
    pub holdtime: u16,
    pub dr_priority: u32,
    pub gen_id: u32,
    pub flags: Vec<String>,
}

/// Read-only view of one PIM interface, as shown by `show ipv6 pim interface`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub ifindex: u32,
    pub name: String,
    pub enabled: bool,
    pub hello_interval: u16,
    pub dr_priority: u32,
    pub local_address: Option<Ipv6Addr>,
    pub neighbor_count: usize,
    pub dr: Option<Ipv6Addr>,
    pub am_dr: bool,
    pub dr_absent: bool,
    pub neighbors: Vec<NeighborInfo>,
}
