// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM protocol engine for IPv6 (RFC 7761 subset)
//!
//! - **pim**: wire codec for the PIM header, Hello TLVs and Join/Prune records
//! - **neighbor**: per-link neighbor table with holdtime-driven expiry
//! - **interface**: per-link PIM state and Designated Router election
//!
//! ## Key Addresses
//!
//! | Address | Purpose |
//! |---------|---------|
//! | ff02::d | ALL-PIM-ROUTERS |
//! | IP Protocol 103 | PIM packets |
//!
//! State machines here are synchronous and take `now` explicitly so that the
//! daemon loop and the tests drive time the same way.

pub mod interface;
pub mod neighbor;
pub mod pim;

use std::net::Ipv6Addr;

/// IP protocol number for PIM
pub const IPPROTO_PIM: u8 = 103;

/// ALL-PIM-ROUTERS link-scope multicast group (ff02::d)
pub const ALL_PIM_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x0d);

/// Types of timers used by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// Periodic Hello transmission on a link
    Hello { ifindex: u32 },
    /// Neighbor liveness (holdtime) expiry
    NeighborExpiry { ifindex: u32, neighbor: Ipv6Addr },
}

impl TimerType {
    pub fn ifindex(&self) -> u32 {
        match self {
            TimerType::Hello { ifindex } => *ifindex,
            TimerType::NeighborExpiry { ifindex, .. } => *ifindex,
        }
    }
}

/// Common trait for protocol packet builders
///
/// PIM over IPv6 leaves the checksum to the kernel (`IPV6_CHECKSUM`), so
/// builders emit a zero checksum field.
pub trait PacketBuilder {
    /// Build a packet for transmission, PIM header included
    fn build(&self) -> Vec<u8>;
}

/// fe80::/10 check on the raw address bits
#[inline]
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}
