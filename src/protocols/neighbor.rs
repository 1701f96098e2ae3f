// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM neighbor table
//!
//! One table per link, keyed by the neighbor's link-local address. A
//! `BTreeMap` keeps iteration in ascending raw-address order, which is what
//! both the snapshots and the election tie-break rely on.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::is_link_local;
use crate::daemon::timers::{TimerHandle, TimerQueue};
use crate::NeighborInfo;

/// Capability flags learned from Hello options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighborFlags(u8);

impl NeighborFlags {
    pub const HAS_DR_PRIORITY: NeighborFlags = NeighborFlags(0x01);
    pub const HAS_GENID: NeighborFlags = NeighborFlags(0x02);
    pub const BIDIR_CAPABLE: NeighborFlags = NeighborFlags(0x04);

    pub fn contains(self, flag: NeighborFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: NeighborFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NeighborFlags) {
        self.0 &= !flag.0;
    }

    pub fn set(&mut self, flag: NeighborFlags, on: bool) {
        if on {
            self.insert(flag);
        } else {
            self.remove(flag);
        }
    }

    pub fn names(self) -> Vec<String> {
        [
            (Self::HAS_DR_PRIORITY, "dr-priority"),
            (Self::HAS_GENID, "generation-id"),
            (Self::BIDIR_CAPABLE, "bidir"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name.to_string())
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NeighborError {
    #[error("neighbor address {0} is not link-local")]
    NotLinkLocal(Ipv6Addr),

    #[error("neighbor {0} already exists")]
    AlreadyExists(Ipv6Addr),
}

/// A PIM neighbor seen on one link
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub ifindex: u32,
    pub address: Ipv6Addr,
    pub dr_priority: u32,
    pub gen_id: u32,
    /// Advertised holdtime in seconds (0xffff = infinite)
    pub holdtime: u16,
    pub flags: NeighborFlags,
    pub created_at: Instant,
    /// None while the holdtime is infinite
    pub expiry: Option<Instant>,
    pub(crate) expiry_timer: Option<TimerHandle>,
}

impl Neighbor {
    fn new(ifindex: u32, address: Ipv6Addr, now: Instant) -> Self {
        Self {
            ifindex,
            address,
            dr_priority: 0,
            gen_id: 0,
            holdtime: 0,
            flags: NeighborFlags::default(),
            created_at: now,
            expiry: None,
            expiry_timer: None,
        }
    }

    pub fn has_dr_priority(&self) -> bool {
        self.flags.contains(NeighborFlags::HAS_DR_PRIORITY)
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time left before expiry; None for an infinite holdtime
    pub fn expires_in(&self, now: Instant) -> Option<Duration> {
        self.expiry.map(|at| at.saturating_duration_since(now))
    }

    /// Handle of the pending expiry timer, if any
    pub fn expiry_timer(&self) -> Option<TimerHandle> {
        self.expiry_timer
    }

    pub fn info(&self, now: Instant) -> NeighborInfo {
        NeighborInfo {
            ifindex: self.ifindex,
            address: self.address,
            uptime_secs: self.uptime(now).as_secs(),
            expires_in_secs: self.expires_in(now).map(|d| d.as_secs()),
            holdtime: self.holdtime,
            dr_priority: self.dr_priority,
            gen_id: self.gen_id,
            flags: self.flags.names(),
        }
    }
}

/// Neighbors of a single link, ordered by address
#[derive(Debug)]
pub struct NeighborTable {
    ifindex: u32,
    neighbors: BTreeMap<Ipv6Addr, Neighbor>,
}

impl NeighborTable {
    pub fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            neighbors: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, address: &Ipv6Addr) -> Option<&Neighbor> {
        self.neighbors.get(address)
    }

    pub fn lookup_mut(&mut self, address: &Ipv6Addr) -> Option<&mut Neighbor> {
        self.neighbors.get_mut(address)
    }

    pub fn contains(&self, address: &Ipv6Addr) -> bool {
        self.neighbors.contains_key(address)
    }

    /// Insert a fresh neighbor. Only link-local sources can be neighbors.
    pub fn create(
        &mut self,
        address: Ipv6Addr,
        now: Instant,
    ) -> Result<&mut Neighbor, NeighborError> {
        if !is_link_local(&address) {
            return Err(NeighborError::NotLinkLocal(address));
        }
        if self.neighbors.contains_key(&address) {
            return Err(NeighborError::AlreadyExists(address));
        }
        let neighbor = Neighbor::new(self.ifindex, address, now);
        Ok(self.neighbors.entry(address).or_insert(neighbor))
    }

    /// Remove a neighbor, cancelling its expiry timer
    pub fn delete(&mut self, address: &Ipv6Addr, timers: &mut TimerQueue) -> Option<Neighbor> {
        let mut neighbor = self.neighbors.remove(address)?;
        timers.cancel_slot(&mut neighbor.expiry_timer);
        Some(neighbor)
    }

    /// Remove every neighbor, cancelling all expiry timers
    pub fn flush(&mut self, timers: &mut TimerQueue) -> usize {
        let count = self.neighbors.len();
        for neighbor in self.neighbors.values_mut() {
            timers.cancel_slot(&mut neighbor.expiry_timer);
        }
        self.neighbors.clear();
        count
    }

    /// True if some current neighbor did not advertise a DR priority
    pub fn any_missing_dr_priority(&self) -> bool {
        self.neighbors.values().any(|n| !n.has_dr_priority())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}
