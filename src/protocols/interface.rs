// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-link PIM state and Designated Router election
//!
//! A `PimInterface` owns its neighbor table and its Hello timer handle, and
//! keeps a reference to the elected DR. The reference is an address, never a
//! pointer into the table: every neighbor deletion re-runs the election in the
//! same call, and `dr()` re-validates on read.
//!
//! ## Election (RFC 7761 section 4.3.2)
//!
//! | Condition | Winner |
//! |-----------|--------|
//! | every neighbor advertises DR-Priority | highest priority, then highest address |
//! | some neighbor omits DR-Priority | highest address |

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::neighbor::{Neighbor, NeighborFlags, NeighborTable};
use super::pim::{
    decode_join_prune, encode_hello, CodecError, EncodedGroup, EncodedSource, HelloOption,
    HelloOptions, JoinPrune, HOLDTIME_INFINITE,
};
use super::TimerType;
use crate::daemon::timers::{TimerHandle, TimerQueue};
use crate::logging::{Facility, Logger, Severity};
use crate::{log_debug, log_error, log_info, log_kv, log_notice, log_warning};
use crate::{InterfaceInfo, NeighborInfo};

/// Why a received datagram was not (fully) processed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceiveError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("PIM is not enabled on ifindex {0}")]
    InterfaceNotEnabled(u32),

    #[error("Join/Prune from {0}, which has not sent a Hello")]
    UnknownNeighbor(Ipv6Addr),

    #[error("Join/Prune for upstream neighbor {upstream}, not this router")]
    NotAddressedToUs { upstream: Ipv6Addr },

    #[error("cannot track {0} as a neighbor")]
    InvalidNeighborAddress(Ipv6Addr),

    #[error("own Hello from {0}")]
    SelfOriginated(Ipv6Addr),
}

pub const DEFAULT_HELLO_INTERVAL: u16 = 30;
pub const MAX_HELLO_INTERVAL: u16 = 3600;
pub const DEFAULT_DR_PRIORITY: u32 = 1;
/// Holdtime assumed for a new neighbor whose Hello carries no HoldTime option
pub const DEFAULT_HOLDTIME: u16 = 105;

/// Holdtime advertised for a Hello interval: 3.5 times the interval, rounded
pub fn holdtime_for_interval(hello_interval: u16) -> u16 {
    let holdtime = (7 * u32::from(hello_interval) + 1) / 2;
    holdtime.min(u32::from(HOLDTIME_INFINITE) - 1) as u16
}

/// Which record currently holds the DR role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrRef {
    /// This router
    Local,
    /// A neighbor on the link, by address
    Neighbor(Ipv6Addr),
}

/// One entry of an election: this router or a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: DrRef,
    pub address: Ipv6Addr,
    pub dr_priority: u32,
    pub has_dr_priority: bool,
}

impl Candidate {
    pub fn from_neighbor(neighbor: &Neighbor) -> Self {
        Self {
            id: DrRef::Neighbor(neighbor.address),
            address: neighbor.address,
            dr_priority: neighbor.dr_priority,
            has_dr_priority: neighbor.has_dr_priority(),
        }
    }
}

/// Pick the DR among `candidates`
///
/// With `ignore_priority` set only the address counts. Addresses compare as
/// raw bytes, largest wins.
pub fn elect_dr(candidates: &[Candidate], ignore_priority: bool) -> Option<&Candidate> {
    candidates.iter().max_by(|a, b| {
        if ignore_priority {
            a.address.cmp(&b.address)
        } else {
            (a.dr_priority, a.address).cmp(&(b.dr_priority, b.address))
        }
    })
}

/// What a processed Hello changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelloOutcome {
    pub new_neighbor: bool,
    pub gen_id_changed: bool,
    pub reelected: bool,
    pub dr_changed: bool,
}

/// Result of a Join/Prune addressed to this router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPruneSummary {
    pub message: JoinPrune,
    pub valid_groups: usize,
    pub invalid_records: usize,
}

fn group_problem(group: &EncodedGroup) -> Option<&'static str> {
    if !(8..=128).contains(&group.mask_len) {
        return Some("group mask length out of range");
    }
    if !group.address.is_multicast() {
        return Some("group address is not multicast");
    }
    None
}

fn source_problem(source: &EncodedSource) -> Option<&'static str> {
    if source.mask_len > 128 {
        return Some("source mask length out of range");
    }
    if source.wildcard && !source.rpt {
        return Some("wildcard source without RPT bit");
    }
    None
}

#[derive(Debug)]
pub struct PimInterface {
    pub ifindex: u32,
    pub name: String,
    pub enabled: bool,
    /// Seconds between Hellos; 0 while a goodbye Hello is being sent
    pub hello_interval: u16,
    pub dr_priority: u32,
    local_address: Option<Ipv6Addr>,
    dr_absent: bool,
    neighbors: NeighborTable,
    dr: DrRef,
    pub(crate) hello_timer: Option<TimerHandle>,
    logger: Logger,
}

impl PimInterface {
    /// New state with defaults: enabled, 30 s Hello interval, priority 1
    pub fn new(ifindex: u32, name: &str, local_address: Option<Ipv6Addr>, logger: Logger) -> Self {
        log_info!(
            logger,
            Facility::Config,
            "creating PIM state for {} ifindex {}",
            name,
            ifindex
        );
        Self {
            ifindex,
            name: name.to_string(),
            enabled: true,
            hello_interval: DEFAULT_HELLO_INTERVAL,
            dr_priority: DEFAULT_DR_PRIORITY,
            local_address,
            dr_absent: false,
            neighbors: NeighborTable::new(ifindex),
            dr: DrRef::Local,
            hello_timer: None,
            logger,
        }
    }

    pub fn local_address(&self) -> Option<Ipv6Addr> {
        self.local_address
    }

    /// Replace the local link-local address; re-elects if it changed
    pub fn set_local_address(&mut self, address: Option<Ipv6Addr>) -> bool {
        if self.local_address == address {
            return false;
        }
        self.local_address = address;
        self.reelect_dr();
        true
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn neighbor(&self, address: &Ipv6Addr) -> Option<&Neighbor> {
        self.neighbors.lookup(address)
    }

    pub fn dr_absent(&self) -> bool {
        self.dr_absent
    }

    pub fn hello_timer(&self) -> Option<TimerHandle> {
        self.hello_timer
    }

    pub fn advertised_holdtime(&self) -> u16 {
        holdtime_for_interval(self.hello_interval)
    }

    /// Hello message advertising this interface's current settings
    pub fn build_hello(&self, gen_id: u32) -> Vec<u8> {
        encode_hello(self.advertised_holdtime(), self.dr_priority, gen_id)
    }

    /// This router as an election candidate
    pub fn self_candidate(&self) -> Candidate {
        Candidate {
            id: DrRef::Local,
            address: self.local_address.unwrap_or(Ipv6Addr::UNSPECIFIED),
            dr_priority: self.dr_priority,
            has_dr_priority: true,
        }
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        std::iter::once(self.self_candidate())
            .chain(self.neighbors.iter().map(Candidate::from_neighbor))
            .collect()
    }

    /// Re-run the election over self and every neighbor.
    /// Returns true if the DR changed.
    pub fn reelect_dr(&mut self) -> bool {
        let candidates = self.candidates();
        let winner = elect_dr(&candidates, self.dr_absent)
            .map(|c| c.id)
            .unwrap_or(DrRef::Local);

        let changed = winner != self.dr;
        self.dr = winner;
        if changed {
            log_kv!(
                self.logger,
                Severity::Notice,
                Facility::Election,
                "DR changed",
                "ifindex" => self.ifindex,
                "dr" => self.describe(winner),
                "address_only" => self.dr_absent
            );
        }
        changed
    }

    fn describe(&self, dr: DrRef) -> String {
        match dr {
            DrRef::Local => "this router".to_string(),
            DrRef::Neighbor(address) => address.to_string(),
        }
    }

    /// Current DR. A reference to a neighbor no longer in the table reads as self.
    pub fn dr(&self) -> DrRef {
        match self.dr {
            DrRef::Neighbor(address) if !self.neighbors.contains(&address) => DrRef::Local,
            dr => dr,
        }
    }

    /// Address of the current DR; None if this router is DR without a local address
    pub fn dr_address(&self) -> Option<Ipv6Addr> {
        match self.dr() {
            DrRef::Local => self.local_address,
            DrRef::Neighbor(address) => Some(address),
        }
    }

    pub fn am_dr(&self) -> bool {
        self.dr() == DrRef::Local
    }

    /// Process the TLVs of a Hello received from `source`
    ///
    /// Options are applied as they decode. On a bad option the remaining TLVs
    /// are skipped; a neighbor created by this Hello is removed again, an
    /// existing one keeps what was applied and its current expiry timer.
    pub fn hello_recv(
        &mut self,
        source: Ipv6Addr,
        body: &[u8],
        now: Instant,
        timers: &mut TimerQueue,
    ) -> Result<HelloOutcome, ReceiveError> {
        if self.local_address == Some(source) {
            return Err(ReceiveError::SelfOriginated(source));
        }
        log_debug!(
            self.logger,
            Facility::Hello,
            "processing Hello from {} on {}",
            source,
            self.name
        );

        let new_neighbor = !self.neighbors.contains(&source);
        let neighbor = if new_neighbor {
            match self.neighbors.create(source, now) {
                Ok(neighbor) => neighbor,
                Err(e) => {
                    log_error!(
                        self.logger,
                        Facility::Neighbor,
                        "unable to create neighbor {} on {}: {}",
                        source,
                        self.name,
                        e
                    );
                    return Err(ReceiveError::InvalidNeighborAddress(source));
                }
            }
        } else {
            match self.neighbors.lookup_mut(&source) {
                Some(neighbor) => neighbor,
                None => return Err(ReceiveError::InvalidNeighborAddress(source)),
            }
        };

        let prev_priority = neighbor.dr_priority;
        let prev_has_priority = neighbor.has_dr_priority();
        let mut saw_holdtime = false;
        let mut saw_priority = false;
        let mut gen_id_changed = false;
        let mut failure = None;

        for option in HelloOptions::new(body) {
            match option {
                Ok(HelloOption::Holdtime(holdtime)) => {
                    neighbor.holdtime = holdtime;
                    saw_holdtime = true;
                }
                Ok(HelloOption::DrPriority(priority)) => {
                    neighbor.dr_priority = priority;
                    saw_priority = true;
                }
                Ok(HelloOption::GenerationId(gen_id)) => {
                    let had_gen_id = neighbor.flags.contains(NeighborFlags::HAS_GENID);
                    if !new_neighbor && (!had_gen_id || neighbor.gen_id != gen_id) {
                        gen_id_changed = true;
                    }
                    neighbor.gen_id = gen_id;
                    neighbor.flags.insert(NeighborFlags::HAS_GENID);
                }
                Ok(HelloOption::BidirCapable) => {
                    neighbor.flags.insert(NeighborFlags::BIDIR_CAPABLE);
                }
                Ok(HelloOption::LanPruneDelay { length }) => {
                    log_debug!(
                        self.logger,
                        Facility::Hello,
                        "ignoring LAN Prune Delay option ({} bytes) from {}",
                        length,
                        source
                    );
                }
                Ok(HelloOption::AddressList { length }) => {
                    log_debug!(
                        self.logger,
                        Facility::Hello,
                        "ignoring Address List option ({} bytes) from {}",
                        length,
                        source
                    );
                }
                Ok(HelloOption::Unknown {
                    option_type,
                    length,
                }) => {
                    log_info!(
                        self.logger,
                        Facility::Hello,
                        "unrecognized Hello option type {} ({} bytes) from {}",
                        option_type,
                        length,
                        source
                    );
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            let priority_changed = neighbor.dr_priority != prev_priority;
            log_error!(
                self.logger,
                Facility::Codec,
                "bad Hello from {} on {}: {}",
                source,
                self.name,
                err
            );
            if new_neighbor {
                self.neighbors.delete(&source, timers);
            } else if gen_id_changed || priority_changed {
                self.reelect_dr();
            }
            return Err(err.into());
        }

        neighbor
            .flags
            .set(NeighborFlags::HAS_DR_PRIORITY, saw_priority);
        if new_neighbor && !saw_holdtime {
            neighbor.holdtime = DEFAULT_HOLDTIME;
        }
        let priority_changed = !new_neighbor
            && (saw_priority != prev_has_priority
                || (saw_priority && neighbor.dr_priority != prev_priority));

        // The neighbor is alive: replace its expiry timer
        timers.cancel_slot(&mut neighbor.expiry_timer);
        if neighbor.holdtime == HOLDTIME_INFINITE {
            neighbor.expiry = None;
        } else {
            let expiry = now + Duration::from_secs(u64::from(neighbor.holdtime));
            neighbor.expiry = Some(expiry);
            neighbor.expiry_timer = Some(timers.schedule(
                TimerType::NeighborExpiry {
                    ifindex: self.ifindex,
                    neighbor: source,
                },
                expiry,
            ));
        }
        let holdtime = neighbor.holdtime;

        if new_neighbor {
            log_kv!(
                self.logger,
                Severity::Notice,
                Facility::Neighbor,
                "neighbor up",
                "ifindex" => self.ifindex,
                "neighbor" => source,
                "holdtime" => holdtime
            );
        }
        if gen_id_changed {
            // Detected only; no state is reset for a restarted neighbor
            log_notice!(
                self.logger,
                Facility::Neighbor,
                "generation ID of {} on {} changed",
                source,
                self.name
            );
        }

        let was_absent = self.dr_absent;
        self.dr_absent = self.neighbors.any_missing_dr_priority();
        if self.dr_absent && !was_absent {
            log_notice!(
                self.logger,
                Facility::Election,
                "neighbor without DR priority on {}, electing by address only",
                self.name
            );
        }

        let reelected = new_neighbor || gen_id_changed || priority_changed || was_absent != self.dr_absent;
        let dr_changed = reelected && self.reelect_dr();

        Ok(HelloOutcome {
            new_neighbor,
            gen_id_changed,
            reelected,
            dr_changed,
        })
    }

    /// Remove a neighbor and re-run the election in the same step
    pub fn delete_neighbor(&mut self, address: &Ipv6Addr, timers: &mut TimerQueue) -> Option<Neighbor> {
        let removed = self.neighbors.delete(address, timers)?;
        log_kv!(
            self.logger,
            Severity::Notice,
            Facility::Neighbor,
            "neighbor down",
            "ifindex" => self.ifindex,
            "neighbor" => address
        );
        self.dr_absent = self.neighbors.any_missing_dr_priority();
        self.reelect_dr();
        Some(removed)
    }

    /// Handle a fired expiry timer. Ignored unless `handle` is the neighbor's current timer.
    pub fn neighbor_expired(
        &mut self,
        address: &Ipv6Addr,
        handle: TimerHandle,
        timers: &mut TimerQueue,
    ) -> bool {
        match self.neighbors.lookup(address) {
            Some(neighbor) if neighbor.expiry_timer == Some(handle) => {}
            _ => {
                log_debug!(
                    self.logger,
                    Facility::Neighbor,
                    "stale expiry timer for {} on {}",
                    address,
                    self.name
                );
                return false;
            }
        }
        log_info!(
            self.logger,
            Facility::Neighbor,
            "neighbor {} on {} expired",
            address,
            self.name
        );
        self.delete_neighbor(address, timers).is_some()
    }

    /// Drop every neighbor; this router becomes DR
    pub fn flush_neighbors(&mut self, timers: &mut TimerQueue) -> usize {
        let count = self.neighbors.flush(timers);
        self.dr_absent = false;
        self.reelect_dr();
        count
    }

    /// Validate a Join/Prune from `source` and log its records
    ///
    /// Forwarding state is not touched. A message whose upstream neighbor is
    /// not this router is rejected without further processing.
    pub fn jp_recv(&self, source: Ipv6Addr, body: &[u8]) -> Result<JoinPruneSummary, ReceiveError> {
        if !self.neighbors.contains(&source) {
            log_info!(
                self.logger,
                Facility::JoinPrune,
                "{} is not in the neighbor list of {} yet",
                source,
                self.name
            );
            return Err(ReceiveError::UnknownNeighbor(source));
        }

        let message = decode_join_prune(body)?;
        if self.local_address != Some(message.upstream) {
            return Err(ReceiveError::NotAddressedToUs {
                upstream: message.upstream,
            });
        }

        let mut valid_groups = 0;
        let mut invalid_records = 0;
        for record in &message.groups {
            if let Some(problem) = group_problem(&record.group) {
                log_warning!(
                    self.logger,
                    Facility::JoinPrune,
                    "skipping group {}/{} from {}: {}",
                    record.group.address,
                    record.group.mask_len,
                    source,
                    problem
                );
                invalid_records += 1;
                continue;
            }
            valid_groups += 1;

            let entries = record
                .joins
                .iter()
                .map(|s| ("join", s))
                .chain(record.prunes.iter().map(|s| ("prune", s)));
            for (kind, entry) in entries {
                if let Some(problem) = source_problem(entry) {
                    log_warning!(
                        self.logger,
                        Facility::JoinPrune,
                        "skipping {} source {}/{} for {}: {}",
                        kind,
                        entry.address,
                        entry.mask_len,
                        record.group.address,
                        problem
                    );
                    invalid_records += 1;
                    continue;
                }
                let source_text = if entry.wildcard {
                    "*".to_string()
                } else {
                    entry.address.to_string()
                };
                log_debug!(
                    self.logger,
                    Facility::JoinPrune,
                    "{} ({}, {}) rpt={} from {}",
                    kind,
                    source_text,
                    record.group.address,
                    entry.rpt,
                    source
                );
            }
        }

        log_info!(
            self.logger,
            Facility::JoinPrune,
            "Join/Prune from {} on {}: {} groups, holdtime {}",
            source,
            self.name,
            message.groups.len(),
            message.holdtime
        );

        Ok(JoinPruneSummary {
            message,
            valid_groups,
            invalid_records,
        })
    }

    pub fn neighbor_infos(&self, now: Instant) -> Vec<NeighborInfo> {
        self.neighbors.iter().map(|n| n.info(now)).collect()
    }

    pub fn info(&self, now: Instant) -> InterfaceInfo {
        InterfaceInfo {
            ifindex: self.ifindex,
            name: self.name.clone(),
            enabled: self.enabled,
            hello_interval: self.hello_interval,
            dr_priority: self.dr_priority,
            local_address: self.local_address,
            neighbor_count: self.neighbors.len(),
            dr: self.dr_address(),
            am_dr: self.am_dr(),
            dr_absent: self.dr_absent,
            neighbors: self.neighbor_infos(now),
        }
    }
}
