// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM engine: interface registry, receive dispatch and timer handling
//!
//! `PimEngine` owns every `PimInterface` (keyed by ifindex), the link table,
//! the timer queue and the transport. All handlers are synchronous and take
//! `now` explicitly; the async loop in `daemon::run` only feeds them datagrams,
//! fired timers and link events.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::link_monitor::{LinkEvent, LinkTable};
use super::timers::{FiredTimer, TimerQueue};
use super::transport::{Datagram, PimTransport};
use crate::config::InterfaceConfig;
use crate::logging::{Facility, Logger};
pub use crate::protocols::interface::ReceiveError;
use crate::protocols::interface::{
    HelloOutcome, JoinPruneSummary, PimInterface, DEFAULT_DR_PRIORITY, DEFAULT_HELLO_INTERVAL,
};
use crate::protocols::pim::{split_message, PIM_HELLO, PIM_JOIN_PRUNE};
use crate::protocols::{TimerType, ALL_PIM_ROUTERS};
use crate::InterfaceInfo;
use crate::{log_debug, log_error, log_info, log_warning};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no link with ifindex {0}")]
    UnknownLink(u32),
}

/// Reason a Hello was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloSkip {
    UnknownInterface,
    NotEnabled,
    NoLocalAddress,
    LinkDown,
}

/// Result of one `hello_send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloSend {
    Sent { holdtime: u16 },
    Skipped(HelloSkip),
    /// Built but the transport failed; the next periodic Hello is the retry
    Failed,
}

/// What a datagram turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Hello(HelloOutcome),
    JoinPrune(JoinPruneSummary),
    /// Valid header of a type this engine does not process
    Unimplemented(u8),
}

pub struct PimEngine<T: PimTransport> {
    interfaces: BTreeMap<u32, PimInterface>,
    links: LinkTable,
    timers: TimerQueue,
    transport: T,
    /// Links currently joined to ALL-PIM-ROUTERS
    memberships: BTreeSet<u32>,
    logger: Logger,
    gen_id: u32,
}

impl<T: PimTransport> PimEngine<T> {
    /// New engine with a random Generation ID
    pub fn new(transport: T, logger: Logger) -> Self {
        Self::with_generation_id(transport, logger, rand::random())
    }

    pub fn with_generation_id(transport: T, logger: Logger, gen_id: u32) -> Self {
        log_info!(logger, Facility::Daemon, "PIM engine started, generation ID {:#010x}", gen_id);
        Self {
            interfaces: BTreeMap::new(),
            links: LinkTable::new(),
            timers: TimerQueue::new(),
            transport,
            memberships: BTreeSet::new(),
            logger,
            gen_id,
        }
    }

    pub fn generation_id(&self) -> u32 {
        self.gen_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn interface(&self, ifindex: u32) -> Option<&PimInterface> {
        self.interfaces.get(&ifindex)
    }

    pub fn interface_by_name(&self, name: &str) -> Option<&PimInterface> {
        self.interfaces.values().find(|iface| iface.name == name)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &PimInterface> {
        self.interfaces.values()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn is_joined(&self, ifindex: u32) -> bool {
        self.memberships.contains(&ifindex)
    }

    /// Join ALL-PIM-ROUTERS on `ifindex` unless already a member
    fn join_group(&mut self, ifindex: u32) {
        if self.memberships.contains(&ifindex) {
            return;
        }
        if let Some(link) = self.links.get(ifindex) {
            if !link.multicast {
                log_debug!(self.logger, Facility::Transport, "{} is not multicast capable, not joining", link.name);
                return;
            }
        }
        match self.transport.join_group(ifindex) {
            Ok(()) => {
                self.memberships.insert(ifindex);
                log_debug!(self.logger, Facility::Transport, "joined {} on ifindex {}", ALL_PIM_ROUTERS, ifindex);
            }
            Err(e) => log_warning!(self.logger, Facility::Transport, "{:#}", e),
        }
    }

    fn leave_group(&mut self, ifindex: u32) {
        if !self.memberships.remove(&ifindex) {
            return;
        }
        match self.transport.leave_group(ifindex) {
            Ok(()) => log_debug!(self.logger, Facility::Transport, "left {} on ifindex {}", ALL_PIM_ROUTERS, ifindex),
            Err(e) => log_warning!(self.logger, Facility::Transport, "{:#}", e),
        }
    }

    /// PIM state for `ifindex`, created with defaults on first use
    fn ensure_interface(&mut self, ifindex: u32) -> Result<(), EngineError> {
        if self.interfaces.contains_key(&ifindex) {
            return Ok(());
        }
        let link = self.links.get(ifindex).ok_or(EngineError::UnknownLink(ifindex))?;
        let up = link.up;
        let iface = PimInterface::new(
            ifindex,
            &link.name,
            link.link_local_address(),
            self.logger.clone(),
        );
        self.interfaces.insert(ifindex, iface);
        if up {
            self.join_group(ifindex);
        }
        Ok(())
    }

    /// Mark PIM enabled on `ifindex`, rejoining the group if it was disabled.
    /// Returns true when the interface was disabled before.
    fn activate(&mut self, ifindex: u32) -> Result<bool, EngineError> {
        self.ensure_interface(ifindex)?;
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(EngineError::UnknownLink(ifindex))?;
        let was_enabled = iface.enabled;
        iface.enabled = true;
        if !was_enabled {
            log_info!(self.logger, Facility::Config, "PIM enabled on {}", iface.name);
            if self.link_up(ifindex) {
                self.join_group(ifindex);
            }
        }
        Ok(!was_enabled)
    }

    fn link_up(&self, ifindex: u32) -> bool {
        self.links.get(ifindex).map(|link| link.up).unwrap_or(false)
    }

    /// Turn PIM on for a link and announce it
    pub fn enable(&mut self, ifindex: u32, now: Instant) -> Result<HelloSend, EngineError> {
        self.activate(ifindex)?;
        Ok(self.hello_send(ifindex, now))
    }

    /// Turn PIM off: leave the group, send one goodbye Hello, forget neighbors
    pub fn disable(&mut self, ifindex: u32, now: Instant) -> Result<HelloSend, EngineError> {
        self.ensure_interface(ifindex)?;
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(EngineError::UnknownLink(ifindex))?;
        iface.enabled = false;
        iface.hello_interval = 0;
        self.timers.cancel_slot(&mut iface.hello_timer);
        self.leave_group(ifindex);

        let goodbye = self.hello_send(ifindex, now);

        if let Some(iface) = self.interfaces.get_mut(&ifindex) {
            iface.hello_interval = DEFAULT_HELLO_INTERVAL;
            iface.dr_priority = DEFAULT_DR_PRIORITY;
            let flushed = iface.flush_neighbors(&mut self.timers);
            log_info!(
                self.logger,
                Facility::Config,
                "PIM disabled on {}, {} neighbors flushed",
                iface.name,
                flushed
            );
        }
        Ok(goodbye)
    }

    /// Returns None when PIM was already enabled and the interval is unchanged
    pub fn set_hello_interval(
        &mut self,
        ifindex: u32,
        hello_interval: u16,
        now: Instant,
    ) -> Result<Option<HelloSend>, EngineError> {
        let reenabled = self.activate(ifindex)?;
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(EngineError::UnknownLink(ifindex))?;
        if iface.hello_interval == hello_interval {
            if reenabled {
                return Ok(Some(self.hello_send(ifindex, now)));
            }
            return Ok(None);
        }
        self.timers.cancel_slot(&mut iface.hello_timer);
        iface.hello_interval = hello_interval;
        Ok(Some(self.hello_send(ifindex, now)))
    }

    pub fn reset_hello_interval(&mut self, ifindex: u32, now: Instant) -> Option<HelloSend> {
        let iface = self.interfaces.get_mut(&ifindex)?;
        if iface.hello_interval == DEFAULT_HELLO_INTERVAL {
            return None;
        }
        iface.hello_interval = DEFAULT_HELLO_INTERVAL;
        Some(self.hello_send(ifindex, now))
    }

    /// Returns None when PIM was already enabled and the priority is unchanged
    pub fn set_dr_priority(
        &mut self,
        ifindex: u32,
        dr_priority: u32,
        now: Instant,
    ) -> Result<Option<HelloSend>, EngineError> {
        let reenabled = self.activate(ifindex)?;
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(EngineError::UnknownLink(ifindex))?;
        if iface.dr_priority == dr_priority {
            if reenabled {
                return Ok(Some(self.hello_send(ifindex, now)));
            }
            return Ok(None);
        }
        iface.dr_priority = dr_priority;
        iface.reelect_dr();
        Ok(Some(self.hello_send(ifindex, now)))
    }

    pub fn reset_dr_priority(&mut self, ifindex: u32, now: Instant) -> Option<HelloSend> {
        let iface = self.interfaces.get_mut(&ifindex)?;
        if iface.dr_priority == DEFAULT_DR_PRIORITY {
            return None;
        }
        iface.dr_priority = DEFAULT_DR_PRIORITY;
        iface.reelect_dr();
        Some(self.hello_send(ifindex, now))
    }

    /// Apply the settings a configuration file gives for a link
    pub fn configure(
        &mut self,
        ifindex: u32,
        settings: &InterfaceConfig,
        now: Instant,
    ) -> Result<(), EngineError> {
        if !settings.enabled {
            self.ensure_interface(ifindex)?;
            let iface = self
                .interfaces
                .get_mut(&ifindex)
                .ok_or(EngineError::UnknownLink(ifindex))?;
            iface.enabled = false;
            self.timers.cancel_slot(&mut iface.hello_timer);
            self.leave_group(ifindex);
            return Ok(());
        }

        self.ensure_interface(ifindex)?;
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(EngineError::UnknownLink(ifindex))?;
        iface.enabled = true;
        iface.hello_interval = settings.hello_interval;
        iface.dr_priority = settings.dr_priority;
        iface.reelect_dr();
        log_info!(
            self.logger,
            Facility::Config,
            "{}: hello interval {}s, DR priority {}",
            iface.name,
            settings.hello_interval,
            settings.dr_priority
        );
        self.connected_address_update(ifindex, now);
        Ok(())
    }

    /// Send a Hello on `ifindex` and schedule the next one
    ///
    /// Any pending Hello timer is cancelled first. With `hello_interval == 0`
    /// a single Hello with holdtime 0 goes out and nothing is scheduled.
    pub fn hello_send(&mut self, ifindex: u32, now: Instant) -> HelloSend {
        let link_up = self.link_up(ifindex);
        let Some(iface) = self.interfaces.get_mut(&ifindex) else {
            return HelloSend::Skipped(HelloSkip::UnknownInterface);
        };
        self.timers.cancel_slot(&mut iface.hello_timer);

        if !iface.enabled && iface.hello_interval != 0 {
            log_debug!(self.logger, Facility::Hello, "PIM not enabled on {}, no Hello", iface.name);
            return HelloSend::Skipped(HelloSkip::NotEnabled);
        }
        let Some(source) = iface.local_address() else {
            log_warning!(
                self.logger,
                Facility::Hello,
                "{} has no link-local address, no Hello",
                iface.name
            );
            return HelloSend::Skipped(HelloSkip::NoLocalAddress);
        };
        if !link_up {
            log_debug!(self.logger, Facility::Hello, "{} is down, no Hello", iface.name);
            return HelloSend::Skipped(HelloSkip::LinkDown);
        }

        let holdtime = iface.advertised_holdtime();
        let packet = iface.build_hello(self.gen_id);
        if iface.hello_interval > 0 {
            let next = now + Duration::from_secs(u64::from(iface.hello_interval));
            iface.hello_timer = Some(self.timers.schedule(TimerType::Hello { ifindex }, next));
        }

        match self
            .transport
            .send(Some(source), ALL_PIM_ROUTERS, ifindex, &packet)
        {
            Ok(sent) if sent == packet.len() => {
                log_debug!(
                    self.logger,
                    Facility::Hello,
                    "sent Hello on {} (holdtime {})",
                    iface.name,
                    holdtime
                );
                HelloSend::Sent { holdtime }
            }
            Ok(sent) => {
                log_error!(
                    self.logger,
                    Facility::Transport,
                    "short Hello send on {}: {} of {} bytes",
                    iface.name,
                    sent,
                    packet.len()
                );
                HelloSend::Failed
            }
            Err(e) => {
                log_error!(self.logger, Facility::Transport, "Hello on {}: {:#}", iface.name, e);
                HelloSend::Failed
            }
        }
    }

    /// Re-derive the local address from the link and react to the result
    pub fn connected_address_update(&mut self, ifindex: u32, now: Instant) -> Option<HelloSend> {
        let link_local = self.links.get(ifindex).and_then(|link| link.link_local_address());
        let iface = self.interfaces.get_mut(&ifindex)?;
        if iface.set_local_address(link_local) {
            log_info!(
                self.logger,
                Facility::Link,
                "local address of {} is now {}",
                iface.name,
                link_local.map(|a| a.to_string()).unwrap_or_else(|| "unset".to_string())
            );
        }

        if link_local.is_none() {
            self.timers.cancel_slot(&mut iface.hello_timer);
            self.leave_group(ifindex);
            return None;
        }
        if !iface.enabled {
            return None;
        }
        self.timers.cancel_slot(&mut iface.hello_timer);
        self.join_group(ifindex);
        Some(self.hello_send(ifindex, now))
    }

    /// Apply a link or address notification
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        if !self.links.apply(&event) {
            log_debug!(
                self.logger,
                Facility::Link,
                "ignoring event for unknown ifindex {}",
                event.ifindex()
            );
            return;
        }

        match event {
            LinkEvent::Added(link) => {
                log_info!(
                    self.logger,
                    Facility::Link,
                    "link {} (ifindex {}) added, {}",
                    link.name,
                    link.ifindex,
                    if link.up { "up" } else { "down" }
                );
                if let Some(iface) = self.interfaces.get_mut(&link.ifindex) {
                    iface.name = link.name.clone();
                    if iface.enabled && link.up {
                        self.connected_address_update(link.ifindex, now);
                    }
                }
            }
            LinkEvent::Deleted(ifindex) => {
                // The kernel drops the membership with the link
                self.memberships.remove(&ifindex);
                if let Some(mut iface) = self.interfaces.remove(&ifindex) {
                    self.timers.cancel_slot(&mut iface.hello_timer);
                    let flushed = iface.flush_neighbors(&mut self.timers);
                    log_info!(
                        self.logger,
                        Facility::Link,
                        "link {} removed, PIM state dropped ({} neighbors)",
                        iface.name,
                        flushed
                    );
                } else {
                    log_debug!(self.logger, Facility::Link, "ifindex {} removed", ifindex);
                }
            }
            LinkEvent::StateChanged { ifindex, up } => {
                log_info!(
                    self.logger,
                    Facility::Link,
                    "ifindex {} is {}",
                    ifindex,
                    if up { "up" } else { "down" }
                );
                if up {
                    self.connected_address_update(ifindex, now);
                } else if let Some(iface) = self.interfaces.get_mut(&ifindex) {
                    self.timers.cancel_slot(&mut iface.hello_timer);
                }
            }
            LinkEvent::AddressAdded { ifindex, address }
            | LinkEvent::AddressRemoved { ifindex, address } => {
                log_debug!(self.logger, Facility::Link, "address {} changed on ifindex {}", address, ifindex);
                self.connected_address_update(ifindex, now);
            }
        }
    }

    /// Route one datagram to the interface it arrived on
    pub fn on_datagram(&mut self, datagram: &Datagram, now: Instant) -> Result<Dispatched, ReceiveError> {
        let iface = match self.interfaces.get_mut(&datagram.ifindex) {
            Some(iface) if iface.enabled => iface,
            _ => return Err(ReceiveError::InterfaceNotEnabled(datagram.ifindex)),
        };

        let (header, body) = split_message(&datagram.payload)?;
        match header.msg_type {
            PIM_HELLO => iface
                .hello_recv(datagram.source, body, now, &mut self.timers)
                .map(Dispatched::Hello),
            PIM_JOIN_PRUNE => iface.jp_recv(datagram.source, body).map(Dispatched::JoinPrune),
            other => {
                log_warning!(
                    self.logger,
                    Facility::Daemon,
                    "{} from {} on {} not implemented yet",
                    header.type_name(),
                    datagram.source,
                    iface.name
                );
                Ok(Dispatched::Unimplemented(other))
            }
        }
    }

    /// `on_datagram` with the error logged
    pub fn receive(&mut self, datagram: &Datagram, now: Instant) {
        if let Err(e) = self.on_datagram(datagram, now) {
            match &e {
                ReceiveError::Codec(_) => log_warning!(
                    self.logger,
                    Facility::Codec,
                    "dropping message from {} on ifindex {}: {}",
                    datagram.source,
                    datagram.ifindex,
                    e
                ),
                _ => log_debug!(
                    self.logger,
                    Facility::Daemon,
                    "dropping message from {} on ifindex {}: {}",
                    datagram.source,
                    datagram.ifindex,
                    e
                ),
            }
        }
    }

    /// Run every timer due at `now`. Returns how many fired.
    pub fn run_timers(&mut self, now: Instant) -> usize {
        let fired = self.timers.pop_expired(now);
        for timer in &fired {
            self.fire(timer, now);
        }
        fired.len()
    }

    fn fire(&mut self, timer: &FiredTimer, now: Instant) {
        match &timer.timer_type {
            TimerType::Hello { ifindex } => {
                let current = self
                    .interfaces
                    .get(ifindex)
                    .and_then(|iface| iface.hello_timer());
                if current != Some(timer.handle) {
                    log_debug!(self.logger, Facility::Hello, "stale Hello timer on ifindex {}", ifindex);
                    return;
                }
                self.hello_send(*ifindex, now);
            }
            TimerType::NeighborExpiry { ifindex, neighbor } => {
                if let Some(iface) = self.interfaces.get_mut(ifindex) {
                    iface.neighbor_expired(neighbor, timer.handle, &mut self.timers);
                }
            }
        }
    }

    /// Read-only view of every interface at `now`
    pub fn snapshot(&self, now: Instant) -> Vec<InterfaceInfo> {
        self.interfaces.values().map(|iface| iface.info(now)).collect()
    }

    /// Send a goodbye Hello on every enabled interface. Returns how many went out.
    pub fn shutdown(&mut self, now: Instant) -> usize {
        let enabled: Vec<u32> = self
            .interfaces
            .values()
            .filter(|iface| iface.enabled)
            .map(|iface| iface.ifindex)
            .collect();

        let mut sent = 0;
        for ifindex in enabled {
            let Some(iface) = self.interfaces.get_mut(&ifindex) else {
                continue;
            };
            let interval = iface.hello_interval;
            iface.hello_interval = 0;
            if matches!(self.hello_send(ifindex, now), HelloSend::Sent { .. }) {
                sent += 1;
            }
            if let Some(iface) = self.interfaces.get_mut(&ifindex) {
                iface.hello_interval = interval;
            }
            self.leave_group(ifindex);
        }
        log_info!(self.logger, Facility::Daemon, "sent {} goodbye Hellos", sent);
        sent
    }
}
