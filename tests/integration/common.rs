//! Shared fixtures: a recording transport and an engine wired to fake links.

use std::net::Ipv6Addr;
use std::sync::Mutex;
use std::time::Instant;

use pim6d::daemon::engine::PimEngine;
use pim6d::daemon::link_monitor::{Link, LinkEvent};
use pim6d::daemon::transport::{Datagram, PimTransport};
use pim6d::logging::{Logger, MemoryWriter};
use pim6d::protocols::pim::{decode_hello, HelloOption, PimHelloBuilder, PIM_HEADER_LEN};
use pim6d::protocols::{PacketBuilder, ALL_PIM_ROUTERS};
use std::sync::Arc;

pub const IFINDEX: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Join(u32),
    Leave(u32),
    Send { ifindex: u32, payload: Vec<u8> },
}

/// Transport that records every call instead of touching a socket
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Holdtimes of the Hellos sent since the last `take`
    pub fn sent_holdtimes(&self) -> Vec<u16> {
        self.take()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { payload, .. } => Some(holdtime(&payload)),
                _ => None,
            })
            .collect()
    }
}

impl PimTransport for RecordingTransport {
    fn join_group(&self, ifindex: u32) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Join(ifindex));
        Ok(())
    }

    fn leave_group(&self, ifindex: u32) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Leave(ifindex));
        Ok(())
    }

    fn send(
        &self,
        _source: Option<Ipv6Addr>,
        _destination: Ipv6Addr,
        ifindex: u32,
        payload: &[u8],
    ) -> anyhow::Result<usize> {
        self.calls.lock().unwrap().push(Call::Send {
            ifindex,
            payload: payload.to_vec(),
        });
        Ok(payload.len())
    }
}

pub fn addr(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

fn holdtime(payload: &[u8]) -> u16 {
    decode_hello(&payload[PIM_HEADER_LEN..])
        .unwrap()
        .into_iter()
        .find_map(|option| match option {
            HelloOption::Holdtime(h) => Some(h),
            _ => None,
        })
        .unwrap()
}

pub struct Harness {
    pub engine: PimEngine<RecordingTransport>,
    pub log: Arc<MemoryWriter>,
    pub start: Instant,
}

impl Harness {
    /// One up link `eth0` with `local` as its link-local address, PIM enabled
    pub fn new(local: &str, dr_priority: u32) -> Self {
        let (logger, log) = Logger::memory();
        let mut engine = PimEngine::with_generation_id(RecordingTransport::default(), logger, 0x1234);
        let start = Instant::now();
        engine.handle_link_event(
            LinkEvent::Added(Link::new(IFINDEX, "eth0", true, vec![addr(local)])),
            start,
        );
        engine.enable(IFINDEX, start).unwrap();
        engine.set_dr_priority(IFINDEX, dr_priority, start).unwrap();
        engine.transport().take();
        Self { engine, log, start }
    }

    pub fn deliver(&mut self, source: &str, payload: Vec<u8>, now: Instant) {
        self.engine.receive(
            &Datagram {
                source: addr(source),
                destination: ALL_PIM_ROUTERS,
                ifindex: IFINDEX,
                payload,
            },
            now,
        );
    }

    pub fn hello(&mut self, source: &str, builder: PimHelloBuilder, now: Instant) {
        self.deliver(source, builder.build(), now);
    }
}
