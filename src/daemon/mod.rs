// SPDX-License-Identifier: Apache-2.0 OR MIT
//! pim6d event loop
//!
//! One task on a current-thread runtime drives the engine: socket readiness,
//! the earliest pending timer, periodic link polling and signals all funnel
//! into synchronous `PimEngine` calls, so protocol state needs no locking.

pub mod engine;
pub mod link_monitor;
pub mod timers;
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{signal, SignalKind};

use crate::config::Config;
use crate::logging::{Facility, Logger};
use crate::{log_debug, log_emergency, log_error, log_info, log_warning};

use engine::PimEngine;
use link_monitor::{LinkEvent, LinkMonitor};
use transport::{PimTransport, RawPimSocket, RECV_BUFFER_LEN};

/// Upper bound on the sleep when no timer is pending
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Apply link events, then the configured settings of any link that just appeared
pub fn apply_link_events<T: PimTransport>(
    engine: &mut PimEngine<T>,
    config: &Config,
    events: Vec<LinkEvent>,
    logger: &Logger,
    now: Instant,
) {
    for event in events {
        let added = match &event {
            LinkEvent::Added(link) => Some((link.ifindex, link.name.clone())),
            _ => None,
        };
        engine.handle_link_event(event, now);

        let Some((ifindex, name)) = added else {
            continue;
        };
        let Some(settings) = config.interface(&name) else {
            continue;
        };
        if let Err(e) = engine.configure(ifindex, settings, now) {
            log_error!(logger, Facility::Config, "cannot configure {}: {}", name, e);
        }
    }
}

fn log_snapshot<T: PimTransport>(engine: &PimEngine<T>, logger: &Logger) {
    match serde_json::to_string(&engine.snapshot(Instant::now())) {
        Ok(json) => log_info!(logger, Facility::Daemon, "state {}", json),
        Err(e) => log_warning!(logger, Facility::Daemon, "cannot serialize state: {}", e),
    }
}

/// Run the daemon until SIGINT or SIGTERM
pub async fn run(config: Config, logger: Logger) -> Result<()> {
    let socket = match RawPimSocket::open() {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            log_emergency!(logger, Facility::Transport, "{:#}", e);
            return Err(e);
        }
    };
    let async_fd =
        AsyncFd::new(Arc::clone(&socket)).context("Failed to register PIM socket with tokio")?;

    let mut engine = PimEngine::new(socket, logger.clone());
    let mut monitor = LinkMonitor::new();
    apply_link_events(&mut engine, &config, monitor.poll(), &logger, Instant::now());

    let mut link_poll = tokio::time::interval(config.link_poll_interval());
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    log_info!(
        logger,
        Facility::Daemon,
        "pim6d running, {} links, {} configured interfaces",
        engine.links().len(),
        config.interfaces.len()
    );

    loop {
        let wakeup = engine
            .next_deadline()
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAKEUP);

        tokio::select! {
            ready = async_fd.readable() => {
                let mut guard = ready.context("PIM socket readiness failed")?;
                loop {
                    match guard.try_io(|fd| fd.get_ref().try_recv(&mut buf)) {
                        Ok(Ok(Some(datagram))) => engine.receive(&datagram, Instant::now()),
                        Ok(Ok(None)) => log_error!(
                            logger,
                            Facility::Transport,
                            "dropped datagram larger than {} bytes",
                            RECV_BUFFER_LEN
                        ),
                        Ok(Err(e)) => {
                            log_error!(logger, Facility::Transport, "PIM receive failed: {}", e);
                            break;
                        }
                        Err(_would_block) => break,
                    }
                }
            }
            _ = tokio::time::sleep_until(wakeup) => {
                let fired = engine.run_timers(Instant::now());
                log_debug!(logger, Facility::Daemon, "{} timers fired", fired);
            }
            _ = link_poll.tick() => {
                let events = monitor.poll();
                apply_link_events(&mut engine, &config, events, &logger, Instant::now());
            }
            _ = sigusr1.recv() => log_snapshot(&engine, &logger),
            _ = sigterm.recv() => {
                log_info!(logger, Facility::Daemon, "SIGTERM received");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                log_info!(logger, Facility::Daemon, "SIGINT received");
                break;
            }
        }
    }

    engine.shutdown(Instant::now());
    Ok(())
}
