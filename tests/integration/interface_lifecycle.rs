//! Hello scheduling, disable/leave, link and address changes.

use std::time::Duration;

use pim6d::daemon::engine::{HelloSend, HelloSkip};
use pim6d::daemon::link_monitor::{Link, LinkEvent};
use pim6d::protocols::pim::PimHelloBuilder;

use crate::common::{addr, Call, Harness, IFINDEX};

#[test]
fn test_periodic_hellos_follow_interval() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.set_hello_interval(IFINDEX, 10, h.start).unwrap();
    assert_eq!(h.engine.transport().sent_holdtimes(), vec![35]);

    for tick in 1..=3 {
        h.engine.run_timers(h.start + Duration::from_secs(10 * tick));
    }
    assert_eq!(h.engine.transport().sent_holdtimes(), vec![35, 35, 35]);
    assert_eq!(h.engine.timers().len(), 1);
}

#[test]
fn test_disable_sends_goodbye_and_flushes() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 1), h.start);
    assert!(!h.engine.interface(IFINDEX).unwrap().am_dr());

    h.engine.disable(IFINDEX, h.start).unwrap();
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Leave(IFINDEX));
    assert_eq!(calls.len(), 2);

    let iface = h.engine.interface(IFINDEX).unwrap();
    assert!(!iface.enabled);
    assert!(iface.neighbors().is_empty());
    assert!(iface.am_dr());
    assert!(h.engine.timers().is_empty());

    // Nothing further goes out, even long after
    h.engine.run_timers(h.start + Duration::from_secs(3600));
    assert!(h.engine.transport().take().is_empty());
    assert_eq!(
        h.engine.hello_send(IFINDEX, h.start),
        HelloSend::Skipped(HelloSkip::NotEnabled)
    );
}

#[test]
fn test_goodbye_has_zero_holdtime() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    assert_eq!(h.engine.transport().sent_holdtimes(), vec![0]);
}

#[test]
fn test_reenable_after_disable_rejoins() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    h.engine.transport().take();

    h.engine.enable(IFINDEX, h.start).unwrap();
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Join(IFINDEX));
    assert!(matches!(calls[1], Call::Send { .. }));
}

#[test]
fn test_dr_priority_after_disable_rejoins() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    h.engine.transport().take();

    let sent = h.engine.set_dr_priority(IFINDEX, 50, h.start).unwrap();
    assert_eq!(sent, Some(HelloSend::Sent { holdtime: 105 }));
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Join(IFINDEX));
    assert!(matches!(calls[1], Call::Send { .. }));
    assert!(h.engine.interface(IFINDEX).unwrap().enabled);

    // Neighbors are heard again
    h.hello("fe80::a", PimHelloBuilder::new(105, 100, 1), h.start);
    assert!(!h.engine.interface(IFINDEX).unwrap().am_dr());
}

#[test]
fn test_hello_interval_after_disable_rejoins() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    h.engine.transport().take();

    let sent = h.engine.set_hello_interval(IFINDEX, 10, h.start).unwrap();
    assert_eq!(sent, Some(HelloSend::Sent { holdtime: 35 }));
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Join(IFINDEX));
    assert_eq!(calls.len(), 2);
    assert_eq!(
        h.engine.next_deadline(),
        Some(h.start + Duration::from_secs(10))
    );
}

#[test]
fn test_unchanged_setting_after_disable_still_announces() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    h.engine.transport().take();

    // disable restored the defaults, so these values are unchanged
    let sent = h.engine.set_dr_priority(IFINDEX, 1, h.start).unwrap();
    assert_eq!(sent, Some(HelloSend::Sent { holdtime: 105 }));
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Join(IFINDEX));
    assert_eq!(calls.len(), 2);
    assert_eq!(
        h.engine.next_deadline(),
        Some(h.start + Duration::from_secs(30))
    );

    // Already enabled now: a repeat is a no-op
    assert_eq!(h.engine.set_hello_interval(IFINDEX, 30, h.start).unwrap(), None);
    assert!(h.engine.transport().take().is_empty());
}

#[test]
fn test_datagrams_ignored_after_disable() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.disable(IFINDEX, h.start).unwrap();
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 1), h.start);
    assert!(h.engine.interface(IFINDEX).unwrap().neighbors().is_empty());
}

#[test]
fn test_address_loss_stops_hellos() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.handle_link_event(
        LinkEvent::AddressRemoved {
            ifindex: IFINDEX,
            address: addr("fe80::1"),
        },
        h.start,
    );
    assert_eq!(h.engine.transport().take(), vec![Call::Leave(IFINDEX)]);
    assert_eq!(h.engine.interface(IFINDEX).unwrap().local_address(), None);

    h.engine.run_timers(h.start + Duration::from_secs(60));
    assert!(h.engine.transport().take().is_empty());

    // A global address alone is not enough, and the group was already left
    h.engine.handle_link_event(
        LinkEvent::AddressAdded {
            ifindex: IFINDEX,
            address: addr("2001:db8::1"),
        },
        h.start,
    );
    assert!(h.engine.transport().take().is_empty());

    h.engine.handle_link_event(
        LinkEvent::AddressAdded {
            ifindex: IFINDEX,
            address: addr("fe80::2"),
        },
        h.start,
    );
    let calls = h.engine.transport().take();
    assert_eq!(calls[0], Call::Join(IFINDEX));
    assert_eq!(calls.len(), 2);
}

#[test]
fn test_new_local_address_reelects() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::5", PimHelloBuilder::new(105, 1, 1), h.start);
    assert!(!h.engine.interface(IFINDEX).unwrap().am_dr());

    h.engine.handle_link_event(
        LinkEvent::AddressRemoved {
            ifindex: IFINDEX,
            address: addr("fe80::1"),
        },
        h.start,
    );
    h.engine.handle_link_event(
        LinkEvent::AddressAdded {
            ifindex: IFINDEX,
            address: addr("fe80::9"),
        },
        h.start,
    );
    assert!(h.engine.interface(IFINDEX).unwrap().am_dr());
}

#[test]
fn test_link_down_and_up() {
    let mut h = Harness::new("fe80::1", 1);
    h.engine.handle_link_event(
        LinkEvent::StateChanged {
            ifindex: IFINDEX,
            up: false,
        },
        h.start,
    );
    h.engine.run_timers(h.start + Duration::from_secs(60));
    assert!(h.engine.transport().take().is_empty());

    let later = h.start + Duration::from_secs(61);
    h.engine.handle_link_event(
        LinkEvent::StateChanged {
            ifindex: IFINDEX,
            up: true,
        },
        later,
    );
    assert_eq!(h.engine.transport().sent_holdtimes(), vec![105]);
    assert_eq!(
        h.engine.next_deadline(),
        Some(later + Duration::from_secs(30))
    );
}

#[test]
fn test_link_removed_and_readded() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 1), h.start);

    h.engine.handle_link_event(LinkEvent::Deleted(IFINDEX), h.start);
    assert!(h.engine.interface(IFINDEX).is_none());
    assert!(h.engine.timers().is_empty());

    // Comes back without PIM state: nothing is sent until configured again
    h.engine.transport().take();
    h.engine.handle_link_event(
        LinkEvent::Added(Link::new(IFINDEX, "eth0", true, vec![addr("fe80::1")])),
        h.start,
    );
    assert!(h.engine.transport().take().is_empty());
    assert!(h.engine.interface(IFINDEX).is_none());
}

#[test]
fn test_shutdown_says_goodbye() {
    let mut h = Harness::new("fe80::1", 1);
    assert_eq!(h.engine.shutdown(h.start), 1);
    let calls = h.engine.transport().take();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], Call::Leave(IFINDEX));
}
