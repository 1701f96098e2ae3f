//! DR election across Hello processing, expiry and configuration changes.

use std::time::Duration;

use pim6d::logging::Severity;
use pim6d::protocols::interface::DrRef;
use pim6d::protocols::pim::PimHelloBuilder;

use crate::common::{addr, Harness, IFINDEX};

#[test]
fn test_no_neighbors_self_is_dr() {
    let mut h = Harness::new("fe80::1", 5);
    let iface = h.engine.interface(IFINDEX).unwrap();
    assert!(iface.am_dr());
    assert_eq!(iface.dr_address(), Some(addr("fe80::1")));

    // Re-running the election without input changes keeps the result
    let now = h.start;
    h.engine.set_dr_priority(IFINDEX, 5, now).unwrap();
    assert!(h.engine.interface(IFINDEX).unwrap().am_dr());
}

#[test]
fn test_higher_priority_neighbor_becomes_dr() {
    let mut h = Harness::new("fe80::1", 5);
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 1), h.start);

    let iface = h.engine.interface(IFINDEX).unwrap();
    assert_eq!(iface.dr(), DrRef::Neighbor(addr("fe80::a")));
    assert!(!iface.am_dr());
    assert!(h.log.contains(Severity::Notice, "DR changed"));
}

#[test]
fn test_missing_priority_switches_to_address_only() {
    let mut h = Harness::new("fe80::1:0", 5);
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 1), h.start);
    assert!(!h.engine.interface(IFINDEX).unwrap().am_dr());

    h.hello(
        "fe80::a",
        PimHelloBuilder::new(105, 10, 1).without_dr_priority(),
        h.start + Duration::from_secs(30),
    );
    let iface = h.engine.interface(IFINDEX).unwrap();
    assert!(iface.dr_absent());
    // fe80::1:0 > fe80::a once priority no longer counts
    assert!(iface.am_dr());
    assert_eq!(iface.neighbor(&addr("fe80::a")).unwrap().dr_priority, 10);
}

#[test]
fn test_dr_expiry_falls_back_to_self() {
    let mut h = Harness::new("fe80::1", 5);
    h.hello("fe80::a", PimHelloBuilder::new(10, 10, 1), h.start);
    assert!(!h.engine.interface(IFINDEX).unwrap().am_dr());

    h.engine.run_timers(h.start + Duration::from_secs(9));
    assert!(h.engine.interface(IFINDEX).unwrap().neighbor(&addr("fe80::a")).is_some());

    h.engine.run_timers(h.start + Duration::from_secs(10));
    let iface = h.engine.interface(IFINDEX).unwrap();
    assert!(iface.neighbors().is_empty());
    assert!(iface.am_dr());
    assert_eq!(iface.dr_address(), Some(addr("fe80::1")));
}

#[test]
fn test_dr_expiry_promotes_next_neighbor() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(10, 30, 1), h.start);
    h.hello("fe80::b", PimHelloBuilder::new(105, 20, 1), h.start);
    assert_eq!(
        h.engine.interface(IFINDEX).unwrap().dr(),
        DrRef::Neighbor(addr("fe80::a"))
    );

    h.engine.run_timers(h.start + Duration::from_secs(10));
    assert_eq!(
        h.engine.interface(IFINDEX).unwrap().dr(),
        DrRef::Neighbor(addr("fe80::b"))
    );
}

#[test]
fn test_truncated_hello_applies_nothing() {
    let mut h = Harness::new("fe80::1", 1);
    // Header plus a 9-byte body: HoldTime TLV claiming a 20-byte value
    let mut payload = vec![0x20, 0, 0, 0];
    payload.extend_from_slice(&[0, 1, 0, 20, 1, 2, 3, 4, 5]);
    h.deliver("fe80::a", payload, h.start);

    let iface = h.engine.interface(IFINDEX).unwrap();
    assert!(iface.neighbors().is_empty());
    assert!(iface.am_dr());
    assert_eq!(h.engine.timers().len(), 1, "only the Hello timer remains");
    assert!(h.log.contains(Severity::Warning, "truncated"));
}

#[test]
fn test_equal_priority_highest_address_wins() {
    let mut h = Harness::new("fe80::5", 7);
    h.hello("fe80::3", PimHelloBuilder::new(105, 7, 1), h.start);
    assert!(h.engine.interface(IFINDEX).unwrap().am_dr());

    h.hello("fe80::9", PimHelloBuilder::new(105, 7, 1), h.start);
    assert_eq!(
        h.engine.interface(IFINDEX).unwrap().dr(),
        DrRef::Neighbor(addr("fe80::9"))
    );
}

#[test]
fn test_identical_hellos_do_not_reelect() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 10, 99), h.start);
    h.log.clear();

    for i in 1..4 {
        h.hello(
            "fe80::a",
            PimHelloBuilder::new(105, 10, 99),
            h.start + Duration::from_secs(30 * i),
        );
    }
    assert!(!h.log.contains(Severity::Notice, "DR changed"));
    assert!(!h.log.contains(Severity::Notice, "generation ID"));
}
