//! Join/Prune receive path: sender and upstream checks, record validation.

use pim6d::daemon::engine::{Dispatched, ReceiveError};
use pim6d::daemon::transport::Datagram;
use pim6d::logging::Severity;
use pim6d::protocols::pim::{
    CodecError, EncodedGroup, EncodedSource, JoinPruneBuilder, PimHelloBuilder,
};
use pim6d::protocols::{PacketBuilder, ALL_PIM_ROUTERS};

use crate::common::{addr, Harness, IFINDEX};

fn datagram(source: &str, payload: Vec<u8>) -> Datagram {
    Datagram {
        source: addr(source),
        destination: ALL_PIM_ROUTERS,
        ifindex: IFINDEX,
        payload,
    }
}

fn join_for(upstream: &str) -> Vec<u8> {
    JoinPruneBuilder::new(addr(upstream), 210)
        .group(
            EncodedGroup::new(addr("ff3e::8000:1"), 128),
            vec![EncodedSource::host(addr("2001:db8::10"))],
            vec![],
        )
        .group(
            EncodedGroup::new(addr("ff3e::8000:2"), 128),
            vec![EncodedSource::wildcard(addr("2001:db8::1"))],
            vec![EncodedSource::host(addr("2001:db8::11"))],
        )
        .build()
}

#[test]
fn test_join_from_unknown_sender_discarded() {
    let mut h = Harness::new("fe80::1", 1);
    let result = h
        .engine
        .on_datagram(&datagram("fe80::a", join_for("fe80::1")), h.start);
    assert_eq!(result.unwrap_err(), ReceiveError::UnknownNeighbor(addr("fe80::a")));
    assert!(h.engine.interface(IFINDEX).unwrap().neighbors().is_empty());
}

#[test]
fn test_join_addressed_to_us() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 1, 1), h.start);

    let result = h
        .engine
        .on_datagram(&datagram("fe80::a", join_for("fe80::1")), h.start)
        .unwrap();
    let summary = match result {
        Dispatched::JoinPrune(summary) => summary,
        other => panic!("expected a Join/Prune, got {:?}", other),
    };
    assert_eq!(summary.valid_groups, 2);
    assert_eq!(summary.invalid_records, 0);
    assert_eq!(summary.message.groups[1].prunes.len(), 1);
    assert!(summary.message.groups[1].joins[0].wildcard);
}

#[test]
fn test_join_for_other_upstream_ignored() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 1, 1), h.start);

    let result = h
        .engine
        .on_datagram(&datagram("fe80::a", join_for("fe80::b")), h.start);
    assert_eq!(
        result.unwrap_err(),
        ReceiveError::NotAddressedToUs {
            upstream: addr("fe80::b")
        }
    );
}

#[test]
fn test_truncated_join_rejected() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 1, 1), h.start);

    let mut payload = join_for("fe80::1");
    payload.truncate(payload.len() - 5);
    let result = h.engine.on_datagram(&datagram("fe80::a", payload.clone()), h.start);
    assert!(matches!(
        result,
        Err(ReceiveError::Codec(CodecError::TruncatedMessage { .. }))
    ));

    h.engine.receive(&datagram("fe80::a", payload), h.start);
    assert!(h.log.contains(Severity::Warning, "dropping message from fe80::a"));
}

#[test]
fn test_invalid_group_logged_and_skipped() {
    let mut h = Harness::new("fe80::1", 1);
    h.hello("fe80::a", PimHelloBuilder::new(105, 1, 1), h.start);

    let payload = JoinPruneBuilder::new(addr("fe80::1"), 210)
        .group(EncodedGroup::new(addr("2001:db8::5"), 128), vec![], vec![])
        .group(
            EncodedGroup::new(addr("ff3e::1"), 128),
            vec![EncodedSource::host(addr("2001:db8::10"))],
            vec![],
        )
        .build();
    let result = h
        .engine
        .on_datagram(&datagram("fe80::a", payload), h.start)
        .unwrap();
    let summary = match result {
        Dispatched::JoinPrune(summary) => summary,
        other => panic!("expected a Join/Prune, got {:?}", other),
    };
    assert_eq!(summary.valid_groups, 1);
    assert_eq!(summary.invalid_records, 1);
    assert!(h.log.contains(Severity::Warning, "group address is not multicast"));
}
