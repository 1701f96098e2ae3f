//! Property-Based Tests: PIM codec and DR election
//!
//! These tests use the `proptest` framework to throw generated inputs at the
//! wire codec and the election rule.
//!
//! # Coverage
//!
//! - **Hello round-trip:** every (holdtime, priority, generation ID) triple
//!   decodes back to exactly what was encoded.
//! - **Truncation:** a TLV whose declared length overruns the buffer is
//!   reported as `TruncatedMessage`, never read past.
//! - **Arbitrary bytes:** no decoder panics on any input.
//! - **Election:** the winner is stable across repeated runs and follows the
//!   priority or address-only rule.

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use pim6d::protocols::interface::{elect_dr, Candidate, DrRef};
    use pim6d::protocols::pim::{
        decode_hello, decode_join_prune, encode_hello, split_message, CodecError, HelloOption,
        HelloOptions, PimHeader, PIM_HEADER_LEN,
    };
    use proptest::prelude::*;

    fn candidate_strategy() -> impl Strategy<Value = Candidate> {
        (any::<u16>(), any::<u32>(), any::<bool>()).prop_map(|(low, dr_priority, has)| {
            let address = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, low);
            Candidate {
                id: DrRef::Neighbor(address),
                address,
                dr_priority,
                has_dr_priority: has,
            }
        })
    }

    proptest! {
        /// **Property:** decode_hello(encode_hello(h, p, g)) == [HoldTime h, DR-Priority p, GenID g]
        #[test]
        fn test_hello_roundtrip(h in any::<u16>(), p in any::<u32>(), g in any::<u32>()) {
            let packet = encode_hello(h, p, g);
            let (header, body) = split_message(&packet).unwrap();
            prop_assert_eq!(header.msg_type, 0);
            prop_assert_eq!(
                decode_hello(body).unwrap(),
                vec![
                    HelloOption::Holdtime(h),
                    HelloOption::DrPriority(p),
                    HelloOption::GenerationId(g),
                ]
            );
        }

        /// **Property:** a TLV claiming more bytes than remain is TruncatedMessage
        #[test]
        fn test_overlong_tlv_is_truncated(
            option_type in any::<u16>(),
            available in 0usize..64,
            extra in 1u16..512,
        ) {
            let declared = available as u16 + extra;
            let mut body = Vec::new();
            body.extend_from_slice(&option_type.to_be_bytes());
            body.extend_from_slice(&declared.to_be_bytes());
            body.extend(std::iter::repeat(0xaa).take(available));

            let first = HelloOptions::new(&body).next();
            let is_truncated = matches!(first, Some(Err(CodecError::TruncatedMessage { .. })));
            prop_assert!(is_truncated, "got {:?}", first);
        }

        /// **Property:** no decoder panics on arbitrary bytes
        #[test]
        fn test_decoders_do_not_panic(input in any::<Vec<u8>>()) {
            let _ = PimHeader::parse(&input);
            let _ = decode_hello(&input);
            let _ = decode_join_prune(&input);
            // The iterator must terminate
            prop_assert!(HelloOptions::new(&input).count() <= input.len() / 4 + 1);
        }

        /// **Property:** the header check never accepts a header-only message
        #[test]
        fn test_short_messages_rejected(input in proptest::collection::vec(any::<u8>(), 0..=PIM_HEADER_LEN)) {
            prop_assert!(PimHeader::parse(&input).is_err());
        }

        /// **Property:** election is deterministic and follows the winner rule
        #[test]
        fn test_election_winner_rule(
            candidates in proptest::collection::vec(candidate_strategy(), 1..12),
        ) {
            let dr_absent = candidates.iter().any(|c| !c.has_dr_priority);
            let first = elect_dr(&candidates, dr_absent).unwrap().address;
            let second = elect_dr(&candidates, dr_absent).unwrap().address;
            prop_assert_eq!(first, second);

            if dr_absent {
                let max_address = candidates.iter().map(|c| c.address).max().unwrap();
                prop_assert_eq!(first, max_address);
            } else {
                let best = candidates
                    .iter()
                    .map(|c| (c.dr_priority, c.address))
                    .max()
                    .unwrap();
                prop_assert_eq!(first, best.1);
            }
        }
    }
}
