//! Property-based tests for the envelope parser.
//!
//! Uses proptest to verify:
//! 1. Any non-empty UTF-8 room code survives encode → `parse` as a join.
//! 2. Any non-`connect` envelope parses as a relay, whatever its payload.
//! 3. Random bytes never cause a panic in `parse` (returns `Err` gracefully).

use netplay_proto::envelope::{self, GameMessage, Inbound, KIND_CONNECT};
use proptest::prelude::*;

/// Strategy for message kinds other than `connect`.
fn arb_relay_kind() -> impl Strategy<Value = String> {
    "[a-zA-Z_]{0,16}".prop_filter("connect is the join kind", |k| k != KIND_CONNECT)
}

proptest! {
    #[test]
    fn room_codes_survive_parsing(code in "\\PC{1,64}") {
        let bytes = GameMessage::new(KIND_CONNECT, code.as_str()).to_bytes().unwrap();
        prop_assert_eq!(envelope::parse(&bytes).unwrap(), Inbound::Join { code });
    }

    #[test]
    fn non_connect_kinds_are_relayed(
        kind in arb_relay_kind(),
        data in prop::collection::vec(any::<u8>(), 0..2048),
        msg in "\\PC{0,64}",
    ) {
        let message = GameMessage { kind: kind.clone(), data, msg };
        let bytes = message.to_bytes().unwrap();
        prop_assert_eq!(envelope::parse(&bytes).unwrap(), Inbound::Relay { kind });

        // The decoded envelope is the one that was sent.
        let decoded: GameMessage = serde_json::from_slice(&bytes).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = envelope::parse(&bytes);
    }
}
