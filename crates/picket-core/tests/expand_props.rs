// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property tests for data-store expansion.

use bytes::Bytes;
use picket_core::{EngineError, Field, TxData, EXPAND_LIMIT};
use proptest::prelude::*;

proptest! {
    /// Templates with no token opener expand to themselves.
    #[test]
    fn tokenless_templates_are_identity(input in "[a-zA-Z0-9 .,;:!?/_-]{0,256}") {
        let data = TxData::new();
        let out = data.expand(input.as_bytes(), EXPAND_LIMIT).unwrap();
        prop_assert_eq!(out, Bytes::from(input));
    }

    /// Expansion output never exceeds the requested bound.
    #[test]
    fn expansion_respects_the_bound(
        value in "[a-z]{0,64}",
        limit in 0usize..128,
    ) {
        let mut data = TxData::new();
        data.set(Field::bytes("V", value));
        match data.expand(b"pre %{V} post", limit) {
            Ok(out) => prop_assert!(out.len() <= limit),
            Err(EngineError::Truncated) => {}
            Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
        }
    }

    /// set/get round-trips for arbitrary names and values.
    #[test]
    fn set_get_round_trips(name in "[A-Za-z_][A-Za-z0-9_]{0,32}", value in any::<Vec<u8>>()) {
        let mut data = TxData::new();
        data.set(Field::bytes(name.clone(), value.clone()));
        let got = data.get(&name).unwrap();
        prop_assert_eq!(got.as_bytes().unwrap().as_ref(), value.as_slice());
    }
}
