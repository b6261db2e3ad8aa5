//! Property-based test generators using proptest.

use bisync_engine::CollectionOp;
use bisync_schema::{GatePolicy, ServerVersion};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for 32-character upper-case hex object ids.
pub fn object_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9A-F]{32}").expect("Invalid regex")
}

/// Strategy for short ids drawn from a small pool, so sets overlap often.
pub fn pooled_id_strategy() -> impl Strategy<Value = String> {
    (0u8..12).prop_map(|n| format!("ID{n:02}"))
}

/// Strategy for sets of pooled ids with up to `max` members.
pub fn id_set_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(pooled_id_strategy(), 0..=max)
}

/// Strategy for server versions around the 11.3 line.
pub fn server_version_strategy() -> impl Strategy<Value = ServerVersion> {
    (11u32..=12, 0u32..=4, 0u32..=1000).prop_map(|(major, minor, build)| {
        ServerVersion::new(major, minor, build, 0)
    })
}

/// Strategy for gate policies.
pub fn gate_policy_strategy() -> impl Strategy<Value = GatePolicy> {
    prop_oneof![
        Just(GatePolicy::Silent),
        Just(GatePolicy::Warn),
        Just(GatePolicy::Raise),
    ]
}

/// Strategy for incremental collection operations.
pub fn collection_op_strategy() -> impl Strategy<Value = CollectionOp> {
    prop_oneof![Just(CollectionOp::Add), Just(CollectionOp::Remove)]
}

/// Strategy for a current membership paired with a candidate set.
pub fn membership_scenario_strategy() -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
    (id_set_strategy(8), id_set_strategy(8))
}
