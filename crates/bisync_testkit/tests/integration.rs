//! The engine driving the fake server end to end.

use bisync_engine::{
    CollectionOp, FieldState, HttpMethod, ListRequest, Scope, Selection, SyncEvent,
};
use bisync_schema::{
    AttributeSchema, CollectionSpec, Endpoint, FieldCodec, IdPath, PatchStyle, ReadGroup, Value,
    WriteGroup,
};
use bisync_testkit::prelude::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

fn team_schema() -> AttributeSchema {
    AttributeSchema::builder("team")
        .field("id", FieldCodec::Text)
        .field("name", FieldCodec::Text)
        .field("members", FieldCodec::IdSet(IdPath::at(&["id"])))
        .read(ReadGroup::new(
            "info",
            Endpoint::get("/api/teams/{id}"),
            &["id", "name", "members"],
        ))
        .write(WriteGroup::new(
            "update",
            Endpoint::put("/api/teams/{id}"),
            PatchStyle::PartialPut,
            &["name"],
        ))
        .collection(CollectionSpec::new("members", Endpoint::patch("/api/teams/{id}")))
        .build()
}

fn seed_teams(test: &TestEngine, count: usize) {
    test.server.serve_listing("/api/teams", None);
    for i in 0..count {
        test.server.insert(
            &format!("/api/teams/T{i}"),
            json!({"id": format!("T{i}"), "name": format!("Team {i}"), "members": []}),
        );
    }
}

#[test]
fn listing_walks_every_page() {
    init_tracing();
    let test = TestEngine::new(CURRENT_VERSION);
    seed_teams(&test, 5);

    let records = test
        .list(&ListRequest::new(Endpoint::get("/api/teams")), &Scope::global())
        .unwrap();

    let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["T0", "T1", "T2", "T3", "T4"]);
    assert_eq!(test.server.count(HttpMethod::Get), 3);
    let pages = test
        .events
        .matching(|e| matches!(e, SyncEvent::PageFetched { .. }));
    assert_eq!(pages.len(), 3);
}

#[test]
fn flushed_value_reads_back() {
    let test = TestEngine::new(CURRENT_VERSION);
    seed_teams(&test, 1);
    let schema = team_schema();
    let mut state = FieldState::new();

    test.set_field(&schema, &mut state, "name", Value::Text("Platform".into()))
        .unwrap();
    test.flush(&schema, &mut state, "T0", &Scope::global()).unwrap();
    assert!(!state.is_dirty());

    let mut fresh = FieldState::new();
    test.fetch(&schema, &mut fresh, "T0", &Selection::All, true, &Scope::global())
        .unwrap();
    assert_eq!(fresh.get("name"), Some(&Value::Text("Platform".into())));
}

#[test]
fn failed_write_keeps_field_dirty() {
    let test = TestEngine::new(CURRENT_VERSION);
    seed_teams(&test, 1);
    test.server.fail_once(HttpMethod::Put, "/api/teams/T0", 500);
    let schema = team_schema();
    let mut state = FieldState::new();

    test.set_field(&schema, &mut state, "name", Value::Text("Platform".into()))
        .unwrap();
    assert!(test.flush(&schema, &mut state, "T0", &Scope::global()).is_err());
    assert!(state.is_field_dirty("name"));

    test.flush(&schema, &mut state, "T0", &Scope::global()).unwrap();
    assert_eq!(
        test.server.document("/api/teams/T0").unwrap()["name"],
        "Platform"
    );
}

#[test]
fn repeated_add_is_a_noop() {
    let test = TestEngine::new(CURRENT_VERSION);
    seed_teams(&test, 1);
    let schema = team_schema();
    let mut state = FieldState::new();
    let members: BTreeSet<String> = ["U1".to_string()].into();

    let first = test
        .mutate_collection(&schema, &mut state, "T0", "members", CollectionOp::Add, &members, &Scope::global())
        .unwrap();
    let second = test
        .mutate_collection(&schema, &mut state, "T0", "members", CollectionOp::Add, &members, &Scope::global())
        .unwrap();

    assert_eq!(first.succeeded, members);
    assert!(second.is_noop());
    assert_eq!(test.server.count(HttpMethod::Patch), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn collection_matches_set_algebra(
        (current, candidates) in membership_scenario_strategy(),
        op in collection_op_strategy(),
    ) {
        let test = TestEngine::new(CURRENT_VERSION);
        let members: Vec<_> = current.iter().map(|id| json!({"id": id})).collect();
        test.server.insert("/api/teams/T0", json!({"id": "T0", "members": members}));
        let schema = team_schema();
        let mut state = FieldState::new();

        let outcome = test
            .mutate_collection(&schema, &mut state, "T0", "members", op, &candidates, &Scope::global())
            .unwrap();

        let expected: BTreeSet<String> = match op {
            CollectionOp::Add => current.union(&candidates).cloned().collect(),
            _ => current.difference(&candidates).cloned().collect(),
        };
        let stored: BTreeSet<String> = test.server.document("/api/teams/T0").unwrap()["members"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap().to_string())
            .collect();
        prop_assert_eq!(stored, expected);
        prop_assert_eq!(outcome.succeeded.len() + outcome.already.len(), candidates.len());
    }
}
