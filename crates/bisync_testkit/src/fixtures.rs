//! Test fixtures: engines wired to a fake server, and sample payloads.

use crate::fake_server::FakeServer;
use crate::observer::RecordingObserver;
use bisync_engine::{SyncConfig, SyncEngine};
use bisync_schema::GatePolicy;
use serde_json::{json, Value as Json};
use std::ops::Deref;
use std::sync::Arc;

/// Server version that passes every gate in the entity catalogue.
pub const CURRENT_VERSION: &str = "11.3.0800";

/// Sample user id.
pub const USER_ID: &str = "54F3D26011D2896560009A8E67019608";
/// Sample user group id.
pub const USER_GROUP_ID: &str = "E96685CD4E60068559F7DFAC7C2AA851";
/// Sample security role id.
pub const SECURITY_ROLE_ID: &str = "6DE32E1E4BC3B3ECFD5D1EB9D3C4A2B1";
/// Sample project id.
pub const PROJECT_ID: &str = "B7CA92F04B9FAE8D941C3E9B7E0CD754";

/// An engine, the fake server behind it and the events it reported.
pub struct TestEngine {
    /// Shared engine.
    pub engine: Arc<SyncEngine>,
    /// Server the engine talks to.
    pub server: Arc<FakeServer>,
    /// Recorded events.
    pub events: Arc<RecordingObserver>,
}

impl TestEngine {
    /// An engine for a server at `version` that raises on gated features.
    pub fn new(version: &str) -> Self {
        Self::with_policy(version, GatePolicy::Raise)
    }

    /// An engine for a server at `version` with a gate policy.
    pub fn with_policy(version: &str, policy: GatePolicy) -> Self {
        let config = SyncConfig::new(version.parse().expect("valid server version"))
            .with_gate_policy(policy)
            .with_page_size(2);
        let server = Arc::new(FakeServer::new());
        let events = Arc::new(RecordingObserver::new());
        let engine = SyncEngine::new(config, server.clone()).with_observer(events.clone());
        Self {
            engine: Arc::new(engine),
            server,
            events,
        }
    }

    /// An engine for the current server, with the sample directory seeded.
    pub fn seeded() -> Self {
        let test = Self::new(CURRENT_VERSION);
        seed_directory(&test.server);
        test
    }
}

impl Deref for TestEngine {
    type Target = Arc<SyncEngine>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs `f` with a seeded engine.
pub fn with_test_engine<F, R>(f: F) -> R
where
    F: FnOnce(&TestEngine) -> R,
{
    init_tracing();
    let test = TestEngine::seeded();
    f(&test)
}

/// Installs a test-writer subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registers listings, routing and one sample of each entity.
pub fn seed_directory(server: &FakeServer) {
    server.serve_listing("/api/users", None);
    server.serve_listing("/api/usergroups", None);
    server.serve_listing("/api/securityRoles", None);
    server.serve_listing("/api/v2/fences", Some("fences"));
    server.member_template("privileges", |id| privilege_entry(id, true));

    let user = format!("/api/users/{USER_ID}");
    server.insert(&user, user_payload(USER_ID, "jdoe"));
    server.insert(&format!("{user}/addresses"), json!({"addresses": []}));
    server.insert(&format!("{user}/securityRoles"), json!([]));
    server.insert(&format!("{user}/privileges"), json!([]));

    let group = format!("/api/usergroups/{USER_GROUP_ID}");
    server.insert(&group, user_group_payload(USER_GROUP_ID, "Analysts"));
    server.insert(&format!("{group}/members"), json!([]));
    server.insert(&format!("{group}/memberships"), json!([]));
    server.insert(&format!("{group}/securityRoles"), json!([]));
    server.insert(&format!("{group}/privileges"), json!([]));
    server.alias(&format!("/api/objects/{USER_GROUP_ID}"), &group);

    let role = format!("/api/securityRoles/{SECURITY_ROLE_ID}");
    server.insert(&role, security_role_payload(SECURITY_ROLE_ID, "Viewer", &["P1"]));
    server.insert(&format!("{role}/projects/{PROJECT_ID}/members"), json!([]));
}

/// A user as the server returns it.
pub fn user_payload(id: &str, username: &str) -> Json {
    json!({
        "id": id,
        "name": username,
        "username": username,
        "fullName": username.to_uppercase(),
        "type": 34,
        "subtype": 8704,
        "enabled": true,
        "dateCreated": "2024-01-15T10:30:00.000+0000",
        "dateModified": "2024-01-15T10:30:00.000+0000",
        "passwordModifiable": true,
        "standardAuth": true,
        "memberships": [],
    })
}

/// A user group as the server returns it.
pub fn user_group_payload(id: &str, name: &str) -> Json {
    json!({
        "id": id,
        "name": name,
        "type": 34,
        "subtype": 8705,
        "description": "",
        "memberships": [],
    })
}

/// A security role as the server returns it.
pub fn security_role_payload(id: &str, name: &str, privileges: &[&str]) -> Json {
    let privileges: Vec<Json> = privileges.iter().map(|p| json!({ "id": p })).collect();
    json!({
        "id": id,
        "name": name,
        "description": "",
        "type": 44,
        "privileges": privileges,
    })
}

/// A fence as the server returns it.
pub fn fence_payload(id: &str, name: &str, rank: i64, fence_type: &str) -> Json {
    json!({
        "id": id,
        "name": name,
        "rank": rank,
        "type": fence_type,
        "nodes": ["node-1"],
        "users": [],
        "usergroups": [],
        "projects": [],
    })
}

/// A privilege entry of a user or group privilege listing.
pub fn privilege_entry(id: &str, direct: bool) -> Json {
    json!({
        "privilege": {"id": id, "name": format!("Privilege {id}")},
        "sources": [{"direct": direct}],
    })
}
