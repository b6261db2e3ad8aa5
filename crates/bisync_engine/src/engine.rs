//! The sync engine: minimal fetch and grouped flush.

use crate::config::SyncConfig;
use crate::error::{FetchError, FlushError, GroupFailure, GroupOutcome, SyncError, SyncResult};
use crate::fanout::fan_out;
use crate::gate::VersionGate;
use crate::observer::{SyncEvent, SyncObserver, TracingObserver};
use crate::state::FieldState;
use crate::transport::{Request, Response, Scope, Session};
use bisync_schema::{
    AttributeSchema, Endpoint, FieldName, FieldSpec, GroupId, PatchStyle, ReadGroup, Value,
    WriteGroup,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Which fields a fetch should cover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// Every readable field the server version and scope allow.
    #[default]
    All,
    /// The named fields.
    Fields(Vec<String>),
}

impl Selection {
    /// Selects the named fields.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Fields(names.into_iter().map(Into::into).collect())
    }

    /// Selects one field.
    pub fn field(name: impl Into<String>) -> Self {
        Selection::Fields(vec![name.into()])
    }
}

/// What a fetch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Read groups called, in schema order.
    pub fetched_groups: Vec<GroupId>,
    /// Fields whose value was stored.
    pub populated: Vec<FieldName>,
    /// Requested fields skipped by a version gate.
    pub skipped: Vec<FieldName>,
}

impl FetchReport {
    /// Returns true if no request was made.
    pub fn is_noop(&self) -> bool {
        self.fetched_groups.is_empty()
    }
}

/// What a flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Write groups sent, in schema order.
    pub flushed_groups: Vec<GroupId>,
    /// Dirty fields dropped because their write group is gated.
    pub skipped: Vec<FieldName>,
}

impl FlushReport {
    /// Returns true if no request was made.
    pub fn is_noop(&self) -> bool {
        self.flushed_groups.is_empty()
    }
}

/// Counters kept by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Requests handed to the session.
    pub requests_sent: u64,
    /// Read groups fetched and merged.
    pub groups_fetched: u64,
    /// Write groups flushed.
    pub groups_flushed: u64,
    /// Collection mutations applied.
    pub collection_mutations: u64,
    /// Listing pages received.
    pub pages_fetched: u64,
    /// Requests that failed.
    pub failures: u64,
}

/// Orchestrates reads and writes of entities described by an
/// [`AttributeSchema`].
///
/// The engine holds no entity state; callers pass the entity's
/// [`FieldState`] to every operation.
pub struct SyncEngine {
    config: SyncConfig,
    session: Arc<dyn Session>,
    observer: Arc<dyn SyncObserver>,
    gate: VersionGate,
    stats: RwLock<SyncStats>,
}

impl SyncEngine {
    /// Creates an engine that reports events through `tracing`.
    pub fn new(config: SyncConfig, session: impl Session + 'static) -> Self {
        let observer: Arc<dyn SyncObserver> = Arc::new(TracingObserver);
        Self {
            gate: VersionGate::new(config.server_version, config.gate_policy, observer.clone()),
            config,
            session: Arc::new(session),
            observer,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the observer.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.gate = VersionGate::new(
            self.config.server_version,
            self.config.gate_policy,
            observer.clone(),
        );
        self.observer = observer;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the version gate.
    pub fn gate(&self) -> &VersionGate {
        &self.gate
    }

    /// Returns the session.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.stats.write());
    }

    /// Sends a request. Non-success statuses become [`SyncError::Server`].
    pub fn send(&self, request: Request) -> SyncResult<Response> {
        self.emit(SyncEvent::RequestSent {
            method: request.method,
            path: request.path.clone(),
        });
        self.bump(|s| s.requests_sent += 1);

        let response = match self.session.send(&request) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                self.bump(|s| s.failures += 1);
                return Err(SyncError::Server {
                    status: response.status,
                    method: request.method,
                    message: response.error_message(),
                    path: request.path,
                });
            }
            Err(e) => {
                self.bump(|s| s.failures += 1);
                return Err(e);
            }
        };
        Ok(response)
    }

    /// Builds the request for an endpoint template.
    pub fn request_for(&self, endpoint: &Endpoint, id: &str, scope: &Scope) -> SyncResult<Request> {
        let path = endpoint
            .render(id, scope.project_id())
            .ok_or_else(|| SyncError::MissingProjectScope {
                path: endpoint.path.to_string(),
            })?;
        let request = endpoint
            .query
            .iter()
            .fold(Request::new(endpoint.method, path), |r, (k, v)| r.with_query(*k, *v));
        Ok(request.scoped(scope))
    }

    /// Applies the gate to the entity type itself.
    pub fn check_entity(&self, schema: &AttributeSchema) -> SyncResult<bool> {
        self.gate.check(schema.name(), schema.min_version())
    }

    /// Merges an object response (a write echo or a create result) into
    /// `state`. Undecodable keys are reported and skipped.
    pub fn merge_response(&self, schema: &AttributeSchema, state: &mut FieldState, body: Option<&Json>) {
        let Some(Json::Object(obj)) = body else {
            return;
        };
        let (decoded, errors) = schema.decode_object(obj);
        for (field, value) in decoded {
            state.merge_remote(field, value);
        }
        for error in errors {
            self.emit(SyncEvent::EchoDecodeFailed {
                entity: schema.name(),
                field: error.field,
                reason: error.reason,
            });
        }
    }

    /// Fetches the selected fields.
    ///
    /// Only read groups covering an unset field are called, unless `force`
    /// is set. Independent groups are requested concurrently; results are
    /// merged in schema order, so when two groups return the same field the
    /// later group's value wins. Dirty fields are never overwritten.
    ///
    /// Every gate and scope check runs before the first request. If some
    /// groups fail, the values from the others are kept and
    /// [`SyncError::Fetch`] lists the failures.
    pub fn fetch(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        selection: &Selection,
        force: bool,
        scope: &Scope,
    ) -> SyncResult<FetchReport> {
        let mut report = FetchReport::default();
        if !self.check_entity(schema)? {
            return Ok(report);
        }

        let groups = self.plan_fetch(schema, state, selection, force, scope, &mut report)?;
        let requests = groups
            .into_iter()
            .map(|group| Ok((group, self.request_for(group.endpoint(), id, scope)?)))
            .collect::<SyncResult<Vec<_>>>()?;
        if requests.is_empty() {
            return Ok(report);
        }

        let responses = fan_out(self.config.max_concurrency, &requests, |(_, request)| {
            self.send(request.clone())
        });

        let mut failures = Vec::new();
        let mut owners: BTreeMap<FieldName, GroupId> = BTreeMap::new();
        for ((group, _), result) in requests.iter().zip(responses) {
            let body = match result {
                Ok(response) => response.body.unwrap_or(Json::Null),
                Err(error) => {
                    self.emit(SyncEvent::FetchFailed {
                        entity: schema.name(),
                        group: group.id(),
                        error: error.to_string(),
                    });
                    failures.push(GroupFailure {
                        group: group.id(),
                        error,
                    });
                    continue;
                }
            };

            let (decoded, errors) = schema.decode_group(group, &body);
            let merged = decoded.len();
            for (field, value) in decoded {
                if let Some(previous) = owners.insert(field, group.id()) {
                    self.emit(SyncEvent::FieldOverlap {
                        entity: schema.name(),
                        field,
                        previous,
                        group: group.id(),
                    });
                }
                if state.merge_remote(field, value) && !report.populated.contains(&field) {
                    report.populated.push(field);
                }
            }

            if errors.is_empty() {
                state.mark_fetched(group.id());
                report.fetched_groups.push(group.id());
                self.bump(|s| s.groups_fetched += 1);
                self.emit(SyncEvent::GroupFetched {
                    entity: schema.name(),
                    group: group.id(),
                    fields: merged,
                });
            } else {
                for error in errors {
                    self.emit(SyncEvent::FetchFailed {
                        entity: schema.name(),
                        group: group.id(),
                        error: error.to_string(),
                    });
                    failures.push(GroupFailure {
                        group: group.id(),
                        error: error.into(),
                    });
                }
            }
        }

        if failures.is_empty() {
            return Ok(report);
        }
        if failures.iter().all(|f| matches!(f.error, SyncError::Decode(_))) {
            return Err(failures.swap_remove(0).error);
        }
        Err(FetchError {
            failures,
            populated: report.populated,
        }
        .into())
    }

    fn plan_fetch<'s>(
        &self,
        schema: &'s AttributeSchema,
        state: &FieldState,
        selection: &Selection,
        force: bool,
        scope: &Scope,
        report: &mut FetchReport,
    ) -> SyncResult<Vec<&'s ReadGroup>> {
        let mut wanted: BTreeMap<GroupId, Vec<FieldName>> = BTreeMap::new();

        match selection {
            Selection::All => {
                for group in schema.read_groups() {
                    if !self.gate.allows(group.min_version()) {
                        continue;
                    }
                    if group.endpoint().needs_project() && scope.project_id().is_none() {
                        continue;
                    }
                    let fields = group
                        .fields()
                        .iter()
                        .filter(|f| {
                            schema
                                .field(f.as_str())
                                .is_some_and(|spec| self.gate.allows(spec.min_version()))
                        })
                        .copied()
                        .collect();
                    wanted.insert(group.id(), fields);
                }
            }
            Selection::Fields(names) => {
                for name in names {
                    let spec = schema.field(name).ok_or_else(|| SyncError::UnknownField {
                        entity: schema.name().to_string(),
                        field: name.clone(),
                    })?;
                    if !self.gate.check(&feature(schema, name), spec.min_version())? {
                        report.skipped.push(spec.name());
                        continue;
                    }
                    let group = schema.resolve_read(name).ok_or_else(|| SyncError::NotReadable {
                        entity: schema.name().to_string(),
                        field: name.clone(),
                    })?;
                    if !self.gate.check(&feature(schema, group.id().as_str()), group.min_version())? {
                        report.skipped.push(spec.name());
                        continue;
                    }
                    if group.endpoint().needs_project() && scope.project_id().is_none() {
                        return Err(SyncError::MissingProjectScope {
                            path: group.endpoint().path.to_string(),
                        });
                    }
                    wanted.entry(group.id()).or_default().push(spec.name());
                }
            }
        }

        Ok(schema
            .read_groups()
            .iter()
            .filter(|group| {
                let Some(fields) = wanted.get(&group.id()) else {
                    return false;
                };
                force
                    || (!state.has_fetched(group.id().as_str())
                        && fields.iter().any(|f| !state.is_set(f.as_str())))
            })
            .collect())
    }

    /// Sets a field locally and marks it dirty.
    ///
    /// Returns `Ok(false)` when the field is gated and the policy skips it.
    pub fn set_field(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        field: &str,
        value: Value,
    ) -> SyncResult<bool> {
        if !self.check_entity(schema)? {
            return Ok(false);
        }
        let spec = schema.field(field).ok_or_else(|| SyncError::UnknownField {
            entity: schema.name().to_string(),
            field: field.to_string(),
        })?;
        let group = schema.resolve_write(field).ok_or_else(|| SyncError::ImmutableField {
            entity: schema.name().to_string(),
            field: field.to_string(),
        })?;
        if !self.gate.check(&feature(schema, field), spec.min_version())? {
            return Ok(false);
        }
        if !self.gate.check(&feature(schema, group.id().as_str()), group.min_version())? {
            return Ok(false);
        }
        spec.encode(&value).map_err(|e| SyncError::TypeMismatch {
            field: e.field,
            expected: e.expected,
            found: e.found,
        })?;
        state.set_local(spec.name(), value);
        Ok(true)
    }

    /// Sends every dirty field, one request per write group.
    ///
    /// A clean state makes no request. Groups are sent in schema order and
    /// independently: a failed group keeps its fields dirty while the other
    /// groups are still attempted. Dirty fields of a group the server
    /// version does not support are discarded and reported as skipped.
    pub fn flush(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        scope: &Scope,
    ) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();
        if !state.is_dirty() {
            return Ok(report);
        }
        if !self.check_entity(schema)? {
            return Ok(report);
        }

        let mut batches: BTreeMap<usize, Vec<FieldName>> = BTreeMap::new();
        for field in state.dirty_fields() {
            let index = schema
                .write_groups()
                .iter()
                .position(|g| g.contains(field.as_str()))
                .ok_or_else(|| SyncError::ImmutableField {
                    entity: schema.name().to_string(),
                    field: field.to_string(),
                })?;
            batches.entry(index).or_default().push(*field);
        }

        let mut planned: Vec<(&WriteGroup, Vec<FieldName>)> = Vec::new();
        for (group, fields) in schema
            .write_groups()
            .iter()
            .enumerate()
            .filter_map(|(i, g)| batches.remove(&i).map(|fields| (g, fields)))
        {
            if !self.gate.check(&feature(schema, group.id().as_str()), group.min_version())? {
                for field in &fields {
                    state.revert(schema, *field);
                }
                report.skipped.extend(fields);
                continue;
            }
            if group.endpoint().needs_project() && scope.project_id().is_none() {
                return Err(SyncError::MissingProjectScope {
                    path: group.endpoint().path.to_string(),
                });
            }
            planned.push((group, fields));
        }

        let mut outcomes = Vec::with_capacity(planned.len());
        let mut failed = false;
        for (group, fields) in planned {
            match self.flush_group(schema, state, id, group, &fields, scope) {
                Ok(()) => {
                    self.bump(|s| s.groups_flushed += 1);
                    self.emit(SyncEvent::GroupFlushed {
                        entity: schema.name(),
                        group: group.id(),
                        fields: fields.clone(),
                    });
                    report.flushed_groups.push(group.id());
                    outcomes.push(GroupOutcome {
                        group: group.id(),
                        fields,
                        error: None,
                    });
                }
                Err(error) => {
                    failed = true;
                    self.emit(SyncEvent::FlushFailed {
                        entity: schema.name(),
                        group: group.id(),
                        error: error.to_string(),
                    });
                    outcomes.push(GroupOutcome {
                        group: group.id(),
                        fields,
                        error: Some(error),
                    });
                }
            }
        }

        if failed {
            return Err(FlushError { outcomes }.into());
        }
        Ok(report)
    }

    fn flush_group(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        group: &WriteGroup,
        dirty: &[FieldName],
        scope: &Scope,
    ) -> SyncResult<()> {
        let body = match group.style() {
            PatchStyle::WholePut => {
                let missing: Vec<&str> = group
                    .fields()
                    .iter()
                    .map(FieldName::as_str)
                    .filter(|f| !state.is_set(f) && schema.resolve_read(f).is_some())
                    .collect();
                if !missing.is_empty() {
                    self.fetch(schema, state, id, &Selection::fields(missing), false, scope)?;
                }
                let mut body = Map::new();
                for field in group.fields() {
                    if let Some((spec, json)) = encode_field(schema, state, *field)? {
                        body.insert(spec.rest().to_string(), json);
                    }
                }
                Json::Object(body)
            }
            PatchStyle::JsonPatch => {
                let mut ops = Vec::with_capacity(dirty.len());
                for field in dirty {
                    if let Some((spec, json)) = encode_field(schema, state, *field)? {
                        ops.push(json!({
                            "op": "replace",
                            "path": format!("/{}", spec.rest()),
                            "value": json,
                        }));
                    }
                }
                json!({ "operationList": ops })
            }
            PatchStyle::PartialPut => {
                let mut body = Map::new();
                for field in dirty {
                    if let Some((spec, json)) = encode_field(schema, state, *field)? {
                        body.insert(spec.rest().to_string(), json);
                    }
                }
                Json::Object(body)
            }
        };

        let request = self.request_for(group.endpoint(), id, scope)?.with_json(body);
        let response = self.send(request)?;
        state.clear_dirty(dirty);
        self.merge_response(schema, state, response.body.as_ref());
        Ok(())
    }

    /// Discards local changes and fetches every field again.
    pub fn refresh(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        scope: &Scope,
    ) -> SyncResult<FetchReport> {
        state.discard_changes(schema);
        self.fetch(schema, state, id, &Selection::All, true, scope)
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

pub(crate) fn feature(schema: &AttributeSchema, part: &str) -> String {
    format!("{}.{}", schema.name(), part)
}

fn encode_field<'s>(
    schema: &'s AttributeSchema,
    state: &FieldState,
    field: FieldName,
) -> SyncResult<Option<(&'s FieldSpec, Json)>> {
    let spec = schema.field(field.as_str()).ok_or_else(|| SyncError::UnknownField {
        entity: schema.name().to_string(),
        field: field.to_string(),
    })?;
    match state.get(field.as_str()) {
        Some(value) => Ok(Some((spec, spec.encode(value)?))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSession;
    use bisync_schema::{FieldCodec, GatePolicy, HttpMethod, ServerVersion};
    use pretty_assertions::assert_eq;

    fn schema() -> AttributeSchema {
        AttributeSchema::builder("user")
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
            .field("enabled", FieldCodec::Bool)
            .field("addresses", FieldCodec::Json)
            .field("trust_id", FieldCodec::Text)
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/users/{id}"),
                &["id", "name", "enabled", "trust_id"],
            ))
            .read(ReadGroup::single(
                "addresses",
                Endpoint::get("/api/users/{id}/addresses"),
                "addresses",
            ))
            .write(WriteGroup::new(
                "patch",
                Endpoint::patch("/api/users/{id}"),
                PatchStyle::JsonPatch,
                &["name", "enabled"],
            ))
            .write(
                WriteGroup::new(
                    "trust",
                    Endpoint::put("/api/users/{id}/trust"),
                    PatchStyle::PartialPut,
                    &["trust_id"],
                )
                .since(ServerVersion::new(11, 3, 0, 0)),
            )
            .build()
    }

    fn engine(session: Arc<MockSession>, version: &str, policy: GatePolicy) -> SyncEngine {
        SyncEngine::new(
            SyncConfig::new(version.parse().unwrap()).with_gate_policy(policy),
            session,
        )
    }

    fn session() -> Arc<MockSession> {
        let session = Arc::new(MockSession::new());
        session.respond_json(
            HttpMethod::Get,
            "/api/users/U1",
            200,
            json!({"id": "U1", "name": "Ann", "enabled": true, "trustId": null}),
        );
        session.respond_json(
            HttpMethod::Get,
            "/api/users/U1/addresses",
            200,
            json!({"addresses": [{"id": "A1"}]}),
        );
        session
    }

    #[test]
    fn fetch_calls_only_missing_groups() {
        let session = session();
        let engine = engine(session.clone(), "11.3.0100", GatePolicy::Raise);
        let schema = schema();
        let mut state = FieldState::new();

        let report = engine
            .fetch(&schema, &mut state, "U1", &Selection::field("name"), false, &Scope::global())
            .unwrap();
        assert_eq!(report.fetched_groups, vec![GroupId::new("info")]);
        assert_eq!(session.request_count(), 1);

        engine
            .fetch(&schema, &mut state, "U1", &Selection::fields(["enabled", "id"]), false, &Scope::global())
            .unwrap();
        assert_eq!(session.request_count(), 1);

        engine
            .fetch(&schema, &mut state, "U1", &Selection::All, false, &Scope::global())
            .unwrap();
        assert_eq!(session.requests_to(HttpMethod::Get, "/api/users/U1/addresses").len(), 1);
        assert_eq!(state.get("addresses"), Some(&Value::Json(json!([{"id": "A1"}]))));
        assert_eq!(engine.stats().groups_fetched, 2);
    }

    #[test]
    fn force_refetches() {
        let session = session();
        let engine = engine(session.clone(), "11.3.0100", GatePolicy::Raise);
        let schema = schema();
        let mut state = FieldState::new();
        let sel = Selection::field("name");
        engine.fetch(&schema, &mut state, "U1", &sel, false, &Scope::global()).unwrap();
        engine.fetch(&schema, &mut state, "U1", &sel, true, &Scope::global()).unwrap();
        assert_eq!(session.request_count(), 2);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let engine = engine(session(), "11.3.0100", GatePolicy::Raise);
        let schema = schema();
        let mut state = FieldState::new();
        let err = engine
            .fetch(&schema, &mut state, "U1", &Selection::field("nope"), false, &Scope::global())
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownField { .. }));
    }

    #[test]
    fn set_field_checks_type_and_mutability() {
        let engine = engine(session(), "11.3.0100", GatePolicy::Raise);
        let schema = schema();
        let mut state = FieldState::new();

        assert!(matches!(
            engine.set_field(&schema, &mut state, "id", Value::from("U2")),
            Err(SyncError::ImmutableField { .. })
        ));
        assert!(matches!(
            engine.set_field(&schema, &mut state, "enabled", Value::from("yes")),
            Err(SyncError::TypeMismatch { expected: "bool", found: "text", .. })
        ));
        assert!(engine.set_field(&schema, &mut state, "enabled", Value::from(false)).unwrap());
        assert!(state.is_field_dirty("enabled"));
    }

    #[test]
    fn json_patch_body_holds_dirty_fields_only() {
        let session = session();
        session.respond_json(HttpMethod::Patch, "/api/users/U1", 200, json!({"id": "U1", "name": "Bo"}));
        let engine = engine(session.clone(), "11.3.0100", GatePolicy::Raise);
        let schema = schema();
        let mut state = FieldState::new();

        engine.set_field(&schema, &mut state, "name", Value::from("Bo")).unwrap();
        let report = engine.flush(&schema, &mut state, "U1", &Scope::global()).unwrap();

        assert_eq!(report.flushed_groups, vec![GroupId::new("patch")]);
        let sent = session.requests_to(HttpMethod::Patch, "/api/users/U1");
        assert_eq!(
            sent[0].body,
            Some(json!({"operationList": [{"op": "replace", "path": "/name", "value": "Bo"}]}))
        );
        assert!(!state.is_dirty());
        assert_eq!(state.get("id"), Some(&Value::from("U1")));
    }

    #[test]
    fn gated_write_group_is_dropped_under_warn() {
        let session = session();
        let schema = schema();
        let mut state = FieldState::new();

        let permissive = engine(session.clone(), "11.3.0100", GatePolicy::Raise);
        permissive.set_field(&schema, &mut state, "trust_id", Value::from("T1")).unwrap();

        let old = engine(session.clone(), "11.2.0000", GatePolicy::Warn);
        let report = old.flush(&schema, &mut state, "U1", &Scope::global()).unwrap();
        assert_eq!(report.skipped, vec![FieldName::new("trust_id")]);
        assert!(report.is_noop());
        assert!(!state.is_dirty());
        assert_eq!(session.request_count(), 0);
    }

    #[test]
    fn server_errors_carry_status_and_message() {
        let session = Arc::new(MockSession::new());
        session.respond_json(HttpMethod::Get, "/x", 403, json!({"message": "forbidden"}));
        let engine = engine(session, "11.3.0100", GatePolicy::Raise);
        let err = engine.send(Request::new(HttpMethod::Get, "/x")).unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("forbidden"));
        assert_eq!(engine.stats().failures, 1);
    }
}
