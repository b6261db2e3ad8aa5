//! The generic entity handle shared by every typed entity.
//!
//! An [`Entity`] binds a static [`EntityType`] (schema plus capabilities)
//! to an id, a [`FieldState`] and a shared [`SyncEngine`]. Typed wrappers
//! such as [`User`](crate::User) dereference to it.

use bisync_engine::{
    CollectionOp, CollectionOutcome, FetchReport, FieldState, FlushReport, ListRequest, Scope,
    Selection, SyncEngine, SyncError, SyncResult,
};
use bisync_schema::{AttributeSchema, Endpoint, Field, FieldName, FieldType, Value};
use serde_json::{Map, Value as Json};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Listing {
    endpoint: Endpoint,
    items_key: Option<&'static str>,
    paginated: bool,
}

/// Static description of an entity type.
///
/// Declared once per type as a `static`; the schema is built lazily on
/// first use.
#[derive(Clone, Copy)]
pub struct EntityType {
    schema: fn() -> &'static AttributeSchema,
    listing: Option<Listing>,
    create: Option<Endpoint>,
    delete: Option<Endpoint>,
}

impl EntityType {
    /// An entity type with no capabilities beyond fetch and flush.
    pub const fn new(schema: fn() -> &'static AttributeSchema) -> Self {
        Self {
            schema,
            listing: None,
            create: None,
            delete: None,
        }
    }

    /// Records are listed at `endpoint`, page by page.
    pub const fn listed_at(mut self, endpoint: Endpoint) -> Self {
        self.listing = Some(Listing {
            endpoint,
            items_key: None,
            paginated: true,
        });
        self
    }

    /// Records are returned in one response under `items_key`.
    pub const fn listed_under(mut self, endpoint: Endpoint, items_key: &'static str) -> Self {
        self.listing = Some(Listing {
            endpoint,
            items_key: Some(items_key),
            paginated: false,
        });
        self
    }

    /// Entities are created by sending a body to `endpoint`.
    pub const fn creatable(mut self, endpoint: Endpoint) -> Self {
        self.create = Some(endpoint);
        self
    }

    /// Entities are deleted through `endpoint`.
    pub const fn deletable(mut self, endpoint: Endpoint) -> Self {
        self.delete = Some(endpoint);
        self
    }

    /// The entity schema.
    pub fn schema(&self) -> &'static AttributeSchema {
        (self.schema)()
    }

    /// Entity type name.
    pub fn name(&self) -> &'static str {
        self.schema().name()
    }

    /// Returns true if entities can be created.
    pub fn can_create(&self) -> bool {
        self.create.is_some()
    }

    /// Returns true if entities can be deleted.
    pub fn can_delete(&self) -> bool {
        self.delete.is_some()
    }

    /// Base listing request, gated like the entity type itself.
    pub fn list_request(&self) -> SyncResult<ListRequest> {
        let listing = self.listing.ok_or_else(|| unsupported(self.name(), "listing"))?;
        let mut request = ListRequest::new(listing.endpoint);
        if let Some(key) = listing.items_key {
            request = request.items_key(key);
        }
        if !listing.paginated {
            request = request.unpaginated();
        }
        if let Some(version) = self.schema().min_version() {
            request = request.since(self.name(), version);
        }
        Ok(request)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name())
            .field("listing", &self.listing)
            .field("create", &self.create)
            .field("delete", &self.delete)
            .finish()
    }
}

/// One remote entity: id, cached field values and the engine that syncs them.
pub struct Entity {
    engine: Arc<SyncEngine>,
    kind: &'static EntityType,
    id: String,
    scope: Scope,
    state: FieldState,
}

impl Entity {
    /// A handle with nothing fetched yet.
    pub fn new(engine: Arc<SyncEngine>, kind: &'static EntityType, id: impl Into<String>) -> Self {
        Self {
            engine,
            kind,
            id: id.into(),
            scope: Scope::global(),
            state: FieldState::new(),
        }
    }

    /// Uses `scope` for every call made through this handle.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Hydrates an entity from a listing record without fetching.
    pub fn from_listing(
        engine: Arc<SyncEngine>,
        kind: &'static EntityType,
        record: &Map<String, Json>,
    ) -> SyncResult<Self> {
        let id = record
            .get("id")
            .and_then(Json::as_str)
            .ok_or_else(|| SyncError::Protocol(format!("{} record without an id", kind.name())))?;
        let state = FieldState::from_listing(kind.schema(), record)?;
        Ok(Self {
            id: id.to_string(),
            state,
            ..Self::new(engine, kind, "")
        })
    }

    /// Entity id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Entity type.
    pub fn kind(&self) -> &'static EntityType {
        self.kind
    }

    /// Entity schema.
    pub fn schema(&self) -> &'static AttributeSchema {
        self.kind.schema()
    }

    /// Scope used for calls.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Cached field state.
    pub fn state(&self) -> &FieldState {
        &self.state
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Fetches every readable field again.
    pub fn fetch(&mut self) -> SyncResult<FetchReport> {
        self.fetch_with(&Selection::All, true)
    }

    /// Fetches `selection`; with `force` unset only missing fields are requested.
    pub fn fetch_with(&mut self, selection: &Selection, force: bool) -> SyncResult<FetchReport> {
        let schema = self.kind.schema();
        self.engine
            .fetch(schema, &mut self.state, &self.id, selection, force, &self.scope)
    }

    pub(crate) fn fetch_in(
        &mut self,
        selection: &Selection,
        force: bool,
        scope: &Scope,
    ) -> SyncResult<FetchReport> {
        let schema = self.kind.schema();
        self.engine
            .fetch(schema, &mut self.state, &self.id, selection, force, scope)
    }

    /// Typed value of a field, fetched on first access.
    ///
    /// Returns `None` for a null value and for fields the server version
    /// does not support.
    pub fn get<T: FieldType>(&mut self, field: Field<T>) -> SyncResult<Option<T>> {
        let name = field.name();
        if !self.state.is_set(name.as_str()) {
            self.fetch_with(&Selection::field(name.as_str()), false)?;
        }
        self.cached(field)
    }

    /// Typed value of a field if already cached. Never sends a request.
    pub fn cached<T: FieldType>(&self, field: Field<T>) -> SyncResult<Option<T>> {
        let name = field.name();
        match self.state.get(name.as_str()) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value).map(Some).ok_or_else(|| SyncError::TypeMismatch {
                field: name.to_string(),
                expected: std::any::type_name::<T>(),
                found: value.kind(),
            }),
        }
    }

    /// Sets a field locally; it is sent on the next [`flush`](Self::flush).
    ///
    /// Returns `Ok(false)` when the field is gated and the policy skips it.
    pub fn set<T: FieldType>(&mut self, field: Field<T>, value: T) -> SyncResult<bool> {
        self.set_value(field.name().as_str(), value.into_value())
    }

    /// Sets a field by name.
    pub fn set_value(&mut self, field: &str, value: Value) -> SyncResult<bool> {
        let schema = self.kind.schema();
        self.engine.set_field(schema, &mut self.state, field, value)
    }

    /// Sends every local change.
    pub fn flush(&mut self) -> SyncResult<FlushReport> {
        let schema = self.kind.schema();
        self.engine.flush(schema, &mut self.state, &self.id, &self.scope)
    }

    /// Drops local changes and fetches everything again.
    pub fn refresh(&mut self) -> SyncResult<FetchReport> {
        let schema = self.kind.schema();
        self.engine.refresh(schema, &mut self.state, &self.id, &self.scope)
    }

    /// Drops local changes; returns the fields that were dirty.
    pub fn discard_changes(&mut self) -> Vec<FieldName> {
        self.state.discard_changes(self.kind.schema())
    }

    /// Returns true if there are unsent changes.
    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Fields with unsent changes.
    pub fn dirty_fields(&self) -> Vec<FieldName> {
        self.state.dirty_fields().iter().copied().collect()
    }

    /// Adds, removes or replaces members of a nested collection.
    pub fn mutate<I, S>(&mut self, field: &str, op: CollectionOp, members: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        self.mutate_set(field, op, &candidates)
    }

    pub(crate) fn mutate_set(
        &mut self,
        field: &str,
        op: CollectionOp,
        candidates: &BTreeSet<String>,
    ) -> SyncResult<CollectionOutcome> {
        let schema = self.kind.schema();
        self.engine.mutate_collection(
            schema,
            &mut self.state,
            &self.id,
            field,
            op,
            candidates,
            &self.scope,
        )
    }

    /// Same as [`mutate`](Self::mutate) with a one-off project scope.
    pub(crate) fn mutate_in(
        &mut self,
        field: &str,
        op: CollectionOp,
        candidates: &BTreeSet<String>,
        scope: &Scope,
    ) -> SyncResult<CollectionOutcome> {
        let schema = self.kind.schema();
        self.engine
            .mutate_collection(schema, &mut self.state, &self.id, field, op, candidates, scope)
    }

    /// Deletes the entity on the server.
    pub fn delete(self) -> SyncResult<()> {
        let schema = self.kind.schema();
        let endpoint = self.kind.delete.ok_or_else(|| unsupported(self.kind.name(), "deletion"))?;
        if !self.engine.check_entity(schema)? {
            return Err(unsupported(self.kind.name(), "deletion on this server version"));
        }
        let request = self.engine.request_for(&endpoint, &self.id, &self.scope)?;
        self.engine.send(request)?;
        tracing::info!(entity = self.kind.name(), id = %self.id, "deleted");
        Ok(())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind.name())
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Creates an entity from a request body and returns it with the
/// server's echo merged.
pub fn create(
    engine: &Arc<SyncEngine>,
    kind: &'static EntityType,
    body: Json,
    scope: &Scope,
) -> SyncResult<Entity> {
    let schema = kind.schema();
    let endpoint = kind.create.ok_or_else(|| unsupported(kind.name(), "creation"))?;
    if !engine.check_entity(schema)? {
        return Err(unsupported(kind.name(), "creation on this server version"));
    }
    let request = engine.request_for(&endpoint, "", scope)?.with_json(body);
    let response = engine.send(request)?;
    let id = response
        .body
        .as_ref()
        .and_then(|b| b.get("id"))
        .and_then(Json::as_str)
        .ok_or_else(|| SyncError::Protocol(format!("{} creation returned no id", kind.name())))?
        .to_string();

    let mut entity = Entity::new(engine.clone(), kind, id).with_scope(scope.clone());
    engine.merge_response(schema, &mut entity.state, response.body.as_ref());
    tracing::info!(entity = kind.name(), id = %entity.id, "created");
    Ok(entity)
}

/// Lists entities and hydrates each from its record.
pub fn list(
    engine: &Arc<SyncEngine>,
    kind: &'static EntityType,
    request: &ListRequest,
    scope: &Scope,
) -> SyncResult<Vec<Entity>> {
    engine
        .list(request, scope)?
        .iter()
        .map(|record| Entity::from_listing(engine.clone(), kind, record).map(|e| e.with_scope(scope.clone())))
        .collect()
}

pub(crate) fn set_some<T: FieldType>(
    entity: &mut Entity,
    field: Field<T>,
    value: Option<T>,
) -> SyncResult<()> {
    if let Some(value) = value {
        entity.set(field, value)?;
    }
    Ok(())
}

fn unsupported(entity: &str, capability: &str) -> SyncError {
    SyncError::Unsupported {
        entity: entity.to_string(),
        capability: capability.to_string(),
    }
}

/// Implements the handle plumbing of a typed entity wrapping [`Entity`].
macro_rules! typed_entity {
    ($ty:ident, $kind:expr) => {
        impl $ty {
            /// A handle with nothing fetched yet.
            pub fn new(engine: std::sync::Arc<bisync_engine::SyncEngine>, id: impl Into<String>) -> Self {
                Self($crate::entity::Entity::new(engine, &$kind, id))
            }

            /// Wraps a generic entity of this type.
            pub fn from_entity(entity: $crate::entity::Entity) -> bisync_engine::SyncResult<Self> {
                if entity.kind().name() != $kind.name() {
                    return Err(bisync_engine::SyncError::Protocol(format!(
                        "expected a {} entity, got {}",
                        $kind.name(),
                        entity.kind().name()
                    )));
                }
                Ok(Self(entity))
            }

            /// Lists entities of this type.
            pub fn list(
                engine: &std::sync::Arc<bisync_engine::SyncEngine>,
                request: &bisync_engine::ListRequest,
                scope: &bisync_engine::Scope,
            ) -> bisync_engine::SyncResult<Vec<Self>> {
                Ok($crate::entity::list(engine, &$kind, request, scope)?
                    .into_iter()
                    .map(Self)
                    .collect())
            }

            /// Base listing request for this type.
            pub fn list_request() -> bisync_engine::SyncResult<bisync_engine::ListRequest> {
                $kind.list_request()
            }

            /// Deletes the entity on the server.
            pub fn delete(self) -> bisync_engine::SyncResult<()> {
                self.0.delete()
            }

            /// Unwraps the generic entity.
            pub fn into_entity(self) -> $crate::entity::Entity {
                self.0
            }
        }

        impl std::ops::Deref for $ty {
            type Target = $crate::entity::Entity;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::ops::DerefMut for $ty {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
}

pub(crate) use typed_entity;

#[cfg(test)]
mod tests {
    use super::*;
    use bisync_engine::{MockSession, Response, SyncConfig};
    use bisync_schema::{FieldCodec, HttpMethod, PatchStyle, ReadGroup, WriteGroup};
    use serde_json::json;
    use std::sync::OnceLock;

    fn note_schema() -> &'static AttributeSchema {
        static SCHEMA: OnceLock<AttributeSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            AttributeSchema::builder("note")
                .field("id", FieldCodec::Text)
                .field("title", FieldCodec::Text)
                .field("pinned", FieldCodec::Bool)
                .read(ReadGroup::new(
                    "info",
                    Endpoint::get("/api/notes/{id}"),
                    &["id", "title", "pinned"],
                ))
                .write(WriteGroup::new(
                    "patch",
                    Endpoint::patch("/api/notes/{id}"),
                    PatchStyle::PartialPut,
                    &["title", "pinned"],
                ))
                .build()
        })
    }

    static NOTE: EntityType = EntityType::new(note_schema)
        .listed_at(Endpoint::get("/api/notes"))
        .creatable(Endpoint::post("/api/notes"));

    fn engine(session: Arc<MockSession>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(SyncConfig::new("11.3.0100".parse().unwrap()), session))
    }

    #[test]
    fn get_fetches_once() {
        let session = Arc::new(MockSession::new());
        session.respond_json(
            HttpMethod::Get,
            "/api/notes/N1",
            200,
            json!({"id": "N1", "title": "Hello", "pinned": null}),
        );
        let mut note = Entity::new(engine(session.clone()), &NOTE, "N1");

        assert_eq!(note.get(Field::<String>::new("title")).unwrap(), Some("Hello".to_string()));
        assert_eq!(note.get(Field::<bool>::new("pinned")).unwrap(), None);
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn cached_reports_wrong_rust_type() {
        let record = json!({"id": "N1", "title": "Hello"});
        let note = Entity::from_listing(
            engine(Arc::new(MockSession::new())),
            &NOTE,
            record.as_object().unwrap(),
        )
        .unwrap();
        let err = note.cached(Field::<bool>::new("title")).unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { found: "text", .. }));
    }

    #[test]
    fn listing_record_needs_id() {
        let record = json!({"title": "Hello"});
        let err = Entity::from_listing(
            engine(Arc::new(MockSession::new())),
            &NOTE,
            record.as_object().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn create_merges_echo() {
        let session = Arc::new(MockSession::new());
        session.respond(
            HttpMethod::Post,
            "/api/notes",
            Response::json(201, json!({"id": "N7", "title": "Fresh"})),
        );
        let engine = engine(session.clone());
        let note = create(&engine, &NOTE, json!({"title": "Fresh"}), &Scope::global()).unwrap();

        assert_eq!(note.id(), "N7");
        assert_eq!(note.cached(Field::<String>::new("title")).unwrap(), Some("Fresh".into()));
        assert!(!note.is_dirty());
        let sent = session.requests_to(HttpMethod::Post, "/api/notes");
        assert_eq!(sent[0].body, Some(json!({"title": "Fresh"})));
    }

    #[test]
    fn delete_without_capability_sends_nothing() {
        let session = Arc::new(MockSession::new());
        let note = Entity::new(engine(session.clone()), &NOTE, "N1");
        let err = note.delete().unwrap_err();
        assert!(matches!(err, SyncError::Unsupported { .. }));
        assert_eq!(session.request_count(), 0);
    }

    #[test]
    fn list_hydrates_entities() {
        let session = Arc::new(MockSession::new());
        session.respond_json(
            HttpMethod::Get,
            "/api/notes",
            200,
            json!([{"id": "N1", "title": "a"}, {"id": "N2", "title": "b"}]),
        );
        let engine = engine(session.clone());
        let notes = list(&engine, &NOTE, &NOTE.list_request().unwrap(), &Scope::global()).unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].id(), "N2");
        assert_eq!(notes[1].cached(Field::<String>::new("title")).unwrap(), Some("b".into()));
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn set_then_flush_then_clean() {
        let session = Arc::new(MockSession::new());
        session.respond_json(HttpMethod::Patch, "/api/notes/N1", 200, json!({"title": "New"}));
        let mut note = Entity::new(engine(session.clone()), &NOTE, "N1");

        assert!(note.set(Field::new("title"), "New".to_string()).unwrap());
        assert_eq!(note.dirty_fields(), vec![FieldName::new("title")]);
        note.flush().unwrap();
        assert!(!note.is_dirty());
        assert!(note.flush().unwrap().is_noop());
        assert_eq!(session.request_count(), 1);
    }
}
