//! Nested collection mutations (members, privileges, security roles).

use crate::engine::{feature, Selection, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::observer::SyncEvent;
use crate::state::FieldState;
use crate::transport::Scope;
use bisync_schema::{AttributeSchema, CollectionSpec, MemberShape, Value};
use serde_json::{json, Value as Json};
use std::collections::BTreeSet;
use std::fmt;

/// A change to a nested collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionOp {
    /// Add members.
    Add,
    /// Remove members.
    Remove,
    /// Replace the whole set.
    Replace,
}

impl fmt::Display for CollectionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollectionOp::Add => "add",
            CollectionOp::Remove => "remove",
            CollectionOp::Replace => "replace",
        })
    }
}

/// Result of a collection mutation.
///
/// `succeeded` were sent to the server; `already` were not, because the
/// collection already matched (present for an add, absent for a remove).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Candidates the server applied.
    pub succeeded: BTreeSet<String>,
    /// Candidates skipped as no-ops.
    pub already: BTreeSet<String>,
}

impl CollectionOutcome {
    /// Returns true if nothing was sent.
    pub fn is_noop(&self) -> bool {
        self.succeeded.is_empty()
    }
}

/// Splits candidates against the current members.
///
/// For [`CollectionOp::Add`] the candidates already present are no-ops; for
/// [`CollectionOp::Remove`] those absent are. Every candidate lands in
/// exactly one of the two sets. [`CollectionOp::Replace`] sends everything.
pub fn partition(
    op: CollectionOp,
    candidates: &BTreeSet<String>,
    existing: &BTreeSet<String>,
) -> CollectionOutcome {
    let (succeeded, already) = match op {
        CollectionOp::Add => candidates.iter().cloned().partition(|id| !existing.contains(id)),
        CollectionOp::Remove => candidates.iter().cloned().partition(|id| existing.contains(id)),
        CollectionOp::Replace => (candidates.clone(), BTreeSet::new()),
    };
    CollectionOutcome { succeeded, already }
}

impl SyncEngine {
    /// Adds, removes or replaces members of a nested collection.
    ///
    /// Add and remove are filtered against the current members first, which
    /// are refreshed from the server when the cache is missing or stale.
    /// When nothing is left to send no request is made. The request is sent
    /// immediately, independently of dirty fields.
    ///
    /// On failure [`SyncError::CollectionMutation`] names every candidate
    /// and the cached collection is left unchanged. On success the cache is
    /// updated from the response, or invalidated when the response does not
    /// carry the collection.
    #[allow(clippy::too_many_arguments)]
    pub fn mutate_collection(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        field: &str,
        op: CollectionOp,
        candidates: &BTreeSet<String>,
        scope: &Scope,
    ) -> SyncResult<CollectionOutcome> {
        if !self.check_entity(schema)? {
            return Ok(CollectionOutcome::default());
        }
        let spec = schema.collection(field).ok_or_else(|| SyncError::Unsupported {
            entity: schema.name().to_string(),
            capability: format!("{op} on `{field}`"),
        })?;
        if !self.gate().check(&feature(schema, field), spec.min_version())? {
            return Ok(CollectionOutcome::default());
        }
        let verb = match op {
            CollectionOp::Add => spec.verbs().add,
            CollectionOp::Remove => spec.verbs().remove,
            CollectionOp::Replace => spec.verbs().replace.ok_or_else(|| SyncError::Unsupported {
                entity: schema.name().to_string(),
                capability: format!("replace on `{field}`"),
            })?,
        };
        if spec.shape() == MemberShape::ProjectScoped && scope.project_id().is_none() {
            return Err(SyncError::MissingProjectScope {
                path: spec.endpoint().path.to_string(),
            });
        }

        let outcome = match op {
            CollectionOp::Replace => partition(op, candidates, &BTreeSet::new()),
            _ => {
                let existing = self.load_members(schema, state, id, spec, scope)?;
                partition(op, candidates, &existing)
            }
        };
        if !outcome.already.is_empty() {
            self.emit(SyncEvent::CollectionUnchanged {
                entity_id: id.to_string(),
                field: spec.field(),
                op,
                ids: outcome.already.clone(),
            });
        }
        if outcome.succeeded.is_empty() && op != CollectionOp::Replace {
            return Ok(outcome);
        }

        let value = member_value(schema, spec, &outcome.succeeded, scope)?;
        let rest = schema
            .field(field)
            .map(|s| s.rest().to_string())
            .unwrap_or_else(|| field.to_string());
        let body = json!({
            "operationList": [{
                "op": verb,
                "path": format!("/{rest}"),
                "value": value,
            }]
        });

        let request = self.request_for(spec.endpoint(), id, scope)?.with_json(body);
        let response = self.send(request).map_err(|e| SyncError::CollectionMutation {
            field: field.to_string(),
            failed: candidates.clone(),
            source: Box::new(e),
        })?;

        self.bump(|s| s.collection_mutations += 1);
        self.emit(SyncEvent::CollectionChanged {
            entity_id: id.to_string(),
            field: spec.field(),
            op,
            ids: outcome.succeeded.clone(),
        });

        let echoed = response
            .body
            .as_ref()
            .and_then(Json::as_object)
            .is_some_and(|obj| obj.contains_key(&rest));
        self.merge_response(schema, state, response.body.as_ref());
        if !echoed || spec.shape() == MemberShape::ProjectScoped {
            state.invalidate(schema, spec.field());
        }
        Ok(outcome)
    }

    fn load_members(
        &self,
        schema: &AttributeSchema,
        state: &mut FieldState,
        id: &str,
        spec: &CollectionSpec,
        scope: &Scope,
    ) -> SyncResult<BTreeSet<String>> {
        let field = spec.field();
        let refresh = state.is_stale(field.as_str()) || spec.shape() == MemberShape::ProjectScoped;
        if refresh || !state.is_set(field.as_str()) {
            self.fetch(schema, state, id, &Selection::field(field.as_str()), refresh, scope)
                .map_err(|e| SyncError::StaleCollection {
                    field: field.to_string(),
                    source: Box::new(e),
                })?;
        }
        match state.get(field.as_str()) {
            None | Some(Value::Null) => Ok(BTreeSet::new()),
            Some(Value::IdSet(ids)) => Ok(ids.clone()),
            Some(other) => Err(SyncError::TypeMismatch {
                field: field.to_string(),
                expected: "id set",
                found: other.kind(),
            }),
        }
    }
}

fn member_value(
    schema: &AttributeSchema,
    spec: &CollectionSpec,
    ids: &BTreeSet<String>,
    scope: &Scope,
) -> SyncResult<Json> {
    match spec.shape() {
        MemberShape::ProjectScoped => Ok(json!({
            "projectId": scope.project_id(),
            "memberIds": ids,
        })),
        MemberShape::Ids => Ok(json!(ids)),
        MemberShape::Encoded => {
            let field = schema
                .field(spec.field().as_str())
                .ok_or_else(|| SyncError::UnknownField {
                    entity: schema.name().to_string(),
                    field: spec.field().to_string(),
                })?;
            Ok(field.encode(&Value::IdSet(ids.clone()))?)
        }
    }
}
