//! Per-entity field state.

use bisync_schema::{AttributeSchema, DecodeError, FieldName, GroupId, Value};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

/// Current field values of one entity instance plus its dirty set.
///
/// A field absent from the value map is unset. Each instance owns its state
/// exclusively; concurrent mutation of one state is not supported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    values: BTreeMap<FieldName, Value>,
    dirty: BTreeSet<FieldName>,
    fetched_groups: BTreeSet<GroupId>,
    stale: BTreeSet<FieldName>,
}

impl FieldState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates a state from a listing entry (REST keys).
    ///
    /// Unknown keys are ignored. Nothing is marked dirty or fetched, so
    /// fields already present are not requested again.
    pub fn from_listing(schema: &AttributeSchema, entry: &Map<String, Json>) -> Result<Self, DecodeError> {
        let (decoded, errors) = schema.decode_object(entry);
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        Ok(Self {
            values: decoded.into_iter().collect(),
            ..Self::default()
        })
    }

    /// Current value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Returns true if the field has a value.
    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Fields that have a value.
    pub fn set_fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.values.keys().copied()
    }

    /// Returns true if any field is dirty.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Fields changed locally and not yet flushed.
    pub fn dirty_fields(&self) -> &BTreeSet<FieldName> {
        &self.dirty
    }

    /// Returns true if the field is dirty.
    pub fn is_field_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    /// Returns true if the read group has been fetched.
    pub fn has_fetched(&self, group: &str) -> bool {
        self.fetched_groups.contains(group)
    }

    /// Read groups fetched so far.
    pub fn fetched_groups(&self) -> &BTreeSet<GroupId> {
        &self.fetched_groups
    }

    /// Returns true if the field's cached collection was invalidated.
    pub fn is_stale(&self, field: &str) -> bool {
        self.stale.contains(field)
    }

    /// Sets a local value and marks it dirty.
    pub(crate) fn set_local(&mut self, field: FieldName, value: Value) {
        self.values.insert(field, value);
        self.dirty.insert(field);
    }

    /// Merges a server value. Dirty fields are left alone; returns whether
    /// the value was stored.
    pub(crate) fn merge_remote(&mut self, field: FieldName, value: Value) -> bool {
        if self.dirty.contains(&field) {
            return false;
        }
        self.values.insert(field, value);
        self.stale.remove(&field);
        true
    }

    pub(crate) fn mark_fetched(&mut self, group: GroupId) {
        self.fetched_groups.insert(group);
    }

    pub(crate) fn clear_dirty(&mut self, fields: &[FieldName]) {
        for field in fields {
            self.dirty.remove(field);
        }
    }

    /// Drops a cached value so the next read refetches it.
    pub(crate) fn invalidate(&mut self, schema: &AttributeSchema, field: FieldName) {
        self.values.remove(&field);
        self.stale.insert(field);
        for group in schema.read_groups() {
            if group.contains(field.as_str()) {
                self.fetched_groups.remove(&group.id());
            }
        }
    }

    /// Reverts one dirty field to unset.
    pub(crate) fn revert(&mut self, schema: &AttributeSchema, field: FieldName) {
        if self.dirty.remove(&field) {
            self.values.remove(&field);
            for group in schema.read_groups() {
                if group.contains(field.as_str()) {
                    self.fetched_groups.remove(&group.id());
                }
            }
        }
    }

    /// Discards all local changes. Returns the fields that were dirty; their
    /// values become unset and will be fetched again on the next read.
    pub fn discard_changes(&mut self, schema: &AttributeSchema) -> Vec<FieldName> {
        let dirty: Vec<FieldName> = self.dirty.iter().copied().collect();
        for field in &dirty {
            self.revert(schema, *field);
        }
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisync_schema::{Endpoint, FieldCodec, ReadGroup};
    use serde_json::json;

    fn schema() -> AttributeSchema {
        AttributeSchema::builder("group")
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
            .field("description", FieldCodec::Text)
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/usergroups/{id}"),
                &["id", "name", "description"],
            ))
            .build()
    }

    #[test]
    fn from_listing_skips_unknown_keys() {
        let entry = json!({"id": "G1", "name": "Admins", "subtype": 8705});
        let state = FieldState::from_listing(&schema(), entry.as_object().unwrap()).unwrap();
        assert_eq!(state.get("name"), Some(&Value::Text("Admins".into())));
        assert!(!state.is_set("description"));
        assert!(!state.is_dirty());
        assert!(state.fetched_groups().is_empty());
    }

    #[test]
    fn from_listing_reports_decode_errors() {
        let entry = json!({"id": "G1", "name": 5});
        let err = FieldState::from_listing(&schema(), entry.as_object().unwrap()).unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn merge_skips_dirty_fields() {
        let mut state = FieldState::new();
        state.set_local(FieldName::new("name"), Value::Text("local".into()));
        assert!(!state.merge_remote(FieldName::new("name"), Value::Text("server".into())));
        assert_eq!(state.get("name"), Some(&Value::Text("local".into())));

        state.clear_dirty(&[FieldName::new("name")]);
        assert!(state.merge_remote(FieldName::new("name"), Value::Text("server".into())));
        assert_eq!(state.get("name"), Some(&Value::Text("server".into())));
    }

    #[test]
    fn discard_unsets_and_unfetches() {
        let schema = schema();
        let mut state = FieldState::new();
        state.merge_remote(FieldName::new("id"), Value::Text("G1".into()));
        state.mark_fetched(GroupId::new("info"));
        state.set_local(FieldName::new("name"), Value::Text("x".into()));

        let discarded = state.discard_changes(&schema);
        assert_eq!(discarded, vec![FieldName::new("name")]);
        assert!(!state.is_dirty());
        assert!(!state.is_set("name"));
        assert!(state.is_set("id"));
        assert!(!state.has_fetched("info"));
    }

    #[test]
    fn invalidate_marks_stale_until_merged() {
        let schema = schema();
        let mut state = FieldState::new();
        state.mark_fetched(GroupId::new("info"));
        state.invalidate(&schema, FieldName::new("description"));
        assert!(state.is_stale("description"));
        assert!(!state.has_fetched("info"));

        state.merge_remote(FieldName::new("description"), Value::Null);
        assert!(!state.is_stale("description"));
    }
}
