//! Dynamic field value type.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// A decoded field value.
///
/// Values are what an entity's field state holds after decoding a server
/// payload. Each [`FieldCodec`](crate::FieldCodec) produces exactly one
/// variant (plus [`Value::Null`] for JSON `null`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null sent by the server.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text value.
    Text(String),
    /// Timestamp normalized to UTC.
    DateTime(DateTime<Utc>),
    /// One of the wire names declared by an enum codec.
    Enum(String),
    /// Unordered set of object ids (memberships, privileges, members).
    IdSet(BTreeSet<String>),
    /// Ordered list of strings.
    TextList(Vec<String>),
    /// Nested object with snake_case keys.
    Record(BTreeMap<String, serde_json::Value>),
    /// Opaque JSON passed through untouched.
    Json(serde_json::Value),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Enum(_) => "enum",
            Value::IdSet(_) => "id set",
            Value::TextList(_) => "text list",
            Value::Record(_) => "record",
            Value::Json(_) => "json",
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if this is a bool value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the id set if this is an id-set value.
    pub fn as_id_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Value::IdSet(ids) => Some(ids),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(ids: BTreeSet<String>) -> Self {
        Value::IdSet(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_text(), Some("x"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(7i64).as_integer(), Some(7));
        assert_eq!(Value::Null.as_text(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::IdSet(BTreeSet::new()).kind(), "id set");
        assert_eq!(Value::Json(serde_json::Value::Null).kind(), "json");
    }
}
