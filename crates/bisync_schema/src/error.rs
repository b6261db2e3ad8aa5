//! Error types for the schema crate.

use thiserror::Error;

/// Result type for schema construction.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Programmer errors detected while building an [`AttributeSchema`](crate::AttributeSchema).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The same field was declared twice.
    #[error("field `{field}` is declared more than once in schema `{schema}`")]
    DuplicateField {
        /// Schema name.
        schema: String,
        /// Field name.
        field: String,
    },

    /// Two groups share an identifier.
    #[error("group id `{group}` is used more than once in schema `{schema}`")]
    DuplicateGroup {
        /// Schema name.
        schema: String,
        /// Group identifier.
        group: String,
    },

    /// A group or collection refers to a field that was never declared.
    #[error("group `{group}` refers to undeclared field `{field}`")]
    UnknownField {
        /// Group identifier (or collection field).
        group: String,
        /// Field name.
        field: String,
    },

    /// A field is claimed by two write groups.
    #[error("field `{field}` is claimed by write groups `{first}` and `{second}`")]
    AmbiguousWrite {
        /// Field name.
        field: String,
        /// First claiming group.
        first: String,
        /// Second claiming group.
        second: String,
    },

    /// A single-field read group lists a number of fields other than one.
    #[error("single-field read group `{group}` must contain exactly one field, found {count}")]
    SingleFieldShape {
        /// Group identifier.
        group: String,
        /// Number of fields listed.
        count: usize,
    },

    /// A nested collection has no read group to load its membership from.
    #[error("collection `{field}` has no read group")]
    CollectionNotReadable {
        /// Field name.
        field: String,
    },

    /// A nested collection is not an id set.
    #[error("collection `{field}` must use an id-set codec")]
    CollectionCodec {
        /// Field name.
        field: String,
    },

    /// The same collection was declared twice.
    #[error("collection `{field}` is declared more than once")]
    DuplicateCollection {
        /// Field name.
        field: String,
    },

    /// A group does not list any field.
    #[error("group `{group}` has no fields")]
    EmptyGroup {
        /// Group identifier.
        group: String,
    },
}

/// A server value could not be decoded into a field value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot decode field `{field}` from {raw}: {reason}")]
pub struct DecodeError {
    /// Field being decoded.
    pub field: String,
    /// Raw JSON received from the server.
    pub raw: serde_json::Value,
    /// What was wrong with it.
    pub reason: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(field: impl Into<String>, raw: &serde_json::Value, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            raw: raw.clone(),
            reason: reason.into(),
        }
    }
}

/// A local value does not fit the codec of its field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot encode field `{field}`: expected {expected}, found {found}")]
pub struct EncodeError {
    /// Field being encoded.
    pub field: String,
    /// Kind the codec expects.
    pub expected: &'static str,
    /// Kind of the value held.
    pub found: &'static str,
}
