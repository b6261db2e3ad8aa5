//! Error types for the sync engine.

use bisync_schema::{DecodeError, EncodeError, FieldName, GroupId, HttpMethod, ServerVersion};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("server returned {status} for {method} {path}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Request method.
        method: HttpMethod,
        /// Request path.
        path: String,
        /// Server message, if the body carried one.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session is closed.
    #[error("not connected to server")]
    NotConnected,

    /// One or more read groups failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A server value could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A local value could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// One or more write groups failed.
    #[error(transparent)]
    Flush(#[from] FlushError),

    /// The field has no write group.
    #[error("field `{field}` of {entity} is read-only")]
    ImmutableField {
        /// Entity type.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The connected server is older than the feature requires.
    #[error("{feature} requires server version {required}, connected to {current}")]
    UnsupportedOnServerVersion {
        /// What was gated.
        feature: String,
        /// Minimum version required.
        required: ServerVersion,
        /// Version of the connected server.
        current: ServerVersion,
    },

    /// A collection cache was invalid and could not be reloaded.
    #[error("collection `{field}` could not be refreshed")]
    StaleCollection {
        /// Collection field.
        field: String,
        /// Why the refresh failed.
        #[source]
        source: Box<SyncError>,
    },

    /// A nested collection request failed; nothing was changed.
    #[error("{field} update failed for {failed:?}")]
    CollectionMutation {
        /// Collection field.
        field: String,
        /// Candidates that were not applied.
        failed: BTreeSet<String>,
        /// Request failure.
        #[source]
        source: Box<SyncError>,
    },

    /// The schema has no such field.
    #[error("{entity} has no field `{field}`")]
    UnknownField {
        /// Entity type.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The field has no read group.
    #[error("field `{field}` of {entity} cannot be fetched")]
    NotReadable {
        /// Entity type.
        entity: String,
        /// Field name.
        field: String,
    },

    /// A value does not have the kind the field expects.
    #[error("field `{field}` expects {expected}, got {found}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Expected kind.
        expected: &'static str,
        /// Kind received.
        found: &'static str,
    },

    /// The entity type lacks a capability.
    #[error("{entity} does not support {capability}")]
    Unsupported {
        /// Entity type.
        entity: String,
        /// Missing capability.
        capability: String,
    },

    /// The caller passed arguments the server would reject.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The endpoint needs a project scope and none was given.
    #[error("{path} requires a project scope")]
    MissingProjectScope {
        /// Endpoint path template.
        path: String,
    },

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Server { status, .. } => Some(*status),
            SyncError::CollectionMutation { source, .. } | SyncError::StaleCollection { source, .. } => {
                source.status()
            }
            _ => None,
        }
    }
}

/// A read group that failed during a fetch.
#[derive(Debug)]
pub struct GroupFailure {
    /// Failed group.
    pub group: GroupId,
    /// Cause.
    pub error: SyncError,
}

/// One or more read groups could not be fetched.
///
/// Fields merged from the other groups stay in the entity state.
#[derive(Debug)]
pub struct FetchError {
    /// Failed groups, in schema order.
    pub failures: Vec<GroupFailure>,
    /// Fields populated by the groups that succeeded.
    pub populated: Vec<FieldName>,
}

impl FetchError {
    /// Ids of the failed groups.
    pub fn failed_groups(&self) -> Vec<GroupId> {
        self.failures.iter().map(|f| f.group).collect()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to fetch read group(s)")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}`{}` ({})", failure.group, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

/// Outcome of one write group during a flush.
#[derive(Debug)]
pub struct GroupOutcome {
    /// Write group.
    pub group: GroupId,
    /// Dirty fields the group carried.
    pub fields: Vec<FieldName>,
    /// Failure, or `None` when the group was flushed.
    pub error: Option<SyncError>,
}

/// At least one write group failed. Failed groups keep their fields dirty.
#[derive(Debug)]
pub struct FlushError {
    /// Every attempted group, in schema order.
    pub outcomes: Vec<GroupOutcome>,
}

impl FlushError {
    /// Groups whose request failed.
    pub fn failed_groups(&self) -> Vec<GroupId> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.group)
            .collect()
    }

    /// Groups that were written.
    pub fn flushed_groups(&self) -> Vec<GroupId> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.group)
            .collect()
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flush failed for write group(s)")?;
        let failed = self.outcomes.iter().filter_map(|o| o.error.as_ref().map(|e| (o.group, e)));
        for (i, (group, error)) in failed.enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}`{group}` ({error})")?;
        }
        Ok(())
    }
}

impl std::error::Error for FlushError {}
