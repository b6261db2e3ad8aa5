//! Sync events and the observers that log them.

use crate::collection::CollectionOp;
use bisync_schema::{FieldName, GroupId, HttpMethod, ServerVersion};
use std::collections::BTreeSet;

/// Something noteworthy the engine did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A request is about to be sent.
    RequestSent {
        /// Method.
        method: HttpMethod,
        /// Path.
        path: String,
    },
    /// A read group was fetched and merged.
    GroupFetched {
        /// Entity type.
        entity: &'static str,
        /// Group.
        group: GroupId,
        /// Number of fields merged.
        fields: usize,
    },
    /// A read group failed.
    FetchFailed {
        /// Entity type.
        entity: &'static str,
        /// Group.
        group: GroupId,
        /// Error text.
        error: String,
    },
    /// Two read groups in one fetch returned the same field; the later won.
    FieldOverlap {
        /// Entity type.
        entity: &'static str,
        /// Field.
        field: FieldName,
        /// Group whose value was replaced.
        previous: GroupId,
        /// Group whose value was kept.
        group: GroupId,
    },
    /// A feature was skipped because the server is too old.
    VersionGated {
        /// What was gated.
        feature: String,
        /// Minimum version.
        required: ServerVersion,
        /// Connected version.
        current: ServerVersion,
    },
    /// A write group was flushed.
    GroupFlushed {
        /// Entity type.
        entity: &'static str,
        /// Group.
        group: GroupId,
        /// Fields written.
        fields: Vec<FieldName>,
    },
    /// A write group failed; its fields stay dirty.
    FlushFailed {
        /// Entity type.
        entity: &'static str,
        /// Group.
        group: GroupId,
        /// Error text.
        error: String,
    },
    /// A write response echoed a value that could not be decoded.
    EchoDecodeFailed {
        /// Entity type.
        entity: &'static str,
        /// Field.
        field: String,
        /// Decode failure.
        reason: String,
    },
    /// Collection members were changed on the server.
    CollectionChanged {
        /// Entity id.
        entity_id: String,
        /// Collection field.
        field: FieldName,
        /// Operation.
        op: CollectionOp,
        /// Members changed.
        ids: BTreeSet<String>,
    },
    /// Candidates whose membership already matched the request.
    CollectionUnchanged {
        /// Entity id.
        entity_id: String,
        /// Collection field.
        field: FieldName,
        /// Operation.
        op: CollectionOp,
        /// Candidates not sent.
        ids: BTreeSet<String>,
    },
    /// A page of a listing arrived.
    PageFetched {
        /// Listing path.
        path: String,
        /// Offset requested.
        offset: usize,
        /// Records received.
        count: usize,
    },
}

/// Receives engine events.
///
/// The engine takes its observer at construction; there is no global
/// verbosity switch.
pub trait SyncObserver: Send + Sync {
    /// Called for every event.
    fn on_event(&self, event: &SyncEvent);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::RequestSent { method, path } => {
                tracing::debug!(%method, %path, "sending request");
            }
            SyncEvent::GroupFetched { entity, group, fields } => {
                tracing::debug!(entity, %group, fields, "read group fetched");
            }
            SyncEvent::FetchFailed { entity, group, error } => {
                tracing::warn!(entity, %group, %error, "read group failed");
            }
            SyncEvent::FieldOverlap {
                entity,
                field,
                previous,
                group,
            } => {
                tracing::warn!(entity, %field, %previous, %group, "field returned by two read groups");
            }
            SyncEvent::VersionGated {
                feature,
                required,
                current,
            } => {
                tracing::warn!(%feature, %required, %current, "skipped: server version too old");
            }
            SyncEvent::GroupFlushed { entity, group, fields } => {
                tracing::debug!(entity, %group, count = fields.len(), "write group flushed");
            }
            SyncEvent::FlushFailed { entity, group, error } => {
                tracing::warn!(entity, %group, %error, "write group failed");
            }
            SyncEvent::EchoDecodeFailed { entity, field, reason } => {
                tracing::warn!(entity, %field, %reason, "ignored undecodable response field");
            }
            SyncEvent::CollectionChanged {
                entity_id,
                field,
                op,
                ids,
            } => {
                tracing::info!(%entity_id, %field, %op, ?ids, "collection updated");
            }
            SyncEvent::CollectionUnchanged {
                entity_id,
                field,
                op,
                ids,
            } => {
                let state = match op {
                    CollectionOp::Remove => "not present",
                    _ => "already present",
                };
                tracing::info!(%entity_id, %field, %op, ?ids, "{state}, not sent");
            }
            SyncEvent::PageFetched { path, offset, count } => {
                tracing::debug!(%path, offset, count, "page fetched");
            }
        }
    }
}
