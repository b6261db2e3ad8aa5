//! Minimum server version checks.

use crate::error::{SyncError, SyncResult};
use crate::observer::{SyncEvent, SyncObserver};
use bisync_schema::{GatePolicy, ServerVersion};
use std::fmt;
use std::sync::Arc;

/// Checks feature requirements against the connected server version.
///
/// Every entity-level operation and every field resolution goes through
/// the same gate, before any request is built.
#[derive(Clone)]
pub struct VersionGate {
    current: Option<ServerVersion>,
    policy: GatePolicy,
    observer: Arc<dyn SyncObserver>,
}

impl VersionGate {
    /// Creates a gate.
    pub fn new(
        current: Option<ServerVersion>,
        policy: GatePolicy,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            current,
            policy,
            observer,
        }
    }

    /// Connected server version, if known.
    pub fn current(&self) -> Option<ServerVersion> {
        self.current
    }

    /// Policy applied to unmet requirements.
    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Returns true if `min_version` is met. Unknown server versions and
    /// absent requirements always pass.
    pub fn allows(&self, min_version: Option<ServerVersion>) -> bool {
        match (min_version, self.current) {
            (Some(required), Some(current)) => current.satisfies(&required),
            _ => true,
        }
    }

    /// Applies the policy to `feature`.
    ///
    /// Returns `Ok(true)` when the requirement is met, `Ok(false)` when the
    /// feature should be skipped (`Silent`, `Warn`), and
    /// [`SyncError::UnsupportedOnServerVersion`] under `Raise`.
    pub fn check(&self, feature: &str, min_version: Option<ServerVersion>) -> SyncResult<bool> {
        let (Some(required), Some(current)) = (min_version, self.current) else {
            return Ok(true);
        };
        if current.satisfies(&required) {
            return Ok(true);
        }
        match self.policy {
            GatePolicy::Silent => Ok(false),
            GatePolicy::Warn => {
                self.observer.on_event(&SyncEvent::VersionGated {
                    feature: feature.to_string(),
                    required,
                    current,
                });
                Ok(false)
            }
            GatePolicy::Raise => Err(SyncError::UnsupportedOnServerVersion {
                feature: feature.to_string(),
                required,
                current,
            }),
        }
    }
}

impl fmt::Debug for VersionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionGate")
            .field("current", &self.current)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
