//! An observer that records engine events for assertions.

use bisync_engine::{SyncEvent, SyncObserver};
use parking_lot::Mutex;

/// Collects every event the engine reports.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Events matching `predicate`.
    pub fn matching<F>(&self, predicate: F) -> Vec<SyncEvent>
    where
        F: Fn(&SyncEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Number of version-gated events.
    pub fn gated(&self) -> usize {
        self.matching(|e| matches!(e, SyncEvent::VersionGated { .. })).len()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl SyncObserver for RecordingObserver {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisync_engine::HttpMethod;

    #[test]
    fn records_in_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&SyncEvent::RequestSent {
            method: HttpMethod::Get,
            path: "/a".into(),
        });
        observer.on_event(&SyncEvent::PageFetched {
            path: "/a".into(),
            offset: 0,
            count: 3,
        });

        assert_eq!(observer.events().len(), 2);
        assert_eq!(
            observer
                .matching(|e| matches!(e, SyncEvent::PageFetched { .. }))
                .len(),
            1
        );
        observer.clear();
        assert!(observer.events().is_empty());
    }
}
