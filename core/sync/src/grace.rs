//! Short-lived memory of engine-initiated remote changes.
//!
//! The remote listing may lag behind a write for a while. A path recorded
//! here is excused from opposite-direction reconciliation until its window
//! elapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use docsync_common::DocPath;

/// Window after a push.
pub const PUSH_GRACE: Duration = Duration::from_secs(90);
/// Window after a remote delete.
pub const DELETE_GRACE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
struct GraceEntry {
    at: Instant,
    /// Revision id our write replaced, if the path existed before.
    superseded: Option<String>,
}

/// Path -> time of the engine-initiated change.
#[derive(Debug, Clone)]
pub struct GraceCache {
    window: Duration,
    entries: HashMap<DocPath, GraceEntry>,
}

impl GraceCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn record(&mut self, path: &DocPath) {
        self.record_replacing(path, None);
    }

    /// Record a write that replaced revision `superseded`.
    pub fn record_replacing(&mut self, path: &DocPath, superseded: Option<String>) {
        self.entries.insert(
            path.clone(),
            GraceEntry {
                at: Instant::now(),
                superseded,
            },
        );
    }

    pub fn record_at(&mut self, path: &DocPath, at: Instant) {
        self.entries.insert(path.clone(), GraceEntry { at, superseded: None });
    }

    /// Whether `path` changed within the window.
    pub fn contains(&self, path: &DocPath) -> bool {
        self.live(path).is_some()
    }

    /// Whether a listing reporting `revision` for `path` is only lagging
    /// behind our own write.
    pub fn masks(&self, path: &DocPath, revision: &str) -> bool {
        self.live(path)
            .is_some_and(|entry| entry.superseded.as_deref() == Some(revision))
    }

    fn live(&self, path: &DocPath) -> Option<&GraceEntry> {
        self.entries
            .get(path)
            .filter(|entry| entry.at.elapsed() < self.window)
    }

    /// Drop entries older than the window.
    pub fn expire(&mut self) {
        let window = self.window;
        self.entries.retain(|_, entry| entry.at.elapsed() < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
