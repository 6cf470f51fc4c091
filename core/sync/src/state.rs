//! Per-document metadata and process-wide sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use docsync_common::DocPath;

use crate::grace::{GraceCache, DELETE_GRACE, PUSH_GRACE};

/// Last known local/remote state of a single tracked document.
///
/// `remote_content_hash` is the hash of the object named by
/// `remote_revision_id` when the record was last refreshed. It is a cache,
/// never a live value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMetadata")]
pub struct DocumentMetadata {
    /// Local path of the document.
    pub path: DocPath,
    /// Remote revision id last associated with this path.
    pub remote_revision_id: Option<String>,
    /// Hash of the local content when the record was refreshed.
    pub local_content_hash: String,
    /// Hash of the content behind `remote_revision_id`.
    pub remote_content_hash: Option<String>,
    /// Local modification time.
    pub last_modified_at: DateTime<Utc>,
    /// Set only while a conflict on this path is unresolved.
    pub conflicted: bool,
}

impl DocumentMetadata {
    /// Record for a document that has never been associated with a remote revision.
    pub fn new_local(path: DocPath, local_hash: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            remote_revision_id: None,
            local_content_hash: local_hash.into(),
            remote_content_hash: None,
            last_modified_at: modified,
            conflicted: false,
        }
    }

    /// Record for a document whose local and remote content agree.
    pub fn synced(
        path: DocPath,
        revision_id: impl Into<String>,
        hash: impl Into<String>,
        modified: DateTime<Utc>,
    ) -> Self {
        let hash = hash.into();
        Self {
            path,
            remote_revision_id: Some(revision_id.into()),
            local_content_hash: hash.clone(),
            remote_content_hash: Some(hash),
            last_modified_at: modified,
            conflicted: false,
        }
    }

    /// Mark as synchronized after a successful push or pull.
    pub fn mark_synced(&mut self, revision_id: impl Into<String>, hash: impl Into<String>) {
        let hash = hash.into();
        self.remote_revision_id = Some(revision_id.into());
        self.local_content_hash = hash.clone();
        self.remote_content_hash = Some(hash);
        self.last_modified_at = Utc::now();
        self.conflicted = false;
    }

    /// Whether this path was ever associated with a remote revision.
    pub fn has_remote(&self) -> bool {
        self.remote_revision_id.is_some()
    }

    /// Local content differs from the cached remote content.
    pub fn local_changed(&self, local_hash: &str) -> bool {
        self.remote_content_hash.as_deref() != Some(local_hash)
    }

    /// The remote revision differs from the cached one.
    pub fn remote_changed(&self, revision_id: &str) -> bool {
        self.remote_revision_id.as_deref() != Some(revision_id)
    }
}

/// On-disk shape, accepting the legacy `sha`/`hash` record layout.
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
struct RawMetadata {
    path: DocPath,
    #[serde(default, alias = "remoteRevisionId", alias = "sha")]
    remote_revision_id: Option<String>,
    #[serde(default, alias = "localContentHash")]
    local_content_hash: Option<String>,
    #[serde(default, alias = "remoteContentHash")]
    remote_content_hash: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default, alias = "lastModifiedAt", alias = "lastModified")]
    last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    conflicted: bool,
}

impl From<RawMetadata> for DocumentMetadata {
    fn from(raw: RawMetadata) -> Self {
        // Legacy records kept one hash for both sides.
        let remote_content_hash = raw.remote_content_hash.or_else(|| {
            raw.remote_revision_id
                .as_ref()
                .and(raw.hash.clone())
        });
        let local_content_hash = raw
            .local_content_hash
            .or(raw.hash)
            .unwrap_or_default();
        Self {
            path: raw.path,
            remote_revision_id: raw.remote_revision_id,
            local_content_hash,
            remote_content_hash,
            last_modified_at: raw.last_modified_at.unwrap_or_else(Utc::now),
            conflicted: raw.conflicted,
        }
    }
}

/// Metadata records keyed by local path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataStore {
    entries: BTreeMap<DocPath, DocumentMetadata>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &DocPath) -> Option<&DocumentMetadata> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &DocPath) -> Option<&mut DocumentMetadata> {
        self.entries.get_mut(path)
    }

    /// Insert or replace the record for `meta.path`.
    pub fn set(&mut self, meta: DocumentMetadata) {
        self.entries.insert(meta.path.clone(), meta);
    }

    pub fn delete(&mut self, path: &DocPath) -> Option<DocumentMetadata> {
        self.entries.remove(path)
    }

    pub fn paths(&self) -> Vec<DocPath> {
        self.entries.keys().cloned().collect()
    }

    /// Paths whose conflict is still unresolved.
    pub fn conflicted(&self) -> Vec<DocPath> {
        self.entries
            .values()
            .filter(|m| m.conflicted)
            .map(|m| m.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Engine-owned work queues and grace windows.
#[derive(Debug)]
pub struct SyncState {
    /// Paths with local changes not yet uploaded.
    pub pending_push: BTreeSet<DocPath>,
    /// Paths deleted locally, with the last known remote revision id.
    pub pending_delete: BTreeMap<DocPath, String>,
    /// Paths whose pull waits until the document is unlocked.
    pub deferred_pulls: BTreeSet<DocPath>,
    pub recently_pushed: GraceCache,
    pub recently_deleted: GraceCache,
}

impl SyncState {
    /// Empty state with the default grace windows.
    pub fn new() -> Self {
        Self {
            pending_push: BTreeSet::new(),
            pending_delete: BTreeMap::new(),
            deferred_pulls: BTreeSet::new(),
            recently_pushed: GraceCache::new(PUSH_GRACE),
            recently_deleted: GraceCache::new(DELETE_GRACE),
        }
    }

    /// Forget a path everywhere except the grace windows.
    pub fn forget(&mut self, path: &DocPath) {
        self.pending_push.remove(path);
        self.pending_delete.remove(path);
        self.deferred_pulls.remove(path);
    }

    /// Drop grace entries older than their window.
    pub fn expire_grace(&mut self) {
        self.recently_pushed.expire();
        self.recently_deleted.expire();
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutually exclusive run flag.
#[derive(Debug, Default)]
pub struct RunFlag {
    running: AtomicBool,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag; `None` if a run already holds it.
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { flag: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the [`RunFlag`] when dropped, on every exit path.
#[derive(Debug)]
pub struct RunGuard<'a> {
    flag: &'a RunFlag,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn test_change_predicates() {
        let meta = DocumentMetadata::synced(p("a.md"), "r1", "h1", Utc::now());
        assert!(!meta.local_changed("h1"));
        assert!(meta.local_changed("h2"));
        assert!(!meta.remote_changed("r1"));
        assert!(meta.remote_changed("r2"));

        let fresh = DocumentMetadata::new_local(p("b.md"), "h1", Utc::now());
        assert!(!fresh.has_remote());
        assert!(fresh.local_changed("h1"));
    }

    #[test]
    fn test_mark_synced_clears_conflict() {
        let mut meta = DocumentMetadata::new_local(p("a.md"), "h0", Utc::now());
        meta.conflicted = true;
        meta.mark_synced("r9", "h9");
        assert_eq!(meta.remote_revision_id.as_deref(), Some("r9"));
        assert_eq!(meta.local_content_hash, "h9");
        assert_eq!(meta.remote_content_hash.as_deref(), Some("h9"));
        assert!(!meta.conflicted);
    }

    #[test]
    fn test_legacy_record_migrates() {
        let json = r#"{"path": "notes/x.md", "sha": "abc", "hash": "h1", "lastModified": "2024-01-01T00:00:00Z"}"#;
        let meta: DocumentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.path, p("notes/x.md"));
        assert_eq!(meta.remote_revision_id.as_deref(), Some("abc"));
        assert_eq!(meta.local_content_hash, "h1");
        assert_eq!(meta.remote_content_hash.as_deref(), Some("h1"));

        let unsynced = r#"{"path": "y.md", "hash": "h2"}"#;
        let meta: DocumentMetadata = serde_json::from_str(unsynced).unwrap();
        assert!(meta.remote_content_hash.is_none());
        assert_eq!(meta.local_content_hash, "h2");
    }

    #[test]
    fn test_store_round_trips_current_shape() {
        let mut store = MetadataStore::new();
        store.set(DocumentMetadata::synced(p("a.md"), "r1", "h1", Utc::now()));
        let mut conflicted = DocumentMetadata::new_local(p("b/c.md"), "h2", Utc::now());
        conflicted.conflicted = true;
        store.set(conflicted);

        let json = serde_json::to_string(&store).unwrap();
        let back: MetadataStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
        assert_eq!(back.conflicted(), vec![p("b/c.md")]);
    }

    #[test]
    fn test_run_flag_is_exclusive() {
        let flag = RunFlag::new();
        let guard = flag.try_acquire().unwrap();
        assert!(flag.is_running());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_running());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_forget_clears_queues() {
        let mut state = SyncState::new();
        state.pending_push.insert(p("a.md"));
        state.pending_delete.insert(p("a.md"), "r1".to_string());
        state.deferred_pulls.insert(p("a.md"));
        state.forget(&p("a.md"));
        assert!(state.pending_push.is_empty());
        assert!(state.pending_delete.is_empty());
        assert!(state.deferred_pulls.is_empty());
    }
}
