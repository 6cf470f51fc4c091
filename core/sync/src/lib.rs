//! docsync sync engine
//!
//! Keeps a local document store convergent with one branch of a remote,
//! version-controlled store while tolerating concurrent edits on both sides:
//! - Content hashing and per-document metadata for change detection
//! - Conflict detection with grace windows for remote read-after-write lag
//! - Conflict resolution from policy or through a human collaborator
//! - Push/pull/delete protocols under optimistic concurrency with retry
//! - A single-flight orchestrator, a scheduler, and persisted runtime state

pub mod checksum;
pub mod collaborator;
pub mod config;
pub mod conflict;
pub mod detector;
pub mod engine;
pub mod grace;
pub mod history;
pub mod ops;
pub mod paths;
pub mod persist;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use checksum::content_hash;
pub use collaborator::{Choice, Collaborator, HeadlessCollaborator, Notice, NoticeLevel};
pub use config::{ConflictPolicy, Settings, Verbosity, DEFAULT_API_BASE};
pub use conflict::{
    merge_lines, ConflictResolver, Resolution, Resolved, MARKER_LOCAL, MARKER_REMOTE, MARKER_SPLIT,
};
pub use detector::{Action, Decision, Detector, LocalDoc, RemoteTree};
pub use engine::{LockPredicate, RunKind, RunOutcome, StatusSnapshot, SyncEngine, SyncReport};
pub use grace::{GraceCache, DELETE_GRACE, PUSH_GRACE};
pub use history::{HistoryEntry, MAX_RENAME_HOPS};
pub use ops::PushOutcome;
pub use paths::PathMapper;
pub use persist::{PersistedState, StateStore, STATE_VERSION};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use state::{DocumentMetadata, MetadataStore, RunFlag, RunGuard, SyncState};
