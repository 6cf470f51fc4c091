//! Classification of tracked documents into sync actions.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use docsync_common::DocPath;

use crate::state::{MetadataStore, SyncState};

/// A local document as observed at the start of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDoc {
    pub path: DocPath,
    pub hash: String,
    pub modified: DateTime<Utc>,
}

/// Remote tree keyed by local path, valued by revision id.
pub type RemoteTree = BTreeMap<DocPath, String>;

/// What should happen to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Unchanged,
    /// Local content must be uploaded.
    Push,
    /// Remote content must be downloaded over the local copy.
    Pull,
    /// Remote changed while the document is locked for editing.
    Defer,
    /// Both sides changed since the last sync.
    Conflict,
    /// Remote counterpart is gone; remove the local copy.
    DeleteLocal,
    /// Remote exists but nothing is known locally; fetch once to seed metadata.
    NeedsSeed,
    /// Remote-only document to download.
    PullNew,
}

/// Classification of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub path: DocPath,
    pub action: Action,
}

/// Compares local, remote and cached state. Holds no state of its own.
pub struct Detector<'a> {
    metadata: &'a MetadataStore,
    state: &'a SyncState,
    is_locked: &'a (dyn Fn(&DocPath) -> bool + Send + Sync),
}

impl<'a> Detector<'a> {
    pub fn new(
        metadata: &'a MetadataStore,
        state: &'a SyncState,
        is_locked: &'a (dyn Fn(&DocPath) -> bool + Send + Sync),
    ) -> Self {
        Self {
            metadata,
            state,
            is_locked,
        }
    }

    /// Classify a single local document against its remote revision, if any.
    pub fn classify(&self, local: &LocalDoc, remote: Option<&str>) -> Action {
        let path = &local.path;
        let meta = self.metadata.get(path);

        let Some(revision) = remote else {
            return match meta {
                Some(meta) if meta.has_remote() => {
                    if self.state.recently_pushed.contains(path) {
                        // Listing has not caught up with our own write yet.
                        Action::Unchanged
                    } else if meta.local_changed(&local.hash) {
                        // Edited locally after the remote deletion: recreate.
                        Action::Push
                    } else {
                        Action::DeleteLocal
                    }
                }
                _ => Action::Push,
            };
        };

        let Some(meta) = meta else {
            return Action::NeedsSeed;
        };

        let local_changed = meta.local_changed(&local.hash);
        let remote_changed =
            meta.remote_changed(revision) && !self.state.recently_pushed.masks(path, revision);

        match (local_changed, remote_changed) {
            (true, true) => Action::Conflict,
            (true, false) => Action::Push,
            (false, true) if (self.is_locked)(path) => Action::Defer,
            (false, true) => Action::Pull,
            (false, false) => Action::Unchanged,
        }
    }

    /// Classify every local document plus remote-only paths.
    ///
    /// Paths queued for remote deletion are skipped on both sides.
    pub fn detect(&self, locals: &[LocalDoc], remote: &RemoteTree) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(locals.len());
        let mut seen = BTreeSet::new();

        for local in locals {
            seen.insert(local.path.clone());
            if self.state.pending_delete.contains_key(&local.path) {
                continue;
            }
            let action = self.classify(local, remote.get(&local.path).map(String::as_str));
            decisions.push(Decision {
                path: local.path.clone(),
                action,
            });
        }

        for path in remote.keys() {
            if seen.contains(path)
                || self.state.pending_delete.contains_key(path)
                || self.state.recently_deleted.contains(path)
            {
                continue;
            }
            decisions.push(Decision {
                path: path.clone(),
                action: Action::PullNew,
            });
        }

        decisions
    }

    /// Remote state unknown: only mark documents that plainly need pushing.
    pub fn detect_degraded(&self, locals: &[LocalDoc]) -> Vec<DocPath> {
        locals
            .iter()
            .filter(|local| !self.state.pending_delete.contains_key(&local.path))
            .filter(|local| match self.metadata.get(&local.path) {
                Some(meta) => meta.local_changed(&local.hash),
                None => true,
            })
            .map(|local| local.path.clone())
            .collect()
    }
}
