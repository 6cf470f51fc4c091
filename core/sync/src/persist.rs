//! Persistence of runtime state across process restarts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use docsync_common::{DocPath, Error, Result};

use crate::state::MetadataStore;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 2;

/// Everything re-hydrated at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub version: u32,
    pub metadata: MetadataStore,
    #[serde(alias = "pendingDeletes")]
    pub pending_delete: BTreeMap<DocPath, String>,
    #[serde(alias = "deferredPullForActive")]
    pub deferred_pulls: BTreeSet<DocPath>,
}

/// JSON file holding [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `state.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("state.json"))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state. A missing file is empty state; so is an unreadable one,
    /// after a warning, since metadata is re-seeded from the remote.
    pub async fn load(&self) -> Result<PersistedState> {
        if !fs::try_exists(&self.path).await? {
            debug!("No state at {}, starting empty", self.path.display());
            return Ok(PersistedState::default());
        }

        let content = fs::read_to_string(&self.path).await?;
        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                if state.version < STATE_VERSION {
                    debug!("Migrating state from version {}", state.version);
                }
                Ok(state)
            }
            Err(e) => {
                warn!("Discarding unreadable state {}: {}", self.path.display(), e);
                Ok(PersistedState::default())
            }
        }
    }

    /// Write state through a temp file and rename.
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut state = state.clone();
        state.version = STATE_VERSION;
        let json =
            serde_json::to_string_pretty(&state).map_err(|e| Error::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DocumentMetadata;
    use chrono::Utc;
    use tempfile::TempDir;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::in_dir(temp.path());
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::in_dir(temp.path().join("nested"));

        let mut state = PersistedState::default();
        state
            .metadata
            .set(DocumentMetadata::synced(p("a.md"), "r1", "h1", Utc::now()));
        state.pending_delete.insert(p("gone.md"), "r2".to_string());
        state.deferred_pulls.insert(p("open.md"));
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.version, STATE_VERSION);
        assert_eq!(loaded.metadata, state.metadata);
        assert_eq!(loaded.pending_delete, state.pending_delete);
        assert_eq!(loaded.deferred_pulls, state.deferred_pulls);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::in_dir(temp.path());
        fs::write(store.path(), "{not json").await.unwrap();
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn test_legacy_layout_loads() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::in_dir(temp.path());
        let legacy = r#"{
            "metadata": {
                "x.md": {"path": "x.md", "sha": "r1", "hash": "h1"}
            },
            "pendingDeletes": {"y.md": "r2"},
            "deferredPullForActive": ["z.md"]
        }"#;
        fs::write(store.path(), legacy).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.version, 0);
        let meta = loaded.metadata.get(&p("x.md")).unwrap();
        assert_eq!(meta.remote_content_hash.as_deref(), Some("h1"));
        assert_eq!(loaded.pending_delete.get(&p("y.md")).map(String::as_str), Some("r2"));
        assert!(loaded.deferred_pulls.contains(&p("z.md")));
    }
}
