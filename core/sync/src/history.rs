//! Revision history of a document, following renames.

use std::collections::HashSet;
use tracing::{debug, info};

use docsync_common::{DocPath, Result};
use docsync_storage::{CommitSummary, FileChangeStatus};

use crate::engine::SyncEngine;

/// Maximum number of renames followed back in time.
pub const MAX_RENAME_HOPS: usize = 10;

/// One commit touching a document, with the repository path it had then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub commit: CommitSummary,
    pub remote_path: DocPath,
}

impl SyncEngine {
    /// Commits touching a local document, newest first.
    ///
    /// When the oldest commit found renamed the document, the listing
    /// continues under the previous name, up to [`MAX_RENAME_HOPS`] times.
    pub async fn history(&self, path: &DocPath) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.mapper.to_remote(path);

        for _ in 0..=MAX_RENAME_HOPS {
            let commits = self
                .retry
                .execute(|| self.remote.list_commits(&current))
                .await?;

            let mut oldest = None;
            for commit in commits {
                if seen.insert(commit.sha.clone()) {
                    oldest = Some(commit.sha.clone());
                    entries.push(HistoryEntry {
                        commit,
                        remote_path: current.clone(),
                    });
                }
            }
            let Some(oldest) = oldest else {
                break;
            };

            let detail = self
                .retry
                .execute(|| self.remote.get_commit(&oldest))
                .await?;
            let target = current.to_string_path();
            let previous = detail
                .files
                .iter()
                .find(|f| f.filename == target && f.status == FileChangeStatus::Renamed)
                .and_then(|f| f.previous_filename.as_deref());

            match previous {
                Some(previous) => {
                    debug!("{} was renamed from {}", current, previous);
                    current = DocPath::parse(previous)?;
                }
                None => break,
            }
        }

        Ok(entries)
    }

    /// Content of a document as of a history entry.
    pub async fn content_at(&self, entry: &HistoryEntry) -> Result<String> {
        let file = self
            .retry
            .execute(|| {
                self.remote
                    .get_file(&entry.remote_path, Some(entry.commit.sha.as_str()))
            })
            .await?;
        Ok(file.content)
    }

    /// Replace a local document with a historical version and queue it for push.
    pub async fn restore(&self, path: &DocPath, entry: &HistoryEntry) -> Result<()> {
        let content = self.content_at(entry).await?;
        self.local.write(path, &content).await?;
        {
            let mut state = self.state.write().await;
            state.pending_delete.remove(path);
            state.pending_push.insert(path.clone());
        }
        info!("Restored {} from {}", path, entry.commit.sha);
        Ok(())
    }
}
