//! Store trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docsync_common::{DocPath, Result};

/// Kind of an entry in a remote directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks and submodules; never synchronized.
    #[serde(other)]
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full repository path of the entry.
    pub path: DocPath,
    /// Revision id (blob sha) of the entry.
    pub sha: String,
    pub kind: EntryKind,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
}

/// A remote file with its decoded text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: DocPath,
    /// Revision id of the returned content.
    pub sha: String,
    pub content: String,
}

/// Outcome of a successful create/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Revision id of the stored content.
    pub sha: String,
    /// Commit that recorded the write, when the store reports one.
    pub commit_sha: Option<String>,
}

/// A commit touching some path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// How a commit changed a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    #[serde(other)]
    Other,
}

/// A file entry of a commit detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: FileChangeStatus,
    /// Source path for renames.
    pub previous_filename: Option<String>,
}

/// A commit with its changed-file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub summary: CommitSummary,
    pub files: Vec<ChangedFile>,
}

/// Remote, version-controlled document store.
///
/// Each method issues exactly one logical request. Implementations do not
/// retry; the engine wraps calls in its retry policy.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "github", "memory").
    fn name(&self) -> &str;

    /// List the direct children of a directory.
    ///
    /// # Errors
    /// - `NotFound` if the directory does not exist
    async fn list_dir(&self, path: &DocPath) -> Result<Vec<RemoteEntry>>;

    /// Fetch a file, at `reference` (commit sha or branch) or the configured branch.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist at that reference
    /// - `Decode` if the payload is not valid base64/UTF-8
    async fn get_file(&self, path: &DocPath, reference: Option<&str>) -> Result<RemoteFile>;

    /// Create or update a file.
    ///
    /// # Preconditions
    /// - `sha` is the revision being replaced, or `None` for a first-time creation
    ///
    /// # Errors
    /// - `Conflict` if `sha` is not the current revision
    /// - `AlreadyExists` if `sha` is `None` but the file exists
    async fn put_file(
        &self,
        path: &DocPath,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteResult>;

    /// Delete a file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `Conflict` if `sha` is not the current revision
    async fn delete_file(&self, path: &DocPath, sha: &str, message: &str) -> Result<()>;

    /// List commits touching `path`, newest first.
    async fn list_commits(&self, path: &DocPath) -> Result<Vec<CommitSummary>>;

    /// Get one commit with its changed files.
    async fn get_commit(&self, sha: &str) -> Result<CommitDetail>;
}

/// A document present in the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: DocPath,
    pub modified: DateTime<Utc>,
}

/// Local working copy of the documents.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g., "fs", "memory").
    fn name(&self) -> &str;

    /// Enumerate every document in the store.
    async fn list(&self) -> Result<Vec<LocalFile>>;

    /// Read a document.
    ///
    /// # Errors
    /// - `NotFound` if the document does not exist
    async fn read(&self, path: &DocPath) -> Result<String>;

    /// Create or overwrite a document.
    ///
    /// # Postconditions
    /// - Intermediate directories exist
    async fn write(&self, path: &DocPath, content: &str) -> Result<()>;

    /// Delete a document.
    ///
    /// # Errors
    /// - `NotFound` if the document does not exist
    async fn delete(&self, path: &DocPath) -> Result<()>;

    /// Check if a document exists.
    async fn exists(&self, path: &DocPath) -> Result<bool>;

    /// Make sure a directory (and its parents) exists.
    async fn ensure_dir(&self, path: &DocPath) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_from_github_type() {
        let kind: EntryKind = serde_json::from_str("\"dir\"").unwrap();
        assert_eq!(kind, EntryKind::Dir);
        let kind: EntryKind = serde_json::from_str("\"submodule\"").unwrap();
        assert_eq!(kind, EntryKind::Other);
    }

    #[test]
    fn test_change_status_parsing() {
        let file: ChangedFile = serde_json::from_str(
            r#"{"filename":"b.md","status":"renamed","previous_filename":"a.md"}"#,
        )
        .unwrap();
        assert_eq!(file.status, FileChangeStatus::Renamed);
        assert_eq!(file.previous_filename.as_deref(), Some("a.md"));

        let file: ChangedFile =
            serde_json::from_str(r#"{"filename":"c.md","status":"copied"}"#).unwrap();
        assert_eq!(file.status, FileChangeStatus::Other);
    }
}
