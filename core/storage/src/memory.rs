//! In-memory stores for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use docsync_common::{DocPath, Error, Result};

use crate::provider::{
    ChangedFile, CommitDetail, CommitSummary, EntryKind, FileChangeStatus, LocalFile, LocalStore,
    RemoteEntry, RemoteFile, RemoteStore, WriteResult,
};

/// Remote operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListDir,
    GetFile,
    PutFile,
    DeleteFile,
    ListCommits,
    GetCommit,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: String,
}

#[derive(Debug, Clone)]
struct CommitRecord {
    summary: CommitSummary,
    files: Vec<ChangedFile>,
    snapshot: BTreeMap<String, StoredFile>,
}

#[derive(Debug, Default)]
struct RemoteInner {
    files: BTreeMap<String, StoredFile>,
    /// Listing served while frozen: path -> sha.
    frozen_listing: Option<BTreeMap<String, String>>,
    commits: Vec<CommitRecord>,
    faults: HashMap<RemoteOp, VecDeque<u16>>,
    calls: HashMap<RemoteOp, usize>,
}

impl RemoteInner {
    /// Count the call and pop an injected fault, if any.
    fn enter(&mut self, op: RemoteOp) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(0) => Err(Error::Network(format!("injected transport failure on {:?}", op))),
            Some(status) => Err(Error::from_status(
                status,
                format!("injected {} on {:?}", status, op),
            )),
            None => Ok(()),
        }
    }

    fn record_commit(&mut self, message: &str, files: Vec<ChangedFile>) -> String {
        let sha = Uuid::new_v4().simple().to_string();
        self.commits.push(CommitRecord {
            summary: CommitSummary {
                sha: sha.clone(),
                message: message.to_string(),
                author: Some("memory".to_string()),
                date: Some(Utc::now()),
            },
            files,
            snapshot: self.files.clone(),
        });
        sha
    }
}

/// In-memory remote store.
///
/// Behaves like a single branch of a repository: writes are preconditioned
/// on revision ids, every write records a commit, and listings can be frozen
/// to mimic read-after-write lag.
#[derive(Default)]
pub struct MemoryRemote {
    inner: RwLock<RemoteInner>,
}

impl MemoryRemote {
    /// Create a new empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RemoteInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RemoteInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a file directly (as another client would) and return its revision id.
    pub fn insert(&self, path: &str, content: &str) -> String {
        let mut inner = self.write();
        let sha = Uuid::new_v4().simple().to_string();
        let status = if inner.files.contains_key(path) {
            FileChangeStatus::Modified
        } else {
            FileChangeStatus::Added
        };
        inner.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        inner.record_commit(
            &format!("external edit {}", path),
            vec![ChangedFile {
                filename: path.to_string(),
                status,
                previous_filename: None,
            }],
        );
        sha
    }

    /// Remove a file directly (as another client would).
    pub fn remove(&self, path: &str) -> bool {
        let mut inner = self.write();
        let removed = inner.files.remove(path).is_some();
        if removed {
            inner.record_commit(
                &format!("external delete {}", path),
                vec![ChangedFile {
                    filename: path.to_string(),
                    status: FileChangeStatus::Removed,
                    previous_filename: None,
                }],
            );
        }
        removed
    }

    /// Rename a file directly, recording a rename commit.
    pub fn rename(&self, from: &str, to: &str) -> Option<String> {
        let mut inner = self.write();
        let mut stored = inner.files.remove(from)?;
        stored.sha = Uuid::new_v4().simple().to_string();
        let sha = stored.sha.clone();
        inner.files.insert(to.to_string(), stored);
        inner.record_commit(
            &format!("rename {} -> {}", from, to),
            vec![ChangedFile {
                filename: to.to_string(),
                status: FileChangeStatus::Renamed,
                previous_filename: Some(from.to_string()),
            }],
        );
        Some(sha)
    }

    /// Current content at `path`.
    pub fn content(&self, path: &str) -> Option<String> {
        self.read().files.get(path).map(|f| f.content.clone())
    }

    /// Current revision id at `path`.
    pub fn sha(&self, path: &str) -> Option<String> {
        self.read().files.get(path).map(|f| f.sha.clone())
    }

    /// All stored paths.
    pub fn paths(&self) -> Vec<String> {
        self.read().files.keys().cloned().collect()
    }

    /// Fail the next call of `op` with `status` (0 = transport failure).
    pub fn inject_fault(&self, op: RemoteOp, status: u16) {
        self.write().faults.entry(op).or_default().push_back(status);
    }

    /// Number of calls made for `op`.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.read().calls.get(&op).copied().unwrap_or(0)
    }

    /// Serve listings from the current state until [`thaw_listing`](Self::thaw_listing).
    pub fn freeze_listing(&self) {
        let mut inner = self.write();
        let snapshot = inner
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.sha.clone()))
            .collect();
        inner.frozen_listing = Some(snapshot);
    }

    /// Serve live listings again.
    pub fn thaw_listing(&self) {
        self.write().frozen_listing = None;
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_dir(&self, path: &DocPath) -> Result<Vec<RemoteEntry>> {
        let mut inner = self.write();
        inner.enter(RemoteOp::ListDir)?;

        let listing: BTreeMap<String, String> = match &inner.frozen_listing {
            Some(frozen) => frozen.clone(),
            None => inner
                .files
                .iter()
                .map(|(k, v)| (k.clone(), v.sha.clone()))
                .collect(),
        };

        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, sha) in &listing {
            let full = DocPath::parse(key)?;
            let Some(relative) = full.strip_prefix(path) else {
                continue;
            };
            match relative.components() {
                [] => {
                    return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
                }
                [_] => entries.push(RemoteEntry {
                    path: full.clone(),
                    sha: sha.clone(),
                    kind: EntryKind::File,
                    size: inner.files.get(key).map(|f| f.content.len() as u64),
                }),
                [first, ..] => {
                    dirs.insert(first.clone());
                }
            }
        }

        if entries.is_empty() && dirs.is_empty() && !path.is_root() {
            return Err(Error::NotFound(format!("Directory not found: {}", path)));
        }

        for dir in dirs {
            let dir_path = path.join(&DocPath::from_components(vec![dir])?);
            entries.push(RemoteEntry {
                sha: format!("tree:{}", dir_path),
                path: dir_path,
                kind: EntryKind::Dir,
                size: None,
            });
        }

        Ok(entries)
    }

    async fn get_file(&self, path: &DocPath, reference: Option<&str>) -> Result<RemoteFile> {
        let mut inner = self.write();
        inner.enter(RemoteOp::GetFile)?;
        let key = path.to_string_path();

        let stored = match reference {
            Some(reference) => match inner.commits.iter().find(|c| c.summary.sha == reference) {
                Some(commit) => commit.snapshot.get(&key).cloned(),
                None => inner.files.get(&key).cloned(),
            },
            None => inner.files.get(&key).cloned(),
        };

        let stored = stored.ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))?;
        Ok(RemoteFile {
            path: path.clone(),
            sha: stored.sha,
            content: stored.content,
        })
    }

    async fn put_file(
        &self,
        path: &DocPath,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteResult> {
        let mut inner = self.write();
        inner.enter(RemoteOp::PutFile)?;
        let key = path.to_string_path();

        let status = match (inner.files.get(&key), sha) {
            (Some(_), None) => {
                return Err(Error::AlreadyExists(format!(
                    "\"sha\" wasn't supplied for existing {}",
                    path
                )));
            }
            (Some(current), Some(expected)) if current.sha != expected => {
                return Err(Error::Conflict(format!(
                    "{} is at {} but expected {}",
                    path, current.sha, expected
                )));
            }
            (None, Some(expected)) => {
                return Err(Error::Conflict(format!(
                    "{} does not exist but expected {}",
                    path, expected
                )));
            }
            (Some(_), Some(_)) => FileChangeStatus::Modified,
            (None, None) => FileChangeStatus::Added,
        };

        let new_sha = Uuid::new_v4().simple().to_string();
        inner.files.insert(
            key.clone(),
            StoredFile {
                content: content.to_string(),
                sha: new_sha.clone(),
            },
        );
        let commit_sha = inner.record_commit(
            message,
            vec![ChangedFile {
                filename: key,
                status,
                previous_filename: None,
            }],
        );

        Ok(WriteResult {
            sha: new_sha,
            commit_sha: Some(commit_sha),
        })
    }

    async fn delete_file(&self, path: &DocPath, sha: &str, message: &str) -> Result<()> {
        let mut inner = self.write();
        inner.enter(RemoteOp::DeleteFile)?;
        let key = path.to_string_path();

        match inner.files.get(&key) {
            None => return Err(Error::NotFound(format!("File not found: {}", path))),
            Some(current) if current.sha != sha => {
                return Err(Error::Conflict(format!(
                    "{} is at {} but expected {}",
                    path, current.sha, sha
                )));
            }
            Some(_) => {}
        }

        inner.files.remove(&key);
        inner.record_commit(
            message,
            vec![ChangedFile {
                filename: key,
                status: FileChangeStatus::Removed,
                previous_filename: None,
            }],
        );
        Ok(())
    }

    async fn list_commits(&self, path: &DocPath) -> Result<Vec<CommitSummary>> {
        let mut inner = self.write();
        inner.enter(RemoteOp::ListCommits)?;
        let key = path.to_string_path();

        Ok(inner
            .commits
            .iter()
            .rev()
            .filter(|c| c.files.iter().any(|f| f.filename == key))
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitDetail> {
        let mut inner = self.write();
        inner.enter(RemoteOp::GetCommit)?;

        inner
            .commits
            .iter()
            .find(|c| c.summary.sha == sha)
            .map(|c| CommitDetail {
                summary: c.summary.clone(),
                files: c.files.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("Commit not found: {}", sha)))
    }
}

#[derive(Debug, Default)]
struct LocalInner {
    files: BTreeMap<String, (String, DateTime<Utc>)>,
    failing_reads: BTreeSet<String>,
}

/// In-memory local store.
#[derive(Default)]
pub struct MemoryLocal {
    inner: RwLock<LocalInner>,
}

impl MemoryLocal {
    /// Create a new empty local store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, LocalInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, LocalInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a document directly (as an editor would).
    pub fn put(&self, path: &str, content: &str) {
        self.write_inner()
            .files
            .insert(path.to_string(), (content.to_string(), Utc::now()));
    }

    /// Current content at `path`.
    pub fn get(&self, path: &str) -> Option<String> {
        self.read_inner().files.get(path).map(|(c, _)| c.clone())
    }

    /// Remove a document directly.
    pub fn remove(&self, path: &str) -> bool {
        self.write_inner().files.remove(path).is_some()
    }

    /// All stored paths.
    pub fn paths(&self) -> Vec<String> {
        self.read_inner().files.keys().cloned().collect()
    }

    /// Make reads of `path` fail with an I/O error.
    pub fn fail_reads(&self, path: &str) {
        self.write_inner().failing_reads.insert(path.to_string());
    }
}

#[async_trait]
impl LocalStore for MemoryLocal {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<LocalFile>> {
        self.read_inner()
            .files
            .iter()
            .map(|(path, (_, modified))| {
                Ok(LocalFile {
                    path: DocPath::parse(path)?,
                    modified: *modified,
                })
            })
            .collect()
    }

    async fn read(&self, path: &DocPath) -> Result<String> {
        let inner = self.read_inner();
        let key = path.to_string_path();
        if inner.failing_reads.contains(&key) {
            return Err(Error::Io(std::io::Error::other(format!(
                "injected read failure on {}",
                key
            ))));
        }
        inner
            .files
            .get(&key)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| Error::NotFound(format!("Document not found: {}", path)))
    }

    async fn write(&self, path: &DocPath, content: &str) -> Result<()> {
        self.put(&path.to_string_path(), content);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        if self.remove(&path.to_string_path()) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Document not found: {}", path)))
        }
    }

    async fn exists(&self, path: &DocPath) -> Result<bool> {
        Ok(self.read_inner().files.contains_key(&path.to_string_path()))
    }

    async fn ensure_dir(&self, _path: &DocPath) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_put_requires_matching_sha() {
        let remote = MemoryRemote::new();
        let created = remote.put_file(&p("a.md"), "one", None, "create").await.unwrap();

        let err = remote.put_file(&p("a.md"), "two", None, "again").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let err = remote
            .put_file(&p("a.md"), "two", Some("stale"), "update")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let updated = remote
            .put_file(&p("a.md"), "two", Some(&created.sha), "update")
            .await
            .unwrap();
        assert_ne!(updated.sha, created.sha);
        assert_eq!(remote.content("a.md").as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_list_dir_children() {
        let remote = MemoryRemote::new();
        remote.insert("vault/a.md", "a");
        remote.insert("vault/sub/b.md", "b");
        remote.insert("other.md", "o");

        let mut names: Vec<(String, EntryKind)> = remote
            .list_dir(&p("vault"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.path.to_string_path(), e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            names,
            vec![
                ("vault/a.md".to_string(), EntryKind::File),
                ("vault/sub".to_string(), EntryKind::Dir),
            ]
        );

        assert!(remote.list_dir(&p("missing")).await.unwrap_err().is_not_found());
        assert!(remote.list_dir(&DocPath::root()).await.is_ok());
    }

    #[tokio::test]
    async fn test_frozen_listing_lags_writes() {
        let remote = MemoryRemote::new();
        let old = remote.insert("a.md", "one");
        remote.freeze_listing();
        let new = remote.insert("a.md", "two");

        let listed = remote.list_dir(&DocPath::root()).await.unwrap();
        assert_eq!(listed[0].sha, old);

        let fetched = remote.get_file(&p("a.md"), None).await.unwrap();
        assert_eq!(fetched.sha, new);

        remote.thaw_listing();
        let listed = remote.list_dir(&DocPath::root()).await.unwrap();
        assert_eq!(listed[0].sha, new);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.insert("a.md", "x");
        remote.inject_fault(RemoteOp::GetFile, 503);
        remote.inject_fault(RemoteOp::GetFile, 0);

        let first = remote.get_file(&p("a.md"), None).await.unwrap_err();
        assert!(matches!(first, Error::Http { status: 503, .. }));
        let second = remote.get_file(&p("a.md"), None).await.unwrap_err();
        assert!(matches!(second, Error::Network(_)));
        assert!(remote.get_file(&p("a.md"), None).await.is_ok());
        assert_eq!(remote.call_count(RemoteOp::GetFile), 3);
    }

    #[tokio::test]
    async fn test_history_and_content_at_commit() {
        let remote = MemoryRemote::new();
        remote.insert("a.md", "v1");
        remote.insert("a.md", "v2");
        remote.rename("a.md", "b.md");

        let commits = remote.list_commits(&p("a.md")).await.unwrap();
        assert_eq!(commits.len(), 2);
        let oldest = commits.last().unwrap();
        let at = remote.get_file(&p("a.md"), Some(&oldest.sha)).await.unwrap();
        assert_eq!(at.content, "v1");

        let renames = remote.list_commits(&p("b.md")).await.unwrap();
        let detail = remote.get_commit(&renames[0].sha).await.unwrap();
        assert_eq!(detail.files[0].status, FileChangeStatus::Renamed);
        assert_eq!(detail.files[0].previous_filename.as_deref(), Some("a.md"));
    }

    #[tokio::test]
    async fn test_memory_local_roundtrip() {
        let local = MemoryLocal::new();
        local.write(&p("n/x.md"), "A").await.unwrap();
        assert_eq!(local.read(&p("n/x.md")).await.unwrap(), "A");
        assert_eq!(local.list().await.unwrap().len(), 1);

        local.fail_reads("n/x.md");
        assert!(matches!(local.read(&p("n/x.md")).await, Err(Error::Io(_))));

        local.delete(&p("n/x.md")).await.unwrap();
        assert!(local.delete(&p("n/x.md")).await.unwrap_err().is_not_found());
    }
}
