//! Filesystem-backed local store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::provider::{LocalFile, LocalStore};
use docsync_common::{DocPath, Error, Result};

/// Local store rooted at a directory.
///
/// Entries whose name starts with `.` (tool state, VCS metadata, editor
/// configuration) are never enumerated.
pub struct FsLocalStore {
    root: PathBuf,
}

impl FsLocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a DocPath to a filesystem path.
    fn to_fs_path(&self, path: &DocPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn not_found_or(err: std::io::Error, path: &DocPath) -> Error {
        if err.kind() == ErrorKind::NotFound {
            Error::NotFound(format!("Document not found: {}", path))
        } else {
            Error::Io(err)
        }
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn list(&self) -> Result<Vec<LocalFile>> {
        let mut results = Vec::new();
        let mut pending = vec![DocPath::root()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(self.to_fs_path(&dir)).await?;

            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(String::from) else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }

                let child = dir.join(&DocPath::from_components(vec![name])?);
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(child);
                } else if meta.is_file() {
                    let modified: DateTime<Utc> = meta
                        .modified()
                        .map(|t| t.into())
                        .unwrap_or_else(|_| Utc::now());
                    results.push(LocalFile {
                        path: child,
                        modified,
                    });
                }
            }
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }

    async fn read(&self, path: &DocPath) -> Result<String> {
        let fs_path = self.to_fs_path(path);
        match fs::read_to_string(&fs_path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(Error::Decode(format!(
                "Document is not UTF-8: {}",
                path
            ))),
            Err(e) => Err(Self::not_found_or(e, path)),
        }
    }

    async fn write(&self, path: &DocPath, content: &str) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to the store root".to_string()));
        }
        if let Some(parent) = path.parent() {
            self.ensure_dir(&parent).await?;
        }
        fs::write(self.to_fs_path(path), content).await?;
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        let fs_path = self.to_fs_path(path);
        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("Not a document: {}", path)));
        }
        fs::remove_file(&fs_path)
            .await
            .map_err(|e| Self::not_found_or(e, path))
    }

    async fn exists(&self, path: &DocPath) -> Result<bool> {
        Ok(self.to_fs_path(path).is_file())
    }

    async fn ensure_dir(&self, path: &DocPath) -> Result<()> {
        fs::create_dir_all(self.to_fs_path(path)).await?;
        Ok(())
    }
}
