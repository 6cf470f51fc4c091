//! Mapping between local document paths and repository paths.

use docsync_common::{DocPath, Result};

/// Translates local paths to remote paths under a configured sub-path.
///
/// An empty sub-path maps the local store onto the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    prefix: DocPath,
}

impl PathMapper {
    /// Create a mapper for the given remote sub-path (separators are normalized).
    pub fn new(remote_prefix: &str) -> Result<Self> {
        Ok(Self {
            prefix: DocPath::parse(remote_prefix)?,
        })
    }

    /// Repository directory that mirrors the local store root.
    pub fn remote_root(&self) -> &DocPath {
        &self.prefix
    }

    /// Local path -> repository path.
    pub fn to_remote(&self, local: &DocPath) -> DocPath {
        self.prefix.join(local)
    }

    /// Repository path -> local path; `None` for paths outside the sub-path.
    pub fn to_local(&self, remote: &DocPath) -> Option<DocPath> {
        let local = remote.strip_prefix(&self.prefix)?;
        if local.is_root() {
            None
        } else {
            Some(local)
        }
    }
}
