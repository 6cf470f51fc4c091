//! GitHub-backed remote store.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docsync_common::{DocPath, Error, Result, SecretToken};

use crate::provider::{
    ChangedFile, CommitDetail, CommitSummary, EntryKind, FileChangeStatus, RemoteEntry,
    RemoteFile, RemoteStore, WriteResult,
};

use super::client::{CommitItem, ContentItem, ContentsResponse, GitHubClient, GITHUB_API_BASE};

/// Repository coordinates and credentials for the GitHub remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: SecretToken,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_base() -> String {
    GITHUB_API_BASE.to_string()
}

fn default_user_agent() -> String {
    concat!("docsync/", env!("CARGO_PKG_VERSION")).to_string()
}

impl GitHubConfig {
    /// Create a config against the public API.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: SecretToken,
    ) -> Self {
        Self {
            api_base: default_api_base(),
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token,
            user_agent: default_user_agent(),
        }
    }
}

/// Remote store talking to one branch of a GitHub repository.
pub struct GitHubRemote {
    client: GitHubClient,
    branch: String,
}

impl GitHubRemote {
    /// Create a new GitHub remote.
    ///
    /// # Errors
    /// - `Config` if owner, repo, branch or token is missing, or the API base is invalid
    pub fn new(config: GitHubConfig) -> Result<Self> {
        if config.owner.trim().is_empty() || config.repo.trim().is_empty() {
            return Err(Error::Config("Repository owner and name are required".to_string()));
        }
        if config.branch.trim().is_empty() {
            return Err(Error::Config("Branch is required".to_string()));
        }
        if config.token.is_empty() {
            return Err(Error::Config("API token is required".to_string()));
        }

        let client = GitHubClient::new(
            &config.api_base,
            config.owner.clone(),
            config.repo.clone(),
            config.token.clone(),
            &config.user_agent,
        )?;

        Ok(Self {
            client,
            branch: config.branch,
        })
    }

    fn to_entry(item: &ContentItem) -> Result<RemoteEntry> {
        let kind = match item.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            _ => EntryKind::Other,
        };
        Ok(RemoteEntry {
            path: DocPath::parse(&item.path)?,
            sha: item.sha.clone(),
            kind,
            size: item.size,
        })
    }

    fn to_summary(item: &CommitItem) -> CommitSummary {
        let author = item.commit.author.as_ref();
        CommitSummary {
            sha: item.sha.clone(),
            message: item.commit.message.clone(),
            author: author.and_then(|a| a.name.clone()),
            date: author.and_then(|a| a.date),
        }
    }

    fn to_status(status: &str) -> FileChangeStatus {
        match status {
            "added" => FileChangeStatus::Added,
            "modified" => FileChangeStatus::Modified,
            "removed" => FileChangeStatus::Removed,
            "renamed" => FileChangeStatus::Renamed,
            _ => FileChangeStatus::Other,
        }
    }
}

/// Decode a base64 payload as returned by GitHub (line-wrapped) into UTF-8 text.
pub fn decode_content(payload: &str) -> Result<String> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("Invalid base64 content: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("Content is not UTF-8: {}", e)))
}

/// Encode text content for a contents write.
pub fn encode_content(content: &str) -> String {
    STANDARD.encode(content.as_bytes())
}

#[async_trait]
impl RemoteStore for GitHubRemote {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_dir(&self, path: &DocPath) -> Result<Vec<RemoteEntry>> {
        match self.client.get_contents(path, &self.branch).await? {
            ContentsResponse::Listing(items) => items.iter().map(Self::to_entry).collect(),
            ContentsResponse::Item(_) => {
                Err(Error::InvalidInput(format!("Not a directory: {}", path)))
            }
        }
    }

    async fn get_file(&self, path: &DocPath, reference: Option<&str>) -> Result<RemoteFile> {
        let reference = reference.unwrap_or(&self.branch);
        let item = match self.client.get_contents(path, reference).await? {
            ContentsResponse::Item(item) => item,
            ContentsResponse::Listing(_) => {
                return Err(Error::InvalidInput(format!("Not a file: {}", path)));
            }
        };

        let inline = item
            .content
            .as_deref()
            .filter(|c| !c.is_empty() && item.encoding.as_deref() == Some("base64"));

        let content = match inline {
            Some(payload) => decode_content(payload)?,
            None => {
                debug!("Content of {} not inlined, fetching blob {}", path, item.sha);
                let blob = self.client.get_blob(&item.sha).await?;
                if blob.encoding != "base64" {
                    return Err(Error::Decode(format!(
                        "Unsupported blob encoding: {}",
                        blob.encoding
                    )));
                }
                decode_content(&blob.content)?
            }
        };

        Ok(RemoteFile {
            path: path.clone(),
            sha: item.sha,
            content,
        })
    }

    async fn put_file(
        &self,
        path: &DocPath,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<WriteResult> {
        let response = self
            .client
            .put_contents(path, message, &encode_content(content), sha, &self.branch)
            .await?;

        let stored = response
            .content
            .ok_or_else(|| Error::Decode("Write response carried no content".to_string()))?;

        Ok(WriteResult {
            sha: stored.sha,
            commit_sha: Some(response.commit.sha),
        })
    }

    async fn delete_file(&self, path: &DocPath, sha: &str, message: &str) -> Result<()> {
        self.client
            .delete_contents(path, message, sha, &self.branch)
            .await
    }

    async fn list_commits(&self, path: &DocPath) -> Result<Vec<CommitSummary>> {
        let items = self.client.list_commits(path, &self.branch).await?;
        Ok(items.iter().map(Self::to_summary).collect())
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitDetail> {
        let item = self.client.get_commit(sha).await?;
        let files = item
            .files
            .iter()
            .map(|f| ChangedFile {
                filename: f.filename.clone(),
                status: Self::to_status(&f.status),
                previous_filename: f.previous_filename.clone(),
            })
            .collect();

        Ok(CommitDetail {
            summary: Self::to_summary(&item),
            files,
        })
    }
}
