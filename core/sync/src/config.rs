//! Persisted settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use docsync_common::{DocPath, Error, Result, SecretToken};
pub use docsync_storage::GITHUB_API_BASE as DEFAULT_API_BASE;

use crate::retry::RetryConfig;

/// How detected conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Prompt the user; background runs fall back to keeping local.
    #[default]
    Ask,
    /// Keep local content and push it.
    KeepLocal,
    /// Overwrite local content with the remote version.
    KeepRemote,
    /// Append remote-only lines inside conflict markers, then push.
    Merge,
}

/// How much the user is told about sync activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Standard,
    Verbose,
}

/// User settings, persisted as `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(alias = "githubToken")]
    pub token: SecretToken,
    #[serde(alias = "repoOwner")]
    pub owner: String,
    #[serde(alias = "repoName")]
    pub repo: String,
    pub branch: String,
    /// Repository sub-path mirroring the local root ("" = repository root).
    #[serde(alias = "remotePath", alias = "syncFolder")]
    pub remote_path: String,
    #[serde(alias = "autoSync")]
    pub auto_sync: bool,
    #[serde(alias = "syncInterval")]
    pub auto_sync_interval_secs: u64,
    #[serde(alias = "conflictStrategy")]
    pub conflict_policy: ConflictPolicy,
    #[serde(alias = "notificationLevel")]
    pub verbosity: Verbosity,
    #[serde(alias = "lastSync")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Tracked file extensions, without the dot. Empty tracks everything.
    pub extensions: Vec<String>,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub api_base: String,
    pub commit_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: SecretToken::default(),
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            remote_path: String::new(),
            auto_sync: false,
            auto_sync_interval_secs: 300,
            conflict_policy: ConflictPolicy::Ask,
            verbosity: Verbosity::Standard,
            last_sync: None,
            extensions: vec!["md".to_string()],
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            api_base: DEFAULT_API_BASE.to_string(),
            commit_prefix: "docsync".to_string(),
        }
    }
}

impl Settings {
    /// Check that a run can talk to the remote at all.
    ///
    /// # Errors
    /// - `Config` naming the first missing field
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(Error::Config("API token is not set".to_string()));
        }
        if self.owner.trim().is_empty() || self.repo.trim().is_empty() {
            return Err(Error::Config("Repository owner and name are not set".to_string()));
        }
        if self.branch.trim().is_empty() {
            return Err(Error::Config("Branch is not set".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        DocPath::parse(&self.remote_path)
            .map_err(|e| Error::Config(format!("Invalid remote path: {}", e)))?;
        Ok(())
    }

    /// Whether a local document is synchronized, by extension.
    pub fn tracks(&self, path: &DocPath) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Retry policy for remote calls.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_base_delay_ms))
    }

    /// Auto-sync period, if enabled.
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        if self.auto_sync && self.auto_sync_interval_secs > 0 {
            Some(Duration::from_secs(self.auto_sync_interval_secs))
        } else {
            None
        }
    }

    /// Commit message for an engine-initiated write.
    pub fn commit_message(&self, action: &str, path: &DocPath) -> String {
        format!("{}: {} {}", self.commit_prefix, action, path)
    }

    /// Load settings; a missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Save settings, creating the parent directory.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
