//! The human-facing side of the engine: conflict prompts, confirmations
//! and status notices.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use docsync_common::{DocPath, Result};

use crate::config::Verbosity;

/// A human's answer to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Local,
    Remote,
    Merge,
}

/// Importance of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoticeLevel {
    /// Per-document chatter.
    Detail,
    /// Run summaries.
    Info,
    Warning,
    /// Run-level failures; shown at every verbosity.
    Error,
}

impl NoticeLevel {
    /// Whether a notice at this level is shown at `verbosity`.
    pub fn visible_at(self, verbosity: Verbosity) -> bool {
        match verbosity {
            Verbosity::Quiet => self >= NoticeLevel::Error,
            Verbosity::Standard => self >= NoticeLevel::Info,
            Verbosity::Verbose => true,
        }
    }
}

/// A transient status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Adapter implemented by whatever front end hosts the engine.
///
/// The engine never touches UI primitives; it only calls these methods.
/// Notices passed to [`Collaborator::notify`] are already filtered by
/// verbosity.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Present both versions of a conflicted document and return a choice.
    async fn resolve_conflict(&self, path: &DocPath, local: &str, remote: &str) -> Result<Choice>;

    /// Ask before a destructive operation.
    async fn confirm(&self, prompt: &str) -> bool;

    /// Show a status notice.
    fn notify(&self, notice: &Notice);
}

/// Non-interactive collaborator: answers from fixed settings and logs
/// notices through `tracing`. Notices are also kept for inspection.
pub struct HeadlessCollaborator {
    choice: Choice,
    confirm: bool,
    notices: Mutex<Vec<Notice>>,
    prompts: Mutex<Vec<DocPath>>,
}

impl HeadlessCollaborator {
    /// Keeps local versions and declines destructive operations.
    pub fn new() -> Self {
        Self {
            choice: Choice::Local,
            confirm: false,
            notices: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choice = choice;
        self
    }

    pub fn with_confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    /// Notices received so far.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Paths a conflict prompt was raised for.
    pub fn prompts(&self) -> Vec<DocPath> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Default for HeadlessCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collaborator for HeadlessCollaborator {
    async fn resolve_conflict(&self, path: &DocPath, _local: &str, _remote: &str) -> Result<Choice> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path.clone());
        Ok(self.choice)
    }

    async fn confirm(&self, prompt: &str) -> bool {
        debug!("Confirmation requested: {} -> {}", prompt, self.confirm);
        self.confirm
    }

    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Detail => debug!("{}", notice.message),
            NoticeLevel::Info => info!("{}", notice.message),
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
        self.notices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notice.clone());
    }
}
