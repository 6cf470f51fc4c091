//! Conflict resolution.

use std::collections::HashSet;
use tracing::{debug, warn};

use docsync_common::{DocPath, Result};

use crate::collaborator::{Choice, Collaborator, Notice, NoticeLevel};
use crate::config::{ConflictPolicy, Verbosity};
use crate::engine::RunKind;

pub const MARKER_LOCAL: &str = "<<<<<<< local";
pub const MARKER_SPLIT: &str = "=======";
pub const MARKER_REMOTE: &str = ">>>>>>> remote";

/// The outcome chosen for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep local content; it gets pushed over the remote.
    KeepLocal,
    /// Overwrite local content with the remote version.
    KeepRemote,
    /// Append remote-only lines to local content, then push.
    Merge,
}

impl From<Choice> for Resolution {
    fn from(choice: Choice) -> Self {
        match choice {
            Choice::Local => Resolution::KeepLocal,
            Choice::Remote => Resolution::KeepRemote,
            Choice::Merge => Resolution::Merge,
        }
    }
}

/// Content after applying a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub resolution: Resolution,
    /// New local content.
    pub content: String,
    /// Whether `content` must be pushed to the remote.
    pub needs_push: bool,
}

/// Obtains resolutions from policy or from the collaborator.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    verbosity: Verbosity,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            verbosity: Verbosity::default(),
        }
    }

    /// Verbosity applied to the notices the resolver raises itself.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Decide how to resolve a conflict on `path`.
    ///
    /// Background runs never prompt: `ask` falls back to keeping local
    /// content and a warning is surfaced.
    pub async fn decide(
        &self,
        path: &DocPath,
        local: &str,
        remote: &str,
        kind: RunKind,
        collaborator: &dyn Collaborator,
    ) -> Result<Resolution> {
        let resolution = match self.policy {
            ConflictPolicy::KeepLocal => Resolution::KeepLocal,
            ConflictPolicy::KeepRemote => Resolution::KeepRemote,
            ConflictPolicy::Merge => Resolution::Merge,
            ConflictPolicy::Ask if kind == RunKind::Background => {
                warn!("Conflict on {} in background run, keeping local", path);
                if NoticeLevel::Warning.visible_at(self.verbosity) {
                    collaborator.notify(&Notice::new(
                        NoticeLevel::Warning,
                        format!("Conflict on {}: kept local version", path),
                    ));
                }
                Resolution::KeepLocal
            }
            ConflictPolicy::Ask => collaborator
                .resolve_conflict(path, local, remote)
                .await?
                .into(),
        };
        debug!("Conflict on {} resolved as {:?}", path, resolution);
        Ok(resolution)
    }

    /// Compute the post-resolution content.
    pub fn apply(resolution: Resolution, local: &str, remote: &str) -> Resolved {
        match resolution {
            Resolution::KeepLocal => Resolved {
                resolution,
                content: local.to_string(),
                needs_push: true,
            },
            Resolution::KeepRemote => Resolved {
                resolution,
                content: remote.to_string(),
                needs_push: false,
            },
            Resolution::Merge => Resolved {
                resolution,
                content: merge_lines(local, remote),
                needs_push: true,
            },
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

/// Line-membership merge.
///
/// Remote lines absent from the local version are appended after the local
/// content inside conflict markers. With no such lines the local content is
/// returned unchanged. Repeated lines are compared by membership only, so
/// ordering between the two versions is not preserved.
pub fn merge_lines(local: &str, remote: &str) -> String {
    let local_lines: HashSet<&str> = local.lines().collect();
    let mut seen = HashSet::new();
    let unique: Vec<&str> = remote
        .lines()
        .filter(|line| !local_lines.contains(line) && seen.insert(*line))
        .collect();

    if unique.is_empty() {
        return local.to_string();
    }

    let mut merged = String::with_capacity(local.len() + remote.len() + 48);
    merged.push_str(local);
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged.push_str(MARKER_LOCAL);
    merged.push('\n');
    merged.push_str(MARKER_SPLIT);
    merged.push('\n');
    for line in unique {
        merged.push_str(line);
        merged.push('\n');
    }
    merged.push_str(MARKER_REMOTE);
    merged.push('\n');
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::HeadlessCollaborator;

    #[test]
    fn test_merge_appends_remote_unique_lines() {
        let merged = merge_lines("a\nb\n", "a\nc\n");
        assert_eq!(merged, "a\nb\n<<<<<<< local\n=======\nc\n>>>>>>> remote\n");
        assert!(merged.contains('b') && merged.contains('c'));
    }

    #[test]
    fn test_merge_identical_sets_keeps_local() {
        assert_eq!(merge_lines("a\nb", "b\na\n"), "a\nb");
        assert_eq!(merge_lines("x\n", "x\n"), "x\n");
    }

    #[test]
    fn test_merge_into_empty_local() {
        let merged = merge_lines("", "r\nr\n");
        assert_eq!(merged, "<<<<<<< local\n=======\nr\n>>>>>>> remote\n");
    }

    #[test]
    fn test_apply() {
        let kept = ConflictResolver::apply(Resolution::KeepLocal, "L", "R");
        assert_eq!(kept.content, "L");
        assert!(kept.needs_push);

        let remote = ConflictResolver::apply(Resolution::KeepRemote, "L", "R");
        assert_eq!(remote.content, "R");
        assert!(!remote.needs_push);
    }

    #[tokio::test]
    async fn test_ask_in_background_keeps_local_without_prompt() {
        let collab = HeadlessCollaborator::new().with_choice(Choice::Remote);
        let resolver = ConflictResolver::new(ConflictPolicy::Ask);
        let path = DocPath::parse("x.md").unwrap();

        let resolution = resolver
            .decide(&path, "L", "R", RunKind::Background, &collab)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::KeepLocal);
        assert!(collab.prompts().is_empty());
        assert_eq!(collab.notices()[0].level, NoticeLevel::Warning);

        let resolution = resolver
            .decide(&path, "L", "R", RunKind::Manual, &collab)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::KeepRemote);
        assert_eq!(collab.prompts(), vec![path]);
    }

    #[tokio::test]
    async fn test_fixed_policy_never_prompts() {
        let collab = HeadlessCollaborator::new();
        let resolver = ConflictResolver::new(ConflictPolicy::Merge);
        let path = DocPath::parse("x.md").unwrap();
        let resolution = resolver
            .decide(&path, "L", "R", RunKind::Manual, &collab)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Merge);
        assert!(collab.prompts().is_empty());
    }
}
