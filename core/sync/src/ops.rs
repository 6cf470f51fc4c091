//! Per-document protocols: push, pull, remote and local delete, and the
//! confirmed whole-tree overwrites.

use chrono::Utc;
use tracing::{debug, info, warn};

use docsync_common::{DocPath, Error, Result};

use crate::checksum::content_hash;
use crate::collaborator::NoticeLevel;
use crate::config::Settings;
use crate::conflict::{ConflictResolver, Resolution};
use crate::engine::{Run, RunKind, RunOutcome, SyncEngine, SyncReport};
use crate::state::DocumentMetadata;

/// What a push ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Local content was written remotely.
    Pushed,
    /// The remote version replaced the local one instead.
    Pulled,
    /// Nothing to write: both sides already agree, or the remote moved on
    /// and the local copy did not.
    InSync,
}

impl PushOutcome {
    pub(crate) fn count(self, report: &mut SyncReport) {
        match self {
            PushOutcome::Pushed => report.pushed += 1,
            PushOutcome::Pulled => report.pulled += 1,
            PushOutcome::InSync => {}
        }
    }
}

/// Stale-revision errors are handled by the protocol loops, not the executor.
fn transient(e: &Error) -> bool {
    e.is_retryable() && !e.is_stale_revision()
}

impl SyncEngine {
    /// Push one document under the optimistic-concurrency discipline.
    ///
    /// Each attempt re-reads the current remote revision and submits it as
    /// the precondition. A live conflict found here is resolved once; the
    /// decision is reused by later attempts.
    pub(crate) async fn push_document(&self, run: &mut Run, path: &DocPath) -> Result<PushOutcome> {
        let remote_path = self.mapper.to_remote(path);
        let max_attempts = self.retry.config().max_attempts;
        let mut resolution: Option<Resolution> = None;
        let mut attempt = 0;

        loop {
            let content = self.local.read(path).await?;
            let local_hash = content_hash(&content);
            let remote = self.fetch_remote_file(path).await?;
            let meta = self.metadata_for(path).await;

            let (body, precondition) = match &remote {
                None => (content, None),
                Some(file) => {
                    let remote_hash = content_hash(&file.content);
                    if remote_hash == local_hash {
                        debug!("{} already matches remote, adopting {}", path, file.sha);
                        self.record_synced(path, &file.sha, &remote_hash).await;
                        self.state.write().await.pending_push.remove(path);
                        return Ok(PushOutcome::InSync);
                    }

                    let known = meta.as_ref().and_then(|m| m.remote_revision_id.as_deref());
                    let remote_moved = known != Some(file.sha.as_str());
                    let local_unchanged = meta
                        .as_ref()
                        .is_some_and(|m| m.has_remote() && !m.local_changed(&local_hash));

                    if remote_moved && local_unchanged {
                        if run.kind == RunKind::Background && !(self.is_locked)(path) {
                            info!("Pulling {} before push, remote moved on", path);
                            self.store_pulled(path, &file.sha, &file.content).await?;
                            return Ok(PushOutcome::Pulled);
                        }
                        // Left for the pull phase.
                        self.state.write().await.pending_push.remove(path);
                        return Ok(PushOutcome::InSync);
                    }

                    if remote_moved {
                        let chosen = match resolution {
                            Some(chosen) => chosen,
                            None => {
                                warn!("Live conflict on {} at push time", path);
                                run.report.conflicts += 1;
                                let chosen = self
                                    .resolver
                                    .decide(
                                        path,
                                        &content,
                                        &file.content,
                                        run.kind,
                                        self.collaborator.as_ref(),
                                    )
                                    .await?;
                                resolution = Some(chosen);
                                chosen
                            }
                        };
                        let resolved = ConflictResolver::apply(chosen, &content, &file.content);
                        let held = resolved.content != content && (self.is_locked)(path);
                        if !resolved.needs_push || held {
                            if self.apply_resolution(path, &content, file, &resolved).await? {
                                return Ok(PushOutcome::Pulled);
                            }
                            // Open document: resolved again on a later run.
                            self.state.write().await.pending_push.remove(path);
                            return Ok(PushOutcome::InSync);
                        }
                        if resolved.content != content {
                            self.local.write(path, &resolved.content).await?;
                        }
                        (resolved.content, Some(file.sha.clone()))
                    } else {
                        (content, Some(file.sha.clone()))
                    }
                }
            };

            let action = if precondition.is_some() { "update" } else { "create" };
            let message = self.settings.read().await.commit_message(action, &remote_path);
            let result = self
                .retry
                .execute_with_condition(
                    || {
                        self.remote
                            .put_file(&remote_path, &body, precondition.as_deref(), &message)
                    },
                    transient,
                )
                .await;

            match result {
                Ok(write) => {
                    let hash = content_hash(&body);
                    self.record_synced(path, &write.sha, &hash).await;
                    let mut state = self.state.write().await;
                    state.pending_push.remove(path);
                    state.recently_pushed.record_replacing(path, precondition.clone());
                    debug!("Pushed {} as {}", path, write.sha);
                    return Ok(PushOutcome::Pushed);
                }
                Err(e) if e.is_stale_revision() && attempt + 1 < max_attempts => {
                    warn!("Stale revision pushing {} (attempt {}): {}", path, attempt + 1, e);
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Download the current remote copy over the local one.
    ///
    /// Returns `false` if the document vanished remotely in the meantime.
    pub(crate) async fn pull_document(&self, path: &DocPath) -> Result<bool> {
        let Some(file) = self.fetch_remote_file(path).await? else {
            debug!("{} vanished before pull", path);
            return Ok(false);
        };
        self.store_pulled(path, &file.sha, &file.content).await?;
        Ok(true)
    }

    async fn store_pulled(&self, path: &DocPath, sha: &str, content: &str) -> Result<()> {
        self.local.write(path, content).await?;
        self.record_synced(path, sha, &content_hash(content)).await;
        let mut state = self.state.write().await;
        state.pending_push.remove(path);
        state.deferred_pulls.remove(path);
        Ok(())
    }

    async fn record_synced(&self, path: &DocPath, sha: &str, hash: &str) {
        let mut metadata = self.metadata.write().await;
        match metadata.get_mut(path) {
            Some(meta) => meta.mark_synced(sha, hash),
            None => metadata.set(DocumentMetadata::synced(path.clone(), sha, hash, Utc::now())),
        }
    }

    /// Delete a document remotely.
    ///
    /// The revision id is re-fetched before every attempt; `known` is only
    /// logged. Absent or 404 counts as deleted.
    pub(crate) async fn delete_remote(
        &self,
        path: &DocPath,
        known: &str,
        settings: &Settings,
    ) -> Result<()> {
        let remote_path = self.mapper.to_remote(path);
        let message = settings.commit_message("delete", &remote_path);
        let max_attempts = self.retry.config().max_attempts;
        let mut attempt = 0;

        loop {
            let Some(current) = self.fetch_remote_file(path).await? else {
                debug!("{} already absent remotely", path);
                break;
            };
            if current.sha != known {
                debug!("{} moved from {} to {} since it was deleted locally", path, known, current.sha);
            }

            let result = self
                .retry
                .execute_with_condition(
                    || self.remote.delete_file(&remote_path, &current.sha, &message),
                    transient,
                )
                .await;

            match result {
                Ok(()) => break,
                Err(e) if e.is_not_found() => break,
                Err(e) if e.is_stale_revision() && attempt + 1 < max_attempts => {
                    warn!("Stale revision deleting {} (attempt {}): {}", path, attempt + 1, e);
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.state.write().await.recently_deleted.record(path);
        Ok(())
    }

    /// Remove a document locally after its remote counterpart went away.
    pub(crate) async fn delete_local(&self, path: &DocPath) -> Result<()> {
        match self.local.delete(path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.metadata.write().await.delete(path);
        self.state.write().await.forget(path);
        debug!("Deleted {} locally", path);
        Ok(())
    }

    /// Overwrite every remote document with its local version.
    pub async fn force_push_all(&self) -> Result<RunOutcome> {
        let settings = self.settings.read().await.clone();
        settings.validate()?;
        if !self
            .collaborator
            .confirm("Overwrite every remote document with its local version?")
            .await
        {
            return Ok(RunOutcome::Declined);
        }
        let Some(_guard) = self.run_flag.try_acquire() else {
            return Ok(RunOutcome::AlreadyRunning);
        };

        info!("Force push of all local documents");
        let mut run = Run::new(RunKind::Manual, settings);
        let result = self.overwrite_remote_all(&mut run).await;
        self.finish(run, result).await
    }

    async fn overwrite_remote_all(&self, run: &mut Run) -> Result<()> {
        let scan = self.scan_local(run).await?;
        for doc in scan.docs {
            match self.overwrite_remote(&doc.path).await {
                Ok(true) => run.report.pushed += 1,
                Ok(false) => {}
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Force push of {} failed: {}", doc.path, e);
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Could not push {}: {}", doc.path, e),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Push without conflict checks. Returns `false` if nothing changed.
    async fn overwrite_remote(&self, path: &DocPath) -> Result<bool> {
        let remote_path = self.mapper.to_remote(path);
        let max_attempts = self.retry.config().max_attempts;
        let mut attempt = 0;

        loop {
            let content = self.local.read(path).await?;
            let hash = content_hash(&content);
            let remote = self.fetch_remote_file(path).await?;
            if let Some(file) = &remote {
                if content_hash(&file.content) == hash {
                    self.record_synced(path, &file.sha, &hash).await;
                    self.state.write().await.pending_push.remove(path);
                    return Ok(false);
                }
            }

            let precondition = remote.map(|f| f.sha);
            let message = self.settings.read().await.commit_message("overwrite", &remote_path);
            let result = self
                .retry
                .execute_with_condition(
                    || {
                        self.remote
                            .put_file(&remote_path, &content, precondition.as_deref(), &message)
                    },
                    transient,
                )
                .await;

            match result {
                Ok(write) => {
                    self.record_synced(path, &write.sha, &hash).await;
                    let mut state = self.state.write().await;
                    state.pending_push.remove(path);
                    state.recently_pushed.record_replacing(path, precondition.clone());
                    return Ok(true);
                }
                Err(e) if e.is_stale_revision() && attempt + 1 < max_attempts => {
                    self.retry.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Overwrite every local document with its remote version.
    pub async fn force_pull_all(&self) -> Result<RunOutcome> {
        let settings = self.settings.read().await.clone();
        settings.validate()?;
        if !self
            .collaborator
            .confirm("Overwrite every local document with its remote version?")
            .await
        {
            return Ok(RunOutcome::Declined);
        }
        let Some(_guard) = self.run_flag.try_acquire() else {
            return Ok(RunOutcome::AlreadyRunning);
        };

        info!("Force pull of all remote documents");
        let mut run = Run::new(RunKind::Manual, settings);
        let result = self.pull_all(&mut run).await;
        self.finish(run, result).await
    }

    async fn pull_all(&self, run: &mut Run) -> Result<()> {
        let tree = self.fetch_remote_tree(&run.settings).await?;
        for path in tree.keys() {
            match self.pull_document(path).await {
                Ok(true) => run.report.pulled += 1,
                Ok(false) => {}
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Force pull of {} failed: {}", path, e);
                    self.notify(NoticeLevel::Warning, format!("Could not pull {}: {}", path, e))
                        .await;
                }
            }
        }
        Ok(())
    }
}
