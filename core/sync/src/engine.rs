//! Sync orchestrator.
//!
//! A run walks these phases in order, under a single in-flight guard:
//!
//! 0. queue remote deletes for documents removed locally
//! 1. process pending remote deletes
//! 2. fetch the remote tree (on failure, mark changed documents for push and fail)
//! 3. classify documents, seed unknown ones, resolve conflicts
//! 4. push pending documents
//! 5. re-fetch the remote tree
//! 6. plan pulls, deferring locked documents
//! 7. plan local deletes for documents gone remotely
//! 8. apply pulls and local deletes, expire grace entries
//! 9. persist state and settings, report

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use docsync_common::{DocPath, Result};
use docsync_storage::{EntryKind, LocalStore, RemoteFile, RemoteStore};

use crate::checksum::content_hash;
use crate::collaborator::{Collaborator, Notice, NoticeLevel};
use crate::config::{ConflictPolicy, Settings};
use crate::conflict::{ConflictResolver, Resolved};
use crate::detector::{Action, Decision, Detector, LocalDoc, RemoteTree};
use crate::paths::PathMapper;
use crate::persist::{PersistedState, StateStore};
use crate::retry::RetryExecutor;
use crate::state::{DocumentMetadata, MetadataStore, RunFlag, SyncState};

/// Who started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Requested by a human; conflicts may prompt.
    Manual,
    /// Started by a timer; never prompts and may pull before pushing.
    Background,
}

/// Aggregate counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub conflicts: usize,
    /// Per-document failures; the run itself still completed.
    pub failures: usize,
    pub duration: Duration,
}

impl SyncReport {
    /// No document moved in either direction.
    pub fn is_noop(&self) -> bool {
        self.pushed + self.pulled + self.deleted_local + self.deleted_remote == 0
    }

    pub fn summary(&self) -> String {
        if self.is_noop() && self.failures == 0 {
            return "Everything up to date".to_string();
        }
        let mut summary = format!(
            "Pushed {}, pulled {}, deleted {} locally and {} remotely",
            self.pushed, self.pulled, self.deleted_local, self.deleted_remote
        );
        if self.conflicts > 0 {
            summary.push_str(&format!(", {} conflicts", self.conflicts));
        }
        if self.failures > 0 {
            summary.push_str(&format!(", {} failed", self.failures));
        }
        summary
    }
}

/// Result of asking for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(SyncReport),
    /// Another run held the guard; nothing was done.
    AlreadyRunning,
    /// A destructive operation was not confirmed.
    Declined,
}

impl RunOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Read-only view of the engine for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub tracked: usize,
    pub pending_push: Vec<DocPath>,
    pub pending_delete: Vec<DocPath>,
    pub deferred_pulls: Vec<DocPath>,
    pub conflicted: Vec<DocPath>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Editing-focus veto: a locked document is never overwritten by a pull.
pub type LockPredicate = Arc<dyn Fn(&DocPath) -> bool + Send + Sync>;

/// Per-run context.
pub(crate) struct Run {
    pub(crate) kind: RunKind,
    pub(crate) settings: Settings,
    pub(crate) report: SyncReport,
    /// Local documents that could not be read this run.
    pub(crate) unreadable: BTreeSet<DocPath>,
    started: Instant,
}

impl Run {
    pub(crate) fn new(kind: RunKind, settings: Settings) -> Self {
        Self {
            kind,
            settings,
            report: SyncReport::default(),
            unreadable: BTreeSet::new(),
            started: Instant::now(),
        }
    }
}

pub(crate) struct LocalScan {
    pub(crate) docs: Vec<LocalDoc>,
}

#[derive(Default)]
struct IncomingPlan {
    pulls: Vec<DocPath>,
    deletes: Vec<DocPath>,
}

/// Keeps a local store convergent with one branch of a remote store.
///
/// The engine exclusively owns document metadata and sync state. Front ends
/// request runs, feed editor events through the `note_*` hooks and read
/// [`StatusSnapshot`]s.
pub struct SyncEngine {
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) collaborator: Arc<dyn Collaborator>,
    pub(crate) settings: RwLock<Settings>,
    pub(crate) mapper: PathMapper,
    pub(crate) metadata: RwLock<MetadataStore>,
    pub(crate) state: RwLock<SyncState>,
    pub(crate) retry: RetryExecutor,
    pub(crate) resolver: ConflictResolver,
    pub(crate) run_flag: RunFlag,
    pub(crate) is_locked: LockPredicate,
    state_store: Option<StateStore>,
    settings_path: Option<PathBuf>,
}

impl SyncEngine {
    /// Create an engine. Settings are validated when a run starts, not here.
    ///
    /// # Errors
    /// - `InvalidInput` if the remote sub-path is not a valid path
    pub fn new(
        settings: Settings,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        collaborator: Arc<dyn Collaborator>,
    ) -> Result<Self> {
        let mapper = PathMapper::new(&settings.remote_path)?;
        let retry = RetryExecutor::new(settings.retry_config());
        let resolver =
            ConflictResolver::new(settings.conflict_policy).with_verbosity(settings.verbosity);

        Ok(Self {
            remote,
            local,
            collaborator,
            settings: RwLock::new(settings),
            mapper,
            metadata: RwLock::new(MetadataStore::new()),
            state: RwLock::new(SyncState::new()),
            retry,
            resolver,
            run_flag: RunFlag::new(),
            is_locked: Arc::new(|_: &DocPath| false),
            state_store: None,
            settings_path: None,
        })
    }

    /// Persist runtime state through `store` at the end of every run.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Save settings (with the last-sync time) to `path` after successful runs.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Install the editing-focus predicate.
    pub fn with_lock_predicate(mut self, is_locked: LockPredicate) -> Self {
        self.is_locked = is_locked;
        self
    }

    /// Re-hydrate metadata, pending deletes and deferred pulls.
    pub async fn load_state(&self) -> Result<()> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };
        let persisted = store.load().await?;
        info!(
            "Loaded state: {} documents, {} pending deletes",
            persisted.metadata.len(),
            persisted.pending_delete.len()
        );

        *self.metadata.write().await = persisted.metadata;
        let mut state = self.state.write().await;
        state.pending_delete = persisted.pending_delete;
        state.deferred_pulls = persisted.deferred_pulls;
        Ok(())
    }

    /// Current settings.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Metadata recorded for a local path.
    pub async fn metadata_for(&self, path: &DocPath) -> Option<DocumentMetadata> {
        self.metadata.read().await.get(path).cloned()
    }

    pub fn is_running(&self) -> bool {
        self.run_flag.is_running()
    }

    /// Snapshot for display.
    pub async fn status(&self) -> StatusSnapshot {
        let metadata = self.metadata.read().await;
        let state = self.state.read().await;
        StatusSnapshot {
            running: self.run_flag.is_running(),
            tracked: metadata.len(),
            pending_push: state.pending_push.iter().cloned().collect(),
            pending_delete: state.pending_delete.keys().cloned().collect(),
            deferred_pulls: state.deferred_pulls.iter().cloned().collect(),
            conflicted: metadata.conflicted(),
            last_sync: self.settings.read().await.last_sync,
        }
    }

    /// A tracked document was created or edited locally.
    pub async fn note_local_change(&self, path: &DocPath) {
        if !self.settings.read().await.tracks(path) {
            return;
        }
        let mut state = self.state.write().await;
        state.pending_delete.remove(path);
        state.pending_push.insert(path.clone());
        debug!("Local change noted: {}", path);
    }

    /// A tracked document was deleted locally.
    pub async fn note_local_delete(&self, path: &DocPath) {
        if !self.settings.read().await.tracks(path) {
            return;
        }
        let mut metadata = self.metadata.write().await;
        let mut state = self.state.write().await;
        state.pending_push.remove(path);
        state.deferred_pulls.remove(path);
        match metadata.get(path).and_then(|m| m.remote_revision_id.clone()) {
            Some(revision) => {
                state.pending_delete.insert(path.clone(), revision);
                debug!("Local delete noted: {}", path);
            }
            None => {
                metadata.delete(path);
            }
        }
    }

    /// A tracked document was renamed locally.
    pub async fn note_local_rename(&self, from: &DocPath, to: &DocPath) {
        self.note_local_delete(from).await;
        self.note_local_change(to).await;
    }

    /// Run one synchronization.
    ///
    /// Refused with `Config` before any network call if settings are
    /// incomplete. Returns [`RunOutcome::AlreadyRunning`] if a run is in
    /// flight. A run-level failure is reported through the collaborator
    /// at every verbosity and returned; state is persisted either way.
    pub async fn sync(&self, kind: RunKind) -> Result<RunOutcome> {
        let settings = self.settings.read().await.clone();
        if let Err(e) = settings.validate() {
            self.notify(NoticeLevel::Error, format!("Sync not started: {}", e))
                .await;
            return Err(e);
        }

        let Some(_guard) = self.run_flag.try_acquire() else {
            info!("Sync already running, request ignored");
            self.notify(NoticeLevel::Detail, "Sync already in progress").await;
            return Ok(RunOutcome::AlreadyRunning);
        };

        info!("Starting {:?} sync", kind);
        let mut run = Run::new(kind, settings);
        let result = self.run_phases(&mut run).await;
        self.finish(run, result).await
    }

    async fn run_phases(&self, run: &mut Run) -> Result<()> {
        let present: BTreeSet<DocPath> = self
            .local
            .list()
            .await?
            .into_iter()
            .map(|f| f.path)
            .collect();

        self.discover_local_deletions(&present, &run.settings).await;
        self.process_pending_deletes(run).await;

        let tree = match self.fetch_remote_tree(&run.settings).await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("Remote tree unavailable: {}", e);
                self.mark_degraded(run).await?;
                return Err(e);
            }
        };
        debug!("Remote tree has {} documents", tree.len());

        self.reconcile(run, &tree).await?;
        self.push_pending(run).await;

        let tree = self.fetch_remote_tree(&run.settings).await?;
        let plan = self.plan_incoming(run, &tree).await?;
        self.apply_incoming(run, plan).await;

        self.state.write().await.expire_grace();
        Ok(())
    }

    /// Phase 9: persist and report. Always runs once the guard is held.
    pub(crate) async fn finish(&self, mut run: Run, result: Result<()>) -> Result<RunOutcome> {
        run.report.duration = run.started.elapsed();
        let persisted = self.persist(result.is_ok()).await;

        match result {
            Ok(()) => {
                persisted?;
                info!(
                    "Sync completed in {:?}: {} pushed, {} pulled, {} deleted locally, {} deleted remotely, {} conflicts, {} failed",
                    run.report.duration,
                    run.report.pushed,
                    run.report.pulled,
                    run.report.deleted_local,
                    run.report.deleted_remote,
                    run.report.conflicts,
                    run.report.failures
                );
                let level = if run.report.failures > 0 {
                    NoticeLevel::Warning
                } else {
                    NoticeLevel::Info
                };
                self.notify(level, run.report.summary()).await;
                Ok(RunOutcome::Completed(run.report))
            }
            Err(e) => {
                if let Err(pe) = persisted {
                    error!("Failed to persist state: {}", pe);
                }
                error!("Sync failed: {}", e);
                self.notify(NoticeLevel::Error, format!("Sync failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn persist(&self, succeeded: bool) -> Result<()> {
        if succeeded {
            self.settings.write().await.last_sync = Some(Utc::now());
        }

        if let Some(store) = &self.state_store {
            let snapshot = {
                let metadata = self.metadata.read().await;
                let state = self.state.read().await;
                PersistedState {
                    metadata: metadata.clone(),
                    pending_delete: state.pending_delete.clone(),
                    deferred_pulls: state.deferred_pulls.clone(),
                    ..PersistedState::default()
                }
            };
            store.save(&snapshot).await?;
        }

        if succeeded {
            if let Some(path) = &self.settings_path {
                let settings = self.settings.read().await.clone();
                settings.save(path).await?;
            }
        }
        Ok(())
    }

    /// Phase 0. Records for paths the settings no longer track are dropped
    /// without touching either side.
    async fn discover_local_deletions(&self, present: &BTreeSet<DocPath>, settings: &Settings) {
        let mut metadata = self.metadata.write().await;
        let mut state = self.state.write().await;

        let untracked: BTreeSet<DocPath> = metadata
            .paths()
            .into_iter()
            .chain(state.pending_delete.keys().cloned())
            .filter(|p| !settings.tracks(p))
            .collect();
        for path in untracked {
            debug!("{} is no longer tracked, dropping its record", path);
            metadata.delete(&path);
            state.forget(&path);
        }

        for path in metadata.paths() {
            if present.contains(&path) || state.pending_delete.contains_key(&path) {
                continue;
            }
            state.pending_push.remove(&path);
            match metadata.get(&path).and_then(|m| m.remote_revision_id.clone()) {
                Some(revision) => {
                    debug!("{} deleted locally, queueing remote delete", path);
                    state.pending_delete.insert(path, revision);
                }
                None => {
                    metadata.delete(&path);
                }
            }
        }
    }

    /// Phase 1.
    async fn process_pending_deletes(&self, run: &mut Run) {
        let pending: Vec<(DocPath, String)> = self
            .state
            .read()
            .await
            .pending_delete
            .iter()
            .map(|(p, r)| (p.clone(), r.clone()))
            .collect();

        for (path, known) in pending {
            match self.delete_remote(&path, &known, &run.settings).await {
                Ok(()) => {
                    self.metadata.write().await.delete(&path);
                    self.state.write().await.forget(&path);
                    run.report.deleted_remote += 1;
                    self.notify(NoticeLevel::Detail, format!("Deleted {} remotely", path))
                        .await;
                }
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Remote delete of {} failed: {}", path, e);
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Could not delete {} remotely: {}", path, e),
                    )
                    .await;
                }
            }
        }
    }

    /// Remote listing failed: mark what plainly needs pushing, decide nothing else.
    async fn mark_degraded(&self, run: &mut Run) -> Result<()> {
        let scan = self.scan_local(run).await?;
        let marked = {
            let metadata = self.metadata.read().await;
            let state = self.state.read().await;
            Detector::new(&metadata, &state, &*self.is_locked).detect_degraded(&scan.docs)
        };
        info!("Remote unavailable, {} documents marked for push", marked.len());
        self.state.write().await.pending_push.extend(marked);
        Ok(())
    }

    /// Phase 3.
    async fn reconcile(&self, run: &mut Run, tree: &RemoteTree) -> Result<()> {
        let scan = self.scan_local(run).await?;
        let docs: HashMap<&DocPath, &LocalDoc> = scan.docs.iter().map(|d| (&d.path, d)).collect();

        for Decision { path, action } in self.detect(&scan.docs, tree).await {
            let Some(local) = docs.get(&path).copied() else {
                continue;
            };

            let action = if action == Action::NeedsSeed {
                if let Err(e) = self.seed(local).await {
                    run.report.failures += 1;
                    warn!("Could not seed metadata for {}: {}", path, e);
                    continue;
                }
                self.classify(local, tree.get(&path).map(String::as_str)).await
            } else {
                action
            };

            match action {
                Action::Push => {
                    self.state.write().await.pending_push.insert(path);
                }
                Action::Unchanged => {
                    self.state.write().await.pending_push.remove(&path);
                }
                Action::Conflict => {
                    run.report.conflicts += 1;
                    if let Err(e) = self.resolve_conflict(run, &path).await {
                        run.report.failures += 1;
                        warn!("Conflict on {} left unresolved: {}", path, e);
                        self.notify(
                            NoticeLevel::Warning,
                            format!("Conflict on {} left unresolved: {}", path, e),
                        )
                        .await;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fetch the remote copy of a document with no metadata and record
    /// what is known. Differing content is recorded without a revision id,
    /// which classifies as a conflict rather than a blind overwrite.
    async fn seed(&self, local: &LocalDoc) -> Result<()> {
        let Some(remote) = self.fetch_remote_file(&local.path).await? else {
            return Ok(());
        };
        let remote_hash = content_hash(&remote.content);

        let meta = if remote_hash == local.hash {
            DocumentMetadata::synced(local.path.clone(), remote.sha, remote_hash, local.modified)
        } else {
            DocumentMetadata {
                remote_content_hash: Some(remote_hash),
                ..DocumentMetadata::new_local(local.path.clone(), local.hash.clone(), local.modified)
            }
        };
        debug!("Seeded metadata for {}", local.path);
        self.metadata.write().await.set(meta);
        Ok(())
    }

    async fn resolve_conflict(&self, run: &Run, path: &DocPath) -> Result<()> {
        self.set_conflicted(path, true).await;

        let Some(remote) = self.fetch_remote_file(path).await? else {
            // Gone remotely since the listing: nothing to reconcile against.
            self.set_conflicted(path, false).await;
            self.state.write().await.pending_push.insert(path.clone());
            return Ok(());
        };
        let local = self.local.read(path).await?;

        let resolution = self
            .resolver
            .decide(path, &local, &remote.content, run.kind, self.collaborator.as_ref())
            .await?;
        let resolved = ConflictResolver::apply(resolution, &local, &remote.content);
        if self.apply_resolution(path, &local, &remote, &resolved).await? {
            info!("Conflict on {} resolved: {:?}", path, resolution);
        }
        Ok(())
    }

    /// Write resolved content locally and point metadata at the remote
    /// revision the resolution was made against.
    ///
    /// Returns `false` when the document is open and would have to be
    /// rewritten. It then stays conflicted with its old metadata, so a later
    /// run resolves it again.
    pub(crate) async fn apply_resolution(
        &self,
        path: &DocPath,
        local_content: &str,
        remote: &RemoteFile,
        resolved: &Resolved,
    ) -> Result<bool> {
        if resolved.content != local_content {
            if (self.is_locked)(path) {
                self.set_conflicted(path, true).await;
                info!("Holding resolution of {} while it is open", path);
                self.notify(
                    NoticeLevel::Info,
                    format!("Conflict on {} will be resolved once it is closed", path),
                )
                .await;
                return Ok(false);
            }
            self.local.write(path, &resolved.content).await?;
        }

        let mut meta = DocumentMetadata::synced(
            path.clone(),
            remote.sha.clone(),
            content_hash(&remote.content),
            Utc::now(),
        );
        let mut metadata = self.metadata.write().await;
        let mut state = self.state.write().await;
        if resolved.needs_push {
            meta.local_content_hash = content_hash(&resolved.content);
            state.pending_push.insert(path.clone());
        } else {
            state.pending_push.remove(path);
        }
        metadata.set(meta);
        Ok(true)
    }

    async fn set_conflicted(&self, path: &DocPath, conflicted: bool) {
        if let Some(meta) = self.metadata.write().await.get_mut(path) {
            meta.conflicted = conflicted;
        }
    }

    /// Phase 4.
    async fn push_pending(&self, run: &mut Run) {
        let pending: Vec<DocPath> = self.state.read().await.pending_push.iter().cloned().collect();

        for path in pending {
            match self.local.exists(&path).await {
                Ok(true) => {}
                Ok(false) => {
                    self.state.write().await.pending_push.remove(&path);
                    continue;
                }
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Could not check {}: {}", path, e);
                    continue;
                }
            }

            match self.push_document(run, &path).await {
                Ok(outcome) => outcome.count(&mut run.report),
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Push of {} failed: {}", path, e);
                    self.notify(NoticeLevel::Warning, format!("Could not push {}: {}", path, e))
                        .await;
                }
            }
        }
    }

    /// Phases 6 and 7.
    async fn plan_incoming(&self, run: &mut Run, tree: &RemoteTree) -> Result<IncomingPlan> {
        let scan = self.scan_local(run).await?;
        self.state
            .write()
            .await
            .deferred_pulls
            .retain(|p| (self.is_locked)(p));

        let keep_remote = run.settings.conflict_policy == ConflictPolicy::KeepRemote;
        let mut plan = IncomingPlan::default();
        let mut seeds = Vec::new();
        let mut deferred = Vec::new();

        let decisions = self.detect(&scan.docs, tree).await;
        {
            let mut state = self.state.write().await;
            for Decision { path, action } in decisions {
                if run.unreadable.contains(&path) {
                    continue;
                }
                match action {
                    Action::Pull | Action::PullNew => {
                        if state.pending_push.contains(&path) && !keep_remote {
                            debug!("Not pulling {}: local changes pending", path);
                        } else if (self.is_locked)(&path) {
                            if state.deferred_pulls.insert(path.clone()) {
                                deferred.push(path);
                            }
                        } else {
                            plan.pulls.push(path);
                        }
                    }
                    Action::Defer => {
                        if state.deferred_pulls.insert(path.clone()) {
                            deferred.push(path);
                        }
                    }
                    Action::DeleteLocal if !state.pending_push.contains(&path) => {
                        plan.deletes.push(path);
                    }
                    Action::NeedsSeed => seeds.push(path),
                    _ => {}
                }
            }
        }

        for path in deferred {
            info!("Deferring pull of {} while it is open", path);
            self.notify(
                NoticeLevel::Info,
                format!("Remote changes to {} will be applied once it is closed", path),
            )
            .await;
        }

        // Appeared remotely during this run; classified on the next one.
        for path in seeds {
            if let Some(local) = scan.docs.iter().find(|d| d.path == path) {
                if let Err(e) = self.seed(local).await {
                    warn!("Could not seed metadata for {}: {}", path, e);
                }
            }
        }

        Ok(plan)
    }

    /// Phase 8.
    async fn apply_incoming(&self, run: &mut Run, plan: IncomingPlan) {
        for path in plan.pulls {
            match self.pull_document(&path).await {
                Ok(true) => {
                    run.report.pulled += 1;
                    self.notify(NoticeLevel::Detail, format!("Pulled {}", path)).await;
                }
                Ok(false) => {}
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Pull of {} failed: {}", path, e);
                    self.notify(NoticeLevel::Warning, format!("Could not pull {}: {}", path, e))
                        .await;
                }
            }
        }

        for path in plan.deletes {
            match self.delete_local(&path).await {
                Ok(()) => {
                    run.report.deleted_local += 1;
                    self.notify(NoticeLevel::Detail, format!("Deleted {} locally", path))
                        .await;
                }
                Err(e) => {
                    run.report.failures += 1;
                    warn!("Local delete of {} failed: {}", path, e);
                }
            }
        }
    }

    /// Read every tracked local document. Unreadable documents are counted
    /// once per run and left out.
    pub(crate) async fn scan_local(&self, run: &mut Run) -> Result<LocalScan> {
        let files = self.local.list().await?;
        let mut docs = Vec::with_capacity(files.len());

        for file in files {
            if !run.settings.tracks(&file.path) {
                continue;
            }
            match self.local.read(&file.path).await {
                Ok(content) => docs.push(LocalDoc {
                    hash: content_hash(&content),
                    path: file.path,
                    modified: file.modified,
                }),
                Err(e) => {
                    if run.unreadable.insert(file.path.clone()) {
                        run.report.failures += 1;
                        warn!("Could not read {}: {}", file.path, e);
                        self.notify(
                            NoticeLevel::Warning,
                            format!("Could not read {}: {}", file.path, e),
                        )
                        .await;
                    }
                }
            }
        }
        Ok(LocalScan { docs })
    }

    /// Walk the remote sub-tree. A missing sub-path is an empty tree.
    pub(crate) async fn fetch_remote_tree(&self, settings: &Settings) -> Result<RemoteTree> {
        let root = self.mapper.remote_root().clone();
        let mut tree = RemoteTree::new();
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            let entries = match self.retry.execute(|| self.remote.list_dir(&dir)).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() && dir == root => {
                    debug!("Remote path {} does not exist yet", root);
                    return Ok(tree);
                }
                Err(e) => return Err(e),
            };

            for entry in entries {
                if entry.path.name().is_some_and(|n| n.starts_with('.')) {
                    continue;
                }
                match entry.kind {
                    EntryKind::Dir => stack.push(entry.path),
                    EntryKind::File => {
                        if let Some(local) = self.mapper.to_local(&entry.path) {
                            if settings.tracks(&local) {
                                tree.insert(local, entry.sha);
                            }
                        }
                    }
                    EntryKind::Other => {}
                }
            }
        }
        Ok(tree)
    }

    /// Current remote copy of a local path; `None` if absent.
    pub(crate) async fn fetch_remote_file(&self, path: &DocPath) -> Result<Option<RemoteFile>> {
        let remote_path = self.mapper.to_remote(path);
        match self
            .retry
            .execute(|| self.remote.get_file(&remote_path, None))
            .await
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn detect(&self, docs: &[LocalDoc], tree: &RemoteTree) -> Vec<Decision> {
        let metadata = self.metadata.read().await;
        let state = self.state.read().await;
        Detector::new(&metadata, &state, &*self.is_locked).detect(docs, tree)
    }

    async fn classify(&self, doc: &LocalDoc, remote: Option<&str>) -> Action {
        let metadata = self.metadata.read().await;
        let state = self.state.read().await;
        Detector::new(&metadata, &state, &*self.is_locked).classify(doc, remote)
    }

    /// Show a notice if the configured verbosity allows it.
    pub(crate) async fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let verbosity = self.settings.read().await.verbosity;
        if level.visible_at(verbosity) {
            self.collaborator.notify(&Notice::new(level, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::HeadlessCollaborator;
    use docsync_common::{Error, SecretToken};
    use docsync_storage::{MemoryLocal, MemoryRemote};

    fn settings() -> Settings {
        Settings {
            token: SecretToken::new("t"),
            owner: "octo".to_string(),
            repo: "notes".to_string(),
            retry_base_delay_ms: 1,
            ..Settings::default()
        }
    }

    fn engine(settings: Settings) -> (SyncEngine, Arc<MemoryRemote>, Arc<MemoryLocal>) {
        let remote = Arc::new(MemoryRemote::new());
        let local = Arc::new(MemoryLocal::new());
        let engine = SyncEngine::new(
            settings,
            remote.clone(),
            local.clone(),
            Arc::new(HeadlessCollaborator::new()),
        )
        .unwrap();
        (engine, remote, local)
    }

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_refused_without_credentials() {
        let (engine, remote, _) = engine(Settings::default());
        let result = engine.sync(RunKind::Manual).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(remote.call_count(docsync_storage::RemoteOp::ListDir), 0);
    }

    #[tokio::test]
    async fn test_guard_rejects_overlap() {
        let (engine, _, _) = engine(settings());
        let _held = engine.run_flag.try_acquire().unwrap();
        assert_eq!(engine.sync(RunKind::Manual).await.unwrap(), RunOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_hooks_feed_queues() {
        let (engine, _, _) = engine(settings());
        engine.note_local_change(&p("a.md")).await;
        engine.note_local_change(&p("image.png")).await;

        let status = engine.status().await;
        assert_eq!(status.pending_push, vec![p("a.md")]);

        engine
            .metadata
            .write()
            .await
            .set(DocumentMetadata::synced(p("b.md"), "r1", "h", Utc::now()));
        engine.note_local_rename(&p("b.md"), &p("c.md")).await;

        let status = engine.status().await;
        assert_eq!(status.pending_delete, vec![p("b.md")]);
        assert_eq!(status.pending_push, vec![p("a.md"), p("c.md")]);

        // Never synced: forgotten rather than deleted remotely.
        engine.note_local_delete(&p("a.md")).await;
        let status = engine.status().await;
        assert_eq!(status.pending_delete, vec![p("b.md")]);
        assert_eq!(status.pending_push, vec![p("c.md")]);
    }

    async fn incoming_with_pending_push(policy: ConflictPolicy) -> IncomingPlan {
        let settings = Settings {
            conflict_policy: policy,
            ..settings()
        };
        let (engine, _, local) = engine(settings.clone());
        local.put("a.md", "v1");
        engine
            .metadata
            .write()
            .await
            .set(DocumentMetadata::synced(p("a.md"), "r1", content_hash("v1"), Utc::now()));
        engine.state.write().await.pending_push.insert(p("a.md"));

        let tree = RemoteTree::from([(p("a.md"), "r2".to_string())]);
        let mut run = Run::new(RunKind::Manual, settings);
        engine.plan_incoming(&mut run, &tree).await.unwrap()
    }

    #[tokio::test]
    async fn test_keep_remote_pulls_over_pending_push() {
        let plan = incoming_with_pending_push(ConflictPolicy::KeepRemote).await;
        assert_eq!(plan.pulls, vec![p("a.md")]);

        let plan = incoming_with_pending_push(ConflictPolicy::Ask).await;
        assert!(plan.pulls.is_empty());
    }

    #[test]
    fn test_report_summary() {
        assert_eq!(SyncReport::default().summary(), "Everything up to date");
        let report = SyncReport {
            pushed: 2,
            conflicts: 1,
            failures: 1,
            ..SyncReport::default()
        };
        assert_eq!(
            report.summary(),
            "Pushed 2, pulled 0, deleted 0 locally and 0 remotely, 1 conflicts, 1 failed"
        );
    }
}
