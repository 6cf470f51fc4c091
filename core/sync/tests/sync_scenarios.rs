//! End-to-end runs of the orchestrator against in-memory stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docsync_common::{DocPath, Error, SecretToken};
use docsync_storage::{MemoryLocal, MemoryRemote, RemoteOp};
use docsync_sync::{
    content_hash, Choice, ConflictPolicy, HeadlessCollaborator, NoticeLevel, RunKind, RunOutcome,
    Settings, StateStore, SyncEngine, SyncReport, MARKER_LOCAL, MARKER_REMOTE,
};
use tempfile::TempDir;

struct Harness {
    engine: SyncEngine,
    remote: Arc<MemoryRemote>,
    local: Arc<MemoryLocal>,
    collab: Arc<HeadlessCollaborator>,
}

fn settings() -> Settings {
    Settings {
        token: SecretToken::new("test-token"),
        owner: "octo".to_string(),
        repo: "notes".to_string(),
        retry_base_delay_ms: 1,
        ..Settings::default()
    }
}

fn harness_with(settings: Settings, collab: HeadlessCollaborator) -> Harness {
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocal::new());
    let collab = Arc::new(collab);
    let engine = SyncEngine::new(settings, remote.clone(), local.clone(), collab.clone()).unwrap();
    Harness {
        engine,
        remote,
        local,
        collab,
    }
}

fn harness() -> Harness {
    harness_with(settings(), HeadlessCollaborator::new())
}

fn p(s: &str) -> DocPath {
    DocPath::parse(s).unwrap()
}

async fn run(h: &Harness, kind: RunKind) -> SyncReport {
    match h.engine.sync(kind).await.unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    }
}

/// Bring `path` to a synced state holding `content` on both sides.
async fn synced(h: &Harness, path: &str, content: &str) {
    h.local.put(path, content);
    run(h, RunKind::Manual).await;
    assert_eq!(h.remote.content(path).as_deref(), Some(content));
}

#[tokio::test]
async fn test_new_local_document_is_pushed() {
    let h = harness();
    h.local.put("notes/x.md", "A");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.pulled, 0);
    assert_eq!(h.remote.content("notes/x.md").as_deref(), Some("A"));

    let meta = h.engine.metadata_for(&p("notes/x.md")).await.unwrap();
    assert_eq!(meta.remote_revision_id, h.remote.sha("notes/x.md"));
    assert_eq!(meta.local_content_hash, content_hash("A"));
    assert_eq!(meta.remote_content_hash.as_deref(), Some(content_hash("A").as_str()));
}

#[tokio::test]
async fn test_new_remote_document_is_pulled() {
    let h = harness();
    h.remote.insert("notes/y.md", "B");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pulled, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(h.local.get("notes/y.md").as_deref(), Some("B"));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = harness();
    h.local.put("a.md", "local");
    h.remote.insert("b.md", "remote");

    let first = run(&h, RunKind::Manual).await;
    assert_eq!((first.pushed, first.pulled), (1, 1));

    let second = run(&h, RunKind::Manual).await;
    assert!(second.is_noop(), "second run moved documents: {:?}", second);
    assert_eq!(second.failures, 0);
}

#[tokio::test]
async fn test_local_edit_converges() {
    let h = harness();
    synced(&h, "a.md", "v1").await;

    h.local.put("a.md", "v2");
    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(h.remote.content("a.md").as_deref(), Some("v2"));

    let meta = h.engine.metadata_for(&p("a.md")).await.unwrap();
    assert_eq!(meta.local_content_hash, content_hash("v2"));
    assert_eq!(meta.remote_content_hash.as_deref(), Some(meta.local_content_hash.as_str()));
}

#[tokio::test]
async fn test_remote_edit_is_pulled() {
    let h = harness();
    synced(&h, "a.md", "v1").await;

    h.remote.insert("a.md", "v2");
    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pulled, 1);
    assert_eq!(h.local.get("a.md").as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_both_sides_changed_is_conflict_not_overwrite() {
    let h = harness_with(
        settings(),
        HeadlessCollaborator::new().with_choice(Choice::Remote),
    );
    synced(&h, "a.md", "base").await;

    h.local.put("a.md", "local edit");
    h.remote.insert("a.md", "remote edit");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(h.collab.prompts(), vec![p("a.md")]);
    assert_eq!(h.local.get("a.md").as_deref(), Some("remote edit"));
    assert_eq!(h.remote.content("a.md").as_deref(), Some("remote edit"));
    assert!(h.engine.status().await.conflicted.is_empty());
}

#[tokio::test]
async fn test_keep_local_policy_pushes_local() {
    let h = harness_with(
        Settings {
            conflict_policy: ConflictPolicy::KeepLocal,
            ..settings()
        },
        HeadlessCollaborator::new(),
    );
    synced(&h, "a.md", "base").await;

    h.local.put("a.md", "mine");
    h.remote.insert("a.md", "theirs");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed, 1);
    assert!(h.collab.prompts().is_empty());
    assert_eq!(h.remote.content("a.md").as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_merge_policy_appends_remote_lines() {
    let h = harness_with(
        Settings {
            conflict_policy: ConflictPolicy::Merge,
            ..settings()
        },
        HeadlessCollaborator::new(),
    );
    synced(&h, "a.md", "a\n").await;

    h.local.put("a.md", "a\nb\n");
    h.remote.insert("a.md", "a\nc\n");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);

    let merged = h.local.get("a.md").unwrap();
    assert!(merged.starts_with("a\nb\n"));
    assert!(merged.contains(MARKER_LOCAL) && merged.contains(MARKER_REMOTE));
    assert!(merged.contains("c\n"));
    assert_eq!(h.remote.content("a.md"), Some(merged));
}

#[tokio::test]
async fn test_ask_in_background_keeps_local_and_warns() {
    let h = harness_with(
        settings(),
        HeadlessCollaborator::new().with_choice(Choice::Remote),
    );
    synced(&h, "a.md", "base").await;

    h.local.put("a.md", "mine");
    h.remote.insert("a.md", "theirs");

    let report = run(&h, RunKind::Background).await;
    assert_eq!(report.conflicts, 1);
    assert!(h.collab.prompts().is_empty());
    assert_eq!(h.remote.content("a.md").as_deref(), Some("mine"));
    assert!(h
        .collab
        .notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Warning && n.message.contains("a.md")));
}

#[tokio::test]
async fn test_unknown_document_on_both_sides_is_seeded() {
    let h = harness_with(
        settings(),
        HeadlessCollaborator::new().with_choice(Choice::Local),
    );
    h.local.put("same.md", "equal");
    h.remote.insert("same.md", "equal");
    h.local.put("diff.md", "local");
    h.remote.insert("diff.md", "remote");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(h.collab.prompts(), vec![p("diff.md")]);
    assert_eq!(h.remote.content("diff.md").as_deref(), Some("local"));

    let same = h.engine.metadata_for(&p("same.md")).await.unwrap();
    assert_eq!(same.remote_revision_id, h.remote.sha("same.md"));
}

#[tokio::test]
async fn test_grace_window_covers_listing_lag() {
    let h = harness();
    synced(&h, "a.md", "v1").await;

    // Listings keep reporting the old revision after our push.
    h.remote.freeze_listing();
    h.local.put("a.md", "v2");
    h.local.put("new.md", "fresh");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 2);
    assert_eq!(report.conflicts, 0);
    assert_eq!(report.deleted_local, 0);
    assert_eq!(report.pulled, 0);

    let again = run(&h, RunKind::Manual).await;
    assert!(again.is_noop(), "lagging listing caused {:?}", again);
    assert_eq!(again.conflicts, 0);
    assert_eq!(h.local.get("new.md").as_deref(), Some("fresh"));
    assert_eq!(h.local.get("a.md").as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_remote_deletion_removes_local_copy() {
    let h = harness();
    h.remote.insert("gone.md", "x");
    run(&h, RunKind::Manual).await;
    assert!(h.local.get("gone.md").is_some());

    h.remote.remove("gone.md");
    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.deleted_local, 1);
    assert!(h.local.get("gone.md").is_none());
    assert!(h.engine.metadata_for(&p("gone.md")).await.is_none());
}

#[tokio::test]
async fn test_local_deletion_removes_remote_copy() {
    let h = harness();
    synced(&h, "a.md", "x").await;

    h.local.remove("a.md");
    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.deleted_remote, 1);
    assert!(h.remote.content("a.md").is_none());
    assert!(h.engine.metadata_for(&p("a.md")).await.is_none());

    // Not resurrected by a lagging listing or a later run.
    let again = run(&h, RunKind::Manual).await;
    assert!(again.is_noop());
    assert!(h.local.get("a.md").is_none());
}

#[tokio::test]
async fn test_delete_retries_stale_revision_with_fresh_id() {
    let h = harness();
    synced(&h, "a.md", "x").await;

    h.local.remove("a.md");
    h.remote.inject_fault(RemoteOp::DeleteFile, 409);
    let gets_before = h.remote.call_count(RemoteOp::GetFile);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.deleted_remote, 1);
    assert_eq!(h.remote.call_count(RemoteOp::DeleteFile), 2);
    // One precondition read before each delete attempt.
    assert_eq!(h.remote.call_count(RemoteOp::GetFile) - gets_before, 2);
    assert!(h.remote.content("a.md").is_none());
}

#[tokio::test]
async fn test_delete_gives_up_after_bound() {
    let h = harness();
    synced(&h, "a.md", "x").await;

    h.local.remove("a.md");
    for _ in 0..3 {
        h.remote.inject_fault(RemoteOp::DeleteFile, 409);
    }

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.deleted_remote, 0);
    assert_eq!(report.failures, 1);
    assert_eq!(h.remote.call_count(RemoteOp::DeleteFile), 3);
    assert!(h.remote.content("a.md").is_some());
    assert_eq!(h.engine.status().await.pending_delete, vec![p("a.md")]);
    // Still queued, so the remote copy is not pulled back.
    assert!(h.local.get("a.md").is_none());
}

#[tokio::test]
async fn test_push_retries_after_concurrent_write() {
    let h = harness();
    synced(&h, "a.md", "v1").await;

    h.local.put("a.md", "v2");
    h.remote.inject_fault(RemoteOp::PutFile, 409);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(h.remote.content("a.md").as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = harness();
    h.local.put("a.md", "v1");
    h.remote.inject_fault(RemoteOp::ListDir, 502);
    h.remote.inject_fault(RemoteOp::PutFile, 0);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn test_remote_unavailable_marks_pending_push() {
    let h = harness();
    synced(&h, "same.md", "x").await;
    h.local.put("new.md", "y");
    for _ in 0..3 {
        h.remote.inject_fault(RemoteOp::ListDir, 503);
    }

    let result = h.engine.sync(RunKind::Manual).await;
    assert!(matches!(result, Err(Error::Http { status: 503, .. })));
    assert!(!h.engine.is_running());

    let status = h.engine.status().await;
    assert_eq!(status.pending_push, vec![p("new.md")]);
    assert!(h
        .collab
        .notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Error));

    // Recovers on the next run.
    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(h.remote.content("new.md").as_deref(), Some("y"));
}

#[tokio::test]
async fn test_unreadable_document_does_not_abort_run() {
    let h = harness();
    h.local.put("bad.md", "?");
    h.local.put("good.md", "ok");
    h.local.fail_reads("bad.md");
    h.remote.insert("bad.md", "remote copy");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(h.remote.content("good.md").as_deref(), Some("ok"));
    // Neither side of the unreadable document is touched.
    assert_eq!(h.local.get("bad.md").as_deref(), Some("?"));
    assert_eq!(h.remote.content("bad.md").as_deref(), Some("remote copy"));
}

#[tokio::test]
async fn test_locked_document_defers_pull() {
    let locked = Arc::new(AtomicBool::new(true));
    let flag = locked.clone();
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocal::new());
    let collab = Arc::new(HeadlessCollaborator::new());
    let engine = SyncEngine::new(settings(), remote.clone(), local.clone(), collab.clone())
        .unwrap()
        .with_lock_predicate(Arc::new(move |path: &DocPath| {
            path.to_string_path() == "open.md" && flag.load(Ordering::SeqCst)
        }));

    local.put("open.md", "v1");
    engine.sync(RunKind::Manual).await.unwrap();
    remote.insert("open.md", "v2");

    let outcome = engine.sync(RunKind::Background).await.unwrap();
    assert_eq!(outcome.report().unwrap().pulled, 0);
    assert_eq!(local.get("open.md").as_deref(), Some("v1"));
    assert_eq!(engine.status().await.deferred_pulls, vec![p("open.md")]);
    assert!(collab.notices().iter().any(|n| n.message.contains("open.md")));

    locked.store(false, Ordering::SeqCst);
    let outcome = engine.sync(RunKind::Background).await.unwrap();
    assert_eq!(outcome.report().unwrap().pulled, 1);
    assert_eq!(local.get("open.md").as_deref(), Some("v2"));
    assert!(engine.status().await.deferred_pulls.is_empty());
}

#[tokio::test]
async fn test_background_run_pulls_before_push() {
    let h = harness();
    synced(&h, "a.md", "v1").await;

    // Marked dirty by an editor event, but the content never changed.
    h.engine.note_local_change(&p("a.md")).await;
    h.remote.insert("a.md", "v2");

    let report = run(&h, RunKind::Background).await;
    assert_eq!(report.pushed, 0);
    assert_eq!(report.pulled, 1);
    assert_eq!(h.remote.content("a.md").as_deref(), Some("v2"));
    assert_eq!(h.local.get("a.md").as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_remote_sub_path_mapping() {
    let h = harness_with(
        Settings {
            remote_path: "/vault/".to_string(),
            ..settings()
        },
        HeadlessCollaborator::new(),
    );
    h.local.put("daily/x.md", "local");
    h.remote.insert("vault/y.md", "remote");
    h.remote.insert("elsewhere/z.md", "ignored");

    let report = run(&h, RunKind::Manual).await;
    assert_eq!((report.pushed, report.pulled), (1, 1));
    assert_eq!(h.remote.content("vault/daily/x.md").as_deref(), Some("local"));
    assert_eq!(h.local.get("y.md").as_deref(), Some("remote"));
    assert!(h.local.get("elsewhere/z.md").is_none());
    assert!(h.local.get("z.md").is_none());
}

#[tokio::test]
async fn test_untracked_extensions_are_ignored() {
    let h = harness();
    h.local.put("image.png", "binary");
    h.remote.insert("data.json", "{}");

    let report = run(&h, RunKind::Manual).await;
    assert!(report.is_noop());
    assert!(h.remote.content("image.png").is_none());
    assert!(h.local.get("data.json").is_none());
}

#[tokio::test]
async fn test_history_follows_renames_and_restores() {
    let h = harness();
    h.remote.insert("old.md", "first");
    h.remote.insert("old.md", "second");
    h.remote.rename("old.md", "new.md");
    run(&h, RunKind::Manual).await;
    assert_eq!(h.local.get("new.md").as_deref(), Some("second"));

    let history = h.engine.history(&p("new.md")).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].remote_path, p("new.md"));
    assert_eq!(history[2].remote_path, p("old.md"));
    assert_eq!(h.engine.content_at(&history[2]).await.unwrap(), "first");

    h.engine.restore(&p("new.md"), &history[2]).await.unwrap();
    assert_eq!(h.local.get("new.md").as_deref(), Some("first"));
    assert_eq!(h.engine.status().await.pending_push, vec![p("new.md")]);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(h.remote.content("new.md").as_deref(), Some("first"));
}

#[tokio::test]
async fn test_force_operations_require_confirmation() {
    let h = harness();
    h.local.put("a.md", "local");
    h.remote.insert("a.md", "remote");

    assert_eq!(h.engine.force_push_all().await.unwrap(), RunOutcome::Declined);
    assert_eq!(h.engine.force_pull_all().await.unwrap(), RunOutcome::Declined);
    assert_eq!(h.remote.content("a.md").as_deref(), Some("remote"));
    assert_eq!(h.local.get("a.md").as_deref(), Some("local"));
}

#[tokio::test]
async fn test_force_push_and_pull() {
    let h = harness_with(settings(), HeadlessCollaborator::new().with_confirm(true));
    h.local.put("a.md", "local");
    h.remote.insert("a.md", "remote");
    h.remote.insert("b.md", "only remote");

    let outcome = h.engine.force_push_all().await.unwrap();
    assert_eq!(outcome.report().unwrap().pushed, 1);
    assert_eq!(h.remote.content("a.md").as_deref(), Some("local"));

    h.remote.insert("a.md", "remote again");
    let outcome = h.engine.force_pull_all().await.unwrap();
    assert_eq!(outcome.report().unwrap().pulled, 2);
    assert_eq!(h.local.get("a.md").as_deref(), Some("remote again"));
    assert_eq!(h.local.get("b.md").as_deref(), Some("only remote"));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocal::new());
    let settings_path = temp.path().join("settings.json");

    let build = || {
        SyncEngine::new(
            settings(),
            remote.clone(),
            local.clone(),
            Arc::new(HeadlessCollaborator::new()),
        )
        .unwrap()
        .with_state_store(StateStore::in_dir(temp.path()))
        .with_settings_path(&settings_path)
    };

    local.put("a.md", "v1");
    let first = build();
    first.sync(RunKind::Manual).await.unwrap();
    assert!(first.status().await.last_sync.is_some());
    drop(first);

    let saved = Settings::load(&settings_path).await.unwrap();
    assert!(saved.last_sync.is_some());

    let second = build();
    second.load_state().await.unwrap();
    assert!(second.metadata_for(&p("a.md")).await.is_some());

    let report = second.sync(RunKind::Manual).await.unwrap();
    assert!(report.report().unwrap().is_noop());
}

#[tokio::test]
async fn test_narrowed_extensions_leave_remote_copy() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocal::new());

    let build = |extensions: &[&str]| {
        let settings = Settings {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ..settings()
        };
        SyncEngine::new(
            settings,
            remote.clone(),
            local.clone(),
            Arc::new(HeadlessCollaborator::new()),
        )
        .unwrap()
        .with_state_store(StateStore::in_dir(temp.path()))
    };

    local.put("a.txt", "keep me");
    let first = build(&["md", "txt"]);
    first.sync(RunKind::Manual).await.unwrap();
    assert_eq!(remote.content("a.txt").as_deref(), Some("keep me"));
    drop(first);

    let second = build(&["md"]);
    second.load_state().await.unwrap();
    let outcome = second.sync(RunKind::Manual).await.unwrap();
    assert_eq!(outcome.report().unwrap().deleted_remote, 0);
    assert_eq!(remote.content("a.txt").as_deref(), Some("keep me"));
    assert_eq!(local.get("a.txt").as_deref(), Some("keep me"));
    assert!(second.metadata_for(&p("a.txt")).await.is_none());
    assert!(second.status().await.pending_delete.is_empty());
}

#[tokio::test]
async fn test_keep_remote_waits_for_open_document() {
    let locked = Arc::new(AtomicBool::new(true));
    let flag = locked.clone();
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocal::new());
    let settings = Settings {
        conflict_policy: ConflictPolicy::KeepRemote,
        ..settings()
    };
    let engine = SyncEngine::new(
        settings,
        remote.clone(),
        local.clone(),
        Arc::new(HeadlessCollaborator::new()),
    )
    .unwrap()
    .with_lock_predicate(Arc::new(move |path: &DocPath| {
        path.to_string_path() == "open.md" && flag.load(Ordering::SeqCst)
    }));

    local.put("open.md", "base");
    engine.sync(RunKind::Manual).await.unwrap();
    local.put("open.md", "typing in progress");
    remote.insert("open.md", "remote edit");

    let outcome = engine.sync(RunKind::Background).await.unwrap();
    assert_eq!(outcome.report().unwrap().conflicts, 1);
    assert_eq!(local.get("open.md").as_deref(), Some("typing in progress"));
    assert_eq!(remote.content("open.md").as_deref(), Some("remote edit"));
    assert_eq!(engine.status().await.conflicted, vec![p("open.md")]);

    locked.store(false, Ordering::SeqCst);
    let outcome = engine.sync(RunKind::Background).await.unwrap();
    assert_eq!(outcome.report().unwrap().conflicts, 1);
    assert_eq!(local.get("open.md").as_deref(), Some("remote edit"));
    assert!(engine.status().await.conflicted.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_leaves_conflict_for_next_run() {
    let h = harness_with(
        Settings {
            conflict_policy: ConflictPolicy::KeepLocal,
            ..settings()
        },
        HeadlessCollaborator::new(),
    );
    synced(&h, "a.md", "base").await;
    h.local.put("a.md", "mine");
    h.remote.insert("a.md", "theirs");
    h.remote.inject_fault(RemoteOp::GetFile, 401);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(h.engine.status().await.conflicted, vec![p("a.md")]);
    assert_eq!(h.local.get("a.md").as_deref(), Some("mine"));
    assert_eq!(h.remote.content("a.md").as_deref(), Some("theirs"));

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed, 1);
    assert!(h.engine.status().await.conflicted.is_empty());
    assert_eq!(h.remote.content("a.md").as_deref(), Some("mine"));
}

#[tokio::test]
async fn test_keep_remote_pulls_despite_pending_push() {
    let h = harness_with(
        Settings {
            conflict_policy: ConflictPolicy::KeepRemote,
            ..settings()
        },
        HeadlessCollaborator::new(),
    );
    synced(&h, "a.md", "v1").await;
    h.engine.note_local_change(&p("a.md")).await;
    h.remote.insert("a.md", "v2");
    // The push attempt fails, leaving the path queued.
    h.remote.inject_fault(RemoteOp::GetFile, 401);

    let report = run(&h, RunKind::Manual).await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.pulled, 1);
    assert_eq!(h.local.get("a.md").as_deref(), Some("v2"));
}
