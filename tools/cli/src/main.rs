//! docsync CLI - keep a folder of documents in sync with a GitHub repository.
//!
//! Settings and runtime state live in `<dir>/.docsync/`.

mod terminal;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use docsync_common::{DocPath, SecretToken};
use docsync_storage::{FsLocalStore, GitHubConfig, GitHubRemote};
use docsync_sync::{
    ConflictPolicy, HistoryEntry, RunKind, RunOutcome, Settings, StateStore, SyncEngine,
    SyncScheduler, Verbosity,
};

use terminal::TerminalCollaborator;

const DATA_DIR: &str = ".docsync";
const SETTINGS_FILE: &str = "settings.json";
const TOKEN_ENV: &str = "DOCSYNC_TOKEN";

#[derive(Parser)]
#[command(name = "docsync")]
#[command(about = "docsync - Sync a document folder with a GitHub repository")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Document folder (default: current directory).
    #[arg(short, long, default_value = ".", global = true)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Ask,
    KeepLocal,
    KeepRemote,
    Merge,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Ask => ConflictPolicy::Ask,
            PolicyArg::KeepLocal => ConflictPolicy::KeepLocal,
            PolicyArg::KeepRemote => ConflictPolicy::KeepRemote,
            PolicyArg::Merge => ConflictPolicy::Merge,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum VerbosityArg {
    Quiet,
    Standard,
    Verbose,
}

impl From<VerbosityArg> for Verbosity {
    fn from(arg: VerbosityArg) -> Self {
        match arg {
            VerbosityArg::Quiet => Verbosity::Quiet,
            VerbosityArg::Standard => Verbosity::Standard,
            VerbosityArg::Verbose => Verbosity::Verbose,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write settings for a document folder.
    Init {
        /// Repository owner.
        #[arg(short, long)]
        owner: String,

        /// Repository name.
        #[arg(short, long)]
        repo: String,

        /// Branch to sync with.
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Repository directory mirroring the folder (default: repository root).
        #[arg(long, default_value = "")]
        remote_path: String,

        /// API token. Prefer the DOCSYNC_TOKEN environment variable.
        #[arg(long)]
        token: Option<String>,

        /// Conflict policy.
        #[arg(long, value_enum, default_value = "ask")]
        policy: PolicyArg,

        /// Notification verbosity.
        #[arg(long, value_enum, default_value = "standard")]
        notify: VerbosityArg,

        /// Auto-sync interval in seconds; 0 disables auto-sync.
        #[arg(long, default_value_t = 0)]
        interval: u64,
    },

    /// Run one synchronization.
    Sync {
        /// Run as a background sync (never prompts).
        #[arg(long)]
        background: bool,
    },

    /// Sync periodically until interrupted.
    Watch {
        /// Interval in seconds (default: configured auto-sync interval).
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show sync status.
    Status,

    /// List revisions of a document.
    History {
        /// Document path relative to the folder.
        path: String,
    },

    /// Print a document as of a revision.
    Show {
        /// Document path relative to the folder.
        path: String,

        /// Commit sha or unique prefix.
        revision: String,
    },

    /// Restore a document to a revision and mark it for push.
    Restore {
        /// Document path relative to the folder.
        path: String,

        /// Commit sha or unique prefix.
        revision: String,
    },

    /// Overwrite every remote document with its local version.
    ForcePush {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Overwrite every local document with its remote version.
    ForcePull {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dir = cli.dir;
    match cli.command {
        Commands::Init {
            owner,
            repo,
            branch,
            remote_path,
            token,
            policy,
            notify,
            interval,
        } => {
            let settings = Settings {
                token: token.map(SecretToken::new).unwrap_or_default(),
                owner,
                repo,
                branch,
                remote_path,
                auto_sync: interval > 0,
                auto_sync_interval_secs: if interval > 0 { interval } else { 300 },
                conflict_policy: policy.into(),
                verbosity: notify.into(),
                ..Settings::default()
            };
            cmd_init(&dir, settings).await
        }

        Commands::Sync { background } => {
            let kind = if background {
                RunKind::Background
            } else {
                RunKind::Manual
            };
            cmd_sync(&dir, kind).await
        }

        Commands::Watch { interval } => cmd_watch(&dir, interval).await,

        Commands::Status => cmd_status(&dir).await,

        Commands::History { path } => cmd_history(&dir, &path).await,

        Commands::Show { path, revision } => cmd_show(&dir, &path, &revision).await,

        Commands::Restore { path, revision } => cmd_restore(&dir, &path, &revision).await,

        Commands::ForcePush { yes } => cmd_force(&dir, yes, true).await,

        Commands::ForcePull { yes } => cmd_force(&dir, yes, false).await,
    }
}

fn settings_path(dir: &Path) -> PathBuf {
    dir.join(DATA_DIR).join(SETTINGS_FILE)
}

/// Build an engine for the folder and load its persisted state.
async fn open_engine(dir: &Path, assume_yes: bool) -> Result<SyncEngine> {
    let data_dir = dir.join(DATA_DIR);
    let settings_path = settings_path(dir);
    let mut settings = Settings::load(&settings_path)
        .await
        .context("Failed to load settings")?;

    // A token taken from the environment must not end up in the settings file.
    let mut persist_settings = true;
    if settings.token.is_empty() {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            debug!("Using token from {}", TOKEN_ENV);
            settings.token = SecretToken::new(token);
            persist_settings = false;
        }
    }
    settings
        .validate()
        .context("Folder is not configured, run `docsync init`")?;

    let mut config = GitHubConfig::new(
        &settings.owner,
        &settings.repo,
        &settings.branch,
        settings.token.clone(),
    );
    config.api_base = settings.api_base.clone();
    let remote = GitHubRemote::new(config).context("Failed to create GitHub client")?;
    let local = FsLocalStore::new(dir).context("Failed to open document folder")?;

    let mut engine = SyncEngine::new(
        settings,
        Arc::new(remote),
        Arc::new(local),
        Arc::new(TerminalCollaborator::new(assume_yes)),
    )?
    .with_state_store(StateStore::in_dir(&data_dir));
    if persist_settings {
        engine = engine.with_settings_path(settings_path);
    }

    engine.load_state().await.context("Failed to load sync state")?;
    Ok(engine)
}

/// Write settings for a folder.
async fn cmd_init(dir: &Path, settings: Settings) -> Result<()> {
    let path = settings_path(dir);
    // The token may come from the environment later.
    let mut check = settings.clone();
    if check.token.is_empty() {
        check.token = SecretToken::new(TOKEN_ENV);
    }
    check.validate().context("Invalid settings")?;

    settings.save(&path).await.context("Failed to save settings")?;

    println!("Configured {}", dir.display());
    println!("  Repository: {}/{}@{}", settings.owner, settings.repo, settings.branch);
    if !settings.remote_path.is_empty() {
        println!("  Remote path: {}", settings.remote_path);
    }
    if settings.token.is_empty() {
        println!("  Token: read from {}", TOKEN_ENV);
    }
    match settings.auto_sync_interval() {
        Some(period) => println!("  Auto-sync: every {}s", period.as_secs()),
        None => println!("  Auto-sync: off"),
    }

    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(report) => {
            debug!("Run took {:?}", report.duration);
        }
        RunOutcome::AlreadyRunning => println!("A sync is already running."),
        RunOutcome::Declined => println!("Cancelled."),
    }
}

/// Run one synchronization.
async fn cmd_sync(dir: &Path, kind: RunKind) -> Result<()> {
    let engine = open_engine(dir, false).await?;
    let outcome = engine.sync(kind).await.context("Sync failed")?;
    print_outcome(&outcome);

    if outcome.report().is_some_and(|r| r.failures > 0) {
        anyhow::bail!("Some documents could not be synchronized");
    }
    Ok(())
}

/// Sync on a timer until Ctrl-C.
async fn cmd_watch(dir: &Path, interval: Option<u64>) -> Result<()> {
    let engine = Arc::new(open_engine(dir, false).await?);
    let period = match interval {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        Some(_) => anyhow::bail!("Interval must be positive"),
        None => engine
            .settings()
            .await
            .auto_sync_interval()
            .unwrap_or(Duration::from_secs(300)),
    };

    let (scheduler, handle) = SyncScheduler::new(Some(period));
    let runner = engine.clone();
    let task = tokio::spawn(handle.run(move |kind| {
        let engine = runner.clone();
        async move { engine.sync(kind).await }
    }));

    info!("Watching {} every {:?}, press Ctrl-C to stop", dir.display(), period);
    scheduler.request_sync(RunKind::Background);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping after the current run");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    Ok(())
}

/// Show sync status.
async fn cmd_status(dir: &Path) -> Result<()> {
    let engine = open_engine(dir, false).await?;
    let settings = engine.settings().await;
    let status = engine.status().await;

    println!("Sync Status:");
    println!("  Repository: {}/{}@{}", settings.owner, settings.repo, settings.branch);
    println!("  Tracked documents: {}", status.tracked);
    match status.last_sync {
        Some(at) => println!("  Last sync: {}", at.with_timezone(&chrono::Local)),
        None => println!("  Last sync: never"),
    }

    let sections = [
        ("Pending push", &status.pending_push),
        ("Pending delete", &status.pending_delete),
        ("Deferred pulls", &status.deferred_pulls),
        ("Conflicted", &status.conflicted),
    ];
    for (label, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        println!("  {}:", label);
        for path in paths {
            println!("    {}", path);
        }
    }

    Ok(())
}

fn parse_doc_path(path: &str) -> Result<DocPath> {
    DocPath::parse(path).with_context(|| format!("Invalid document path: {}", path))
}

/// Find the history entry whose commit sha starts with `revision`.
async fn find_revision(engine: &SyncEngine, path: &DocPath, revision: &str) -> Result<HistoryEntry> {
    let history = engine
        .history(path)
        .await
        .context("Failed to fetch history")?;
    let mut matches = history
        .into_iter()
        .filter(|entry| entry.commit.sha.starts_with(revision));

    let entry = matches
        .next()
        .with_context(|| format!("No revision {} of {}", revision, path))?;
    if matches.next().is_some() {
        anyhow::bail!("Revision {} is ambiguous", revision);
    }
    Ok(entry)
}

/// List revisions of a document.
async fn cmd_history(dir: &Path, path: &str) -> Result<()> {
    let engine = open_engine(dir, false).await?;
    let path = parse_doc_path(path)?;
    let history = engine
        .history(&path)
        .await
        .context("Failed to fetch history")?;

    if history.is_empty() {
        println!("No revisions of {}.", path);
        return Ok(());
    }

    let remote_path = history[0].remote_path.clone();
    for entry in &history {
        let short: String = entry.commit.sha.chars().take(7).collect();
        let date = entry
            .commit
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let author = entry.commit.author.as_deref().unwrap_or("unknown");
        let message = entry.commit.message.lines().next().unwrap_or_default();
        print!("{}  {}  {}  {}", short, date, author, message);
        if entry.remote_path != remote_path {
            print!("  (as {})", entry.remote_path);
        }
        println!();
    }

    Ok(())
}

/// Print a document as of a revision.
async fn cmd_show(dir: &Path, path: &str, revision: &str) -> Result<()> {
    let engine = open_engine(dir, false).await?;
    let path = parse_doc_path(path)?;
    let entry = find_revision(&engine, &path, revision).await?;
    let content = engine
        .content_at(&entry)
        .await
        .context("Failed to fetch revision")?;
    print!("{}", content);
    Ok(())
}

/// Restore a document to a revision.
async fn cmd_restore(dir: &Path, path: &str, revision: &str) -> Result<()> {
    let engine = open_engine(dir, false).await?;
    let path = parse_doc_path(path)?;
    let entry = find_revision(&engine, &path, revision).await?;
    engine
        .restore(&path, &entry)
        .await
        .context("Failed to restore revision")?;

    println!(
        "Restored {} from {}; it will be pushed on the next sync.",
        path, entry.commit.sha
    );
    Ok(())
}

/// Overwrite one side with the other.
async fn cmd_force(dir: &Path, assume_yes: bool, push: bool) -> Result<()> {
    let engine = open_engine(dir, assume_yes).await?;
    let outcome = if push {
        engine.force_push_all().await.context("Force push failed")?
    } else {
        engine.force_pull_all().await.context("Force pull failed")?
    };
    print_outcome(&outcome);
    Ok(())
}
