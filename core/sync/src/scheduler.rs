//! Sync scheduling: periodic background runs plus on-demand requests.
//!
//! Requests are coalesced: while a run is in flight at most one further
//! request is queued, and any beyond that are dropped.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use docsync_common::Result;

use crate::engine::{RunKind, RunOutcome};

/// Sync request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Run a sync of the given kind.
    Sync(RunKind),
    /// Stop the scheduler loop.
    Shutdown,
}

/// Cloneable front of the scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<SyncRequest>,
}

impl SyncScheduler {
    /// Create a scheduler. `period` enables background runs.
    pub fn new(period: Option<Duration>) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(1);
        let handle = SyncSchedulerHandle { period, request_rx };
        (Self { request_tx }, handle)
    }

    /// Ask for a run. Returns `false` if another request is already
    /// queued (the request is coalesced) or the scheduler has stopped.
    pub fn request_sync(&self, kind: RunKind) -> bool {
        match self.request_tx.try_send(SyncRequest::Sync(kind)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Sync request coalesced with a queued one");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the scheduler after the current run.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SyncRequest::Shutdown).await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    period: Option<Duration>,
    request_rx: mpsc::Receiver<SyncRequest>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown or until every
    /// [`SyncScheduler`] is dropped.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is called for
    /// every request and every period tick; its errors are logged.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(RunKind) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RunOutcome>> + Send,
    {
        let mut ticker = self.period.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Sync scheduler started");

        loop {
            let kind = tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(SyncRequest::Sync(kind)) => kind,
                    Some(SyncRequest::Shutdown) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },
                _ = Self::wait_for_tick(&mut ticker) => {
                    debug!("Triggering periodic sync");
                    RunKind::Background
                }
            };

            match sync_fn(kind).await {
                Ok(RunOutcome::Completed(report)) => {
                    debug!("{:?} sync completed: {}", kind, report.summary());
                }
                Ok(outcome) => debug!("{:?} sync skipped: {:?}", kind, outcome),
                Err(e) => error!("{:?} sync failed: {}", kind, e),
            }
        }
    }

    async fn wait_for_tick(ticker: &mut Option<tokio::time::Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
