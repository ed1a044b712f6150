//! The per-watch check loop.
//!
//! ```text
//! Scheduled --due--> Checking --fetched+delivered--> Persisting --> Scheduled
//!     |                 |  \--failure--> (backoff) --> Scheduled
//!     \--cancel--> Stopped <--cancel while waiting for a slot
//! ```
//!
//! Every cycle starts by re-reading the watch row and stops the worker when
//! it is gone.
//!
//! Cancellation is only observed while sleeping or waiting for a rate-limiter
//! slot. Once a fetch has been issued the cycle runs to completion, including
//! persistence, so a half-delivered batch never leaves a stale watermark
//! behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::filter::FilterPipeline;
use crate::application::rate_limiter::RateLimiter;
use crate::application::{
    AppError, AppResult, ContentSource, FetchRequest, Notifier, RenderContext, Renderer,
    SubscriberStore, WatchStore,
};
use crate::domain::{Watch, WatchKey};

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub source: Arc<dyn ContentSource>,
    pub limiter: Arc<RateLimiter>,
    pub watches: Arc<dyn WatchStore>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Arc<dyn Renderer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Minimum time between two successful checks of the same watch.
    pub check_interval: Duration,
    /// Wait after a failed cycle before retrying.
    pub retry_backoff: Duration,
}

impl WorkerTiming {
    pub fn check_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.check_interval).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15 * 60),
            retry_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Scheduled,
    Checking,
    Persisting,
    Stopped,
}

/// Counters for one completed cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: u64,
    pub failed: usize,
    pub blacklisted: usize,
    pub already_seen: usize,
}

pub struct WatchWorker {
    key: WatchKey,
    watch: Watch,
    deps: WorkerDeps,
    timing: WorkerTiming,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl WatchWorker {
    pub fn new(
        watch: Watch,
        deps: WorkerDeps,
        timing: WorkerTiming,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, rx) = watch::channel(WorkerState::Scheduled);
        let worker = Self {
            key: watch.key(),
            watch,
            deps,
            timing,
            cancel,
            state,
        };
        (worker, rx)
    }

    pub fn watch(&self) -> &Watch {
        &self.watch
    }

    /// Time left until `watermark + check_interval`, zero when overdue.
    pub fn delay_until_due(&self, now: DateTime<Utc>) -> Duration {
        let due = self.watch.next_check(self.timing.check_interval_chrono());
        (due - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub async fn run(mut self) {
        info!(watch = %self.key, "worker started");

        loop {
            self.state.send_replace(WorkerState::Scheduled);
            let delay = self.delay_until_due(Utc::now());
            debug!(watch = %self.key, ?delay, "sleeping until due");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.run_cycle(Utc::now()).await {
                Ok(Some(report)) => {
                    info!(
                        watch = %self.key,
                        fetched = report.fetched,
                        sent = report.sent,
                        failed = report.failed,
                        blacklisted = report.blacklisted,
                        "check completed"
                    );
                }
                Ok(None) => break,
                Err(AppError::NotFound(_)) => {
                    info!(watch = %self.key, "watch no longer exists");
                    break;
                }
                Err(e) => {
                    warn!(
                        watch = %self.key,
                        error = %e,
                        backoff = ?self.timing.retry_backoff,
                        "check failed, watermark kept"
                    );
                    self.state.send_replace(WorkerState::Scheduled);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.timing.retry_backoff) => {}
                    }
                }
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!(watch = %self.key, "worker stopped");
    }

    /// One fetch-filter-deliver-persist pass. `started_at` becomes the new
    /// watermark on success. Returns `Ok(None)` when cancelled before the
    /// fetch was issued.
    pub async fn run_cycle(&mut self, started_at: DateTime<Utc>) -> AppResult<Option<CycleReport>> {
        self.state.send_replace(WorkerState::Checking);

        // the row is the source of truth; a watch deleted before this worker
        // was registered must never be fetched
        let Some(current) = self.deps.watches.get_watch(&self.key).await? else {
            return Err(AppError::NotFound(format!("watch {}", self.key)));
        };
        self.watch = current;
        let subscriber = self.watch.subscriber;

        let settings = self.deps.subscribers.settings(subscriber).await?;
        let blacklist = self.deps.subscribers.blacklist(subscriber).await?;
        let pipeline = FilterPipeline::new(&settings, blacklist);
        let request = FetchRequest::recent(pipeline.augment_query(&self.watch.query));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            _ = self.deps.limiter.acquire() => {}
        }

        let items = self.deps.source.fetch(&request).await?;
        let filtered = pipeline.apply(&items, self.watch.watermark);
        debug!(
            watch = %self.key,
            query = %request.query,
            fetched = items.len(),
            fresh = filtered.fresh.len(),
            "fetched"
        );

        let context = RenderContext::MatchedQuery(self.watch.query.clone());
        let mut report = CycleReport {
            fetched: items.len(),
            blacklisted: filtered.blacklisted,
            already_seen: filtered.already_seen,
            ..CycleReport::default()
        };
        let mut last_error = None;

        for item in &filtered.fresh {
            let message = self.deps.renderer.render(item, &context);
            match self.deps.notifier.deliver(subscriber, &message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(watch = %self.key, item = item.id, error = %e, "delivery failed");
                    report.failed += 1;
                    last_error = Some(e);
                }
            }
        }

        // nothing got through at all: the destination is unreachable, retry the batch
        if report.sent == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        self.state.send_replace(WorkerState::Persisting);
        self.watch = self
            .deps
            .watches
            .advance_watch(&self.key, started_at, report.sent)
            .await?;

        Ok(Some(report))
    }
}
