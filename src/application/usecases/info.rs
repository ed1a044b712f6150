use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::scheduler::Scheduler;
use crate::application::worker::WorkerState;
use crate::application::{AppResult, WatchStore};
use crate::domain::{SubscriberId, normalize_tags};

/// Read-only view of one watch for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WatchInfo {
    pub query: String,
    pub watermark: DateTime<Utc>,
    pub next_check: DateTime<Utc>,
    pub delivered_count: u64,
    pub created_at: DateTime<Utc>,
    /// `None` when no worker is registered for the watch.
    pub worker: Option<WorkerState>,
}

pub struct InfoUseCase {
    pub watches: Arc<dyn WatchStore>,
    pub scheduler: Arc<Scheduler>,
}

impl InfoUseCase {
    pub async fn list(&self, subscriber: SubscriberId) -> AppResult<Vec<WatchInfo>> {
        let interval = self.scheduler.timing().check_interval_chrono();
        let mut watches = self.watches.list_subscriber_watches(subscriber).await?;
        watches.sort_by(|a, b| a.query.cmp(&b.query));

        Ok(watches
            .into_iter()
            .map(|w| WatchInfo {
                worker: self.scheduler.worker_state(&w.key()),
                next_check: w.next_check(interval),
                query: w.query,
                watermark: w.watermark,
                delivered_count: w.delivered_count,
                created_at: w.created_at,
            })
            .collect())
    }

    /// Queries of `subscriber` that contain every tag in `containing`.
    pub async fn find(&self, subscriber: SubscriberId, containing: &str) -> AppResult<Vec<String>> {
        let wanted = normalize_tags(containing.split_whitespace())?;
        let mut out: Vec<String> = self
            .watches
            .list_subscriber_watches(subscriber)
            .await?
            .into_iter()
            .filter(|w| {
                let tags: Vec<&str> = w.query.split_whitespace().collect();
                wanted.iter().all(|t| tags.contains(&t.as_str()))
            })
            .map(|w| w.query)
            .collect();
        out.sort();
        Ok(out)
    }
}
