use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{SubscriberId, WatchKey};

/// A persisted (subscriber, query) pair and its delivery progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub subscriber: SubscriberId,
    pub query: String,
    /// Items created before this instant count as already delivered.
    pub watermark: DateTime<Utc>,
    pub delivered_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    /// A fresh watch; the watermark starts at `now` so no backlog is delivered.
    pub fn new(subscriber: SubscriberId, query: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subscriber,
            query: query.into(),
            watermark: now,
            delivered_count: 0,
            created_at: now,
        }
    }

    pub fn key(&self) -> WatchKey {
        WatchKey::new(self.subscriber, self.query.clone())
    }

    /// Saturates at the latest representable instant instead of overflowing.
    pub fn next_check(&self, interval: Duration) -> DateTime<Utc> {
        self.watermark
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
