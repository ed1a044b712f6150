//! Once a day, send the day's most popular posts to everyone who opted in.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::filter::FilterPipeline;
use crate::application::rate_limiter::RateLimiter;
use crate::application::{
    AppResult, ContentSource, FetchRequest, Notifier, RenderContext, Renderer, SubscriberStore,
};

pub const POPULAR_QUERY: &str = "order:popular";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub items: usize,
    pub subscribers: usize,
    pub sent: u64,
    pub failed: u64,
}

pub struct PopularDigestUseCase {
    pub source: Arc<dyn ContentSource>,
    pub limiter: Arc<RateLimiter>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Arc<dyn Renderer>,
    pub limit: u32,
    /// Daily send time, UTC.
    pub at: NaiveTime,
}

impl PopularDigestUseCase {
    /// Fetches once and fans out to every opted-in subscriber, honouring each
    /// one's blacklist. A failing subscriber does not stop the others.
    pub async fn run_once(&self) -> AppResult<DigestReport> {
        let subscribers = self.subscribers.popular_subscribers().await?;
        if subscribers.is_empty() {
            return Ok(DigestReport::default());
        }

        self.limiter.acquire().await;
        let request = FetchRequest::recent(POPULAR_QUERY).with_limit(self.limit);
        let items = self.source.fetch(&request).await?;

        let mut report = DigestReport {
            items: items.len(),
            subscribers: subscribers.len(),
            ..DigestReport::default()
        };

        for subscriber in subscribers {
            let blacklist = match self.subscribers.blacklist(subscriber).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(%subscriber, error = %e, "skipping digest, blacklist unavailable");
                    continue;
                }
            };
            let pipeline = FilterPipeline::new(&Default::default(), blacklist);

            for item in pipeline.without_blacklisted(&items) {
                let message = self.renderer.render(item, &RenderContext::PopularToday);
                match self.notifier.deliver(subscriber, &message).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        warn!(%subscriber, item = item.id, error = %e, "digest delivery failed");
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Runs `run_once` every day at `at` until cancelled.
    pub async fn run_daily(&self, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let next = next_occurrence(now, self.at);
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next, "popular digest scheduled");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.run_once().await {
                Ok(r) => info!(
                    items = r.items,
                    subscribers = r.subscribers,
                    sent = r.sent,
                    failed = r.failed,
                    "popular digest sent"
                ),
                Err(e) => warn!(error = %e, "popular digest skipped"),
            }
        }
    }
}

/// The first instant strictly after `now` whose UTC time of day is `at`.
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn next_occurrence_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let at = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert_eq!(
            next_occurrence(now, at),
            Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap()
        );
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        assert_eq!(
            next_occurrence(now, at),
            Utc.with_ymd_and_hms(2024, 3, 11, 23, 30, 0).unwrap()
        );
    }
}
