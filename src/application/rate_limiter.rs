//! Global pacing gate in front of the content source.
//!
//! Admissions are recorded in a ring of the last `max_requests` instants. A
//! caller is admitted once the oldest of those is at least `per` old, so any
//! window of length `per` holds at most `max_requests` admissions no matter
//! how many workers are waiting.
//!
//! Waiters queue on a `tokio::sync::Mutex`, which hands the lock out in FIFO
//! order; a caller holds it while sleeping for its slot, so nobody can be
//! overtaken indefinitely.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    max_requests: usize,
    per: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, per: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            per,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// One request per `interval`.
    pub fn per_interval(interval: Duration) -> Self {
        Self::new(1, interval)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn per(&self) -> Duration {
        self.per
    }

    /// Waits until a slot is free, then takes it. Dropping the future before
    /// it resolves does not consume a slot.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;
        if admitted.len() >= self.max_requests {
            if let Some(&oldest) = admitted.front() {
                tokio::time::sleep_until(oldest + self.per).await;
            }
            admitted.pop_front();
        }
        admitted.push_back(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn assert_window_bound(mut stamps: Vec<Instant>, max: usize, per: Duration) {
        stamps.sort();
        for (i, start) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .take_while(|t| **t < *start + per)
                .count();
            assert!(
                in_window <= max,
                "{in_window} admissions within {per:?} starting at index {i}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_rate_with_many_waiters() {
        let per = Duration::from_secs(1);
        let limiter = Arc::new(RateLimiter::new(2, per));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        assert_eq!(stamps.len(), 25);
        assert_window_bound(stamps, 2, per);
    }

    #[tokio::test(start_paused = true)]
    async fn first_burst_is_immediate_then_paced() {
        let limiter = RateLimiter::per_interval(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        assert_eq!(Instant::now(), start);

        limiter.acquire().await;
        assert_eq!(Instant::now(), start + Duration::from_secs(1));

        limiter.acquire().await;
        assert_eq!(Instant::now(), start + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_admitted_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::per_interval(Duration::from_millis(100)));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // make arrival order deterministic
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_does_not_consume_a_slot() {
        let limiter = RateLimiter::per_interval(Duration::from_secs(10));
        limiter.acquire().await;

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(timed_out.is_err());

        let start = Instant::now();
        limiter.acquire().await;
        // only the first admission counts, so the slot opens 10s after it
        assert_eq!(Instant::now(), start + Duration::from_secs(9));
    }
}
