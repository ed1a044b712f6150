use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::{AppError, AppResult, SubscriberStore, WatchStore};
use crate::domain::{SubscriberId, SubscriberSettings, Watch, WatchKey};

/// Process-local store for tests and `--dry-run` without a database.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    watches: HashMap<WatchKey, Watch>,
    settings: HashMap<SubscriberId, SubscriberSettings>,
    blacklist: HashMap<SubscriberId, BTreeSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a watch as if it had been persisted by an earlier run.
    pub fn with_watches(watches: impl IntoIterator<Item = Watch>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for w in watches {
                inner.watches.insert(w.key(), w);
            }
        }
        store
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Storage("lock poisoned".into()))
    }
}

#[async_trait]
impl WatchStore for InMemoryStore {
    async fn create_watch(
        &self,
        subscriber: SubscriberId,
        query: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Watch> {
        let mut inner = self.lock()?;
        let key = WatchKey::new(subscriber, query);
        if inner.watches.contains_key(&key) {
            return Err(AppError::DuplicateWatch {
                subscriber,
                query: query.to_string(),
            });
        }
        let watch = Watch::new(subscriber, query, now);
        inner.watches.insert(key, watch.clone());
        Ok(watch)
    }

    async fn delete_watch(&self, key: &WatchKey) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner
            .watches
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("watch {key}")))
    }

    async fn get_watch(&self, key: &WatchKey) -> AppResult<Option<Watch>> {
        Ok(self.lock()?.watches.get(key).cloned())
    }

    async fn list_watches(&self) -> AppResult<Vec<Watch>> {
        Ok(self.lock()?.watches.values().cloned().collect())
    }

    async fn list_subscriber_watches(&self, subscriber: SubscriberId) -> AppResult<Vec<Watch>> {
        Ok(self
            .lock()?
            .watches
            .values()
            .filter(|w| w.subscriber == subscriber)
            .cloned()
            .collect())
    }

    async fn advance_watch(
        &self,
        key: &WatchKey,
        watermark: DateTime<Utc>,
        sent: u64,
    ) -> AppResult<Watch> {
        let mut inner = self.lock()?;
        let watch = inner
            .watches
            .get_mut(key)
            .ok_or_else(|| AppError::NotFound(format!("watch {key}")))?;
        watch.watermark = watch.watermark.max(watermark);
        watch.delivered_count += sent;
        Ok(watch.clone())
    }
}

#[async_trait]
impl SubscriberStore for InMemoryStore {
    async fn settings(&self, subscriber: SubscriberId) -> AppResult<SubscriberSettings> {
        Ok(self
            .lock()?
            .settings
            .get(&subscriber)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_prefix(&self, subscriber: SubscriberId, prefix_tags: &str) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.settings.entry(subscriber).or_default().prefix_tags = prefix_tags.to_string();
        Ok(())
    }

    async fn set_popular_opt_in(&self, subscriber: SubscriberId, opt_in: bool) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner
            .settings
            .entry(subscriber)
            .or_default()
            .popular_digest_opt_in = opt_in;
        Ok(())
    }

    async fn popular_subscribers(&self) -> AppResult<Vec<SubscriberId>> {
        let mut out: Vec<SubscriberId> = self
            .lock()?
            .settings
            .iter()
            .filter(|(_, s)| s.popular_digest_opt_in)
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        Ok(out)
    }

    async fn blacklist(&self, subscriber: SubscriberId) -> AppResult<BTreeSet<String>> {
        Ok(self
            .lock()?
            .blacklist
            .get(&subscriber)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_blacklist(&self, subscriber: SubscriberId, tags: &[String]) -> AppResult<u64> {
        let mut inner = self.lock()?;
        let set = inner.blacklist.entry(subscriber).or_default();
        Ok(tags.iter().filter(|t| set.insert((*t).clone())).count() as u64)
    }

    async fn remove_blacklist(&self, subscriber: SubscriberId, tags: &[String]) -> AppResult<u64> {
        let mut inner = self.lock()?;
        let Some(set) = inner.blacklist.get_mut(&subscriber) else {
            return Ok(0);
        };
        Ok(tags.iter().filter(|t| set.remove(t.as_str())).count() as u64)
    }
}
