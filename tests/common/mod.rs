#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tagwatch::application::rate_limiter::RateLimiter;
use tagwatch::application::worker::WorkerDeps;
use tagwatch::application::{AppError, AppResult, Message, Notifier};
use tagwatch::domain::{Item, MediaFile, SubscriberId};
use tagwatch::infrastructure::{
    embed_renderer::EmbedRenderer, fake_source::FakeContentSource, memory_store::InMemoryStore,
};

/// Records every delivery; optionally fails for chosen post ids.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<(SubscriberId, Message)>>>,
    fail_titles: Arc<Mutex<Vec<String>>>,
    fail_all: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for_item(&self, id: u64) {
        self.fail_titles.lock().unwrap().push(format!("#{id}"));
    }

    pub fn fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    /// Titles ("#<id>") in delivery order.
    pub fn titles(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.title.clone())
            .collect()
    }

    pub fn deliveries(&self) -> Vec<(SubscriberId, Message)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, subscriber: SubscriberId, message: &Message) -> AppResult<()> {
        if *self.fail_all.lock().unwrap() || self.fail_titles.lock().unwrap().contains(&message.title)
        {
            return Err(AppError::Delivery(format!("cannot reach {subscriber}")));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((subscriber, message.clone()));
        Ok(())
    }
}

pub fn item(id: u64, created_at: DateTime<Utc>, general: &[&str]) -> Item {
    let mut tags = BTreeMap::new();
    tags.insert(
        "general".to_string(),
        general.iter().map(|t| t.to_string()).collect(),
    );
    tags.insert("artist".to_string(), vec!["tester".to_string()]);
    Item {
        id,
        created_at,
        tags,
        file: MediaFile {
            md5: Some("0123456789abcdef0123456789abcdef".into()),
            ext: Some("png".into()),
            url: None,
        },
        has_sample: false,
        description: format!("post {id}"),
        score: 1,
    }
}

pub struct Harness {
    pub store: InMemoryStore,
    pub source: FakeContentSource,
    pub notifier: RecordingNotifier,
    pub deps: WorkerDeps,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(InMemoryStore::new())
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        let source = FakeContentSource::new();
        let notifier = RecordingNotifier::new();
        let deps = WorkerDeps {
            source: Arc::new(source.clone()),
            limiter: Arc::new(RateLimiter::new(100, Duration::from_millis(1))),
            watches: Arc::new(store.clone()),
            subscribers: Arc::new(store.clone()),
            notifier: Arc::new(notifier.clone()),
            renderer: Arc::new(EmbedRenderer::default()),
        };
        Self {
            store,
            source,
            notifier,
            deps,
        }
    }
}

/// Polls `cond` every 10ms until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
