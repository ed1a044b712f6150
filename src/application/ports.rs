use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Item, QueryError, SubscriberId, SubscriberSettings, Watch, WatchKey};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("upstream error: {detail}")]
    Upstream { status: Option<u16>, detail: String },
    #[error("{subscriber} is already watching {query:?}")]
    DuplicateWatch {
        subscriber: SubscriberId,
        query: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("delivery error: {0}")]
    Delivery(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl AppError {
    pub fn upstream(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            detail: detail.into(),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        AppError::Validation(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// What a worker asks the content source for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub query: String,
    /// Restrict upstream to roughly the last day. Purely a payload bound,
    /// the watermark comparison stays the dedup authority.
    pub recent_only: bool,
    pub limit: Option<u32>,
}

impl FetchRequest {
    pub fn recent(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            recent_only: true,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Why an item is being shown to a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderContext {
    MatchedQuery(String),
    PopularToday,
}

/// Platform-neutral notification payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub title: String,
    pub url: String,
    pub description: String,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: Vec<MessageField>,
    pub footer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageField {
    pub name: String,
    pub value: String,
}

/// Stateless search against the upstream content API.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Item>>;
}

/// Durable watch records.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Fails with `DuplicateWatch` when the pair already exists; the existing
    /// row is left untouched.
    async fn create_watch(
        &self,
        subscriber: SubscriberId,
        query: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Watch>;

    /// Fails with `NotFound` when no such watch exists.
    async fn delete_watch(&self, key: &WatchKey) -> AppResult<()>;

    async fn get_watch(&self, key: &WatchKey) -> AppResult<Option<Watch>>;

    async fn list_watches(&self) -> AppResult<Vec<Watch>>;

    async fn list_subscriber_watches(&self, subscriber: SubscriberId) -> AppResult<Vec<Watch>>;

    /// Atomically moves the watermark forward (never back) and adds `sent`
    /// to the delivered count. Fails with `NotFound` if the watch is gone.
    async fn advance_watch(
        &self,
        key: &WatchKey,
        watermark: DateTime<Utc>,
        sent: u64,
    ) -> AppResult<Watch>;
}

/// Per-subscriber settings and blacklist.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn settings(&self, subscriber: SubscriberId) -> AppResult<SubscriberSettings>;
    async fn set_prefix(&self, subscriber: SubscriberId, prefix_tags: &str) -> AppResult<()>;
    async fn set_popular_opt_in(&self, subscriber: SubscriberId, opt_in: bool) -> AppResult<()>;
    async fn popular_subscribers(&self) -> AppResult<Vec<SubscriberId>>;

    async fn blacklist(&self, subscriber: SubscriberId) -> AppResult<BTreeSet<String>>;
    /// Returns how many tags were newly added.
    async fn add_blacklist(&self, subscriber: SubscriberId, tags: &[String]) -> AppResult<u64>;
    /// Returns how many tags were removed.
    async fn remove_blacklist(&self, subscriber: SubscriberId, tags: &[String])
    -> AppResult<u64>;
}

/// Deliver notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, subscriber: SubscriberId, message: &Message) -> AppResult<()>;
}

/// Turns an item into a message. Pure formatting, never fails.
pub trait Renderer: Send + Sync {
    fn render(&self, item: &Item, context: &RenderContext) -> Message;
}
