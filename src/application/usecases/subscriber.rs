use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::{AppError, AppResult, SubscriberStore};
use crate::domain::{SubscriberId, SubscriberSettings, normalize_tags};

/// Prefix, blacklist and digest preferences of a subscriber.
pub struct SubscriberSettingsUseCase {
    pub subscribers: Arc<dyn SubscriberStore>,
}

impl SubscriberSettingsUseCase {
    pub async fn settings(&self, subscriber: SubscriberId) -> AppResult<SubscriberSettings> {
        self.subscribers.settings(subscriber).await
    }

    /// Stored as typed (order matters for negations and metatags), only the
    /// characters are checked.
    pub async fn set_prefix(&self, subscriber: SubscriberId, prefix_tags: &str) -> AppResult<()> {
        normalize_tags(prefix_tags.split_whitespace())?;
        let prefix = prefix_tags.split_whitespace().collect::<Vec<_>>().join(" ");
        self.subscribers.set_prefix(subscriber, &prefix).await
    }

    pub async fn clear_prefix(&self, subscriber: SubscriberId) -> AppResult<()> {
        self.subscribers.set_prefix(subscriber, "").await
    }

    pub async fn set_popular(&self, subscriber: SubscriberId, opt_in: bool) -> AppResult<()> {
        self.subscribers.set_popular_opt_in(subscriber, opt_in).await
    }

    pub async fn blacklist(&self, subscriber: SubscriberId) -> AppResult<BTreeSet<String>> {
        self.subscribers.blacklist(subscriber).await
    }

    pub async fn blacklist_add(&self, subscriber: SubscriberId, tags: &str) -> AppResult<u64> {
        let tags = parse_tag_list(tags)?;
        self.subscribers.add_blacklist(subscriber, &tags).await
    }

    pub async fn blacklist_remove(&self, subscriber: SubscriberId, tags: &str) -> AppResult<u64> {
        let tags = parse_tag_list(tags)?;
        self.subscribers.remove_blacklist(subscriber, &tags).await
    }
}

fn parse_tag_list(raw: &str) -> AppResult<Vec<String>> {
    let tags: Vec<String> = normalize_tags(raw.split_whitespace())?.into_iter().collect();
    if tags.is_empty() {
        return Err(AppError::Validation("no tags given".into()));
    }
    Ok(tags)
}
