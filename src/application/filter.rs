//! Per-subscriber query augmentation and item filtering.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::domain::{Item, SubscriberSettings};

/// Outcome of running a fetched batch through the filters.
#[derive(Debug, Default)]
pub struct Filtered<'a> {
    /// Items to deliver, oldest first.
    pub fresh: Vec<&'a Item>,
    pub blacklisted: usize,
    pub already_seen: usize,
}

/// The filters that apply to one subscriber for one cycle. Built fresh from
/// the store every cycle so prefix and blacklist edits take effect on the
/// next check.
#[derive(Clone, Debug, Default)]
pub struct FilterPipeline {
    prefix_tags: String,
    blacklist: BTreeSet<String>,
}

impl FilterPipeline {
    pub fn new(settings: &SubscriberSettings, blacklist: BTreeSet<String>) -> Self {
        Self {
            prefix_tags: settings.prefix_tags.trim().to_string(),
            blacklist,
        }
    }

    /// `query` followed by the subscriber prefix.
    pub fn augment_query(&self, query: &str) -> String {
        let query = query.trim();
        if self.prefix_tags.is_empty() {
            return query.to_string();
        }
        format!("{} {}", query, self.prefix_tags).trim().to_string()
    }

    pub fn is_blacklisted(&self, item: &Item) -> bool {
        !self.blacklist.is_empty() && item.flat_tags().any(|t| self.blacklist.contains(t))
    }

    /// Blacklist first, then the watermark. The boundary is inclusive: an item
    /// created exactly at the watermark is still new.
    pub fn apply<'a>(&self, items: &'a [Item], watermark: DateTime<Utc>) -> Filtered<'a> {
        let mut sorted: Vec<&Item> = items.iter().collect();
        sorted.sort_by_key(|i| (i.created_at, i.id));

        let mut out = Filtered::default();
        for item in sorted {
            if self.is_blacklisted(item) {
                out.blacklisted += 1;
            } else if !is_new(item, watermark) {
                out.already_seen += 1;
            } else {
                out.fresh.push(item);
            }
        }
        out
    }

    /// Blacklist only, for deliveries that have no watermark (the digest).
    pub fn without_blacklisted<'a>(&self, items: &'a [Item]) -> Vec<&'a Item> {
        items.iter().filter(|i| !self.is_blacklisted(i)).collect()
    }
}

pub fn is_new(item: &Item, watermark: DateTime<Utc>) -> bool {
    item.created_at >= watermark
}
