use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat-platform identity of whoever owns a watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// SQLite only has signed 64-bit integers; the bit pattern is preserved.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(raw: i64) -> Self {
        Self(raw as u64)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubscriberId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identity of a watch: one subscriber, one normalized query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchKey {
    pub subscriber: SubscriberId,
    pub query: String,
}

impl WatchKey {
    pub fn new(subscriber: SubscriberId, query: impl Into<String>) -> Self {
        Self {
            subscriber,
            query: query.into(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subscriber, self.query)
    }
}
