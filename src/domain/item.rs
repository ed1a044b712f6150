use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One post returned by the content source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Tags grouped by category ("general", "artist", "species", ...).
    pub tags: BTreeMap<String, Vec<String>>,
    pub file: MediaFile,
    pub has_sample: bool,
    pub description: String,
    pub score: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub md5: Option<String>,
    pub ext: Option<String>,
    /// Null upstream when the post is hidden by the site-wide blacklist.
    pub url: Option<String>,
}

impl Item {
    /// Every tag of the item regardless of category.
    pub fn flat_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.values().flatten().map(String::as_str)
    }

    pub fn tags_in(&self, category: &str) -> &[String] {
        self.tags.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_animated(&self) -> bool {
        matches!(self.file.ext.as_deref(), Some("webm" | "mp4"))
    }
}
