use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;

use crate::application::{AppError, AppResult, ContentSource, FetchRequest};
use crate::domain::{Item, MediaFile};

pub const DEFAULT_BASE_URL: &str = "https://e621.net";
pub const DEFAULT_USER_AGENT: &str = concat!("tagwatch/", env!("CARGO_PKG_VERSION"));

/// Upstream metatag that limits results to the last day.
const RECENT_TAG: &str = "date:day";

/// `GET {base}/posts.json?tags=...` against an e621-compatible booru.
pub struct BooruSource {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl BooruSource {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for BooruSource {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_USER_AGENT)
    }
}

#[derive(Debug, Deserialize)]
struct PostsResp {
    posts: Vec<PostResp>,
}

#[derive(Debug, Deserialize)]
struct PostResp {
    id: u64,
    created_at: String,
    #[serde(default)]
    tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    file: FileResp,
    #[serde(default)]
    sample: SampleResp,
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: ScoreResp,
}

#[derive(Debug, Default, Deserialize)]
struct FileResp {
    md5: Option<String>,
    ext: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SampleResp {
    #[serde(default)]
    has: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ScoreResp {
    #[serde(default)]
    total: i64,
}

impl PostResp {
    fn into_item(self) -> AppResult<Item> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| {
                AppError::upstream(
                    None,
                    format!("post {} has bad created_at {:?}: {e}", self.id, self.created_at),
                )
            })?
            .with_timezone(&Utc);

        Ok(Item {
            id: self.id,
            created_at,
            tags: self.tags,
            file: MediaFile {
                md5: self.file.md5,
                ext: self.file.ext,
                url: self.file.url,
            },
            has_sample: self.sample.has,
            description: self.description,
            score: self.score.total,
        })
    }
}

/// The tag string actually sent upstream.
pub fn upstream_tags(request: &FetchRequest) -> String {
    let query = request.query.trim();
    if request.recent_only {
        format!("{query} {RECENT_TAG}").trim().to_string()
    } else {
        query.to_string()
    }
}

#[async_trait]
impl ContentSource for BooruSource {
    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Item>> {
        let url = format!("{}/posts.json", self.base_url);
        let mut params = vec![("tags", upstream_tags(request))];
        if let Some(limit) = request.limit {
            params.push(("limit", limit.to_string()));
        }

        let resp = self
            .client
            .get(url)
            .query(&params)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::upstream(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let mut detail = format!("{} returned {status}", request.query);
            if !body.is_empty() {
                detail.push_str(": ");
                detail.push_str(&body.chars().take(200).collect::<String>());
            }
            return Err(AppError::upstream(Some(status.as_u16()), detail));
        }

        let body: PostsResp = resp
            .json()
            .await
            .map_err(|e| AppError::upstream(Some(status.as_u16()), e.to_string()))?;

        body.posts.into_iter().map(PostResp::into_item).collect()
    }
}
