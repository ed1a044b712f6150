use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::application::worker::WorkerTiming;
use crate::infrastructure::booru_source::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT};

/// Upper bound for `check_interval_seconds` (30 days).
pub const MAX_CHECK_INTERVAL_SECONDS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,
    #[serde(default)]
    pub rate_limit: RateLimitCfg,
    #[serde(default)]
    pub source: SourceCfg,
    #[serde(default)]
    pub popular: PopularCfg,
    #[serde(default)]
    pub http: HttpCfg,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitCfg {
    pub max_requests: usize,
    pub per_seconds: u64,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self {
            max_requests: 1,
            per_seconds: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_static_url")]
    pub static_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            static_url: default_static_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PopularCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "HH:MM", UTC.
    #[serde(default = "default_popular_at")]
    pub at: String,
    #[serde(default = "default_popular_limit")]
    pub limit: u32,
}

impl Default for PopularCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            at: default_popular_at(),
            limit: default_popular_limit(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HttpCfg {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub api_token: Option<String>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_token: None,
        }
    }
}

fn default_database_url() -> String {
    "sqlite:./tagwatch.db".to_string()
}
fn default_check_interval() -> u64 {
    15 * 60
}
fn default_retry_backoff() -> u64 {
    60
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_static_url() -> String {
    "https://static1.e621.net".to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_true() -> bool {
    true
}
fn default_popular_at() -> String {
    "23:30".to_string()
}
fn default_popular_limit() -> u32 {
    30
}
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let raw = expand_env(raw);
        let cfg: Config = serde_yaml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval_seconds == 0 {
            anyhow::bail!("check_interval_seconds must be positive");
        }
        if self.check_interval_seconds > MAX_CHECK_INTERVAL_SECONDS {
            anyhow::bail!(
                "check_interval_seconds ({}) exceeds {MAX_CHECK_INTERVAL_SECONDS}",
                self.check_interval_seconds
            );
        }
        if self.retry_backoff_seconds >= self.check_interval_seconds {
            anyhow::bail!(
                "retry_backoff_seconds ({}) must be shorter than check_interval_seconds ({})",
                self.retry_backoff_seconds,
                self.check_interval_seconds
            );
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.per_seconds == 0 {
            anyhow::bail!("rate_limit needs max_requests > 0 and per_seconds > 0");
        }
        self.popular_at()?;
        Ok(())
    }

    pub fn timing(&self) -> WorkerTiming {
        WorkerTiming {
            check_interval: Duration::from_secs(self.check_interval_seconds),
            retry_backoff: Duration::from_secs(self.retry_backoff_seconds),
        }
    }

    pub fn rate_limit_per(&self) -> Duration {
        Duration::from_secs(self.rate_limit.per_seconds)
    }

    pub fn popular_at(&self) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.popular.at, "%H:%M")
            .map_err(|e| anyhow::anyhow!("popular.at {:?}: {e}", self.popular.at))
    }
}

/// very small ${VAR} expansion to keep config simple; unset variables become
/// empty so optional keys can be left out of the environment
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything() {
        let cfg = Config::from_yaml("webhook_url: null\n").unwrap();
        assert_eq!(cfg.check_interval_seconds, 900);
        assert_eq!(cfg.timing().retry_backoff, Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.max_requests, 1);
        assert_eq!(
            cfg.popular_at().unwrap(),
            NaiveTime::from_hms_opt(23, 30, 0).unwrap()
        );
        assert_eq!(cfg.source.base_url, "https://e621.net");
    }

    #[test]
    fn backoff_must_be_shorter_than_interval() {
        let err = Config::from_yaml("check_interval_seconds: 60\nretry_backoff_seconds: 60\n")
            .unwrap_err();
        assert!(err.to_string().contains("retry_backoff_seconds"));
    }

    #[test]
    fn interval_has_an_upper_bound() {
        let err = Config::from_yaml("check_interval_seconds: 18446744073709551615\n").unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        assert!(Config::from_yaml("check_interval_seconds: 2592000\n").is_ok());
    }

    #[test]
    fn rejects_bad_popular_time() {
        assert!(Config::from_yaml("popular:\n  at: \"25:99\"\n").is_err());
    }

    #[test]
    fn unset_variables_expand_to_empty() {
        assert_eq!(
            expand_env("a: ${TAGWATCH_SURELY_UNSET_VAR}x"),
            "a: x"
        );
        assert_eq!(expand_env("no vars ${"), "no vars ${");
    }
}
