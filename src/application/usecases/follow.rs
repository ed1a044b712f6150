use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::application::scheduler::Scheduler;
use crate::application::{AppError, AppResult, WatchStore};
use crate::domain::{SubscriberId, Watch, normalize_query};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowMode {
    /// The whole input is one query.
    #[default]
    Raw,
    /// Every tag of the input becomes its own query; existing ones are skipped.
    Separate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FollowOutcome {
    pub added: Vec<String>,
    pub already_following: Vec<String>,
}

pub struct FollowUseCase {
    pub watches: Arc<dyn WatchStore>,
    pub scheduler: Arc<Scheduler>,
}

impl FollowUseCase {
    pub async fn execute(
        &self,
        subscriber: SubscriberId,
        raw_query: &str,
        mode: FollowMode,
    ) -> AppResult<FollowOutcome> {
        match mode {
            FollowMode::Raw => {
                let watch = self.follow_one(subscriber, raw_query).await?;
                Ok(FollowOutcome {
                    added: vec![watch.query],
                    already_following: vec![],
                })
            }
            FollowMode::Separate => {
                // validate everything up front so a bad tag adds nothing
                let queries = raw_query
                    .split_whitespace()
                    .map(normalize_query)
                    .collect::<Result<Vec<_>, _>>()?;
                if queries.is_empty() {
                    return Err(AppError::Validation("query is empty".into()));
                }

                let mut outcome = FollowOutcome::default();
                for query in queries {
                    if outcome.added.contains(&query) || outcome.already_following.contains(&query)
                    {
                        continue;
                    }
                    match self.follow_one(subscriber, &query).await {
                        Ok(watch) => outcome.added.push(watch.query),
                        Err(AppError::DuplicateWatch { query, .. }) => {
                            outcome.already_following.push(query)
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(outcome)
            }
        }
    }

    async fn follow_one(&self, subscriber: SubscriberId, raw_query: &str) -> AppResult<Watch> {
        let query = normalize_query(raw_query)?;
        let watch = self
            .watches
            .create_watch(subscriber, &query, Utc::now())
            .await?;
        self.scheduler.on_watch_created(watch.clone())?;
        tracing::info!(%subscriber, query = %watch.query, "watch created");
        Ok(watch)
    }
}
