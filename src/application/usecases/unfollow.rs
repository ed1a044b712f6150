use std::sync::Arc;

use crate::application::scheduler::Scheduler;
use crate::application::{AppError, AppResult, WatchStore};
use crate::domain::{SubscriberId, WatchKey, normalize_query};

pub struct UnfollowUseCase {
    pub watches: Arc<dyn WatchStore>,
    pub scheduler: Arc<Scheduler>,
}

impl UnfollowUseCase {
    /// Deletes the watch and stops its worker. Once this returns no further
    /// check of the watch will start.
    pub async fn execute(&self, subscriber: SubscriberId, raw_query: &str) -> AppResult<()> {
        let query = normalize_query(raw_query)
            .map_err(|_| AppError::NotFound(format!("no watch for {raw_query:?}")))?;
        let key = WatchKey::new(subscriber, query);

        self.watches.delete_watch(&key).await?;
        self.scheduler.on_watch_deleted(&key).await?;
        tracing::info!(watch = %key, "watch deleted");
        Ok(())
    }

    /// Deletes several watches; queries that do not exist are reported back
    /// instead of aborting the rest.
    pub async fn execute_many(
        &self,
        subscriber: SubscriberId,
        queries: &[String],
    ) -> AppResult<Vec<String>> {
        let mut missing = Vec::new();
        for query in queries {
            match self.execute(subscriber, query).await {
                Ok(()) => {}
                Err(AppError::NotFound(_)) => missing.push(query.clone()),
                Err(e) => return Err(e),
            }
        }
        Ok(missing)
    }
}
