use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::application::{AppError, AppResult, SubscriberStore, WatchStore};
use crate::domain::{SubscriberId, SubscriberSettings, Watch, WatchKey};

type WatchRow = (i64, String, i64, i64, i64);

const WATCH_COLUMNS: &str = "subscriber_id, query, watermark_us, delivered_count, created_at_us";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// db_url examples
    /// - "sqlite:/data/tagwatch.db" (docker volume)
    /// - "sqlite:./tagwatch.db"
    /// - "sqlite::memory:" (tests; a single shared connection)
    pub async fn new(db_url: &str) -> AppResult<Self> {
        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)
            .map_err(storage)?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> AppResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watches (
              subscriber_id INTEGER NOT NULL,
              query TEXT NOT NULL,
              watermark_us INTEGER NOT NULL,
              delivered_count INTEGER NOT NULL DEFAULT 0,
              created_at_us INTEGER NOT NULL,
              UNIQUE(subscriber_id, query)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriber_settings (
              subscriber_id INTEGER PRIMARY KEY,
              prefix_tags TEXT NOT NULL DEFAULT '',
              popular_digest_opt_in INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
              subscriber_id INTEGER NOT NULL,
              tag TEXT NOT NULL,
              UNIQUE(subscriber_id, tag)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }
}

#[async_trait]
impl WatchStore for SqliteStore {
    async fn create_watch(
        &self,
        subscriber: SubscriberId,
        query: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Watch> {
        // the unique constraint decides; an existing row is never overwritten
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO watches(
              subscriber_id, query, watermark_us, delivered_count, created_at_us
            ) VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(subscriber.as_i64())
        .bind(query)
        .bind(now.timestamp_micros())
        .bind(now.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .rows_affected();

        if inserted == 0 {
            return Err(AppError::DuplicateWatch {
                subscriber,
                query: query.to_string(),
            });
        }

        self.get_watch(&WatchKey::new(subscriber, query))
            .await?
            .ok_or_else(|| AppError::Storage("watch vanished after insert".into()))
    }

    async fn delete_watch(&self, key: &WatchKey) -> AppResult<()> {
        let deleted = sqlx::query("DELETE FROM watches WHERE subscriber_id = ? AND query = ?")
            .bind(key.subscriber.as_i64())
            .bind(&key.query)
            .execute(&self.pool)
            .await
            .map_err(storage)?
            .rows_affected();

        if deleted == 0 {
            return Err(AppError::NotFound(format!("watch {key}")));
        }
        Ok(())
    }

    async fn get_watch(&self, key: &WatchKey) -> AppResult<Option<Watch>> {
        let row: Option<WatchRow> = sqlx::query_as(&format!(
            "SELECT {WATCH_COLUMNS} FROM watches WHERE subscriber_id = ? AND query = ? LIMIT 1"
        ))
        .bind(key.subscriber.as_i64())
        .bind(&key.query)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(watch_from_row).transpose()
    }

    async fn list_watches(&self) -> AppResult<Vec<Watch>> {
        let rows: Vec<WatchRow> = sqlx::query_as(&format!(
            "SELECT {WATCH_COLUMNS} FROM watches ORDER BY subscriber_id, query"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(watch_from_row).collect()
    }

    async fn list_subscriber_watches(&self, subscriber: SubscriberId) -> AppResult<Vec<Watch>> {
        let rows: Vec<WatchRow> = sqlx::query_as(&format!(
            "SELECT {WATCH_COLUMNS} FROM watches WHERE subscriber_id = ? ORDER BY query"
        ))
        .bind(subscriber.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(watch_from_row).collect()
    }

    async fn advance_watch(
        &self,
        key: &WatchKey,
        watermark: DateTime<Utc>,
        sent: u64,
    ) -> AppResult<Watch> {
        // single statement: the watermark can only move forward
        let row: Option<WatchRow> = sqlx::query_as(&format!(
            r#"
            UPDATE watches
               SET watermark_us = MAX(watermark_us, ?),
                   delivered_count = delivered_count + ?
             WHERE subscriber_id = ? AND query = ?
            RETURNING {WATCH_COLUMNS}
            "#
        ))
        .bind(watermark.timestamp_micros())
        .bind(sent as i64)
        .bind(key.subscriber.as_i64())
        .bind(&key.query)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => watch_from_row(row),
            None => Err(AppError::NotFound(format!("watch {key}"))),
        }
    }
}

#[async_trait]
impl SubscriberStore for SqliteStore {
    async fn settings(&self, subscriber: SubscriberId) -> AppResult<SubscriberSettings> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT prefix_tags, popular_digest_opt_in FROM subscriber_settings WHERE subscriber_id = ? LIMIT 1",
        )
        .bind(subscriber.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row
            .map(|(prefix_tags, popular_digest_opt_in)| SubscriberSettings {
                prefix_tags,
                popular_digest_opt_in,
            })
            .unwrap_or_default())
    }

    async fn set_prefix(&self, subscriber: SubscriberId, prefix_tags: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriber_settings(subscriber_id, prefix_tags) VALUES(?, ?)
            ON CONFLICT(subscriber_id) DO UPDATE SET prefix_tags=excluded.prefix_tags
            "#,
        )
        .bind(subscriber.as_i64())
        .bind(prefix_tags)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn set_popular_opt_in(&self, subscriber: SubscriberId, opt_in: bool) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriber_settings(subscriber_id, popular_digest_opt_in) VALUES(?, ?)
            ON CONFLICT(subscriber_id) DO UPDATE SET popular_digest_opt_in=excluded.popular_digest_opt_in
            "#,
        )
        .bind(subscriber.as_i64())
        .bind(opt_in)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn popular_subscribers(&self) -> AppResult<Vec<SubscriberId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT subscriber_id FROM subscriber_settings WHERE popular_digest_opt_in = 1 ORDER BY subscriber_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.into_iter().map(|r| SubscriberId::from_i64(r.0)).collect())
    }

    async fn blacklist(&self, subscriber: SubscriberId) -> AppResult<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT tag FROM blacklist WHERE subscriber_id = ?")
            .bind(subscriber.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn add_blacklist(&self, subscriber: SubscriberId, tags: &[String]) -> AppResult<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut added = 0;
        for tag in tags {
            added += sqlx::query("INSERT OR IGNORE INTO blacklist(subscriber_id, tag) VALUES(?, ?)")
                .bind(subscriber.as_i64())
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(storage)?
                .rows_affected();
        }
        tx.commit().await.map_err(storage)?;
        Ok(added)
    }

    async fn remove_blacklist(&self, subscriber: SubscriberId, tags: &[String]) -> AppResult<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut removed = 0;
        for tag in tags {
            removed += sqlx::query("DELETE FROM blacklist WHERE subscriber_id = ? AND tag = ?")
                .bind(subscriber.as_i64())
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(storage)?
                .rows_affected();
        }
        tx.commit().await.map_err(storage)?;
        Ok(removed)
    }
}

fn storage(e: sqlx::Error) -> AppError {
    AppError::Storage(e.to_string())
}

fn micros_to_utc(us: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_micros(us)
        .single()
        .ok_or_else(|| AppError::Storage(format!("timestamp out of range: {us}")))
}

fn watch_from_row(row: WatchRow) -> AppResult<Watch> {
    let (subscriber_id, query, watermark_us, delivered_count, created_at_us) = row;
    Ok(Watch {
        subscriber: SubscriberId::from_i64(subscriber_id),
        query,
        watermark: micros_to_utc(watermark_us)?,
        delivered_count: delivered_count.max(0) as u64,
        created_at: micros_to_utc(created_at_us)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn duplicate_create_leaves_existing_row_alone() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sub = SubscriberId(7);
        let t0 = Utc.timestamp_micros(1_700_000_000_000_000).unwrap();

        store.create_watch(sub, "fox", t0).await.unwrap();
        store
            .advance_watch(&WatchKey::new(sub, "fox"), t0 + Duration::minutes(15), 3)
            .await
            .unwrap();

        let err = store
            .create_watch(sub, "fox", t0 + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateWatch { .. }));

        let w = store.get_watch(&WatchKey::new(sub, "fox")).await.unwrap().unwrap();
        assert_eq!(w.watermark, t0 + Duration::minutes(15));
        assert_eq!(w.delivered_count, 3);
        assert_eq!(w.created_at, t0);
    }

    #[tokio::test]
    async fn watermark_never_moves_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = WatchKey::new(SubscriberId(1), "wolf");
        let t0 = Utc.timestamp_micros(1_700_000_000_123_456).unwrap();
        store.create_watch(key.subscriber, &key.query, t0).await.unwrap();

        let w = store.advance_watch(&key, t0 - Duration::hours(1), 2).await.unwrap();
        assert_eq!(w.watermark, t0);
        assert_eq!(w.delivered_count, 2);

        let w = store.advance_watch(&key, t0 + Duration::seconds(1), 0).await.unwrap();
        assert_eq!(w.watermark, t0 + Duration::seconds(1));
        assert_eq!(w.delivered_count, 2);
    }

    #[tokio::test]
    async fn advance_and_delete_of_missing_watch_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = WatchKey::new(SubscriberId(1), "ghost");

        assert!(matches!(
            store.advance_watch(&key, Utc::now(), 1).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(store.delete_watch(&key).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn large_subscriber_ids_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sub = SubscriberId(u64::MAX - 5);
        store.create_watch(sub, "fox", Utc::now()).await.unwrap();

        let watches = store.list_subscriber_watches(sub).await.unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].subscriber, sub);
    }

    #[tokio::test]
    async fn settings_default_and_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sub = SubscriberId(42);
        assert_eq!(store.settings(sub).await.unwrap(), SubscriberSettings::default());

        store.set_popular_opt_in(sub, true).await.unwrap();
        store.set_prefix(sub, "rating:s").await.unwrap();
        let s = store.settings(sub).await.unwrap();
        assert_eq!(s.prefix_tags, "rating:s");
        assert!(s.popular_digest_opt_in);
        assert_eq!(store.popular_subscribers().await.unwrap(), vec![sub]);

        store.set_prefix(sub, "").await.unwrap();
        assert!(store.settings(sub).await.unwrap().popular_digest_opt_in);
    }

    #[tokio::test]
    async fn blacklist_is_a_set() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sub = SubscriberId(1);
        let tags = vec!["gore".to_string(), "scat".to_string()];

        assert_eq!(store.add_blacklist(sub, &tags).await.unwrap(), 2);
        assert_eq!(store.add_blacklist(sub, &tags).await.unwrap(), 0);
        assert_eq!(
            store
                .remove_blacklist(sub, &["scat".to_string(), "nope".to_string()])
                .await
                .unwrap(),
            1
        );
        let bl = store.blacklist(sub).await.unwrap();
        assert_eq!(bl.into_iter().collect::<Vec<_>>(), vec!["gore".to_string()]);
    }
}
