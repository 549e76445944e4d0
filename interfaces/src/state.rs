use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::defs::{ExistingHashes, HistoryStore, Item, SeenIdentity, StoreError, StoreResult};

/// SQLite-backed history of seen identities.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // A single connection keeps `sqlite::memory:` databases coherent too.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        info!("History store ready at {}", database_url);
        Ok(store)
    }

    async fn setup_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_identities (
                url_hash TEXT PRIMARY KEY NOT NULL,
                content_hash TEXT NOT NULL,
                first_seen_at INTEGER NOT NULL,
                payload TEXT,
                sent_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // databases created before backlog tracking lack the last two columns
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('seen_identities')")
                .fetch_all(&self.pool)
                .await?;
        for (column, ddl) in [
            ("payload", "ALTER TABLE seen_identities ADD COLUMN payload TEXT"),
            ("sent_at", "ALTER TABLE seen_identities ADD COLUMN sent_at INTEGER"),
        ] {
            if !columns.iter().any(|c| c == column) {
                sqlx::query(ddl).execute(&self.pool).await?;
                debug!("Added column {} to seen_identities", column);
            }
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_seen_identities_content_hash ON seen_identities (content_hash)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_identities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get(&self, url_hash: &str) -> StoreResult<Option<SeenIdentity>> {
        let row = sqlx::query(
            "SELECT url_hash, content_hash, first_seen_at, payload FROM seen_identities WHERE url_hash = ?1",
        )
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let ts: i64 = r.try_get("first_seen_at")?;
                let first_seen_at = DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| {
                    StoreError::Unavailable(format!("corrupt first_seen_at {ts} for {url_hash}"))
                })?;
                let payload: Option<String> = r.try_get("payload")?;
                Ok(Some(SeenIdentity {
                    url_hash: r.try_get("url_hash")?,
                    content_hash: r.try_get("content_hash")?,
                    first_seen_at,
                    item: payload.as_deref().map(serde_json::from_str).transpose()?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn check_existing(
        &self,
        url_hashes: &[String],
        content_hashes: &[String],
    ) -> StoreResult<ExistingHashes> {
        let mut existing = ExistingHashes::default();
        if url_hashes.is_empty() && content_hashes.is_empty() {
            return Ok(existing);
        }

        // Both hash sets travel as JSON arrays so the whole batch is one round trip
        // regardless of its size.
        let rows = sqlx::query(
            r#"
            SELECT 'url' AS kind, url_hash AS hash FROM seen_identities
            WHERE url_hash IN (SELECT value FROM json_each(?1))
            UNION ALL
            SELECT 'content' AS kind, content_hash AS hash FROM seen_identities
            WHERE content_hash <> '' AND content_hash IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(serde_json::to_string(url_hashes)?)
        .bind(serde_json::to_string(content_hashes)?)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let kind: String = row.try_get("kind")?;
            let hash: String = row.try_get("hash")?;
            if kind == "url" {
                existing.url_hashes.insert(hash);
            } else {
                existing.content_hashes.insert(hash);
            }
        }

        debug!(
            "History check: {} url / {} content hashes already seen",
            existing.url_hashes.len(),
            existing.content_hashes.len()
        );
        Ok(existing)
    }

    async fn append(&self, identities: &[SeenIdentity]) -> StoreResult<()> {
        if identities.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for identity in identities {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO seen_identities (url_hash, content_hash, first_seen_at, payload)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&identity.url_hash)
            .bind(&identity.content_hash)
            .bind(identity.first_seen_at.timestamp())
            .bind(identity.item.as_ref().map(serde_json::to_string).transpose()?)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        info!("Recorded {} new identities out of {} appended", inserted, identities.len());
        Ok(())
    }

    async fn unsent(&self, limit: usize) -> StoreResult<Vec<Item>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM seen_identities
            WHERE sent_at IS NULL AND payload IS NOT NULL
            ORDER BY json_extract(payload, '$.score') DESC, first_seen_at DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        debug!("Backlog read returned {} unsent items", payloads.len());
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }

    async fn mark_sent(&self, url_hashes: &[String], at: DateTime<Utc>) -> StoreResult<()> {
        if url_hashes.is_empty() {
            return Ok(());
        }
        let result = sqlx::query(
            r#"
            UPDATE seen_identities SET sent_at = ?2
            WHERE sent_at IS NULL AND url_hash IN (SELECT value FROM json_each(?1))
            "#,
        )
        .bind(serde_json::to_string(url_hashes)?)
        .bind(at.timestamp())
        .execute(&self.pool)
        .await?;

        info!("Marked {} identities as sent", result.rows_affected());
        Ok(())
    }
}
