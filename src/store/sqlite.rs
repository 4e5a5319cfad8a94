//! SQLite-based store backend.
//!
//! Table structure:
//! - `kv_store(key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at TEXT NOT NULL)`

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::{KeyValueStore, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url` and make sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // A single connection keeps writes serialized and lets `sqlite::memory:` work.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool; the table is created if missing.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        tracing::info!("SQLite store ready");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(key = %key, bytes = value.len(), "Value written to SQLite");

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_read() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        assert!(store.get("queue").await.unwrap().is_none());

        store.set("queue", "[]").await.unwrap();
        store.set("queue", r#"[{"id":"x"}]"#).await.unwrap();
        assert_eq!(
            store.get("queue").await.unwrap().as_deref(),
            Some(r#"[{"id":"x"}]"#)
        );

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_store")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.set("queue", "[]").await.unwrap();
        store.remove("queue").await.unwrap();
        store.remove("queue").await.unwrap();
        assert!(store.get("queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sync.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.set("queue", "[1,2]").await.unwrap();
        store.pool().close().await;

        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(reopened.get("queue").await.unwrap().as_deref(), Some("[1,2]"));
    }
}
