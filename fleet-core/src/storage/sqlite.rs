//! SQLite-backed [`SessionStore`] adapter.
//!
//! Mirrors the donor codebase's storage adapter shape: WAL journal mode,
//! `create_if_missing`, a small bounded connection pool, and
//! `sqlx::migrate!` run once at construction.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{SessionStore, StorageError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if necessary) a session-blob database at `database_url`,
    /// which may be a `sqlite:` URL or a bare filesystem path.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Database(format!("failed to create {parent:?}: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Opens an in-memory database, used by tests and the demo CLI's
    /// ephemeral mode.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self, account_id: i64) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query("SELECT blob FROM session_blobs WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("blob")))
    }

    async fn store(&self, account_id: i64, blob: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO session_blobs (account_id, blob, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(blob)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, account_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM session_blobs WHERE account_id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_store_then_load() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.store(1, b"session-bytes").await.unwrap();
        let loaded = store.load(1).await.unwrap();
        assert_eq!(loaded, Some(b"session-bytes".to_vec()));
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.load(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_overwrites_existing_blob() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.store(1, b"first").await.unwrap();
        store.store(1, b"second").await.unwrap();
        assert_eq!(store.load(1).await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_blob_and_reports_existence() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.store(1, b"bytes").await.unwrap();
        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert_eq!(store.load(1).await.unwrap(), None);
    }
}
