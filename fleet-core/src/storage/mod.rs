//! Session blob storage (§2 item 2, §6 "session blob is write-through").
//!
//! Provides the [`SessionStore`] port plus its SQLite adapter, following the
//! same hexagonal, trait-port-plus-adapter shape used throughout this crate
//! (`crate::repository` mirrors it for the external-collaborator ports).

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("session blob not found for account {0}")]
    NotFound(i64),
    #[error("migration error: {0}")]
    Migration(String),
}

/// Port for opaque per-account session blob persistence.
///
/// Lazy-loaded and cached in memory by the connection pool; every store call
/// is a write-through to the backing database (§5).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session blob for an account, if one has been stored.
    async fn load(&self, account_id: i64) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write (insert or replace) the session blob for an account.
    async fn store(&self, account_id: i64, blob: &[u8]) -> Result<(), StorageError>;

    /// Remove a stored session blob, e.g. on `terminate_sessions`.
    async fn delete(&self, account_id: i64) -> Result<bool, StorageError>;
}
