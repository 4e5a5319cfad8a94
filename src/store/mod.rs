//! Durable key/value storage for the mutation queue.
//!
//! The queue engine persists its whole pending list under a single key and
//! reads it back on startup. Backends:
//!
//! - `MemoryStore`: process-local, used in tests and as a fallback
//! - `FileStore`: one JSON document per key, replaced atomically
//! - `SqliteStore`: a key/value table in a local SQLite database
//!
//! Use `create_store()` to pick a backend from configuration.

mod factory;
pub mod file;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use factory::create_store;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Key/value store surviving process restarts.
///
/// Values are opaque strings; the queue engine stores a JSON array.
/// Implementations must be `Send + Sync` as they are shared across tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value for `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value for `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`; deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Backend type identifier for logs
    fn backend_name(&self) -> &'static str;
}
