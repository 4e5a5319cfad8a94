//! Store backend factory

use std::sync::Arc;

use crate::config::StoreConfig;

use super::{FileStore, KeyValueStore, MemoryStore, SqliteStore};

/// Create a store backend based on configuration.
///
/// - `"sqlite"`: `SqliteStore` at `database_url`
/// - `"file"`: `FileStore` rooted at `path`
/// - `"memory"` (default): `MemoryStore`
///
/// A backend that fails to open falls back to memory with a warning; pending
/// mutations then only live as long as the process.
pub async fn create_store(settings: &StoreConfig) -> Arc<dyn KeyValueStore> {
    match settings.backend.as_str() {
        "sqlite" => match SqliteStore::connect(&settings.database_url).await {
            Ok(store) => {
                tracing::info!(backend = "sqlite", "Creating SQLite store");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "SQLite store unavailable, falling back to memory"
                );
                Arc::new(MemoryStore::new())
            }
        },
        "file" => match FileStore::open(&settings.path).await {
            Ok(store) => {
                tracing::info!(backend = "file", path = %settings.path, "Creating file store");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %settings.path,
                    "File store unavailable, falling back to memory"
                );
                Arc::new(MemoryStore::new())
            }
        },
        _ => {
            tracing::info!(backend = "memory", "Creating memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_memory() {
        let store = create_store(&StoreConfig::default()).await;
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_file_backend_selected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: "file".to_string(),
            path: dir.path().display().to_string(),
            ..Default::default()
        };
        let store = create_store(&config).await;
        assert_eq!(store.backend_name(), "file");
    }

    #[tokio::test]
    async fn test_unreachable_sqlite_falls_back() {
        let config = StoreConfig {
            backend: "sqlite".to_string(),
            database_url: "sqlite:///nonexistent-dir/for/sure/sync.db".to_string(),
            ..Default::default()
        };
        let store = create_store(&config).await;
        assert_eq!(store.backend_name(), "memory");
    }
}
