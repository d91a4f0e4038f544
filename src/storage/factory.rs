//! Storage backend factory

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorageConfig;

use super::backend::StorageBackend;
use super::memory::MemoryStorage;
use super::postgres::PostgresStorage;

/// Create a storage backend based on configuration.
///
/// Returns the appropriate implementation based on the `backend` setting:
/// - `"postgres"`: Returns a `PostgresStorage` if a PostgreSQL pool is provided
/// - `"memory"` (default): Returns a `MemoryStorage`
///
/// # Example
///
/// ```rust,ignore
/// let pool = connect_pool(&settings.storage).await?;
/// let storage = create_storage_backend(&settings.storage, Some(pool));
/// ```
pub fn create_storage_backend(
    settings: &StorageConfig,
    postgres_pool: Option<PgPool>,
) -> Arc<dyn StorageBackend> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL storage backend");
                Arc::new(PostgresStorage::new(pool))
            } else {
                tracing::warn!(
                    "PostgreSQL backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryStorage::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory storage backend");
            Arc::new(MemoryStorage::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_memory() {
        let settings = StorageConfig::default();
        let backend = create_storage_backend(&settings, None);
        // Memory backend is always available
        let _ = backend;
    }

    #[test]
    fn test_postgres_without_pool_falls_back() {
        let settings = StorageConfig {
            backend: "postgres".to_string(),
            ..Default::default()
        };
        let backend = create_storage_backend(&settings, None);
        let _ = backend;
    }
}
