use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, LocalStorageBackend, StoreBackend};
use crate::db::{create_pool as create_db_pool, run_migrations, PgStore};
use crate::memory::MemoryStore;
use crate::redis::{create_pool as create_redis_pool, RedisStorage};
use crate::storage::{FileStorage, LocalStorage, MemoryStorage};
use crate::store::BackendStore;

/// Shared handles passed to every service.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn BackendStore>,
    pub storage: Arc<dyn LocalStorage>,
}

impl AppContext {
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn BackendStore> = match config.storage.store_backend {
            StoreBackend::Postgres => {
                if config.database.run_migrations {
                    run_migrations(&config.database).await?;
                }
                let pool = create_db_pool(&config.database).await?;
                Arc::new(PgStore::new(pool))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory backend store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let storage: Arc<dyn LocalStorage> = match config.storage.local_backend {
            LocalStorageBackend::Redis => {
                let pool = create_redis_pool(&config.redis).await?;
                Arc::new(RedisStorage::new(pool, config.redis.key_prefix.clone()))
            }
            LocalStorageBackend::File => {
                tracing::info!("Device storage file: {}", config.storage.file_path.display());
                Arc::new(FileStorage::new(config.storage.file_path.clone()))
            }
            LocalStorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };

        Ok(AppContext {
            config: Arc::new(config),
            store,
            storage,
        })
    }

    /// Context over explicit backends, used by tests and embedders.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn BackendStore>,
        storage: Arc<dyn LocalStorage>,
    ) -> Self {
        AppContext {
            config: Arc::new(config),
            store,
            storage,
        }
    }
}
