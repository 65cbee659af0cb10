use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tracing;

use crate::config::RedisConfig;
use crate::error::StorageError;
use crate::storage::LocalStorage;

pub type RedisPool = Arc<Client>;
pub type RedisConnection = MultiplexedConnection;

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!("Setting up Redis client");
    tracing::info!("Redis URL: {}", mask_redis_url(&config.url));

    let client = Client::open(config.url.as_str())
        .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to connect to Redis: {}", e))?;

    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .map_err(|e| anyhow!("Failed to ping Redis: {}", e))?;

    tracing::info!("Redis connection established");

    Ok(Arc::new(client))
}

pub async fn get_connection(pool: &RedisPool) -> Result<RedisConnection, StorageError> {
    Ok(pool.get_multiplexed_async_connection().await?)
}

fn mask_redis_url(url: &str) -> String {
    match url.find('@') {
        Some(at_pos) => {
            let (before_at, after_at) = url.split_at(at_pos);
            match before_at.rfind(':') {
                Some(colon_pos) if colon_pos >= "redis://".len() => {
                    format!("{}:****{}", &before_at[..colon_pos], after_at)
                }
                _ => format!("redis://****{}", after_at),
            }
        }
        None => url.to_string(),
    }
}

/// Device-local storage kept in Redis under `{prefix}:{key}`, for headless
/// deployments where several workers share one device identity.
pub struct RedisStorage {
    pool: RedisPool,
    prefix: String,
}

impl RedisStorage {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl LocalStorage for RedisStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = get_connection(&self.pool).await?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = get_connection(&self.pool).await?;
        conn.set::<_, _, ()>(self.key(key), value).await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = get_connection(&self.pool).await?;
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }
}
