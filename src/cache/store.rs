//! External cache store
//!
//! Key/value store with server-side TTL (`GET` / `SETEX` / `DEL` / `KEYS`).
//! The two-tier cache talks to it through `RemoteStore` so the in-process
//! tier can be exercised without a server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Store failures. Always absorbed by the caller (logged, never raised).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store command failed: {0}")]
    Command(String),
    #[error("cache value could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() || e.is_connection_dropped() {
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Command(e.to_string())
        }
    }
}

/// External key/value store with server-side TTL
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    /// Keys matching a glob pattern (`prefix*`)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Redis-backed store over a multiplexed async connection
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs.max(1)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }
}
