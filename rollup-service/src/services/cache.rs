use crate::error::RollupError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;

/// Short-lived cache for computed summaries. Losing an entry only costs a
/// recomputation.
#[async_trait]
pub trait StatsCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RollupError>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), RollupError>;
    async fn invalidate(&self, key: &str) -> Result<(), RollupError>;
    async fn health_check(&self) -> Result<(), RollupError>;
}

#[derive(Clone)]
pub struct RedisStatsCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisStatsCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, RollupError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            RollupError::Cache(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl StatsCache for RedisStatsCache {
    async fn get(&self, key: &str) -> Result<Option<String>, RollupError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), RollupError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), RollupError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RollupError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| RollupError::Cache(anyhow::anyhow!("Redis health check failed: {}", e)))
    }
}

/// In-process cache that ignores TTLs. Can be switched to fail every call.
#[derive(Default)]
pub struct MockStatsCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub failing: std::sync::atomic::AtomicBool,
}

impl MockStatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: std::sync::atomic::AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, RollupError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RollupError::Cache(anyhow::anyhow!("mock cache unavailable")));
        }
        self.entries
            .lock()
            .map_err(|e| RollupError::Cache(anyhow::anyhow!("Mock cache mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl StatsCache for MockStatsCache {
    async fn get(&self, key: &str) -> Result<Option<String>, RollupError> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), RollupError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), RollupError> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RollupError> {
        self.entries().map(|_| ())
    }
}
