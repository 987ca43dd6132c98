use crate::config::RedisConfig;
use crate::{RedisError, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

/// Redis connection wrapper with connection manager
#[derive(Clone)]
pub struct RedisConnection {
    client: Client,
    manager: ConnectionManager,
    config: RedisConfig,
}

impl RedisConnection {
    /// Create a new Redis connection
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to Redis");

        let client = Client::open(config.url.as_str())
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        info!("Redis connection established");

        Ok(Self {
            client,
            manager,
            config,
        })
    }

    /// Get a connection from the manager
    pub fn get_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Open a dedicated pub/sub connection (subscriber loops need their own)
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))
    }

    /// Get the config
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(())
    }
}
