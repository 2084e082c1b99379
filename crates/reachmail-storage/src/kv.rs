//! Key-value store connection management
//!
//! The KV holds the hour-bucketed rate counters and the durable task queue.
//! A single multiplexed connection manager is shared by all components; the
//! manager reconnects transparently after a dropped connection.

use redis::aio::ConnectionManager;
use reachmail_common::config::RedisConfig;
use reachmail_common::{Error, Result};
use tracing::info;

/// Redis connection wrapper
#[derive(Clone)]
pub struct KvPool {
    manager: ConnectionManager,
}

impl KvPool {
    /// Connect to the key-value store
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        info!(host = %config.host, port = config.port, "Connecting to key-value store");

        let client = redis::Client::open(config.url())
            .map_err(|e| Error::Kv(format!("Invalid redis URL: {}", e)))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Kv(format!("Failed to connect: {}", e)))?;

        info!("Key-value store connection established");

        Ok(Self { manager })
    }

    /// Get a handle to the shared connection manager
    pub fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Check key-value store health
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| Error::Kv(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
