use super::WindowStore;
use crate::error::RelayError;
use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use ::redis::Client;
use std::time::Duration;

/// Shared store for deployments running more than one instance.
///
/// Each bucket is a Redis list of millisecond timestamps, replaced
/// atomically and expired one window after its last write, so stale
/// buckets disappear without an explicit sweep.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, RelayError> {
        let client = Client::open(redis_url)
            .map_err(|e| RelayError::Store(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RelayError::Store(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection })
    }

    pub async fn ping(&self) -> Result<String, RelayError> {
        let mut conn = self.connection.clone();
        let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Vec<u64>, RelayError> {
        let mut conn = self.connection.clone();
        let stamps: Vec<u64> = ::redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(stamps)
    }

    async fn set(&self, key: &str, stamps: &[u64], ttl: Duration) -> Result<(), RelayError> {
        let mut conn = self.connection.clone();

        if stamps.is_empty() {
            ::redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut conn)
                .await?;
            return Ok(());
        }

        ::redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(key)
            .ignore()
            .cmd("RPUSH")
            .arg(key)
            .arg(stamps.to_vec())
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn prune(&self, _prefix: &str, _now_ms: u64, _window: Duration) -> Result<usize, RelayError> {
        // Buckets carry their own expiry.
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
