//! Rate-window storage backends.
//!
//! The limiter only needs to read, replace and sweep per-client timestamp
//! sequences. Keeping that behind [`WindowStore`] lets a single process run
//! on the in-memory map while multi-instance deployments share Redis.

pub mod memory;
pub mod redis;

use crate::error::RelayError;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Timestamps (unix millis, oldest first) recorded for `key`.
    async fn get(&self, key: &str) -> Result<Vec<u64>, RelayError>;

    /// Replace the timestamps for `key`. An empty slice removes the bucket.
    async fn set(&self, key: &str, stamps: &[u64], ttl: Duration) -> Result<(), RelayError>;

    /// Drop buckets under `prefix` with no timestamp inside `window` of `now_ms`.
    /// Returns the number of buckets removed.
    async fn prune(&self, prefix: &str, now_ms: u64, window: Duration) -> Result<usize, RelayError>;

    /// Short backend name for health reporting.
    fn backend(&self) -> &'static str;
}

/// True when `stamp` still counts toward a window ending at `now_ms`.
pub fn in_window(stamp: u64, now_ms: u64, window: Duration) -> bool {
    now_ms.saturating_sub(stamp) < window.as_millis() as u64
}
