use super::{in_window, WindowStore};
use crate::error::RelayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Process-local store. Not shared between instances.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, Vec<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_count(&self) -> Result<usize, RelayError> {
        let buckets = self.buckets.read()
            .map_err(|_| RelayError::Store("Failed to acquire read lock on buckets".to_string()))?;
        Ok(buckets.len())
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u64>, RelayError> {
        let buckets = self.buckets.read()
            .map_err(|_| RelayError::Store("Failed to acquire read lock on buckets".to_string()))?;
        Ok(buckets.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, stamps: &[u64], _ttl: Duration) -> Result<(), RelayError> {
        let mut buckets = self.buckets.write()
            .map_err(|_| RelayError::Store("Failed to acquire write lock on buckets".to_string()))?;

        if stamps.is_empty() {
            buckets.remove(key);
        } else {
            buckets.insert(key.to_string(), stamps.to_vec());
        }
        Ok(())
    }

    async fn prune(&self, prefix: &str, now_ms: u64, window: Duration) -> Result<usize, RelayError> {
        let mut buckets = self.buckets.write()
            .map_err(|_| RelayError::Store("Failed to acquire write lock on buckets".to_string()))?;

        let initial_count = buckets.len();
        buckets.retain(|key, stamps| {
            !key.starts_with(prefix) || stamps.iter().any(|&t| in_window(t, now_ms, window))
        });

        Ok(initial_count - buckets.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_empty_removes_bucket() {
        let store = MemoryStore::new();
        store.set("relay:chatbot:a", &[1, 2], MINUTE).await.unwrap();
        assert_eq!(store.get("relay:chatbot:a").await.unwrap(), vec![1, 2]);

        store.set("relay:chatbot:a", &[], MINUTE).await.unwrap();
        assert_eq!(store.bucket_count().unwrap(), 0);
        assert!(store.get("relay:chatbot:a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_only_touches_prefix_and_stale_buckets() {
        let store = MemoryStore::new();
        let now = 1_000_000;
        store.set("relay:chatbot:stale", &[now - 120_000], MINUTE).await.unwrap();
        store.set("relay:chatbot:fresh", &[now - 120_000, now - 5_000], MINUTE).await.unwrap();
        store.set("relay:summarizer:stale", &[now - 120_000], MINUTE).await.unwrap();

        let removed = store.prune("relay:chatbot:", now, MINUTE).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("relay:chatbot:stale").await.unwrap().is_empty());
        assert_eq!(store.get("relay:chatbot:fresh").await.unwrap().len(), 2);
        assert_eq!(store.get("relay:summarizer:stale").await.unwrap().len(), 1);
    }
}
