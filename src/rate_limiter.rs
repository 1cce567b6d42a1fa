use crate::config::LimitRule;
use crate::error::RelayError;
use crate::key_generator::{bucket_key, namespace_prefix};
use crate::store::{in_window, WindowStore};
use axum::http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a single limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Milliseconds until the oldest counted request leaves the window.
    pub retry_after_ms: u64,
}

impl Admission {
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_ms.div_ceil(1000).max(1)
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
    }
}

/// Per-endpoint sliding-window limiter.
///
/// Timestamps are recorded only when a request is admitted, so exactly
/// `max_requests` requests fit in any trailing window and rejected
/// attempts never extend a client's lockout.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    namespace: String,
    rule: LimitRule,
    store: Arc<dyn WindowStore>,
}

impl SlidingWindowLimiter {
    pub fn new(namespace: impl Into<String>, rule: LimitRule, store: Arc<dyn WindowStore>) -> Self {
        Self {
            namespace: namespace.into(),
            rule,
            store,
        }
    }

    pub fn rule(&self) -> LimitRule {
        self.rule
    }

    /// Check and record a request for `client` at the current time
    pub async fn check(&self, client: &str) -> Result<Admission, RelayError> {
        self.check_at(client, now_millis()).await
    }

    /// Check and record a request for `client` at `now_ms`
    pub async fn check_at(&self, client: &str, now_ms: u64) -> Result<Admission, RelayError> {
        let key = bucket_key(&self.namespace, client);
        let window = self.rule.window;
        let limit = self.rule.max_requests;

        let mut stamps = self.store.get(&key).await?;
        let before = stamps.len();
        stamps.retain(|&t| in_window(t, now_ms, window));

        if stamps.len() >= limit as usize {
            // Persist the eviction so the bucket does not keep stale entries.
            if stamps.len() != before {
                self.store.set(&key, &stamps, window).await?;
            }

            let oldest = stamps.first().copied().unwrap_or(now_ms);
            let retry_after_ms = (oldest + self.rule.window_ms()).saturating_sub(now_ms);

            return Ok(Admission {
                allowed: false,
                limit,
                remaining: 0,
                retry_after_ms,
            });
        }

        stamps.push(now_ms);
        self.store.set(&key, &stamps, window).await?;

        Ok(Admission {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(stamps.len() as u32),
            retry_after_ms: 0,
        })
    }

    /// Evict buckets in this namespace that have no request left in the window
    pub async fn prune(&self, now_ms: u64) -> Result<usize, RelayError> {
        self.store
            .prune(&namespace_prefix(&self.namespace), now_ms, self.rule.window)
            .await
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const T0: u64 = 1_700_000_000_000;

    fn limiter(max_requests: u32, window_secs: u64) -> (SlidingWindowLimiter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let limiter = SlidingWindowLimiter::new(
            "test",
            LimitRule::new(max_requests, Duration::from_secs(window_secs)),
            store.clone(),
        );
        (limiter, store)
    }

    #[tokio::test]
    async fn test_exactly_max_requests_fit_in_window() {
        let (limiter, _) = limiter(5, 60);

        for i in 0..5 {
            let admission = limiter.check_at("1.2.3.4", T0 + i * 1000).await.unwrap();
            assert!(admission.allowed, "request {} should be admitted", i);
            assert_eq!(admission.remaining, 4 - i as u32);
        }

        let rejected = limiter.check_at("1.2.3.4", T0 + 5000).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after_ms, 55_000);
        assert_eq!(rejected.retry_after_secs(), 55);
    }

    #[tokio::test]
    async fn test_readmitted_after_window_elapses() {
        let (limiter, _) = limiter(2, 60);
        assert!(limiter.check_at("c", T0).await.unwrap().allowed);
        assert!(limiter.check_at("c", T0 + 10).await.unwrap().allowed);
        assert!(!limiter.check_at("c", T0 + 20).await.unwrap().allowed);

        // The first stamp leaves the window exactly one window later.
        assert!(!limiter.check_at("c", T0 + 59_999).await.unwrap().allowed);
        assert!(limiter.check_at("c", T0 + 60_000).await.unwrap().allowed);

        // After a full quiet window everything is available again.
        let later = limiter.check_at("c", T0 + 200_000).await.unwrap();
        assert!(later.allowed);
        assert_eq!(later.remaining, 1);
    }

    #[tokio::test]
    async fn test_rejections_are_not_recorded() {
        let (limiter, store) = limiter(1, 60);
        assert!(limiter.check_at("c", T0).await.unwrap().allowed);
        for i in 1..10 {
            assert!(!limiter.check_at("c", T0 + i * 1000).await.unwrap().allowed);
        }
        assert_eq!(store.get("relay:test:c").await.unwrap(), vec![T0]);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let (limiter, _) = limiter(3, 60);
        for _ in 0..3 {
            assert!(limiter.check_at("a", T0).await.unwrap().allowed);
        }
        assert!(!limiter.check_at("a", T0).await.unwrap().allowed);

        let other = limiter.check_at("b", T0).await.unwrap();
        assert!(other.allowed);
        assert_eq!(other.remaining, 2);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let store: Arc<dyn WindowStore> = Arc::new(MemoryStore::new());
        let rule = LimitRule::new(1, Duration::from_secs(60));
        let chat = SlidingWindowLimiter::new("chatbot", rule, store.clone());
        let image = SlidingWindowLimiter::new("image-generator", rule, store);

        assert!(chat.check_at("c", T0).await.unwrap().allowed);
        assert!(!chat.check_at("c", T0).await.unwrap().allowed);
        assert!(image.check_at("c", T0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_prune_evicts_idle_clients() {
        let (limiter, store) = limiter(3, 60);
        limiter.check_at("idle", T0).await.unwrap();
        limiter.check_at("busy", T0 + 90_000).await.unwrap();

        let removed = limiter.prune(T0 + 100_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.bucket_count().unwrap(), 1);
    }

    #[test]
    fn test_admission_headers() {
        let admission = Admission {
            allowed: true,
            limit: 20,
            remaining: 7,
            retry_after_ms: 0,
        };
        let mut headers = HeaderMap::new();
        admission.apply_headers(&mut headers);
        assert_eq!(headers["x-ratelimit-limit"], "20");
        assert_eq!(headers["x-ratelimit-remaining"], "7");
    }
}
