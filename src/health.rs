use std::collections::BTreeMap;
use std::time::SystemTime;
use serde::Serialize;

use crate::config::LimitRule;
use crate::endpoint::Endpoint;
use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: &'static str,
    pub upstream_configured: bool,
    pub limits: BTreeMap<Endpoint, LimitRule>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

impl HealthStatus {
    pub fn collect(state: &AppState) -> Self {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME)
            .unwrap_or_default()
            .as_secs();

        let upstream_configured = state.upstream.is_configured();
        let status = if upstream_configured { "healthy" } else { "degraded" };

        HealthStatus {
            status: status.to_string(),
            timestamp: now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            store: state.store.backend(),
            upstream_configured,
            limits: Endpoint::ALL
                .iter()
                .map(|&endpoint| (endpoint, state.limiter(endpoint).rule()))
                .collect(),
        }
    }

    /// Touch the start time so uptime counts from server start.
    pub fn mark_start() {
        std::sync::LazyLock::force(&START_TIME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_health_status_serialization() {
        let mut limits = BTreeMap::new();
        limits.insert(
            Endpoint::ImageGenerator,
            LimitRule::new(10, Duration::from_secs(60)),
        );

        let status = HealthStatus {
            status: "healthy".to_string(),
            timestamp: 1234567890,
            version: "1.0.0".to_string(),
            uptime_seconds: 3600,
            store: "memory",
            upstream_configured: true,
            limits,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["store"], "memory");
        assert_eq!(json["limits"]["image-generator"]["max_requests"], 10);
        assert_eq!(json["limits"]["image-generator"]["window"], "1m");
    }
}
