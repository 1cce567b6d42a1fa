use crate::endpoint::Endpoint;
use crate::error::RelayError;
use axum::http::HeaderValue;
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

/// Sliding-window limit for one endpoint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitRule {
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl LimitRule {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[derive(Clone, Parser, Validate)]
#[command(name = "genai-relay")]
#[command(about = "Rate-limited relay in front of a generative-AI HTTP API")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Bearer secret for the upstream provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the upstream provider API
    #[arg(long, env = "UPSTREAM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub upstream_base_url: String,

    /// Upper bound on a single upstream exchange
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 15)]
    #[validate(range(min = 1, max = 600))]
    pub upstream_timeout_secs: u64,

    /// "*" or a comma-separated list of allowed origins
    #[arg(long, env = "CORS_ALLOW_ORIGIN", default_value = "*")]
    pub allow_origin: String,

    /// Shared rate-window store; in-process memory when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Rate-window cleanup interval in seconds
    #[arg(long, env = "CLEANUP_INTERVAL", default_value_t = 300)]
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,

    /// Conversation turns kept before forwarding upstream
    #[arg(long, env = "MAX_HISTORY_TURNS", default_value_t = 12)]
    #[validate(range(min = 1, max = 256))]
    pub max_history_turns: usize,

    /// Rewrite bullet glyphs and collapse blank-line runs in streamed chunks
    #[arg(long, env = "TIDY_STREAM", default_value_t = false)]
    pub tidy_stream: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "CHATBOT_MAX_REQUESTS", default_value_t = 30)]
    #[validate(range(min = 1))]
    pub chatbot_max_requests: u32,

    #[arg(long, env = "CHATBOT_WINDOW_SECS", default_value_t = 60)]
    #[validate(range(min = 1))]
    pub chatbot_window_secs: u64,

    #[arg(long, env = "CHATBOT_MODEL", default_value = "gpt-4o-mini")]
    pub chatbot_model: String,

    #[arg(long, env = "SUMMARIZER_MAX_REQUESTS", default_value_t = 20)]
    #[validate(range(min = 1))]
    pub summarizer_max_requests: u32,

    #[arg(long, env = "SUMMARIZER_WINDOW_SECS", default_value_t = 60)]
    #[validate(range(min = 1))]
    pub summarizer_window_secs: u64,

    #[arg(long, env = "SUMMARIZER_MODEL", default_value = "gpt-4o-mini")]
    pub summarizer_model: String,

    #[arg(long, env = "TEXT_GENERATOR_MAX_REQUESTS", default_value_t = 20)]
    #[validate(range(min = 1))]
    pub text_generator_max_requests: u32,

    #[arg(long, env = "TEXT_GENERATOR_WINDOW_SECS", default_value_t = 60)]
    #[validate(range(min = 1))]
    pub text_generator_window_secs: u64,

    #[arg(long, env = "TEXT_GENERATOR_MODEL", default_value = "gpt-5.2-chat")]
    pub text_generator_model: String,

    #[arg(long, env = "IMAGE_GENERATOR_MAX_REQUESTS", default_value_t = 10)]
    #[validate(range(min = 1))]
    pub image_generator_max_requests: u32,

    #[arg(long, env = "IMAGE_GENERATOR_WINDOW_SECS", default_value_t = 60)]
    #[validate(range(min = 1))]
    pub image_generator_window_secs: u64,

    #[arg(long, env = "IMAGE_GENERATOR_MODEL", default_value = "gpt-image-1")]
    pub image_generator_model: String,

    #[arg(long, env = "IMAGE_SIZE", default_value = "1024x1024")]
    pub image_size: String,
}

impl Config {
    /// Parse configuration from command-line flags and the environment
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn limit_rule(&self, endpoint: Endpoint) -> LimitRule {
        let (max_requests, window_secs) = match endpoint {
            Endpoint::Chatbot => (self.chatbot_max_requests, self.chatbot_window_secs),
            Endpoint::Summarizer => (self.summarizer_max_requests, self.summarizer_window_secs),
            Endpoint::TextGenerator => (
                self.text_generator_max_requests,
                self.text_generator_window_secs,
            ),
            Endpoint::ImageGenerator => (
                self.image_generator_max_requests,
                self.image_generator_window_secs,
            ),
        };
        LimitRule::new(max_requests, Duration::from_secs(window_secs))
    }

    pub fn model(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Chatbot => &self.chatbot_model,
            Endpoint::Summarizer => &self.summarizer_model,
            Endpoint::TextGenerator => &self.text_generator_model,
            Endpoint::ImageGenerator => &self.image_generator_model,
        }
    }

    /// Allowed CORS origins, or `None` for the wildcard.
    pub fn allowed_origins(&self) -> Result<Option<Vec<HeaderValue>>, RelayError> {
        let raw = self.allow_origin.trim();
        if raw == "*" {
            return Ok(None);
        }

        raw.split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    RelayError::Configuration(format!("invalid CORS origin '{}'", origin))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Validate ranges and the values the server cannot start without
    pub fn check(&self) -> Result<(), RelayError> {
        self.validate()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        if !self.upstream_base_url.starts_with("http://")
            && !self.upstream_base_url.starts_with("https://")
        {
            return Err(RelayError::Configuration(
                "upstream base URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(RelayError::Configuration(
                    "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
                ));
            }
        }

        if matches!(self.allowed_origins()?, Some(ref origins) if origins.is_empty()) {
            return Err(RelayError::Configuration(
                "CORS origin list cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
