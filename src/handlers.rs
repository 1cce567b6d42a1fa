use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::RelayError;
use crate::health::HealthStatus;
use crate::input;
use crate::key_generator::client_identifier;
use crate::rate_limiter::SlidingWindowLimiter;
use crate::response::RelayOutput;
use crate::store::{MemoryStore, RedisStore, WindowStore};
use crate::stream;
use crate::upstream::UpstreamClient;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// One limiter per endpoint category
pub struct EndpointLimiters {
    chatbot: SlidingWindowLimiter,
    summarizer: SlidingWindowLimiter,
    text_generator: SlidingWindowLimiter,
    image_generator: SlidingWindowLimiter,
}

impl EndpointLimiters {
    fn new(config: &Config, store: &Arc<dyn WindowStore>) -> Self {
        let build = |endpoint: Endpoint| {
            SlidingWindowLimiter::new(endpoint.name(), config.limit_rule(endpoint), store.clone())
        };

        Self {
            chatbot: build(Endpoint::Chatbot),
            summarizer: build(Endpoint::Summarizer),
            text_generator: build(Endpoint::TextGenerator),
            image_generator: build(Endpoint::ImageGenerator),
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> &SlidingWindowLimiter {
        match endpoint {
            Endpoint::Chatbot => &self.chatbot,
            Endpoint::Summarizer => &self.summarizer,
            Endpoint::TextGenerator => &self.text_generator,
            Endpoint::ImageGenerator => &self.image_generator,
        }
    }
}

/// Application state containing limiters, the store and the upstream client
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn WindowStore>,
    pub limiters: EndpointLimiters,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn WindowStore>) -> Result<Self, RelayError> {
        let limiters = EndpointLimiters::new(&config, &store);
        let upstream = UpstreamClient::new(&config)?;

        Ok(Self {
            config,
            store,
            limiters,
            upstream,
        })
    }

    /// Build state with the store selected by configuration
    pub async fn from_config(config: Config) -> Result<Self, RelayError> {
        let store: Arc<dyn WindowStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                let pong = store.ping().await?;
                info!(response = %pong, "connected to Redis rate-window store");
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };

        Self::new(config, store)
    }

    pub fn limiter(&self, endpoint: Endpoint) -> &SlidingWindowLimiter {
        self.limiters.get(endpoint)
    }
}

pub async fn chatbot(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    relay(Endpoint::Chatbot, &state, peer, &headers, &body).await
}

pub async fn summarizer(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    relay(Endpoint::Summarizer, &state, peer, &headers, &body).await
}

pub async fn text_generator(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    relay(Endpoint::TextGenerator, &state, peer, &headers, &body).await
}

pub async fn image_generator(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    relay(Endpoint::ImageGenerator, &state, peer, &headers, &body).await
}

/// Rate limit, normalize, forward, and relay one request
async fn relay(
    endpoint: Endpoint,
    state: &AppState,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, RelayError> {
    // Without a secret no request can succeed, so none may spend quota.
    if !state.upstream.is_configured() {
        return Err(RelayError::MissingSecret);
    }

    let client = client_identifier(headers, peer.map(|ConnectInfo(addr)| addr));
    if client.is_unidentified() {
        warn!(endpoint = endpoint.name(), "client has no address; using the shared unidentified bucket");
    }

    let admission = state.limiter(endpoint).check(&client.key).await?;
    if !admission.allowed {
        info!(endpoint = endpoint.name(), client = %client.key, limit = admission.limit, "rate limit exceeded");
        return Err(RelayError::RateLimited {
            retry_after_secs: admission.retry_after_secs(),
        });
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let parsed = input::normalize(content_type, body, state.config.max_history_turns)?;
    let request = endpoint.build_request(parsed, &state.config);

    let mut response = if request.stream {
        let upstream = state.upstream.open_stream(&request).await?;
        let relayed = stream::relay(upstream, state.config.tidy_stream, endpoint.name());
        let mut response = Response::new(Body::from_stream(relayed));
        stream::event_stream_headers(response.headers_mut());
        response
    } else {
        let kind = endpoint.output_kind();
        let output = state.upstream.send(&request, kind).await?;
        Json(RelayOutput::new(kind, output)).into_response()
    };

    admission.apply_headers(response.headers_mut());
    Ok(response)
}

pub async fn method_not_allowed() -> RelayError {
    RelayError::BadMethod
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(HealthStatus::collect(&state))
}
