use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::RelayError;
use crate::handlers::{
    chatbot, health_check, image_generator, method_not_allowed, summarizer, text_generator,
    AppState, SharedState,
};
use crate::health::HealthStatus;
use crate::middleware::logging_middleware;
use crate::rate_limiter::now_millis;
use axum::http::{header, Method};
use axum::routing::{get, post, MethodRouter};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    state: SharedState,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, RelayError> {
        let state: SharedState = Arc::new(AppState::from_config(config).await?);
        let app = create_app(state.clone())?;
        Ok(Self { app, state })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = self.state.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        HealthStatus::mark_start();
        tokio::spawn(cleanup_loop(self.state.clone()));

        tracing::info!("Relay server listening on {}", bind_addr);
        tracing::info!("Rate-window store: {}", self.state.store.backend());
        for endpoint in Endpoint::ALL {
            let rule = self.state.limiter(endpoint).rule();
            tracing::info!(
                "POST {} -> {} requests per {:?}",
                endpoint.path(),
                rule.max_requests,
                rule.window
            );
        }

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

/// Build the router. The CORS layer answers every OPTIONS request itself,
/// so neither preflights nor bare OPTIONS ever reach a handler.
pub fn create_app(state: SharedState) -> Result<Router, RelayError> {
    let cors = cors_layer(&state.config)?;

    let relay_route = |route: MethodRouter<SharedState>| route.fallback(method_not_allowed);

    let app = Router::new()
        .route(Endpoint::Chatbot.path(), relay_route(post(chatbot)))
        .route(Endpoint::Summarizer.path(), relay_route(post(summarizer)))
        .route(Endpoint::TextGenerator.path(), relay_route(post(text_generator)))
        .route(Endpoint::ImageGenerator.path(), relay_route(post(image_generator)))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn(logging_middleware)),
        );

    Ok(app)
}

fn cors_layer(config: &Config) -> Result<CorsLayer, RelayError> {
    let origin = match config.allowed_origins()? {
        None => AllowOrigin::from(Any),
        Some(origins) => AllowOrigin::list(origins),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]))
}

/// Periodically evict rate-window buckets with no recent requests
async fn cleanup_loop(state: SharedState) {
    let mut ticker = tokio::time::interval(state.config.cleanup_interval());
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = now_millis();
        for endpoint in Endpoint::ALL {
            match state.limiter(endpoint).prune(now).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::debug!(endpoint = endpoint.name(), removed, "pruned idle rate-limit buckets")
                }
                Err(e) => {
                    tracing::warn!(endpoint = endpoint.name(), error = %e, "rate-limit cleanup failed")
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
