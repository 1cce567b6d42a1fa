use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::key_generator::client_identifier;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identifier(request.headers(), peer);
    let started = Instant::now();

    info!(
        target: "genai_relay::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client.key,
        "Incoming request"
    );

    let response = next.run(request).await;

    // Streaming bodies are still being written at this point.
    info!(
        target: "genai_relay::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
