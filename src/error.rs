use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Method not allowed")]
    BadMethod,

    #[error("OPENAI_API_KEY not set")]
    MissingSecret,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Missing input")]
    MissingInput,

    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Upstream request failed with status {status}")]
    UpstreamError { status: u16, body: String },

    #[error("Invalid response from upstream: {0}")]
    UpstreamMalformed(String),

    #[error("No output returned")]
    NoOutputFound { raw: Value },

    #[error("Upstream unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Client disconnected mid-stream")]
    ClientDisconnected,

    #[error("Rate limit store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::UpstreamTimeout
        } else {
            RelayError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadMethod => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::MissingInput | RelayError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::UpstreamError { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            RelayError::UpstreamUnavailable(_) | RelayError::StreamInterrupted(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::MissingSecret
            | RelayError::UpstreamMalformed(_)
            | RelayError::NoOutputFound { .. }
            | RelayError::ClientDisconnected
            | RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag carried in the `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::BadMethod => "method_not_allowed",
            RelayError::MissingSecret => "missing_secret",
            RelayError::RateLimited { .. } => "rate_limit_exceeded",
            RelayError::MissingInput => "missing_input",
            RelayError::InvalidJson(_) => "invalid_json",
            RelayError::UpstreamTimeout => "upstream_timeout",
            RelayError::UpstreamError { .. } => "upstream_error",
            RelayError::UpstreamMalformed(_) => "upstream_malformed",
            RelayError::NoOutputFound { .. } => "no_output_found",
            RelayError::UpstreamUnavailable(_) => "upstream_unavailable",
            RelayError::StreamInterrupted(_) => "stream_interrupted",
            RelayError::ClientDisconnected => "client_disconnected",
            RelayError::Store(_) => "service_unavailable",
            RelayError::Configuration(_) => "configuration_error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn from_relay_error(err: &RelayError) -> Self {
        let details = match err {
            // Upstream bodies are usually JSON; fall back to the raw text.
            RelayError::UpstreamError { body, .. } if !body.is_empty() => Some(
                serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone())),
            ),
            RelayError::NoOutputFound { raw } => Some(raw.clone()),
            RelayError::InvalidJson(reason) => Some(Value::String(reason.clone())),
            _ => None,
        };

        Self {
            error: err.to_string(),
            code: err.code(),
            details,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(code = self.code(), status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), status = status.as_u16(), error = %self, "request rejected");
        }

        let body = ErrorResponse::from_relay_error(&self);
        let mut response = (status, Json(body)).into_response();

        if let RelayError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upstream_status_is_propagated() {
        let err = RelayError::UpstreamError {
            status: 401,
            body: r#"{"error":{"message":"bad key"}}"#.to_string(),
        };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let body = ErrorResponse::from_relay_error(&err);
        assert_eq!(body.code, "upstream_error");
        assert_eq!(body.details, Some(json!({"error": {"message": "bad key"}})));
    }

    #[test]
    fn test_non_error_upstream_status_becomes_bad_gateway() {
        let err = RelayError::UpstreamError {
            status: 302,
            body: "moved".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        let body = ErrorResponse::from_relay_error(&err);
        assert_eq!(body.details, Some(Value::String("moved".to_string())));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = RelayError::RateLimited { retry_after_secs: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(RelayError::MissingInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::InvalidJson("eof".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RelayError::BadMethod.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(RelayError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
