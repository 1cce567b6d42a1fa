//! HTTP client for the generative-AI provider.
//!
//! Buffered calls read the whole body as text before parsing it, so a
//! non-JSON answer surfaces as [`RelayError::UpstreamMalformed`] instead of
//! a parser panic. Streaming calls hand back the raw byte stream once the
//! first chunk has arrived.

use crate::config::Config;
use crate::error::RelayError;
use crate::extract::{self, OutputKind};
use crate::input::ConversationTurn;
use axum::body::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, warn};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ChatCompletions,
    Responses,
    ImageGenerations { size: String },
}

impl Operation {
    pub fn path(&self) -> &'static str {
        match self {
            Operation::ChatCompletions => "/chat/completions",
            Operation::Responses => "/responses",
            Operation::ImageGenerations { .. } => "/images/generations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Prompt(String),
    Messages(Vec<ConversationTurn>),
}

/// Normalized upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub operation: Operation,
    pub model: String,
    pub payload: Payload,
    pub stream: bool,
}

impl RelayRequest {
    /// Provider JSON body for this request.
    pub fn body(&self) -> Value {
        let mut body = match (&self.operation, &self.payload) {
            (Operation::ChatCompletions, Payload::Messages(turns)) => json!({
                "model": self.model,
                "messages": turns,
            }),
            (Operation::ChatCompletions, Payload::Prompt(prompt)) => json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
            }),
            (Operation::Responses, Payload::Prompt(prompt)) => json!({
                "model": self.model,
                "input": prompt,
            }),
            (Operation::Responses, Payload::Messages(turns)) => json!({
                "model": self.model,
                "input": turns,
            }),
            (Operation::ImageGenerations { size }, payload) => json!({
                "model": self.model,
                "prompt": match payload {
                    Payload::Prompt(prompt) => prompt.clone(),
                    Payload::Messages(turns) => turns
                        .iter()
                        .map(|turn| turn.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                },
                "size": size,
            }),
        };

        if self.stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }
}

pub struct UpstreamClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, RelayError> {
        let http = Client::builder()
            .connect_timeout(config.upstream_timeout())
            .build()
            .map_err(|e| RelayError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()).map(SecretString::new),
            timeout: config.upstream_timeout(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Issue the request and wait for the complete answer.
    pub async fn send(&self, request: &RelayRequest, kind: OutputKind) -> Result<String, RelayError> {
        let raw = tokio::time::timeout(self.timeout, async {
            let response = self.dispatch(request).await?;
            response.text().await.map_err(RelayError::from)
        })
        .await
        .map_err(|_| RelayError::UpstreamTimeout)??;

        let payload: Value = serde_json::from_str(&raw).map_err(|e| {
            error!(raw = %raw, "upstream returned a non-JSON body");
            RelayError::UpstreamMalformed(e.to_string())
        })?;

        match extract::extract(&payload, kind) {
            Some(extracted) => {
                debug!(shape = ?extracted.shape, "extracted upstream output");
                Ok(extracted.content)
            }
            None => {
                error!(raw = %payload, "no recognised output in upstream response");
                Err(RelayError::NoOutputFound { raw: payload })
            }
        }
    }

    /// Issue the request and return its body as a byte stream.
    ///
    /// The first chunk is awaited under the timeout so that a failure before
    /// any data arrives can still be reported as a structured error.
    pub async fn open_stream(&self, request: &RelayRequest) -> Result<ByteStream, RelayError> {
        tokio::time::timeout(self.timeout, async {
            let response = self.dispatch(request).await?;
            let mut chunks = Box::pin(response.bytes_stream());

            let first = match chunks.next().await {
                Some(Ok(chunk)) => Some(chunk),
                Some(Err(e)) => return Err(RelayError::from(e)),
                None => None,
            };

            let stream: ByteStream = Box::pin(stream::iter(first.map(Ok)).chain(chunks));
            Ok(stream)
        })
        .await
        .map_err(|_| RelayError::UpstreamTimeout)?
    }

    async fn dispatch(&self, request: &RelayRequest) -> Result<reqwest::Response, RelayError> {
        let secret = self.api_key.as_ref().ok_or(RelayError::MissingSecret)?;
        let url = format!("{}{}", self.base_url, request.operation.path());
        let accept = if request.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        debug!(url = %url, model = %request.model, stream = request.stream, "sending upstream request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(secret.expose_secret())
            .header(ACCEPT, accept)
            .json(&request.body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(status = status.as_u16(), error = %e, url = %url, "failed to read upstream error body");
                    String::new()
                }
            };
            warn!(status = status.as_u16(), body = %body, url = %url, "upstream rejected request");
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}
