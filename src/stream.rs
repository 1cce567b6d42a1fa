//! Verbatim event-stream passthrough.
//!
//! Upstream chunks are decoded incrementally and forwarded as they arrive.
//! The upstream event-stream framing is never parsed or re-framed.

use crate::error::RelayError;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue};
use futures::stream::{self, Stream, StreamExt};
use regex::Regex;
use std::borrow::Cow;
use std::fmt::Display;
use std::sync::LazyLock;
use tracing::{debug, error, warn};

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

/// Stateful UTF-8 decoder that carries incomplete sequences across chunks.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    /// Invalid sequences become U+FFFD; an incomplete tail is held back.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid_up_to + invalid;
                        }
                        None => {
                            consumed += valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flush at end of stream. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Optional cosmetic rewrite applied to each decoded chunk.
pub fn tidy_chunk(text: &str) -> Cow<'_, str> {
    let text: Cow<'_, str> = if text.contains('•') {
        Cow::Owned(text.replace('•', "-"))
    } else {
        Cow::Borrowed(text)
    };

    if !EXCESS_NEWLINES.is_match(&text) {
        return text;
    }
    Cow::Owned(EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned())
}

/// Headers for an unbuffered event-stream response.
pub fn event_stream_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
}

struct RelayState<S> {
    upstream: S,
    decoder: Utf8Decoder,
    tidy: bool,
    label: &'static str,
    forwarded_bytes: usize,
    finished: bool,
}

impl<S> Drop for RelayState<S> {
    fn drop(&mut self) {
        if !self.finished {
            // The body was dropped before the upstream ended.
            warn!(
                endpoint = self.label,
                forwarded_bytes = self.forwarded_bytes,
                error = %RelayError::ClientDisconnected,
                "stream relay stopped early"
            );
        }
    }
}

/// Pipe `upstream` to the client, decoding chunk by chunk.
///
/// An upstream failure ends the stream with an error item; once headers
/// are committed that is the only signal the client can still receive.
pub fn relay<S, E>(
    upstream: S,
    tidy: bool,
    label: &'static str,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let state = RelayState {
        upstream,
        decoder: Utf8Decoder::new(),
        tidy,
        label,
        forwarded_bytes: 0,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let text = state.decoder.decode(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    let text = if state.tidy {
                        tidy_chunk(&text).into_owned()
                    } else {
                        text
                    };
                    state.forwarded_bytes += text.len();
                    return Some((Ok(Bytes::from(text)), state));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    error!(
                        endpoint = state.label,
                        forwarded_bytes = state.forwarded_bytes,
                        error = %e,
                        "upstream stream failed after headers were sent"
                    );
                    return Some((Err(RelayError::StreamInterrupted(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    debug!(
                        endpoint = state.label,
                        forwarded_bytes = state.forwarded_bytes,
                        "upstream stream completed"
                    );
                    let tail = state.decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(Bytes::from(tail)), state));
                }
            }
        }
    })
}
