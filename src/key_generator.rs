//! Client identification for rate limiting.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Bucket shared by every client that cannot be identified.
pub const UNIDENTIFIED_CLIENT: &str = "unknown";

/// Where a client identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    ForwardedFor,
    RealIp,
    Peer,
    Unidentified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId {
    pub key: String,
    pub source: IdSource,
}

impl ClientId {
    pub fn is_unidentified(&self) -> bool {
        self.source == IdSource::Unidentified
    }
}

/// Derive a client identifier from proxy headers, then the socket peer.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientId {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(first_ip) = header_value("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ClientId {
            key: first_ip.to_string(),
            source: IdSource::ForwardedFor,
        };
    }

    if let Some(real_ip) = header_value("x-real-ip") {
        return ClientId {
            key: real_ip.to_string(),
            source: IdSource::RealIp,
        };
    }

    match peer {
        Some(addr) => ClientId {
            key: addr.ip().to_string(),
            source: IdSource::Peer,
        },
        None => ClientId {
            key: UNIDENTIFIED_CLIENT.to_string(),
            source: IdSource::Unidentified,
        },
    }
}

/// Store key for one client under one limiter namespace
pub fn bucket_key(namespace: &str, client: &str) -> String {
    format!("{}{}", namespace_prefix(namespace), sanitize_key(client))
}

/// Common prefix of every bucket key in a namespace
pub fn namespace_prefix(namespace: &str) -> String {
    format!("relay:{}:", namespace)
}

/// Sanitize key components to ensure valid store keys
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 192.168.1.1 , 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        let id = client_identifier(&headers, Some("127.0.0.1:4000".parse().unwrap()));
        assert_eq!(id.key, "192.168.1.1");
        assert_eq!(id.source, IdSource::ForwardedFor);
    }

    #[test]
    fn test_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        let id = client_identifier(&headers, None);
        assert_eq!(id.key, "203.0.113.1");
        assert_eq!(id.source, IdSource::RealIp);
    }

    #[test]
    fn test_peer_address_fallback() {
        let id = client_identifier(&HeaderMap::new(), Some("[::1]:8080".parse().unwrap()));
        assert_eq!(id.key, "::1");
        assert_eq!(id.source, IdSource::Peer);
    }

    #[test]
    fn test_unidentified_bucket() {
        let id = client_identifier(&HeaderMap::new(), None);
        assert_eq!(id.key, UNIDENTIFIED_CLIENT);
        assert!(id.is_unidentified());
    }

    #[test]
    fn test_bucket_key_is_sanitized() {
        assert_eq!(bucket_key("chatbot", "10.0.0.1"), "relay:chatbot:10.0.0.1");
        assert_eq!(bucket_key("chatbot", "a b*c"), "relay:chatbot:a_b_c");
    }
}
