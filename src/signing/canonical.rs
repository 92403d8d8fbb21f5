//! Canonical signing string
//!
//! The exact text both the agent and the control plane derive from a request.
//! Field order and casing are part of the wire contract:
//!
//! ```text
//! method: POST
//! path: /api/agent/v1/ping?b=2&a=1
//! host: app.certkit.io
//! ts: 1700000000
//! body_sha256: 47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU
//! ```
//!
//! The path and query are taken exactly as the caller built the URL. Nothing
//! is re-encoded or sorted, so the verifier must use the URL as sent.

use chrono::{DateTime, Utc};
use reqwest::header::HOST;
use reqwest::{Body, Request, Url};
use sha2::{Digest, Sha256};

use super::SignError;
use crate::identity::encode;

/// The five authenticated attributes of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    /// Upper-cased HTTP method
    pub method: String,
    /// Escaped path plus raw query
    pub path: String,
    /// Lower-cased host
    pub host: String,
    /// Unix seconds, UTC
    pub timestamp: i64,
    /// base64url SHA-256 of the exact body bytes
    pub body_sha256: String,
}

impl CanonicalRequest {
    /// Derive the canonical attributes from a request without modifying it.
    pub fn from_request(req: &Request, now: DateTime<Utc>) -> Result<Self, SignError> {
        let body_sha256 = body_sha256(req.body())?;
        let host = canonical_host(req).ok_or(SignError::MissingHost)?;

        Ok(Self {
            method: req.method().as_str().to_uppercase(),
            path: canonical_path_and_query(req.url()),
            host,
            timestamp: now.timestamp(),
            body_sha256,
        })
    }

    /// The newline-joined string that gets signed.
    pub fn signing_string(&self) -> String {
        build_signing_string(
            &self.method,
            &self.path,
            &self.host,
            self.timestamp,
            &self.body_sha256,
        )
    }
}

/// Build the signing string. Keep this stable across client and server.
pub fn build_signing_string(
    method: &str,
    path_query: &str,
    host: &str,
    ts: i64,
    body_hash: &str,
) -> String {
    [
        format!("method: {}", method.to_uppercase()),
        format!("path: {}", path_query),
        format!("host: {}", host.to_lowercase()),
        format!("ts: {}", ts),
        format!("body_sha256: {}", body_hash),
    ]
    .join("\n")
}

/// Hash the exact bytes that will be sent. An absent body hashes as empty.
///
/// Buffered bodies are read by reference, so the request stays sendable.
/// Streaming bodies cannot be read without consuming them and are rejected.
pub fn body_sha256(body: Option<&Body>) -> Result<String, SignError> {
    let bytes = match body {
        None => &[][..],
        Some(body) => body.as_bytes().ok_or(SignError::UnbufferedBody)?,
    };
    Ok(sha256_base64url(bytes))
}

/// base64url SHA-256 of a byte slice
pub fn sha256_base64url(bytes: &[u8]) -> String {
    encode(&Sha256::digest(bytes))
}

/// `path?query` as built, with `/` for an empty path.
pub fn canonical_path_and_query(url: &Url) -> String {
    let path = match url.path() {
        "" => "/",
        p => p,
    };

    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    }
}

/// The `Host` header if set, otherwise the URL authority, lower-cased.
pub fn canonical_host(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty());

    if let Some(host) = header {
        return Some(host.to_lowercase());
    }

    let host = req.url().host_str().filter(|h| !h.is_empty())?;
    let authority = match req.url().port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Some(authority.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use reqwest::Method;

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, Url::parse(url).unwrap())
    }

    #[test]
    fn test_empty_body_hash() {
        assert_eq!(
            body_sha256(None).unwrap(),
            "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
        let empty = Body::from(Vec::new());
        assert_eq!(body_sha256(Some(&empty)).unwrap(), body_sha256(None).unwrap());
    }

    #[test]
    fn test_path_defaults_to_root() {
        let url = Url::parse("https://app.example.com").unwrap();
        assert_eq!(canonical_path_and_query(&url), "/");
    }

    #[test]
    fn test_query_kept_verbatim() {
        let url = Url::parse("https://app.example.com/a%20b/c?z=1&a=%2F&a=2").unwrap();
        assert_eq!(canonical_path_and_query(&url), "/a%20b/c?z=1&a=%2F&a=2");
    }

    #[test]
    fn test_empty_query_dropped() {
        let url = Url::parse("https://app.example.com/ping?").unwrap();
        assert_eq!(canonical_path_and_query(&url), "/ping");
    }

    #[test]
    fn test_host_from_url_lowercased_with_port() {
        let req = request(Method::GET, "https://App.Example.COM:8443/x");
        assert_eq!(canonical_host(&req).unwrap(), "app.example.com:8443");

        // Default ports are not part of the URL authority
        let req = request(Method::GET, "https://app.example.com:443/x");
        assert_eq!(canonical_host(&req).unwrap(), "app.example.com");
    }

    #[test]
    fn test_host_header_wins() {
        let mut req = request(Method::GET, "https://10.0.0.1/x");
        req.headers_mut()
            .insert(HOST, HeaderValue::from_static("  Edge.Example.com "));
        assert_eq!(canonical_host(&req).unwrap(), "edge.example.com");
    }

    #[test]
    fn test_signing_string_layout() {
        let s = build_signing_string("post", "/p?q=1", "HOST", 42, "abc");
        assert_eq!(s, "method: POST\npath: /p?q=1\nhost: host\nts: 42\nbody_sha256: abc");
        assert!(!s.ends_with('\n'));
    }
}
