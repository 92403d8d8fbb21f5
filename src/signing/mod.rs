//! Request signing
//!
//! Every request to the control plane proves the agent's identity by signing
//! a canonical description of the request with the agent's Ed25519 key.
//! Signing adds four headers and touches nothing else:
//!
//! - `X-Agent-Id`: server-issued agent identifier
//! - `X-Agent-Timestamp`: unix seconds
//! - `X-Agent-Content-SHA256`: base64url SHA-256 of the body
//! - `Authorization: AgentSig keyId="..", alg="ed25519", sig="..", signed="method path host ts body_sha256"`
//!
//! Signing has no shared mutable state. A [`RequestSigner`] can be used from
//! many threads at once as long as each call gets its own request.

pub mod canonical;

pub use canonical::CanonicalRequest;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tracing::debug;

use crate::identity::{encode, IdentityError, KeyPair, PRIVATE_KEY_LEN};

/// Agent identifier header
pub const HEADER_AGENT_ID: &str = "x-agent-id";
/// Signing timestamp header
pub const HEADER_AGENT_TIMESTAMP: &str = "x-agent-timestamp";
/// Body digest header
pub const HEADER_AGENT_CONTENT_SHA256: &str = "x-agent-content-sha256";

/// Authorization scheme name
pub const AUTH_SCHEME: &str = "AgentSig";
/// Signature algorithm advertised in the authorization header
pub const SIGNATURE_ALG: &str = "ed25519";
/// Signed fields, in signing order
pub const SIGNED_FIELDS: &str = "method path host ts body_sha256";

/// Signing errors. None of these leave the request modified.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("agent id is required")]
    MissingAgentId,

    #[error("invalid ed25519 private key length: got {0}")]
    InvalidPrivateKeyLength(usize),

    #[error("invalid ed25519 private key")]
    InvalidPrivateKey,

    #[error("missing host (Host header and URL host both empty)")]
    MissingHost,

    #[error("request body is a stream and cannot be hashed before sending")]
    UnbufferedBody,

    #[error("invalid header value for {0}")]
    InvalidHeaderValue(&'static str),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Signs requests for one agent identity.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    agent_id: String,
    signing_key: SigningKey,
}

impl RequestSigner {
    /// Create a signer from a 64-byte private key.
    pub fn new(agent_id: impl Into<String>, private_key: &[u8]) -> Result<Self, SignError> {
        let agent_id = agent_id.into();
        let keypair: &[u8; PRIVATE_KEY_LEN] = private_key
            .try_into()
            .map_err(|_| SignError::InvalidPrivateKeyLength(private_key.len()))?;
        if agent_id.is_empty() {
            return Err(SignError::MissingAgentId);
        }

        let signing_key =
            SigningKey::from_keypair_bytes(keypair).map_err(|_| SignError::InvalidPrivateKey)?;

        Ok(Self {
            agent_id,
            signing_key,
        })
    }

    /// Create a signer from a stored keypair.
    pub fn from_keypair(agent_id: impl Into<String>, keypair: &KeyPair) -> Result<Self, SignError> {
        let signing_key = keypair.signing_key()?;
        Self::new(agent_id, &signing_key.to_keypair_bytes())
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Sign `req` as of `now`, setting the four signature headers.
    pub fn sign(&self, req: &mut Request, now: DateTime<Utc>) -> Result<(), SignError> {
        let canonical = CanonicalRequest::from_request(req, now)?;
        let signature = self.signing_key.sign(canonical.signing_string().as_bytes());

        let headers = SignatureHeaders::build(&self.agent_id, &canonical, &encode(&signature.to_bytes()))?;
        headers.apply(req.headers_mut());

        debug!(
            method = %canonical.method,
            path = %canonical.path,
            ts = canonical.timestamp,
            "signed request"
        );
        Ok(())
    }
}

/// Sign a request in place.
///
/// `private_key` is the raw 64-byte Ed25519 key, `agent_id` the server-issued
/// identifier. The clock is injected so identical inputs always produce
/// identical headers.
pub fn sign_request(
    req: &mut Request,
    agent_id: &str,
    private_key: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignError> {
    RequestSigner::new(agent_id, private_key)?.sign(req, now)
}

/// The authorization header value for a signature.
pub fn authorization_value(agent_id: &str, signature_b64: &str) -> String {
    format!(
        r#"{} keyId="{}", alg="{}", sig="{}", signed="{}""#,
        AUTH_SCHEME, agent_id, SIGNATURE_ALG, signature_b64, SIGNED_FIELDS
    )
}

/// Header values computed before the request is touched
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub agent_id: HeaderValue,
    pub timestamp: HeaderValue,
    pub content_sha256: HeaderValue,
    pub authorization: HeaderValue,
}

impl SignatureHeaders {
    fn build(
        agent_id: &str,
        canonical: &CanonicalRequest,
        signature_b64: &str,
    ) -> Result<Self, SignError> {
        Ok(Self {
            agent_id: header_value(HEADER_AGENT_ID, agent_id)?,
            timestamp: header_value(HEADER_AGENT_TIMESTAMP, &canonical.timestamp.to_string())?,
            content_sha256: header_value(HEADER_AGENT_CONTENT_SHA256, &canonical.body_sha256)?,
            authorization: header_value(
                "authorization",
                &authorization_value(agent_id, signature_b64),
            )?,
        })
    }

    fn apply(self, headers: &mut HeaderMap) {
        headers.insert(HeaderName::from_static(HEADER_AGENT_ID), self.agent_id);
        headers.insert(HeaderName::from_static(HEADER_AGENT_TIMESTAMP), self.timestamp);
        headers.insert(
            HeaderName::from_static(HEADER_AGENT_CONTENT_SHA256),
            self.content_sha256,
        );
        headers.insert(AUTHORIZATION, self.authorization);
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, SignError> {
    HeaderValue::from_str(value).map_err(|_| SignError::InvalidHeaderValue(name))
}
