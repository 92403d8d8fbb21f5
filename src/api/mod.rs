//! Control plane requests
//!
//! [`AgentClient`] turns the loaded configuration into ready-to-send
//! `reqwest` requests. It never sends anything itself: executing the
//! request, timeouts and retries belong to the caller's HTTP client.
//!
//! The configuration is passed in explicitly (usually as
//! `Arc<AgentConfig>`), there is no process-global credential state.

pub mod registration;

pub use registration::{RegistrationRequest, RegistrationResponse, REGISTER_PATH};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Body, Method, Request, Url};

use crate::config::AgentConfig;
use crate::identity::IdentityError;
use crate::signing::{RequestSigner, SignError};

/// Request building errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("agent is not registered (no agent id in config)")]
    NotRegistered,

    #[error("config has no identity keypair")]
    MissingIdentity,

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Sign(#[from] SignError),
}

/// Builds requests against the configured control plane
#[derive(Debug, Clone)]
pub struct AgentClient {
    config: Arc<AgentConfig>,
}

impl AgentClient {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// `api_base` joined with `path`, keeping any path prefix on the base.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let raw = format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|source| ApiError::InvalidUrl { url: raw, source })
    }

    /// Signer for the registered agent identity.
    pub fn signer(&self) -> Result<RequestSigner, ApiError> {
        let agent_id = self.config.agent_id().ok_or(ApiError::NotRegistered)?;
        let key_pair = self.config.key_pair().ok_or(ApiError::MissingIdentity)?;
        Ok(RequestSigner::from_keypair(agent_id, key_pair)?)
    }

    /// Build and sign a request. `body` is sent as JSON when present.
    pub fn signed_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Result<Request, ApiError> {
        let signer = self.signer()?;

        let mut req = Request::new(method, self.endpoint(path)?);
        if let Some(body) = body {
            req.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *req.body_mut() = Some(Body::from(body));
        }

        signer.sign(&mut req, now)?;
        Ok(req)
    }
}
