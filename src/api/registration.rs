//! Agent registration
//!
//! Registration is how a freshly installed agent becomes a known identity:
//! 1. Build the register request with the agent's public key
//! 2. Caller sends it (bootstrap stage, so the request is not agent-signed)
//! 3. The response carries the server-issued agent id and tokens
//! 4. [`record_registration`] swaps bootstrap for agent credentials and saves

use std::path::Path;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Body, Method, Request};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AgentClient, ApiError};
use crate::config::{save_config, AgentConfig, AgentCreds, ConfigError};

/// Registration endpoint, relative to `api_base`
pub const REGISTER_PATH: &str = "/api/agent/v1/register-agent";

/// Registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// base64url Ed25519 public key
    pub public_key: String,
    pub hostname: String,
    pub version: String,
}

/// Registration response from the control plane
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub agent_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl RegistrationRequest {
    /// Payload for this agent. The stored public key must decode.
    pub fn for_config(config: &AgentConfig) -> Result<Self, ApiError> {
        let key_pair = config.key_pair().ok_or(ApiError::MissingIdentity)?;
        key_pair.verifying_key()?;

        Ok(Self {
            public_key: key_pair.public_key.clone(),
            hostname: local_hostname(),
            version: config.version.version.clone(),
        })
    }
}

impl From<RegistrationResponse> for AgentCreds {
    fn from(resp: RegistrationResponse) -> Self {
        Self {
            agent_id: resp.agent_id,
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
        }
    }
}

impl AgentClient {
    /// `POST {api_base}/api/agent/v1/register-agent` with the JSON payload.
    pub fn registration_request(&self) -> Result<Request, ApiError> {
        let payload = RegistrationRequest::for_config(self.config())?;
        let body = serde_json::to_vec(&payload)?;

        let mut req = Request::new(Method::POST, self.endpoint(REGISTER_PATH)?);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(Body::from(body));

        Ok(req)
    }
}

/// Install the server-issued identity and persist the document.
pub fn record_registration(
    config: &mut AgentConfig,
    response: RegistrationResponse,
    path: impl AsRef<Path>,
) -> Result<(), ConfigError> {
    if response.agent_id.is_empty() {
        return Err(ConfigError::InvalidCredentialState {
            path: path.as_ref().to_path_buf(),
            reason: "registration response has no agent id",
        });
    }

    let agent_id = response.agent_id.clone();
    config.complete_registration(response.into());
    save_config(config, path)?;

    info!(%agent_id, "Registration recorded");
    Ok(())
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to read hostname: {}", e);
            String::new()
        }
    }
}
