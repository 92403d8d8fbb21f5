//! Agent credential document
//!
//! The agent keeps everything it needs to talk to the control plane in one
//! JSON file (default `/etc/certkit-agent/config.json`, mode 0600):
//!
//! ```json
//! {
//!   "api_base": "https://app.certkit.io",
//!   "bootstrap": { "access_key": "..", "secret_key": ".." },
//!   "identity": { "key_pair": { "public_key": "..", "private_key": ".." } }
//! }
//! ```
//!
//! Lifecycle:
//! 1. Install writes `api_base` + `bootstrap` from the provisioning environment
//! 2. First load generates the identity keypair and persists it
//! 3. Registration swaps `bootstrap` for the server-issued `agent` credentials
//!
//! Exactly one of `bootstrap` / `agent` is present at any time.

pub mod atomic;
pub mod store;

pub use store::{create_initial_config, load_config, save_config};

use std::env;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::identity::{IdentityError, KeyPair};

/// Production control plane
pub const DEFAULT_API_BASE: &str = "https://app.certkit.io";

/// Where the installer puts the config
pub const DEFAULT_CONFIG_PATH: &str = "/etc/certkit-agent/config.json";

/// The persisted credential document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the control plane
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// One-time install credentials, present until registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapCreds>,

    /// Server-issued identity, present after registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentCreds>,

    /// Agent keypair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityCreds>,

    /// Reserved for orchestration, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_state: Option<Box<RawValue>>,

    /// Build information, never persisted
    #[serde(skip)]
    pub version: VersionInfo,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapCreds {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCreds {
    pub agent_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCreds {
    #[serde(default)]
    pub key_pair: Option<KeyPair>,
}

impl fmt::Debug for BootstrapCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapCreds")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for AgentCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCreds")
            .field("agent_id", &self.agent_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Which side of registration the document is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState<'a> {
    /// Installed, not yet registered
    Bootstrap(&'a BootstrapCreds),
    /// Registered with the control plane
    Registered(&'a AgentCreds),
}

/// Build information reported to the control plane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
}

impl VersionInfo {
    /// Crate version, overridable with `CERTKIT_VERSION`
    pub fn from_env() -> Self {
        Self {
            version: non_empty_var("CERTKIT_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            commit: option_env!("CERTKIT_COMMIT").unwrap_or("unknown").to_string(),
            date: option_env!("CERTKIT_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

/// Provisioning inputs for the first install
#[derive(Debug, Clone, Default)]
pub struct ProvisionEnv {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub api_base: Option<String>,
}

impl ProvisionEnv {
    /// Read `ACCESS_KEY`, `SECRET_KEY` and `CERTKIT_API_BASE`
    pub fn from_env() -> Self {
        Self {
            access_key: non_empty_var("ACCESS_KEY"),
            secret_key: non_empty_var("SECRET_KEY"),
            api_base: non_empty_var("CERTKIT_API_BASE"),
        }
    }

    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            api_base: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }
}

impl AgentConfig {
    /// A fresh pre-registration document
    pub fn new_bootstrap(api_base: impl Into<String>, bootstrap: BootstrapCreds) -> Self {
        Self {
            api_base: api_base.into(),
            bootstrap: Some(bootstrap),
            agent: None,
            identity: None,
            desired_state: None,
            version: VersionInfo::default(),
        }
    }

    /// Bootstrap or registered, rejecting documents with both or neither.
    pub fn credential_state(&self) -> Result<CredentialState<'_>, &'static str> {
        match (&self.bootstrap, &self.agent) {
            (Some(bootstrap), None) => Ok(CredentialState::Bootstrap(bootstrap)),
            (None, Some(agent)) => Ok(CredentialState::Registered(agent)),
            (Some(_), Some(_)) => Err("bootstrap and agent credentials are both present"),
            (None, None) => Err("either bootstrap or agent credentials must be present"),
        }
    }

    /// The server-issued agent id, once registered
    pub fn agent_id(&self) -> Option<&str> {
        self.agent
            .as_ref()
            .map(|a| a.agent_id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.identity.as_ref()?.key_pair.as_ref()
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair().is_some_and(KeyPair::is_populated)
    }

    /// Generate a keypair if none is stored.
    ///
    /// Returns true when a new keypair was generated and the document needs
    /// saving. A stored keypair that fails to decode is an error, never
    /// replaced, since replacing it would orphan the registered identity.
    pub fn ensure_identity(&mut self) -> Result<bool, IdentityError> {
        if let Some(key_pair) = self.key_pair().filter(|kp| kp.is_populated()) {
            key_pair.validate()?;
            return Ok(false);
        }

        self.identity = Some(IdentityCreds {
            key_pair: Some(KeyPair::generate()?),
        });
        Ok(true)
    }

    /// Swap the bootstrap credentials for the server-issued identity.
    pub fn complete_registration(&mut self, agent: AgentCreds) {
        self.agent = Some(agent);
        self.bootstrap = None;
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config path is empty")]
    EmptyPath,

    #[error("config file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("config file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ACCESS_KEY and SECRET_KEY are required for first install")]
    MissingBootstrapCredentials,

    #[error("config {}: {reason}", .path.display())]
    InvalidCredentialState { path: PathBuf, reason: &'static str },

    #[error("config {}: invalid identity: {source}", .path.display())]
    Identity {
        path: PathBuf,
        #[source]
        source: IdentityError,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
