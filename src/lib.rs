//! certkit-agent: identity and request authentication for the CertKit fleet agent
//!
//! The agent proves who it is on every control plane request without bearer
//! tokens or mutual TLS:
//! - **Identity**: an Ed25519 keypair generated once and kept in the config
//! - **Config**: the on-disk credential document, persisted atomically
//! - **Signing**: method, path, host, timestamp and body hash signed per request
//! - **API**: request builders over an explicit configuration context
//!
//! ```no_run
//! use std::sync::Arc;
//! use certkit_agent::api::AgentClient;
//! use certkit_agent::config::{load_config, VersionInfo};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = load_config("/etc/certkit-agent/config.json", VersionInfo::from_env())?;
//! let client = AgentClient::new(Arc::new(config));
//! let req = client.signed_request(reqwest::Method::GET, "/api/agent/v1/ping", None, chrono::Utc::now())?;
//! # let _ = req;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod identity;
pub mod signing;

pub use api::{AgentClient, ApiError};
pub use config::{AgentConfig, ConfigError};
pub use identity::{IdentityError, KeyPair};
pub use signing::{sign_request, RequestSigner, SignError};
