//! Config create / load / save

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::atomic::{self, FileLock};
use super::{AgentConfig, BootstrapCreds, ConfigError, ProvisionEnv, VersionInfo, DEFAULT_API_BASE};

/// Write the first-install document from the provisioning inputs.
///
/// Requires both access and secret key. The document holds only `api_base`
/// and `bootstrap`; identity is generated on first load.
pub fn create_initial_config(
    path: impl AsRef<Path>,
    env: &ProvisionEnv,
) -> Result<AgentConfig, ConfigError> {
    let path = checked_path(path.as_ref())?;

    let (access_key, secret_key) = match (&env.access_key, &env.secret_key) {
        (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => (a.clone(), s.clone()),
        _ => return Err(ConfigError::MissingBootstrapCredentials),
    };

    let api_base = env
        .api_base
        .clone()
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

    let cfg = AgentConfig::new_bootstrap(
        api_base,
        BootstrapCreds {
            access_key,
            secret_key,
        },
    );

    atomic::ensure_parent_dir(path).map_err(io_error("create directory for", path))?;
    save_config(&cfg, path)?;

    info!(path = %path.display(), api_base = %cfg.api_base, "Created initial config");
    Ok(cfg)
}

/// Load the config, provisioning the agent identity on first use.
///
/// Not read-only: if no keypair is stored one is generated and the document
/// is saved before returning. The whole sequence runs under the config lock,
/// so concurrent agents cannot each provision a different key.
pub fn load_config(
    path: impl AsRef<Path>,
    version: VersionInfo,
) -> Result<AgentConfig, ConfigError> {
    let path = checked_path(path.as_ref())?;

    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let lock_path = atomic::lock_path(path);
    let _lock = FileLock::exclusive(&lock_path).map_err(io_error("lock", &lock_path))?;

    let bytes = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => io_error("read config file", path)(e),
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }

    let mut cfg: AgentConfig = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    cfg.credential_state()
        .map_err(|reason| ConfigError::InvalidCredentialState {
            path: path.to_path_buf(),
            reason,
        })?;

    let generated = cfg.ensure_identity().map_err(|source| ConfigError::Identity {
        path: path.to_path_buf(),
        source,
    })?;

    if generated {
        let public_key = cfg.key_pair().map(|kp| kp.public_key.as_str()).unwrap_or_default();
        info!(public_key, "Generated new agent keypair");
        write_document(&cfg, path)?;
    } else {
        debug!("Loaded existing agent keypair");
    }

    cfg.version = version;
    Ok(cfg)
}

/// Persist the document atomically with owner-only permissions.
pub fn save_config(cfg: &AgentConfig, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = checked_path(path.as_ref())?;
    let lock_path = atomic::lock_path(path);
    let _lock = FileLock::exclusive(&lock_path).map_err(io_error("lock", &lock_path))?;

    write_document(cfg, path)
}

/// Indented JSON plus trailing newline. Caller holds the lock.
fn write_document(cfg: &AgentConfig, path: &Path) -> Result<(), ConfigError> {
    let mut bytes = serde_json::to_vec_pretty(cfg)?;
    bytes.push(b'\n');

    atomic::write_file_atomic(path, &bytes, atomic::FILE_MODE)
        .map_err(io_error("write config file", path))?;

    debug!(path = %path.display(), "Saved config");
    Ok(())
}

fn checked_path(path: &Path) -> Result<&Path, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::EmptyPath);
    }
    Ok(path)
}

fn io_error(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> ConfigError {
    let path: PathBuf = path.to_path_buf();
    move |source| ConfigError::Io { op, path, source }
}
