//! certkit-agent: identity provisioning and request signing tools
//!
//! - `init`: write the first-install config from ACCESS_KEY / SECRET_KEY
//! - `identity`: load the config (provisioning the keypair) and print the public key
//! - `sign`: sign a request and print exactly what was signed

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use certkit_agent::api::AgentClient;
use certkit_agent::config::{
    create_initial_config, load_config, ProvisionEnv, VersionInfo, DEFAULT_CONFIG_PATH,
};
use certkit_agent::signing::CanonicalRequest;

#[derive(Parser)]
#[command(name = "certkit-agent")]
#[command(about = "CertKit agent identity and request signing")]
struct Cli {
    /// Path to config.json
    #[arg(short, long, env = "CERTKIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the initial config if it does not exist yet
    Init {
        #[arg(long, env = "ACCESS_KEY", hide_env_values = true)]
        access_key: Option<String>,

        #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
        secret_key: Option<String>,

        /// Control plane base URL
        #[arg(long, env = "CERTKIT_API_BASE")]
        api_base: Option<String>,
    },

    /// Print the agent public key, generating the keypair on first run
    Identity,

    /// Sign a request with the registered identity and print the headers
    Sign {
        #[arg(long, default_value = "GET")]
        method: String,

        /// Path relative to api_base, e.g. /api/agent/v1/ping
        #[arg(long)]
        path: String,

        /// Request body sent as-is
        #[arg(long)]
        body: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("certkit_agent=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init {
            access_key,
            secret_key,
            api_base,
        } => init(&cli.config, ProvisionEnv { access_key, secret_key, api_base }),
        Command::Identity => identity(&cli.config),
        Command::Sign { method, path, body } => sign(&cli.config, &method, &path, body),
    }
}

fn init(path: &Path, env: ProvisionEnv) -> anyhow::Result<()> {
    if path.exists() {
        info!("Config already exists at {}", path.display());
        return Ok(());
    }

    info!("Config not found, creating {}", path.display());
    create_initial_config(path, &env)
        .with_context(|| format!("failed to create config {}", path.display()))?;
    Ok(())
}

fn identity(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path, VersionInfo::from_env())?;
    let key_pair = config
        .key_pair()
        .context("config has no identity after load")?;

    println!("{}", key_pair.public_key);
    Ok(())
}

fn sign(path: &Path, method: &str, req_path: &str, body: Option<String>) -> anyhow::Result<()> {
    let config = load_config(path, VersionInfo::from_env())?;
    let client = AgentClient::new(Arc::new(config));

    let method = reqwest::Method::from_bytes(method.as_bytes())
        .with_context(|| format!("invalid method {}", method))?;
    let now = chrono::Utc::now();
    let req = client.signed_request(method, req_path, body.map(String::into_bytes), now)?;

    let canonical = CanonicalRequest::from_request(&req, now)?;
    println!("{}\n", canonical.signing_string());
    for (name, value) in req.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    Ok(())
}
