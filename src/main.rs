//! Branchpass gateway binary.
//!
//! Run:
//!   branchpass --config /etc/branchpass/config.toml
//!   BRANCHPASS_SIGNING_KEY_FILE=key.pem BRANCHPASS_CONFIG_FILE=branches.json branchpass

use std::path::PathBuf;

use anyhow::Context;
use branchpass::{serve, AppState};
use branchpass_config::{try_load_default_config, GatewayConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "branchpass", version, about = "Branch-aware authentication gateway")]
struct Args {
    /// JSON or TOML configuration file. Defaults to the standard locations.
    #[arg(short, long, env = "BRANCHPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => try_load_default_config().context(
            "no configuration found; pass --config or set BRANCHPASS_* environment variables",
        )?,
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
        config.validate()?;
    }

    let state = AppState::from_config(&config)?;
    let listener = TcpListener::bind(config.socket_addr()?)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    serve(listener, state).await?;
    Ok(())
}
