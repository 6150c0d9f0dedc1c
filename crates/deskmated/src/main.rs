//! Deskmate Daemon - ticket assistant backend
//!
//! Serves chat turns for the embedded PSA pod over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use deskmated::completion::OpenAiCompatible;
use deskmated::gateway::HttpGateway;
use deskmated::{server, AppState, DeskmateConfig, TurnEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "deskmated", version, about = "Deskmate ticket assistant daemon")]
struct Args {
    /// Config file (default /etc/deskmate/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Deskmate Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = DeskmateConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let gateway = HttpGateway::new(config.gateway.clone()).context("Failed to set up ticket gateway")?;
    let provider =
        OpenAiCompatible::new(config.completion.clone()).context("Failed to set up AI provider")?;
    info!(
        "  Gateway {} | model {} | {} turns per {}s",
        config.gateway.base_url,
        config.completion.model,
        config.throttle.max_turns,
        config.throttle.window_secs
    );
    info!(
        "  {} trusted host origins",
        config.host.allowed_origins.origins().len()
    );

    let bind = config.server.bind.clone();
    let window = Duration::from_secs(config.throttle.window_secs);
    let host = config.host.clone();
    let engine = TurnEngine::new(Arc::new(gateway), Arc::new(provider), config);

    server::run(AppState::new(engine, host), &bind, window).await?;
    info!("Deskmate Daemon stopped");
    Ok(())
}
