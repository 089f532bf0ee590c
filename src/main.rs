//! `relay` binary: load settings, start the server, wait for Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_server::auth::StaticCredentials;
use relay_server::shutdown::ShutdownCoordinator;

/// Room-scoped WebSocket message relay.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind host, overriding settings.
    #[arg(long)]
    host: Option<String>,
    /// Bind port, overriding settings.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    if !relay_telemetry::init_telemetry(&settings.logging) {
        tracing::warn!("tracing subscriber already installed, keeping it");
    }

    let metrics = match relay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let authenticator = Arc::new(StaticCredentials::new(&settings.auth.users));
    let shutdown = ShutdownCoordinator::new();
    let handle = relay_server::start(&settings, authenticator, &shutdown, metrics)
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    tracing::info!(addr = %handle.local_addr(), "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let drained = shutdown
        .drain(handle.into_tasks(), Some(Duration::from_secs(10)))
        .await;
    if drained {
        tracing::info!("shutdown complete");
    } else {
        tracing::warn!("shutdown finished with tasks still running");
    }
    Ok(())
}
