//! Serve command - run the plugin protocol server until terminated.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, instrument, warn};

use super::open_registry;
use crate::config::PluginConfig;
use crate::server::PluginServer;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Unix socket to listen on (overrides the config file)
    #[arg(long, env = "SSHFS_VOLUME_SOCKET")]
    pub socket: Option<PathBuf>,
}

#[instrument(level = "info", name = "cmd::serve", skip_all)]
pub fn execute(config: &PluginConfig, args: &Args) -> Result<()> {
    let socket = args.socket.clone().unwrap_or_else(|| config.socket.clone());
    let registry = Arc::new(open_registry(config)?);

    for (name, result) in registry.cleanup_all() {
        match result {
            Ok(true) => info!(volume = %name, "Cleaned up stale mount"),
            Ok(false) => {}
            Err(e) => warn!(volume = %name, error = %e, "Stale mount cleanup failed"),
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let server = PluginServer::start(registry, &socket)
            .await
            .with_context(|| format!("Failed to listen on {}", socket.display()))?;
        info!(socket = %server.socket_path().display(), "Volume plugin ready");

        wait_for_shutdown().await?;
        server.stop().await;
        Ok::<_, anyhow::Error>(())
    })
}

async fn wait_for_shutdown() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }
    Ok(())
}
