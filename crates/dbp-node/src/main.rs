//! # DBProxy Node Binary
//!
//! ```text
//! dbp-node [config.json]
//! ```
//!
//! Without a file the node starts from defaults; `DBP_*` variables
//! override either.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbp_node::{build_router, serve, NodeConfig};
use dbp_routing::RouterApi;
use dbp_telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;

    init_telemetry(&config.telemetry)?;
    info!("[dbp] DBProxy node v{} starting", dbp_node::VERSION);

    let router = Arc::new(build_router(&config).context("starting router")?);
    let bind_address = config.network.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api: Arc<dyn RouterApi> = router.clone();
    let server = tokio::spawn(serve(listener, api, shutdown_rx));

    info!("[dbp] Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    info!("[dbp] Shutdown requested");
    let _ = shutdown_tx.send(true);
    match server.await {
        Ok(Err(e)) => error!("[dbp] Listener failed: {}", e),
        Err(e) => error!("[dbp] Listener task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    // Draining joins worker threads.
    tokio::task::spawn_blocking(move || router.shutdown()).await?;

    info!("[dbp] Node stopped");
    Ok(())
}
