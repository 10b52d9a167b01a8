//! # DBProxy Node
//!
//! Wires the routing engine to its SQLite-backed collaborators and serves
//! it over TCP.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (JSON file, then `DBP_*` environment overrides)
//! 2. Initialize telemetry
//! 3. Start the [`DataRouter`]: config watcher plus worker pools
//! 4. Accept newline-delimited JSON requests until Ctrl+C
//! 5. Stop accepting, then drain and stop the router

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod server;

use std::sync::Arc;

use dbp_routing::ports::ConfigSource;
use dbp_routing::{DataRouter, RouterError, SqliteConfigSource, SqliteDriverFactory};
use tracing::info;

pub use config::{ConfigError, NodeConfig, DEFAULT_PORT};
pub use server::{handle_line, serve, METRICS_METHOD};

/// Start a router reading the configured SQLite stores.
pub fn build_router(config: &NodeConfig) -> Result<DataRouter, RouterError> {
    let sources: Vec<Box<dyn ConfigSource>> = config
        .source
        .config_dbs
        .iter()
        .map(|path| Box::new(SqliteConfigSource::new(path)) as Box<dyn ConfigSource>)
        .collect();
    let factory = Arc::new(SqliteDriverFactory::new(&config.source.data_dir));

    info!(
        "[dbp] Starting router with {} config source(s), data dir {}",
        sources.len(),
        config.source.data_dir.display()
    );
    DataRouter::start(config.router.clone(), sources, factory)
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
