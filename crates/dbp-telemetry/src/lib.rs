//! # DBP Telemetry
//!
//! Logging and metrics for the DBProxy node.
//!
//! ## Components
//!
//! - Structured logging through `tracing-subscriber` (JSON or human-readable)
//! - Prometheus metrics in the default registry, rendered by [`encode_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbp_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DBP_SERVICE_NAME` | `dbproxy` | Service name in log records |
//! | `DBP_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `DBP_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `DBP_JSON_LOGS` | `false` (`true` in containers) | JSON log records |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, RequestTimer, CLIENT_CONNECTIONS, REQUEST_DURATION};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metrics could not be gathered or encoded.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Configuration did not parse.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Install logging and touch the node metrics so they appear in the first
/// scrape.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    lazy_static::initialize(&CLIENT_CONNECTIONS);
    lazy_static::initialize(&REQUEST_DURATION);
    Ok(())
}
