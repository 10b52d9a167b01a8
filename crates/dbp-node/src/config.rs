//! Node configuration.
//!
//! Built from `Default`, optionally replaced by a JSON file, then
//! overridden by `DBP_*` environment variables.

use std::path::{Path, PathBuf};

use dbp_routing::RouterConfig;
use dbp_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 12321;

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listener.
    pub network: NetworkConfig,
    /// Logging.
    pub telemetry: TelemetryConfig,
    /// Routing engine tunables.
    pub router: RouterConfig,
    /// Configuration stores and local data.
    pub source: SourceConfig,
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl NetworkConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration stores and data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Configuration databases, tried in order.
    pub config_dbs: Vec<PathBuf>,
    /// Root of the SQLite instance directories.
    pub data_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            config_dbs: vec![PathBuf::from("./data/config.sqlite")],
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },
    /// Config file is not a valid `NodeConfig`.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File
        path: PathBuf,
        /// Cause
        source: serde_json::Error,
    },
    /// Environment variable with an unusable value.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable
        name: &'static str,
        /// Value
        value: String,
    },
    /// No configuration store.
    #[error("at least one configuration database is required")]
    NoConfigSources,
    /// Pool bounds contradict each other.
    #[error("inconsistent pool bounds: {0}")]
    InvalidPool(String),
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

impl NodeConfig {
    /// Load the optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.telemetry = TelemetryConfig::from_env();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `DBP_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("DBP_HOST") {
            self.network.host = host;
        }
        if let Some(port) = lookup("DBP_PORT") {
            self.network.port = parse_env("DBP_PORT", port)?;
        }
        if let Some(dbs) = lookup("DBP_CONFIG_DB") {
            self.source.config_dbs = dbs
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(dir) = lookup("DBP_DATA_DIR") {
            self.source.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("DBP_CHECK_INTERVAL_SECS") {
            self.router.watcher.check_interval_secs = parse_env("DBP_CHECK_INTERVAL_SECS", secs)?;
        }
        if let Some(max) = lookup("DBP_MAX_READ_QUEUE") {
            self.router.limits.max_read_queue = parse_env("DBP_MAX_READ_QUEUE", max)?;
        }
        if let Some(max) = lookup("DBP_MAX_WRITE_QUEUE") {
            self.router.limits.max_write_queue = parse_env("DBP_MAX_WRITE_QUEUE", max)?;
        }
        if let Some(count) = lookup("DBP_POOL_INIT") {
            self.router.pool.init_count = parse_env("DBP_POOL_INIT", count)?;
        }
        if let Some(count) = lookup("DBP_POOL_APPEND") {
            self.router.pool.append_count = parse_env("DBP_POOL_APPEND", count)?;
        }
        if let Some(count) = lookup("DBP_POOL_PERFECT") {
            self.router.pool.perfect_count = parse_env("DBP_POOL_PERFECT", count)?;
        }
        if let Some(count) = lookup("DBP_POOL_MAX") {
            self.router.pool.max_count = parse_env("DBP_POOL_MAX", count)?;
        }
        Ok(())
    }

    /// Reject configurations the router cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.config_dbs.is_empty() {
            return Err(ConfigError::NoConfigSources);
        }
        let pool = &self.router.pool;
        if pool.perfect_count == 0 {
            return Err(ConfigError::InvalidPool("perfect count must be positive".into()));
        }
        if pool.init_count > pool.perfect_count {
            return Err(ConfigError::InvalidPool(format!(
                "init count {} exceeds perfect count {}",
                pool.init_count, pool.perfect_count
            )));
        }
        if pool.max_count != 0 && pool.max_count < pool.perfect_count {
            return Err(ConfigError::InvalidPool(format!(
                "max count {} below perfect count {}",
                pool.max_count, pool.perfect_count
            )));
        }
        Ok(())
    }
}
