//! # DBP Routing
//!
//! Sharding router in front of a fleet of relational databases.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Clients address logical tables with a shard key; the router:
//! - Classifies the statement and extracts its logical table
//! - Resolves `(table, cluster, key)` to a physical database and table suffix
//! - Queues the statement on the owning database group's worker pool
//! - Fans multi-key statements out and merges the per-shard results
//! - Rebuilds the shard map from the configuration store and swaps it live
//!
//! ## Module Structure
//!
//! ```text
//! dbp-routing/
//! ├── domain/          # Config rows, value objects, errors, invariants
//! ├── algorithms/      # Classifier, suffix rewriter, Jenkins hash, params
//! ├── ports/           # RouterApi + driver/config-source traits and mocks
//! ├── adapters/        # SQLite driver and config source
//! ├── task/            # Answer channels, tasks, aggregation
//! ├── pool/            # Work queues and elastic worker pools
//! ├── shard_map/       # Immutable routing table and its builder
//! ├── watcher.rs       # Config refresh, hot swap, retired map recycling
//! └── service/         # DataRouter, the RouterApi implementation
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod domain;
pub mod metrics;
pub mod pool;
pub mod ports;
pub mod service;
pub mod shard_map;
pub mod task;
pub mod watcher;

// Re-exports
pub use algorithms::{
    add_table_suffix, assemble, extract_sql, hash_string_key, jenkins_one_at_a_time, preassemble,
    StatementClassifier,
};
pub use domain::{
    hash_shard_index, preserve_parity, range_slot_index, secondary_bucket, BuildError,
    ConfigSnapshot, ConfigSourceError, DriverError, ErrorCode, GlobalSettings, NegativeKeyPolicy,
    PoolConfig, QueryResult, QueueLimits, RangeSplitRow, RouterConfig, RouterError, ServerRow,
    SplitType, TableRow, TableSplitRow, WatcherConfig, ERROR_BASE,
};
pub use ports::{
    CategoryRequest, ConfigSource, DatabaseDriver, DriverFactory, MultiQueryRequest, QueryRequest,
    ReformRequest, RouterApi, TableRequest, TransactionRequest,
};
pub use service::DataRouter;
pub use shard_map::{ShardMap, ShardMapBuilder};
pub use task::{Answer, AnswerChannel, AnswerError};
pub use watcher::{ConfigWatcher, WatcherState};

#[cfg(feature = "sqlite")]
pub use adapters::{SqliteConfigSource, SqliteDriver, SqliteDriverFactory};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
