//! # Adapters Module
//!
//! Contains adapter implementations for the outbound ports.
//!
//! ## Modules
//!
//! - `sqlite_driver`: `DatabaseDriver` over SQLite files, one directory per instance
//! - `sqlite_config`: `ConfigSource` reading the configuration tables from SQLite

#[cfg(feature = "sqlite")]
pub mod sqlite_config;
#[cfg(feature = "sqlite")]
pub mod sqlite_driver;

#[cfg(feature = "sqlite")]
pub use sqlite_config::SqliteConfigSource;
#[cfg(feature = "sqlite")]
pub use sqlite_driver::{SqliteDriver, SqliteDriverFactory};
