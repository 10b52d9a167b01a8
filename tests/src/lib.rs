//! # DBProxy Test Suite
//!
//! Cross-crate integration flows against real SQLite instances.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Deployment on disk: config store + instance dirs
//! └── integration/
//!     ├── sqlite_flows.rs  # route -> execute -> aggregate
//!     ├── hot_swap.rs      # config changes under live queues
//!     └── node_flows.rs    # TCP node + query tool
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p dbp-tests
//! cargo test -p dbp-tests integration::hot_swap::
//! ```

pub mod fixtures;
pub mod integration;
