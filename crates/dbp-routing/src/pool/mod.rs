//! # Worker Pools
//!
//! Per-group work queues and the elastic thread pools that drain them.

mod connection;
mod work_queue;
mod worker_pool;

pub use connection::WorkerConnection;
pub use work_queue::{Lane, QueueMode, WorkQueue};
pub use worker_pool::{PoolStatus, ScalingWorkerPool};
