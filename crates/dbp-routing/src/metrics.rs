//! # Router Metrics
//!
//! Prometheus metrics for routing, admission and configuration refresh.
//!
//! ## Usage
//!
//! Enabled by the default `metrics` feature:
//! ```toml
//! dbp-routing = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `dbp_requests_total` - Requests by RPC method
//! - `dbp_rejections_total` - Error answers by error label
//! - `dbp_map_rebuilds_total` - Watcher rebuild attempts by outcome
//! - `dbp_retiring_maps` - Replaced shard maps not yet recycled
//! - `dbp_queue_depth` - Queued tasks per master endpoint and lane
//! - `dbp_worker_panics_total` - Tasks that panicked on a worker

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

use crate::domain::ErrorCode;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Requests by method
    pub static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "dbp_requests_total",
        "Total number of requests received",
        &["method"]
    )
    .expect("Failed to create REQUESTS metric");

    /// Error answers by error label
    pub static ref REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "dbp_rejections_total",
        "Total number of requests answered with an error",
        &["code"]
    )
    .expect("Failed to create REJECTIONS metric");

    /// Rebuild attempts by outcome
    pub static ref MAP_REBUILDS: IntCounterVec = register_int_counter_vec!(
        "dbp_map_rebuilds_total",
        "Total number of shard map rebuild attempts",
        &["outcome"]
    )
    .expect("Failed to create MAP_REBUILDS metric");

    /// Retired maps waiting to be recycled
    pub static ref RETIRING_MAPS: IntGauge = register_int_gauge!(
        "dbp_retiring_maps",
        "Replaced shard maps still draining"
    )
    .expect("Failed to create RETIRING_MAPS metric");

    /// Queue depth per group and lane
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "dbp_queue_depth",
        "Queued tasks per database group",
        &["master", "lane"]
    )
    .expect("Failed to create QUEUE_DEPTH metric");

    /// Panicking tasks
    pub static ref WORKER_PANICS: IntCounter = register_int_counter!(
        "dbp_worker_panics_total",
        "Total number of tasks that panicked on a worker"
    )
    .expect("Failed to create WORKER_PANICS metric");
}

/// Record a request for `method`
#[cfg(feature = "metrics")]
pub fn record_request(method: &str) {
    REQUESTS.with_label_values(&[method]).inc();
}

/// Record an error answer
#[cfg(feature = "metrics")]
pub fn record_rejection(code: ErrorCode) {
    REJECTIONS.with_label_values(&[code.label()]).inc();
}

/// Record a rebuild attempt
#[cfg(feature = "metrics")]
pub fn record_rebuild(outcome: &str) {
    MAP_REBUILDS.with_label_values(&[outcome]).inc();
}

/// Set the number of retired maps
#[cfg(feature = "metrics")]
pub fn set_retiring_maps(count: usize) {
    RETIRING_MAPS.set(count as i64);
}

/// Set queue depths of one group
#[cfg(feature = "metrics")]
pub fn set_queue_depth(master: &str, read: usize, write: usize) {
    QUEUE_DEPTH.with_label_values(&[master, "read"]).set(read as i64);
    QUEUE_DEPTH.with_label_values(&[master, "write"]).set(write as i64);
}

/// Record a task panic
#[cfg(feature = "metrics")]
pub fn record_worker_panic() {
    WORKER_PANICS.inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_request(_method: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_rejection(_code: ErrorCode) {}

#[cfg(not(feature = "metrics"))]
pub fn record_rebuild(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_retiring_maps(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn set_queue_depth(_master: &str, _read: usize, _write: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_worker_panic() {}
