//! Prometheus metrics for the DBProxy node.
//!
//! All metrics follow the naming convention: `dbp_<metric>_<unit>`.
//! Routing metrics are registered by `dbp-routing` into the same default
//! registry, so [`encode_metrics`] renders both.

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_gauge, Encoder, HistogramVec,
    IntGauge, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Open client connections
    pub static ref CLIENT_CONNECTIONS: IntGauge = register_int_gauge!(
        "dbp_client_connections",
        "Currently open client connections"
    )
    .expect("metric creation failed");

    /// Request latency by method, from decode to answer
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "dbp_request_duration_seconds",
        "Time from request decode to answer",
        &["method"],
        exponential_buckets(0.0005, 2.0, 16).expect("valid buckets")
    )
    .expect("metric creation failed");
}

/// Encode the default registry in Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard observing the elapsed time of one request on drop.
pub struct RequestTimer {
    method: String,
    start: Instant,
}

impl RequestTimer {
    /// Start timing a request for `method`.
    pub fn start(method: &str) -> Self {
        Self {
            method: method.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        REQUEST_DURATION
            .with_label_values(&[&self.method])
            .observe(self.start.elapsed().as_secs_f64());
    }
}
