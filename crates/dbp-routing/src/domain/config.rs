//! # Routing Configuration
//!
//! Tunables threaded through constructors: queue admission limits, worker
//! pool sizing and watcher cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::value_objects::NegativeKeyPolicy;

/// Queue admission limits per database group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Reads queued before `ServerBusy`.
    pub max_read_queue: usize,
    /// Writes queued before `ServerBusy`.
    pub max_write_queue: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_read_queue: 200_000,
            max_write_queue: 200_000,
        }
    }
}

/// Worker pool sizing per physical database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Persistent workers started with the pool.
    pub init_count: usize,
    /// Persistent workers added per growth step.
    pub append_count: usize,
    /// Persistent worker ceiling.
    pub perfect_count: usize,
    /// Total worker ceiling, `0` for unbounded temporaries.
    pub max_count: usize,
    /// Idle seconds before a temporary worker exits.
    pub temp_thread_latency_secs: u64,
    /// Idle seconds before a connection is pinged again.
    pub reping_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            init_count: 5,
            append_count: 2,
            perfect_count: 20,
            max_count: 20,
            temp_thread_latency_secs: 60,
            reping_interval_secs: 300,
        }
    }
}

impl PoolConfig {
    /// Small pool for tests.
    pub fn for_testing() -> Self {
        Self {
            init_count: 1,
            append_count: 1,
            perfect_count: 2,
            max_count: 4,
            temp_thread_latency_secs: 1,
            reping_interval_secs: 300,
        }
    }

    /// Pull the counts into a consistent order.
    ///
    /// `append >= 1`, `init <= perfect`, and `max` (when bounded) at
    /// least `perfect`.
    pub fn revised(&self) -> Self {
        let mut revised = self.clone();
        revised.append_count = revised.append_count.max(1);
        revised.perfect_count = revised.perfect_count.max(1);
        revised.init_count = revised.init_count.min(revised.perfect_count);
        if revised.max_count != 0 && revised.max_count < revised.perfect_count {
            revised.max_count = revised.perfect_count;
        }
        revised
    }

    /// Idle timeout of temporary workers.
    pub fn temp_latency(&self) -> Duration {
        Duration::from_secs(self.temp_thread_latency_secs)
    }

    /// Connection re-ping interval.
    pub fn reping_interval(&self) -> Duration {
        Duration::from_secs(self.reping_interval_secs)
    }
}

/// Watcher cadence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between update-time checks.
    pub check_interval_secs: u64,
    /// Loop tick in milliseconds.
    pub tick_millis: u64,
    /// Pause after a failed refresh, in milliseconds.
    pub error_backoff_millis: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 900,
            tick_millis: 3_000,
            error_backoff_millis: 2_000,
        }
    }
}

impl WatcherConfig {
    /// Fast cadence for tests.
    pub fn for_testing() -> Self {
        Self {
            check_interval_secs: 1,
            tick_millis: 20,
            error_backoff_millis: 20,
        }
    }

    /// Check interval.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Loop tick.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Back-off after failure.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_millis)
    }
}

/// Everything the router needs besides its collaborators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Queue admission.
    pub limits: QueueLimits,
    /// Worker pools.
    pub pool: PoolConfig,
    /// Watcher cadence.
    pub watcher: WatcherConfig,
    /// Negative key handling.
    pub negative_keys: NegativeKeyPolicy,
    /// Accept `ALTER` and `SHOW CREATE TABLE` and allow any verb in fan-outs.
    pub manager_mode: bool,
}

impl RouterConfig {
    /// Small pools and fast cadence for tests.
    pub fn for_testing() -> Self {
        Self {
            limits: QueueLimits::default(),
            pool: PoolConfig::for_testing(),
            watcher: WatcherConfig::for_testing(),
            negative_keys: NegativeKeyPolicy::FoldHash,
            manager_mode: false,
        }
    }
}
