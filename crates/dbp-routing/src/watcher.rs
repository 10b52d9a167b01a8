//! # Config Watcher
//!
//! Background thread that keeps the published [`ShardMap`] current.
//!
//! ## States
//!
//! ```text
//! Bootstrapping ──build ok──→ Serving ←──→ Refreshing
//!       │                        │
//!       └────────shutdown────────┴──→ Draining ──→ Stopped
//! ```
//!
//! A rebuild runs when no map is loaded, when a refresh was requested, or
//! when the check interval elapsed and the store reports a newer update
//! time. Failed rebuilds keep the current map serving, back off and rotate
//! to the next configuration source. Replaced maps wait in a retirement list
//! until every group they own alone is idle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::domain::{RefreshError, RouterConfig, RouterError, WatcherConfig, PROXY_RAISER};
use crate::metrics;
use crate::ports::{ConfigSource, DriverFactory};
use crate::shard_map::{ShardMap, ShardMapBuilder};

/// Lifecycle of a [`ConfigWatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherState {
    /// No map loaded yet.
    Bootstrapping,
    /// A map is published.
    Serving,
    /// A rebuild is running; the previous map keeps serving.
    Refreshing,
    /// Shutting down, waiting for maps to drain.
    Draining,
    /// Thread exited.
    Stopped,
}

#[derive(Default)]
struct Control {
    refresh_requested: bool,
    stopping: bool,
}

struct WatcherShared {
    current: Mutex<Option<Arc<ShardMap>>>,
    retiring: Mutex<Vec<Arc<ShardMap>>>,
    state: Mutex<WatcherState>,
    control: Mutex<Control>,
    wakeup: Condvar,
}

impl WatcherShared {
    fn set_state(&self, state: WatcherState) {
        *self.state.lock() = state;
    }

    fn publish(&self, map: ShardMap) {
        let map = Arc::new(map);
        let previous = self.current.lock().replace(Arc::clone(&map));
        if let Some(previous) = previous {
            previous.sign_taken_over(&map);
            info!(
                "[dbp] Shard map swapped: update time {} -> {}",
                previous.update_time(),
                map.update_time()
            );
            self.retiring.lock().push(previous);
        } else {
            info!("[dbp] Shard map loaded: update time {}", map.update_time());
        }
    }

    /// Drop every retired map that is deletable; returns how many remain.
    fn sweep(&self) -> usize {
        let released: Vec<Arc<ShardMap>> = {
            let mut retiring = self.retiring.lock();
            let (done, waiting): (Vec<_>, Vec<_>) =
                retiring.drain(..).partition(|map| map.deletable());
            *retiring = waiting;
            done
        };
        for map in &released {
            info!("[dbp] Retired shard map {} recycled", map.update_time());
        }
        drop(released);
        let remaining = self.retiring.lock().len();
        metrics::set_retiring_maps(remaining);
        remaining
    }

    /// Wait up to `timeout`; a stop always interrupts, a refresh request
    /// only when `interruptible`.
    fn pause(&self, timeout: Duration, interruptible: bool) {
        let deadline = Instant::now() + timeout;
        let mut control = self.control.lock();
        while !control.stopping && !(interruptible && control.refresh_requested) {
            if self.wakeup.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Runs the refresh loop on its own thread.
pub struct ConfigWatcher {
    shared: Arc<WatcherShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    /// Spawn the watcher thread; the first build starts immediately.
    pub fn start(
        sources: Vec<Box<dyn ConfigSource>>,
        config: RouterConfig,
        factory: Arc<dyn DriverFactory>,
    ) -> Result<Self, RouterError> {
        if sources.is_empty() {
            return Err(RouterError::Internal(
                "no configuration source given".to_string(),
            ));
        }
        let shared = Arc::new(WatcherShared {
            current: Mutex::new(None),
            retiring: Mutex::new(Vec::new()),
            state: Mutex::new(WatcherState::Bootstrapping),
            control: Mutex::new(Control::default()),
            wakeup: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("dbp-config-watcher".to_string())
            .spawn(move || run_watcher(loop_shared, sources, config, factory))
            .map_err(|e| RouterError::Internal(format!("cannot spawn config watcher: {e}")))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Currently published map, if any.
    pub fn current(&self) -> Option<Arc<ShardMap>> {
        self.shared.current.lock().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        *self.shared.state.lock()
    }

    /// Retired maps still draining.
    pub fn retiring_count(&self) -> usize {
        self.shared.retiring.lock().len()
    }

    /// Force a rebuild on the next tick.
    pub fn refresh(&self) {
        let mut control = self.shared.control.lock();
        if control.stopping {
            return;
        }
        control.refresh_requested = true;
        self.shared.wakeup.notify_all();
    }

    /// Stop refreshing, drain every map and join the thread.
    pub fn shutdown(&self) {
        {
            let mut control = self.shared.control.lock();
            control.stopping = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("[dbp] Config watcher thread panicked");
            }
        }
        self.shared.set_state(WatcherState::Stopped);
    }

    /// Status snapshot.
    pub fn status(&self) -> Value {
        let current = self.current();
        let retiring = self.shared.retiring.lock().clone();
        json!({
            "proxyType": PROXY_RAISER,
            "version": crate::VERSION,
            "state": format!("{:?}", self.state()),
            "recyclingQueueSize": retiring.len(),
            "current": current.map_or(Value::Null, |map| map.status()),
            "recycling": retiring.iter().map(|map| map.status()).collect::<Vec<_>>(),
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn rebuild(
    source: &mut dyn ConfigSource,
    current: Option<&ShardMap>,
    forced: bool,
    config: &RouterConfig,
    factory: &Arc<dyn DriverFactory>,
) -> Result<Option<ShardMap>, RefreshError> {
    if let (Some(map), false) = (current, forced) {
        let update_time = source.fetch_update_time()?;
        if update_time <= map.update_time() {
            debug!("[dbp] Config unchanged at update time {}", update_time);
            return Ok(None);
        }
    }
    let snapshot = source.fetch_snapshot()?;
    let map = ShardMapBuilder::from_snapshot(snapshot, config, Arc::clone(factory)).build(current)?;
    Ok(Some(map))
}

fn run_watcher(
    shared: Arc<WatcherShared>,
    mut sources: Vec<Box<dyn ConfigSource>>,
    config: RouterConfig,
    factory: Arc<dyn DriverFactory>,
) {
    let settings = config.watcher.clone();
    let mut source_index = 0;
    let mut last_check = Instant::now();

    loop {
        shared.sweep();

        let forced = {
            let mut control = shared.control.lock();
            if control.stopping {
                break;
            }
            std::mem::take(&mut control.refresh_requested)
        };

        let current = shared.current.lock().clone();
        let due = last_check.elapsed() >= settings.check_interval();
        if !(forced || due || current.is_none()) {
            shared.pause(settings.tick(), true);
            continue;
        }
        if due {
            last_check = Instant::now();
        }

        if current.is_some() {
            shared.set_state(WatcherState::Refreshing);
        }
        let source = &mut sources[source_index];
        let outcome = rebuild(
            source.as_mut(),
            current.as_deref(),
            forced || current.is_none(),
            &config,
            &factory,
        );
        let failed = match outcome {
            Ok(Some(map)) => {
                shared.publish(map);
                metrics::record_rebuild("success");
                false
            }
            Ok(None) => {
                metrics::record_rebuild("unchanged");
                false
            }
            Err(e) => {
                error!("[dbp] Refresh from {} failed: {}", source.describe(), e);
                metrics::record_rebuild("failure");
                source_index = (source_index + 1) % sources.len();
                if forced && matches!(e, RefreshError::Source(_)) {
                    shared.control.lock().refresh_requested = true;
                }
                true
            }
        };
        drop(current);

        let loaded = shared.current.lock().is_some();
        shared.set_state(if loaded {
            WatcherState::Serving
        } else {
            WatcherState::Bootstrapping
        });

        if failed {
            shared.pause(settings.error_backoff(), false);
        } else {
            shared.pause(settings.tick(), true);
        }
    }

    drain(&shared, &settings);
}

fn drain(shared: &WatcherShared, settings: &WatcherConfig) {
    shared.set_state(WatcherState::Draining);
    if let Some(current) = shared.current.lock().take() {
        shared.retiring.lock().push(current);
    }
    info!("[dbp] Config watcher draining");
    while shared.sweep() > 0 {
        warn!("[dbp] Waiting for retired shard maps to become idle");
        thread::sleep(settings.tick());
    }
    shared.set_state(WatcherState::Stopped);
    info!("[dbp] Config watcher stopped");
}
