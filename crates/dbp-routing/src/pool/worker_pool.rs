//! # Scaling Worker Pool
//!
//! Elastic set of OS threads serving one physical database from a shared
//! [`WorkQueue`]. Persistent workers grow in batches up to `perfect_count`;
//! beyond that temporary workers are spawned (up to `max_count` in total)
//! and exit after `temp_thread_latency_secs` without work.
//!
//! Workers pop under the pool state lock, and [`ScalingWorkerPool::wake_up`]
//! notifies under the same lock, so a push followed by a wake-up is never
//! lost.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::connection::WorkerConnection;
use super::work_queue::{QueueMode, WorkQueue};
use crate::domain::{PoolConfig, ServerRow};
use crate::metrics;
use crate::ports::DriverFactory;

#[derive(Default)]
struct PoolState {
    started: bool,
    exiting: bool,
    normal: usize,
    temporary: usize,
    busy: usize,
}

struct PoolShared {
    server: ServerRow,
    factory: Arc<dyn DriverFactory>,
    queue: Arc<WorkQueue>,
    mode: QueueMode,
    config: PoolConfig,
    state: Mutex<PoolState>,
    work_cond: Condvar,
    detach_cond: Condvar,
}

/// Worker counters of one pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// `host:port`.
    pub endpoint: String,
    /// Persistent workers.
    pub normal: usize,
    /// Temporary workers.
    pub temporary: usize,
    /// Workers running a task.
    pub busy: usize,
    /// Initial worker count.
    pub min: usize,
    /// Worker ceiling.
    pub max: usize,
}

impl PoolStatus {
    /// Wire shape.
    pub fn to_json(&self) -> Value {
        json!({
            "dbHost": self.endpoint,
            "totalThreads": self.normal + self.temporary,
            "normalThreads": self.normal,
            "busyThreads": self.busy,
            "temporaryThreads": self.temporary,
            "min": self.min,
            "max": self.max,
        })
    }
}

/// Worker pool of one database server.
pub struct ScalingWorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScalingWorkerPool {
    /// Pool serving `queue` in `mode`; no thread runs until
    /// [`ScalingWorkerPool::start`].
    pub fn new(
        server: ServerRow,
        factory: Arc<dyn DriverFactory>,
        queue: Arc<WorkQueue>,
        mode: QueueMode,
        config: &PoolConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                server,
                factory,
                queue,
                mode,
                config: config.revised(),
                state: Mutex::new(PoolState::default()),
                work_cond: Condvar::new(),
                detach_cond: Condvar::new(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start `init_count` persistent workers. Later calls are no-ops.
    pub fn start(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.started || state.exiting {
            return false;
        }
        state.started = true;
        let wanted = self.shared.config.init_count;
        self.spawn_normal(&mut state, wanted);
        info!(
            "[dbp] Worker pool for {} started with {} workers",
            self.shared.server.endpoint(),
            state.normal
        );
        true
    }

    /// Signal queued work, growing the pool when demand exceeds workers.
    ///
    /// Returns `false` once the pool is released.
    pub fn wake_up(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.exiting {
            return false;
        }
        let demand = state.busy + self.shared.queue.len(self.shared.mode);
        if demand > state.normal + state.temporary {
            self.append_locked(&mut state);
        }
        self.shared.work_cond.notify_one();
        true
    }

    /// Add workers: a batch of persistent ones below `perfect_count`, else
    /// one temporary worker if the ceiling allows.
    pub fn append(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.exiting {
            return false;
        }
        self.append_locked(&mut state)
    }

    fn append_locked(&self, state: &mut PoolState) -> bool {
        let config = &self.shared.config;
        if state.normal >= config.perfect_count {
            if config.max_count == 0 || state.normal + state.temporary < config.max_count {
                return self.spawn_temporary(state);
            }
            return false;
        }
        let batch = config.append_count.min(config.perfect_count - state.normal);
        self.spawn_normal(state, batch) > 0
    }

    fn spawn_normal(&self, state: &mut PoolState, count: usize) -> usize {
        let mut spawned = 0;
        for _ in 0..count {
            let shared = Arc::clone(&self.shared);
            let name = format!("dbp-{}", self.shared.server.endpoint());
            match thread::Builder::new()
                .name(name)
                .spawn(move || run_worker(shared, false))
            {
                Ok(handle) => {
                    self.handles.lock().push(handle);
                    state.normal += 1;
                    spawned += 1;
                }
                Err(e) => {
                    error!(
                        "[dbp] Failed to spawn worker for {}: {}",
                        self.shared.server.endpoint(),
                        e
                    );
                    break;
                }
            }
        }
        spawned
    }

    fn spawn_temporary(&self, state: &mut PoolState) -> bool {
        let shared = Arc::clone(&self.shared);
        let name = format!("dbp-tmp-{}", self.shared.server.endpoint());
        match thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(shared, true))
        {
            Ok(_) => {
                state.temporary += 1;
                debug!(
                    "[dbp] Temporary worker added for {} ({} temporary)",
                    self.shared.server.endpoint(),
                    state.temporary
                );
                true
            }
            Err(e) => {
                error!(
                    "[dbp] Failed to spawn temporary worker for {}: {}",
                    self.shared.server.endpoint(),
                    e
                );
                false
            }
        }
    }

    /// A task is running or a temporary worker is alive.
    pub fn is_busy(&self) -> bool {
        let state = self.shared.state.lock();
        state.busy + state.temporary > 0
    }

    /// Counters snapshot.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            endpoint: self.shared.server.endpoint(),
            normal: state.normal,
            temporary: state.temporary,
            busy: state.busy,
            min: self.shared.config.init_count,
            max: self.shared.config.max_count,
        }
    }

    /// Stop every worker and wait for all of them, temporary ones included.
    ///
    /// Tasks still queued stay in the queue.
    pub fn release(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.exiting {
                return;
            }
            state.exiting = true;
            self.shared.work_cond.notify_all();
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!(
                    "[dbp] Worker for {} terminated abnormally",
                    self.shared.server.endpoint()
                );
            }
        }

        let mut state = self.shared.state.lock();
        while state.temporary > 0 {
            self.shared.detach_cond.wait(&mut state);
        }
        debug!(
            "[dbp] Worker pool for {} released",
            self.shared.server.endpoint()
        );
    }
}

impl Drop for ScalingWorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(shared: Arc<PoolShared>, temporary: bool) {
    let mut connection = WorkerConnection::new(
        Arc::clone(&shared.factory),
        shared.server.clone(),
        shared.config.reping_interval(),
    );
    let idle_limit = shared.config.temp_latency();

    loop {
        let task = {
            let mut state = shared.state.lock();
            let deadline = Instant::now() + idle_limit;
            loop {
                if state.exiting {
                    break None;
                }
                if let Some(task) = shared.queue.pop(shared.mode) {
                    state.busy += 1;
                    break Some(task);
                }
                if !temporary {
                    shared.work_cond.wait(&mut state);
                } else if shared
                    .work_cond
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    let last = shared.queue.pop(shared.mode);
                    if last.is_some() {
                        state.busy += 1;
                    }
                    break last;
                }
            }
        };

        let Some(task) = task else {
            break;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.process(&mut connection)));
        if outcome.is_err() {
            error!(
                "[dbp] Worker for {} panicked while processing a task",
                shared.server.endpoint()
            );
            metrics::record_worker_panic();
        }
        shared.state.lock().busy -= 1;
    }

    let mut state = shared.state.lock();
    if temporary {
        state.temporary -= 1;
        shared.detach_cond.notify_all();
    } else {
        state.normal -= 1;
    }
}
