//! Database groups: one master, its replicas and their shared work queue.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::{GroupIdentity, PoolConfig, ServerRow};
use crate::metrics;
use crate::pool::{QueueMode, ScalingWorkerPool, WorkQueue};
use crate::ports::DriverFactory;

/// One physical database and the pool serving it.
pub struct GroupMember {
    server: ServerRow,
    pool: ScalingWorkerPool,
}

impl GroupMember {
    /// Server row.
    pub fn server(&self) -> &ServerRow {
        &self.server
    }

    /// Worker pool.
    pub fn pool(&self) -> &ScalingWorkerPool {
        &self.pool
    }
}

/// Master plus replicas sharing one queue.
///
/// Writes are served by the master pool only; reads by every member.
/// Dropping the group releases every pool, then answers whatever is still
/// queued with an "exiting" error.
pub struct DatabaseGroup {
    identity: GroupIdentity,
    members: Vec<GroupMember>,
    queue: Arc<WorkQueue>,
}

impl DatabaseGroup {
    /// Create the group; no worker runs until [`DatabaseGroup::activate`].
    pub fn new(
        master: ServerRow,
        replicas: Vec<ServerRow>,
        factory: Arc<dyn DriverFactory>,
        pool_config: &PoolConfig,
    ) -> Self {
        let identity = GroupIdentity::new(
            master.identity(),
            replicas.iter().map(ServerRow::identity).collect(),
        );
        let queue = Arc::new(WorkQueue::new());

        let mut members = Vec::with_capacity(1 + replicas.len());
        let servers = std::iter::once((master, QueueMode::ReadWrite))
            .chain(replicas.into_iter().map(|r| (r, QueueMode::ReadOnly)));
        for (server, mode) in servers {
            let pool = ScalingWorkerPool::new(
                server.clone(),
                Arc::clone(&factory),
                Arc::clone(&queue),
                mode,
                pool_config,
            );
            members.push(GroupMember { server, pool });
        }

        Self {
            identity,
            members,
            queue,
        }
    }

    /// Structural identity.
    pub fn identity(&self) -> &GroupIdentity {
        &self.identity
    }

    /// Master member.
    pub fn master(&self) -> &ServerRow {
        &self.members[0].server
    }

    /// Members, master first.
    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    /// Number of physical databases.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Shared queue.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Start every pool that is not running yet.
    pub fn activate(&self) {
        for member in &self.members {
            member.pool.start();
        }
    }

    /// Wake the master pool.
    pub fn wake_master(&self) -> bool {
        self.members[0].pool.wake_up()
    }

    /// Wake the pool of member `index`.
    pub fn wake_member(&self, index: usize) -> bool {
        self.members
            .get(index)
            .is_some_and(|member| member.pool.wake_up())
    }

    /// Nothing queued and no worker busy.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.members.iter().all(|m| !m.pool.is_busy())
    }

    /// Status snapshot.
    pub fn status(&self) -> Value {
        let master = self.master().endpoint();
        let (read, write) = (self.queue.read_len(), self.queue.write_len());
        metrics::set_queue_depth(&master, read, write);
        json!({
            "masterDB": master,
            "readQueueSize": read,
            "writeQueueSize": write,
            "dbInfos": self.members.iter().map(|m| m.pool.status().to_json()).collect::<Vec<_>>(),
        })
    }
}
