//! # Work Queue
//!
//! Dual FIFO (reads and writes) shared by every member of one database
//! group. Capacity is enforced at admission through
//! [`WorkQueue::try_push`]; the queue itself is unbounded.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::task::TaskBox;

/// Which FIFO a task goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lane {
    /// Served by every member.
    Read,
    /// Served by the master only.
    Write,
}

/// Which FIFOs a consumer serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    /// Master: writes first, then reads.
    ReadWrite,
    /// Replica: reads only.
    ReadOnly,
}

#[derive(Default)]
struct Lanes {
    read: VecDeque<TaskBox>,
    write: VecDeque<TaskBox>,
}

impl Lanes {
    fn lane(&mut self, lane: Lane) -> &mut VecDeque<TaskBox> {
        match lane {
            Lane::Read => &mut self.read,
            Lane::Write => &mut self.write,
        }
    }
}

/// Read/write task queue.
#[derive(Default)]
pub struct WorkQueue {
    lanes: Mutex<Lanes>,
}

impl WorkQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append without admission check.
    pub fn push(&self, task: TaskBox, lane: Lane) {
        self.lanes.lock().lane(lane).push_back(task);
    }

    /// Append if the lane holds fewer than `limit` tasks.
    ///
    /// The task is handed back untouched when refused.
    pub fn try_push(&self, task: TaskBox, lane: Lane, limit: usize) -> Result<(), TaskBox> {
        let mut lanes = self.lanes.lock();
        let queue = lanes.lane(lane);
        if queue.len() >= limit {
            return Err(task);
        }
        queue.push_back(task);
        Ok(())
    }

    /// Next task for a consumer in `mode`.
    pub fn pop(&self, mode: QueueMode) -> Option<TaskBox> {
        let mut lanes = self.lanes.lock();
        match mode {
            QueueMode::ReadWrite => lanes.write.pop_front().or_else(|| lanes.read.pop_front()),
            QueueMode::ReadOnly => lanes.read.pop_front(),
        }
    }

    /// Queued reads.
    pub fn read_len(&self) -> usize {
        self.lanes.lock().read.len()
    }

    /// Queued writes.
    pub fn write_len(&self) -> usize {
        self.lanes.lock().write.len()
    }

    /// Tasks visible to a consumer in `mode`.
    pub fn len(&self, mode: QueueMode) -> usize {
        let lanes = self.lanes.lock();
        match mode {
            QueueMode::ReadWrite => lanes.read.len() + lanes.write.len(),
            QueueMode::ReadOnly => lanes.read.len(),
        }
    }

    /// No task queued at all.
    pub fn is_empty(&self) -> bool {
        self.len(QueueMode::ReadWrite) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterError;
    use crate::pool::WorkerConnection;
    use crate::task::Task;
    use std::sync::Arc;

    struct NumberedTask {
        number: usize,
        order: Arc<Mutex<Vec<usize>>>,
    }

    impl Task for NumberedTask {
        fn process(self: Box<Self>, _connection: &mut WorkerConnection) {
            self.order.lock().push(self.number);
        }

        fn fail(self: Box<Self>, _error: RouterError) {
            self.order.lock().push(self.number);
        }
    }

    fn create_test_task(number: usize, order: &Arc<Mutex<Vec<usize>>>) -> TaskBox {
        Box::new(NumberedTask {
            number,
            order: Arc::clone(order),
        })
    }

    fn drain(queue: &WorkQueue, mode: QueueMode) {
        while let Some(task) = queue.pop(mode) {
            task.fail(RouterError::exiting());
        }
    }

    #[test]
    fn test_lengths() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new();
        queue.push(create_test_task(1, &order), Lane::Read);
        queue.push(create_test_task(2, &order), Lane::Write);
        queue.push(create_test_task(3, &order), Lane::Write);
        assert_eq!(queue.read_len(), 1);
        assert_eq!(queue.write_len(), 2);
        assert_eq!(queue.len(QueueMode::ReadWrite), 3);
        assert_eq!(queue.len(QueueMode::ReadOnly), 1);
    }

    #[test]
    fn test_read_only_never_pops_writes() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new();
        queue.push(create_test_task(1, &order), Lane::Write);
        assert!(queue.pop(QueueMode::ReadOnly).is_none());
        assert!(queue.pop(QueueMode::ReadWrite).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_writes_first_then_fifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new();
        queue.push(create_test_task(1, &order), Lane::Read);
        queue.push(create_test_task(2, &order), Lane::Write);
        queue.push(create_test_task(3, &order), Lane::Read);
        queue.push(create_test_task(4, &order), Lane::Write);

        drain(&queue, QueueMode::ReadWrite);
        assert_eq!(*order.lock(), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_try_push_refuses_without_mutation() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new();
        assert!(queue.try_push(create_test_task(1, &order), Lane::Write, 1).is_ok());
        let refused = queue.try_push(create_test_task(2, &order), Lane::Write, 1);
        assert!(refused.is_err());
        assert_eq!(queue.write_len(), 1);
        assert!(queue.try_push(create_test_task(3, &order), Lane::Read, 1).is_ok());
    }
}
