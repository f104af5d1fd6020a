//! The scheduler's run queue: a strict FIFO of ready tasks (`spec.md`
//! §4.3). The idle task is never enqueued here; it's summoned directly
//! whenever the queue would otherwise be empty.

extern crate alloc;

use alloc::sync::Arc;

use crate::sched::task::Task;
use crate::util::list::FifoQueue;

pub struct RunQueue {
    ready: FifoQueue<Arc<Task>>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self { ready: FifoQueue::new() }
    }

    pub fn push_back(&mut self, task: Arc<Task>) {
        self.ready.push_back(task);
    }

    pub fn pop_front(&mut self) -> Option<Arc<Task>> {
        self.ready.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn remove(&mut self, task: &Arc<Task>) -> bool {
        self.ready.remove(task)
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }
}
