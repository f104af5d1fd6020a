//! Counting semaphore with a strict-FIFO wait list (`spec.md` §4.3).
//!
//! `down`/`up` both run their critical section with interrupts disabled;
//! on a single CPU that is sufficient mutual exclusion without any
//! additional lock. There is no priority inheritance and no cancellation:
//! a blocked task cannot be woken by anything other than a matching `up`.

extern crate alloc;

use alloc::sync::Arc;

use crate::arch::interrupts::{self, InterruptGuard};
use crate::sched::task::Task;
use crate::util::list::FifoQueue;

pub struct Semaphore {
    inner: spin::Mutex<SemaphoreState>,
}

struct SemaphoreState {
    value: usize,
    waiters: FifoQueue<Arc<Task>>,
}

impl Semaphore {
    pub const fn new(initial: usize) -> Self {
        Self {
            inner: spin::Mutex::new(SemaphoreState {
                value: initial,
                waiters: FifoQueue::new(),
            }),
        }
    }

    /// `down`: while the value is 0, enqueue the calling task and block;
    /// decrement once it is scheduled back in.
    pub fn down(&self) {
        let _guard = InterruptGuard::disable();
        loop {
            {
                let mut state = self.inner.lock();
                if state.value > 0 {
                    state.value -= 1;
                    return;
                }
                let me = crate::sched::scheduler::current_task();
                state.waiters.push_back(me);
            }
            crate::sched::scheduler::block_current();
        }
    }

    /// `up`: pop one waiter (if any) and unblock it, then increment.
    pub fn up(&self) {
        let _guard = InterruptGuard::disable();
        let mut state = self.inner.lock();
        if let Some(waiter) = state.waiters.pop_front() {
            crate::sched::scheduler::unblock(&waiter);
        }
        state.value += 1;
    }

    pub fn value(&self) -> usize {
        interrupts::without_interrupts(|| self.inner.lock().value)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn down_decrements_available_value() {
        let sem = Semaphore::new(2);
        sem.down();
        assert_eq!(sem.value(), 1);
        sem.down();
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn up_increments_with_no_waiters() {
        let sem = Semaphore::new(0);
        sem.up();
        assert_eq!(sem.value(), 1);
    }
}
