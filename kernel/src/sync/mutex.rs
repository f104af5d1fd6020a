//! Recursive mutex built on top of [`Semaphore`] (`spec.md` §4.3): the same
//! task may reacquire it without deadlocking, tracked by a holder pid and a
//! repeat count.

extern crate alloc;

use core::sync::atomic::{AtomicU32, Ordering};

use super::semaphore::Semaphore;

const NO_HOLDER: u32 = 0;

pub struct RecursiveMutex {
    inner: Semaphore,
    holder: AtomicU32,
    repeat_count: spin::Mutex<u32>,
}

impl RecursiveMutex {
    pub const fn new() -> Self {
        Self {
            inner: Semaphore::new(1),
            holder: AtomicU32::new(NO_HOLDER),
            repeat_count: spin::Mutex::new(0),
        }
    }

    pub fn acquire(&self) {
        let me = crate::sched::scheduler::current_task().pid;
        if self.holder.load(Ordering::Acquire) == me {
            *self.repeat_count.lock() += 1;
            return;
        }
        self.inner.down();
        self.holder.store(me, Ordering::Release);
        *self.repeat_count.lock() = 1;
    }

    pub fn release(&self) {
        let me = crate::sched::scheduler::current_task().pid;
        assert_eq!(self.holder.load(Ordering::Acquire), me, "mutex released by non-holder");
        let mut count = self.repeat_count.lock();
        if *count > 1 {
            *count -= 1;
            return;
        }
        *count = 0;
        drop(count);
        self.holder.store(NO_HOLDER, Ordering::Release);
        self.inner.up();
    }

    /// Runs `f` with the mutex held, releasing it afterward even on an
    /// early return from `f`.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.acquire();
        let r = f();
        self.release();
        r
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
