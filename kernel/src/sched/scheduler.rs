//! `schedule()`, the idle task, and the blocking/unblocking primitives
//! every other synchronization type in this kernel is built on
//! (`spec.md` §4.3).

extern crate alloc;

use alloc::sync::Arc;

use spin::Mutex;

use crate::arch::context::{switch_to, Context};
use crate::arch::interrupts::InterruptGuard;
use crate::sched::queue::RunQueue;
use crate::sched::task::{Task, TaskState};

static RUN_QUEUE: Mutex<RunQueue> = Mutex::new(RunQueue::new());
static CURRENT: Mutex<Option<Arc<Task>>> = Mutex::new(None);
static IDLE_TASK: Mutex<Option<Arc<Task>>> = Mutex::new(None);

pub fn init() {
    let idle = Task::new_kernel_thread("idle", 1);
    *idle.state.lock() = TaskState::Blocked;
    *IDLE_TASK.lock() = Some(idle.clone());
    *CURRENT.lock() = Some(idle);
}

/// Adds a freshly created task to the run queue (`spec.md` §4.4: process
/// creation "enqueues the task").
pub fn spawn(task: Arc<Task>) {
    *task.state.lock() = TaskState::Ready;
    RUN_QUEUE.lock().push_back(task);
}

pub fn current_task() -> Arc<Task> {
    CURRENT.lock().clone().expect("scheduler not initialized")
}

fn idle_task() -> Arc<Task> {
    IDLE_TASK.lock().clone().expect("scheduler not initialized")
}

/// Decrements the running task's quantum; when it hits zero, reschedules.
/// Called from the timer IRQ handler, which the CPU has already entered
/// with interrupts disabled.
pub fn on_timer_tick() {
    let cur = current_task();
    let mut ticks = cur.ticks_remaining.lock();
    if *ticks > 0 {
        *ticks -= 1;
    }
    let expired = *ticks == 0;
    drop(ticks);
    if expired {
        schedule();
    }
}

/// `schedule` (`spec.md` §4.3). Caller contract: interrupts disabled.
/// Moves the current task back onto the run queue if it's still runnable,
/// falls back to the idle task if the queue is empty, activates the next
/// task's address space, and performs the raw register-state switch.
pub fn schedule() {
    debug_assert!(!crate::arch::interrupts::are_enabled(), "schedule() requires interrupts disabled");

    let cur = current_task();
    {
        let mut state = cur.state.lock();
        if *state == TaskState::Running {
            *state = TaskState::Ready;
            drop(state);
            RUN_QUEUE.lock().push_back(cur.clone());
        }
    }

    let next = {
        let mut rq = RUN_QUEUE.lock();
        if rq.is_empty() {
            let idle = idle_task();
            *idle.state.lock() = TaskState::Ready;
            idle
        } else {
            rq.pop_front().expect("checked non-empty above")
        }
    };

    if Arc::ptr_eq(&cur, &next) {
        *cur.state.lock() = TaskState::Running;
        return;
    }

    assert!(cur.kernel_stack.check_magic(), "kernel stack overflow detected on task {}", cur.pid);

    *next.state.lock() = TaskState::Running;
    next.reload_quantum();

    if let Some(pgdir) = *next.page_directory.lock() {
        activate_address_space(pgdir);
        crate::arch::gdt::set_kernel_stack(next.kernel_stack.top());
    }

    let prev_ptr = {
        // SAFETY: interrupts are disabled and `cur` is being retired from
        // `CURRENT` in the same step, so no other code observes this
        // context concurrently.
        unsafe { cur.context_ptr() }
    };
    let next_ptr = {
        // SAFETY: `next` is not yet published as `CURRENT`, and its
        // context was last written either by a prior `schedule()` or by
        // its initial stack setup at creation time.
        (unsafe { next.context_ptr() }) as *const Context
    };

    *CURRENT.lock() = Some(next);

    // SAFETY: `prev_ptr`/`next_ptr` point at two distinct, live tasks'
    // contexts; both kernel stacks were set up to make `switch_to`'s
    // epilogue return into valid code (see `sched::task::InitialStackFrame`
    // and `process::creation`).
    unsafe { switch_to(prev_ptr, next_ptr) };
}

fn activate_address_space(pgdir: crate::mm::frame_allocator::PhysAddr) {
    // SAFETY: `pgdir` was built by `mm::page_table::new_mirrored_page_directory`
    // and always mirrors the kernel's upper half, so loading it cannot
    // strand the kernel without its own mappings.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pgdir.as_usize(), options(nostack, preserves_flags));
    }
}

/// `thread_block`: marks the current task blocked and reschedules. Must be
/// called with the caller already having recorded itself wherever it will
/// be woken from (a semaphore's wait list, the keyboard ring, etc.).
pub fn block_current() {
    let _guard = InterruptGuard::disable();
    let cur = current_task();
    *cur.state.lock() = TaskState::Blocked;
    schedule();
}

/// `thread_unblock`: moves a blocked task back onto the run queue.
pub fn unblock(task: &Arc<Task>) {
    let _guard = InterruptGuard::disable();
    let mut state = task.state.lock();
    if *state == TaskState::Blocked {
        *state = TaskState::Ready;
        drop(state);
        RUN_QUEUE.lock().push_back(task.clone());
    }
}

/// `thread_yield`: cooperative yield, equivalent to the quantum expiring
/// early.
pub fn yield_now() {
    let _guard = InterruptGuard::disable();
    schedule();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn run_queue_preserves_fifo_order() {
        let mut rq = RunQueue::new();
        let a = Task::new_kernel_thread("a", 5);
        let b = Task::new_kernel_thread("b", 5);
        rq.push_back(a.clone());
        rq.push_back(b.clone());
        assert!(Arc::ptr_eq(&rq.pop_front().unwrap(), &a));
        assert!(Arc::ptr_eq(&rq.pop_front().unwrap(), &b));
    }
}
