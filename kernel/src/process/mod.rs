//! Process layer (`spec.md` §3, §4.4): the state a [`Task`](crate::sched::task::Task)
//! carries only when it is a process rather than a bare kernel thread — an
//! address space, a file descriptor table, and a working directory — plus
//! the pid table and fork/creation machinery built on top of it.

pub mod creation;
pub mod fork;
pub mod pcb;
pub mod table;

pub use pcb::{FdSlot, ProcessState};

use alloc::sync::Arc;

use crate::error::KernelResult;
use crate::fs::blockfs::InodeNo;
use crate::sched::scheduler;
use crate::sched::task::Task;

/// Creates a user process at `entry_eip` and enqueues it on the scheduler.
pub fn spawn(name: &str, priority: u8, entry_eip: u32) -> KernelResult<Arc<Task>> {
    creation::create_process(name, priority, entry_eip)
}

/// Starts a kernel-mode service thread (the shell) that still carries
/// [`ProcessState`] — a cwd and an fd table — without the address space a
/// real user process gets. Rooted at `spec.md`'s root inode.
pub fn spawn_kernel_service(
    name: &str,
    priority: u8,
    entry: extern "C" fn() -> !,
) -> Arc<Task> {
    let task = Task::new_kernel_thread_with_entry(name, priority, entry);
    *task.process.lock() = Some(ProcessState::new(crate::config::ROOT_INODE_NO));
    table::register(task.clone());
    scheduler::spawn(task.clone());
    task
}

/// `fork` (`spec.md` §4.4): duplicates the calling process.
pub fn fork(parent: &Arc<Task>) -> KernelResult<Arc<Task>> {
    fork::fork(parent)
}

pub fn current() -> Arc<Task> {
    scheduler::current_task()
}

/// `getpid` (`spec.md` §6).
pub fn getpid() -> u32 {
    current().pid
}

/// `ps` (`spec.md` §4.8): a pid/name/priority snapshot of every live task.
pub fn ps() -> alloc::vec::Vec<(u32, alloc::string::String, u8)> {
    table::snapshot()
}

/// Runs `f` with exclusive access to the current task's process state.
/// Panics if called from a bare kernel thread, which has none.
pub fn with_current_state<R>(f: impl FnOnce(&mut ProcessState) -> R) -> R {
    let task = current();
    let mut guard = task.process.lock();
    let state = guard
        .as_mut()
        .expect("with_current_state called from a kernel thread");
    f(state)
}

pub fn current_cwd() -> InodeNo {
    with_current_state(|state| state.cwd_inode)
}

pub fn set_current_cwd(inode: InodeNo) {
    with_current_state(|state| state.cwd_inode = inode);
}
