//! Global pid -> task table, backing `getpid`/`ps` (`spec.md` §4.8) and
//! fork's parent-pid bookkeeping.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::sched::task::Task;

static TABLE: Mutex<BTreeMap<u32, Arc<Task>>> = Mutex::new(BTreeMap::new());

pub fn register(task: Arc<Task>) {
    TABLE.lock().insert(task.pid, task);
}

pub fn unregister(pid: u32) {
    TABLE.lock().remove(&pid);
}

pub fn lookup(pid: u32) -> KernelResult<Arc<Task>> {
    TABLE
        .lock()
        .get(&pid)
        .cloned()
        .ok_or(KernelError::ProcessNotFound { pid: pid as i32 })
}

/// `ps` (`spec.md` §4.8): a snapshot of every live task's pid/name/priority
/// for display by the shell.
pub fn snapshot() -> alloc::vec::Vec<(u32, alloc::string::String, u8)> {
    TABLE
        .lock()
        .values()
        .map(|t| (t.pid, t.name.clone(), t.priority))
        .collect()
}
