//! Process-specific state layered on top of a [`Task`](crate::sched::task::Task)
//! (`spec.md` §4.4): the file descriptor table and current working
//! directory a kernel thread simply doesn't have.

use crate::config;
use crate::fs::blockfs::InodeNo;
use crate::mm::frame_allocator::PoolKind;
use crate::mm::heap::KHeap;

/// One process-local file descriptor slot, indexing into the filesystem's
/// global open-file table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdSlot {
    pub global_index: usize,
}

pub struct ProcessState {
    pub fd_table: [Option<FdSlot>; config::FD_TABLE_SIZE],
    pub cwd_inode: InodeNo,
    pub exit_code: Option<i32>,
    /// Backs the `malloc`/`free` syscalls; allocates from the user frame
    /// pool against the owning [`Task`](crate::sched::task::Task)'s
    /// `va_bitmap`.
    pub heap: KHeap,
}

impl ProcessState {
    pub fn new(cwd_inode: InodeNo) -> Self {
        Self {
            fd_table: [None; config::FD_TABLE_SIZE],
            cwd_inode,
            exit_code: None,
            heap: KHeap::new(PoolKind::User),
        }
    }

    /// Installs a global file-table index into the first free fd slot.
    /// Fds 0/1/2 are reserved for stdin/stdout/stderr and never handed out
    /// here (`spec.md` §6).
    pub fn install_fd(&mut self, global_index: usize) -> Option<i32> {
        for (i, slot) in self.fd_table.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(FdSlot { global_index });
                return Some(i as i32);
            }
        }
        None
    }

    pub fn fd_global_index(&self, fd: i32) -> Option<usize> {
        if fd < 0 || fd as usize >= config::FD_TABLE_SIZE {
            return None;
        }
        self.fd_table[fd as usize].map(|s| s.global_index)
    }

    pub fn clear_fd(&mut self, fd: i32) -> Option<usize> {
        if fd < 0 || fd as usize >= config::FD_TABLE_SIZE {
            return None;
        }
        self.fd_table[fd as usize].take().map(|s| s.global_index)
    }
}
