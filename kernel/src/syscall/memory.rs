//! `malloc`/`free` syscall handlers (`spec.md` §4.2, §4.8): thin wrappers
//! around the calling process's [`KHeap`](crate::mm::heap::KHeap), which
//! allocates from the user frame pool against that process's VA bitmap.

use core::ptr::NonNull;

use crate::error::{KernelError, KernelResult};
use crate::process;

pub fn sys_malloc(size: usize) -> KernelResult<usize> {
    let task = process::current();
    let mut bitmap_guard = task.va_bitmap.lock();
    let bitmap = bitmap_guard
        .as_mut()
        .expect("malloc called from a process without a VA bitmap");
    let mut process_guard = task.process.lock();
    let state = process_guard
        .as_mut()
        .expect("malloc called from a kernel thread");
    let ptr = state.heap.alloc(size, bitmap)?;
    Ok(ptr.as_ptr() as usize)
}

pub fn sys_free(ptr: usize) -> KernelResult<usize> {
    let ptr = NonNull::new(ptr as *mut u8).ok_or(KernelError::InvalidArgument {
        name: "ptr",
        value: "null",
    })?;
    let task = process::current();
    let mut bitmap_guard = task.va_bitmap.lock();
    let bitmap = bitmap_guard
        .as_mut()
        .expect("free called from a process without a VA bitmap");
    let mut process_guard = task.process.lock();
    let state = process_guard
        .as_mut()
        .expect("free called from a kernel thread");
    state.heap.free(ptr, bitmap);
    Ok(0)
}
