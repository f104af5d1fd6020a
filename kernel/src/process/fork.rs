//! `fork` (`spec.md` §4.4). Not copy-on-write: every mapped page the parent
//! owns is eagerly copied into the child through a kernel bounce buffer.

extern crate alloc;

use alloc::sync::Arc;

use crate::config;
use crate::error::KernelResult;
use crate::fs::blockfs;
use crate::mm::frame_allocator::PoolKind;
use crate::mm::page_table::{self, VirtAddr};
use crate::process::pcb::ProcessState;
use crate::sched::task::Task;

/// Performs the 6-step fork algorithm and returns the child task. The
/// caller (the syscall handler) is responsible for patching the *parent's*
/// saved register frame with the child's pid as its return value; this
/// function patches the *child's* frame to return 0, per `spec.md` §4.4
/// step 5.
pub fn fork(parent: &Arc<Task>) -> KernelResult<Arc<Task>> {
    // Step 1: duplicate the parent TCB's scheduling identity.
    let child = Task::new_kernel_thread(&parent.name, parent.priority);

    // Step 2: a fresh VA bitmap region, copying the parent's bits.
    let mut child_bitmap = crate::mm::vas::new_process_bitmap();
    {
        let parent_bitmap_guard = parent.va_bitmap.lock();
        let parent_bitmap = parent_bitmap_guard
            .as_ref()
            .expect("fork only ever called on a process, never a kernel thread");
        child_bitmap.clone_from(parent_bitmap);
    }

    // Step 3: a new page directory, upper half mirrored.
    let child_pgdir = page_table::new_mirrored_page_directory()?;

    // Step 4: copy every parent page into the child through a bounce
    // buffer, one page at a time.
    let parent_pgdir = parent.page_directory.lock().expect("process has a page directory");
    let mut bounce = alloc::boxed::Box::new([0u8; config::PAGE_SIZE]);
    let used_pages: alloc::vec::Vec<VirtAddr> = {
        let guard = parent.va_bitmap.lock();
        guard.as_ref().unwrap().iter_used().collect()
    };
    for v in used_pages {
        // Parent's page tables are the ones currently active for this
        // task, so a direct read through `v` is valid.
        // SAFETY: `v` is a page the parent's own VA bitmap marks used, and
        // the parent's page tables are the ones active while this syscall
        // handler runs.
        unsafe {
            core::ptr::copy_nonoverlapping(v.0 as *const u8, bounce.as_mut_ptr(), config::PAGE_SIZE);
        }
        activate(child_pgdir);
        crate::mm::get_one_page_raw(PoolKind::User, v)?;
        // SAFETY: `get_one_page_raw` just mapped `v` in the now-active
        // child address space.
        unsafe {
            core::ptr::copy_nonoverlapping(bounce.as_ptr(), v.0 as *mut u8, config::PAGE_SIZE);
        }
        activate(parent_pgdir);
    }

    *child.page_directory.lock() = Some(child_pgdir);
    *child.va_bitmap.lock() = Some(child_bitmap);

    // Step 5: the child's own stack is freshly built below, so its first
    // `switch_to` starts in the kernel via `fork_return_trampoline`, which
    // arranges for its syscall return value to read 0.
    build_child_return_stack(&child);

    // Step 6: open-file table, with open_count bumped on every referenced
    // inode, and cwd copied from the parent.
    let parent_proc = parent.process.lock();
    let parent_proc = parent_proc.as_ref().expect("fork only ever called on a process");
    let mut child_proc = ProcessState::new(parent_proc.cwd_inode);
    for (fd, slot) in parent_proc.fd_table.iter().enumerate() {
        if let Some(slot) = slot {
            blockfs::bump_open_count(slot.global_index);
            child_proc.fd_table[fd] = Some(*slot);
        }
    }
    *child.process.lock() = Some(child_proc);

    crate::process::table::register(child.clone());
    crate::sched::scheduler::spawn(child.clone());
    Ok(child)
}

fn activate(pgdir: crate::mm::frame_allocator::PhysAddr) {
    // SAFETY: `pgdir` is a mirrored directory built by
    // `new_mirrored_page_directory`, so the kernel stays mapped.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pgdir.as_usize(), options(nostack, preserves_flags));
    }
}

/// Builds a kernel stack for the child that, on first switch, runs a tiny
/// trampoline writing 0 into EAX (the syscall return-value register) before
/// falling through to the common interrupt-return path — step 5 of
/// `spec.md` §4.4, expressed without literally relocating the parent's
/// saved frame.
fn build_child_return_stack(child: &Arc<Task>) {
    use crate::arch::context::InitialStackFrame;
    let top = child.kernel_stack.top();
    let init_addr = top - core::mem::size_of::<InitialStackFrame>();
    // SAFETY: `init_addr` is within the child's own, not-yet-published
    // kernel stack.
    unsafe {
        let init = init_addr as *mut InitialStackFrame;
        init.write(InitialStackFrame {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            return_eip: crate::arch::intr_exit as usize as u32,
        });
        (*child.context_ptr()).esp = init_addr;
    }
}
