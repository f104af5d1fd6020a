//! Process creation (`spec.md` §4.4): allocates a TCB, gives it a user VA
//! bitmap and a mirrored page directory, maps in a user stack, and arranges
//! for its first `switch_to` to land in user mode at the entry point via a
//! synthetic interrupt-return frame.

extern crate alloc;

use alloc::sync::Arc;

use crate::arch::context::InitialStackFrame;
use crate::arch::gdt::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::config;
use crate::error::KernelResult;
use crate::mm::page_table::VirtAddr;
use crate::mm::{frame_allocator::PoolKind, page_table};
use crate::process::pcb::ProcessState;
use crate::sched::task::Task;

/// The frame the common interrupt-return trampoline expects on the stack:
/// a synthetic version of what the CPU itself pushes on a ring3->ring0
/// interrupt, laid out so `iretd` sends control to user mode.
#[repr(C)]
struct FakeInterruptFrame {
    eip: u32,
    cs: u32,
    eflags: u32,
    user_esp: u32,
    user_ss: u32,
}

const EFLAGS_IF: u32 = 1 << 9;
const USER_STACK_TOP: usize = 0xC000_0000 - config::PAGE_SIZE;

/// Creates a process that will run in user mode at `entry_eip`. Loading an
/// executable image into that address space is a separate, out-of-scope
/// concern (`spec.md` §1 Non-goals); this builds the task and stack
/// machinery a loader would hand an entry point to.
pub fn create_process(name: &str, priority: u8, entry_eip: u32) -> KernelResult<Arc<Task>> {
    let task = Task::new_kernel_thread(name, priority);

    let pgdir = page_table::new_mirrored_page_directory()?;
    *task.page_directory.lock() = Some(pgdir);

    let mut va_bitmap = crate::mm::vas::new_process_bitmap();
    crate::mm::get_a_page(PoolKind::User, VirtAddr(USER_STACK_TOP), &mut va_bitmap)?;
    *task.va_bitmap.lock() = Some(va_bitmap);

    *task.process.lock() = Some(ProcessState::new(config::ROOT_INODE_NO));

    build_initial_stack(&task, entry_eip);
    crate::process::table::register(task.clone());
    crate::sched::scheduler::spawn(task.clone());
    Ok(task)
}

/// Writes the `InitialStackFrame` + `FakeInterruptFrame` combination at the
/// top of the task's kernel stack so the very first `switch_to` into it
/// returns through the interrupt-return trampoline straight into ring 3 at
/// `entry_eip`.
fn build_initial_stack(task: &Arc<Task>, entry_eip: u32) {
    let top = task.kernel_stack.top();
    let frame_addr = top - core::mem::size_of::<FakeInterruptFrame>();
    // SAFETY: `frame_addr` lies within this task's own, exclusively-owned
    // kernel stack page, which hasn't been switched to yet.
    unsafe {
        let frame = frame_addr as *mut FakeInterruptFrame;
        frame.write(FakeInterruptFrame {
            eip: entry_eip,
            cs: USER_CODE_SELECTOR as u32,
            eflags: EFLAGS_IF,
            user_esp: USER_STACK_TOP as u32 + config::PAGE_SIZE as u32,
            user_ss: USER_DATA_SELECTOR as u32,
        });
    }

    let init_addr = frame_addr - core::mem::size_of::<InitialStackFrame>();
    // SAFETY: same stack, still unpublished.
    unsafe {
        let init = init_addr as *mut InitialStackFrame;
        init.write(InitialStackFrame {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            return_eip: crate::arch::intr_exit as usize as u32,
        });
    }

    // SAFETY: sound because the task hasn't been published to the
    // scheduler yet (`spawn` happens after this call returns).
    unsafe {
        (*task.context_ptr()).esp = init_addr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_frame_sizes_are_stable() {
        assert_eq!(core::mem::size_of::<FakeInterruptFrame>(), 20);
        assert_eq!(core::mem::size_of::<InitialStackFrame>(), 20);
    }
}
