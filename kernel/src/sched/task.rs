//! The task control block (`spec.md` §3, §4.3, §4.4).
//!
//! The original kernel embeds the TCB at the base of its owner's 4 KiB
//! kernel stack and recovers it from any live ESP by masking with
//! `0xFFFFF000`. On a single CPU the same invariant (exactly one task is
//! "current" at a time) is expressed more directly in safe Rust as a
//! global `current task` slot the scheduler swaps on every switch; see
//! `DESIGN.md` for why this kernel takes that substitution instead of
//! modelling the raw stack-pointer trick. The stack-magic sentinel this
//! section also checks on every tick to catch kernel-stack overflow is
//! kept as-is: a known value written at the bottom of the stack page.
extern crate alloc;

use alloc::string::String;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::context::Context;
use crate::config;
use crate::mm::frame_allocator::PhysAddr;
use crate::mm::vas::VaBitmap;
use crate::process::pcb::ProcessState;

pub const STACK_MAGIC: u32 = 0x1989_0604;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Dying,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

pub fn alloc_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// A kernel-pool page reserved for one task's kernel stack. The sentinel at
/// the bottom is checked by the timer tick; tripping it is a fatal error
/// (`spec.md` §7), since it means the task's own kernel-mode execution
/// (most often a deep syscall) overran its stack.
pub struct KernelStack {
    storage: alloc::boxed::Box<[u8; config::PAGE_SIZE]>,
}

impl KernelStack {
    pub fn new() -> Self {
        let mut storage = alloc::boxed::Box::new([0u8; config::PAGE_SIZE]);
        storage[0..4].copy_from_slice(&STACK_MAGIC.to_le_bytes());
        Self { storage }
    }

    pub fn top(&self) -> usize {
        self.storage.as_ptr() as usize + config::PAGE_SIZE
    }

    pub fn check_magic(&self) -> bool {
        u32::from_le_bytes(self.storage[0..4].try_into().unwrap()) == STACK_MAGIC
    }
}

pub struct Task {
    pub pid: u32,
    pub name: String,
    pub priority: u8,
    pub state: Mutex<TaskState>,
    pub ticks_remaining: Mutex<u8>,
    /// Only ever touched by `scheduler::schedule` with interrupts disabled
    /// on this, the only, CPU; a `Mutex` would have to be held across the
    /// raw stack switch in `switch_to`, which never "returns" through a
    /// guard's `Drop`.
    context: UnsafeCell<Context>,
    pub kernel_stack: KernelStack,
    /// `None` for kernel threads; `Some` for processes (`spec.md` §4.4).
    pub page_directory: Mutex<Option<PhysAddr>>,
    pub va_bitmap: Mutex<Option<VaBitmap>>,
    pub process: Mutex<Option<ProcessState>>,
    pub parent_pid: Option<u32>,
}

// SAFETY: `context`'s `UnsafeCell` is only ever dereferenced by
// `scheduler::schedule` on the single CPU this kernel targets, with
// interrupts disabled for the duration.
unsafe impl Sync for Task {}

impl Task {
    /// SAFETY: caller must hold no other live reference to this task's
    /// context and must be `scheduler::schedule` running with interrupts
    /// disabled.
    pub unsafe fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    pub fn new_kernel_thread(name: &str, priority: u8) -> alloc::sync::Arc<Task> {
        alloc::sync::Arc::new(Task {
            pid: alloc_pid(),
            name: String::from(name),
            priority,
            state: Mutex::new(TaskState::Ready),
            ticks_remaining: Mutex::new(priority),
            context: UnsafeCell::new(Context::zeroed()),
            kernel_stack: KernelStack::new(),
            page_directory: Mutex::new(None),
            va_bitmap: Mutex::new(None),
            process: Mutex::new(None),
            parent_pid: None,
        })
    }

    /// Builds a kernel thread whose first `switch_to` into it runs `entry`
    /// on a fresh kernel stack, via the same `InitialStackFrame` convention
    /// `process::creation` uses for the user-mode path (`spec.md` §4.3): the
    /// four callee-saved registers `switch_to`'s epilogue pops don't matter
    /// on first entry, only `return_eip`.
    pub fn new_kernel_thread_with_entry(
        name: &str,
        priority: u8,
        entry: extern "C" fn() -> !,
    ) -> alloc::sync::Arc<Task> {
        let task = Self::new_kernel_thread(name, priority);
        let top = task.kernel_stack.top();
        let frame_addr = top - core::mem::size_of::<crate::arch::context::InitialStackFrame>();
        // SAFETY: `frame_addr` lies within this task's own, exclusively-owned
        // kernel stack page, which hasn't been published to the scheduler yet.
        unsafe {
            let frame = frame_addr as *mut crate::arch::context::InitialStackFrame;
            frame.write(crate::arch::context::InitialStackFrame {
                edi: 0,
                esi: 0,
                ebx: 0,
                ebp: 0,
                return_eip: entry as usize as u32,
            });
            (*task.context_ptr()).esp = frame_addr;
        }
        task
    }

    pub fn is_process(&self) -> bool {
        self.page_directory.lock().is_some()
    }

    pub fn reload_quantum(&self) {
        *self.ticks_remaining.lock() = self.priority;
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
    }
}
impl Eq for Task {}
