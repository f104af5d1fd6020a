//! ferrite: a small 32-bit protected-mode IA-32 kernel (`spec.md` §1).
//!
//! This crate builds both as the bare-metal kernel binary (`target_os =
//! "none"`, `target_arch = "x86"`) and, for `cargo test`, as a host library
//! so `fs`/`mm`/`sched` logic can be exercised against `RamBlockDevice` and
//! friends without QEMU.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: back the kernel heap with the mapped region starting at
// `config::KERNEL_HEAP_BASE` (see `mm::heap`'s `kmalloc`/`kfree`, which this
// allocator does not replace — it backs ordinary `Vec`/`Box`/`String` use
// inside kernel code, while `mm::heap::KHeap` is the user-facing
// `malloc`/`free` slab allocator built on top of the frame pools).
#[cfg(all(target_arch = "x86", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Maps the kernel heap allocator onto its backing region. Must run once,
/// after `mm::init` has brought up the frame pools and page tables: it
/// reserves and maps its pages the same way any other kernel-pool caller
/// does, through `mm::malloc_page` against the kernel VA bitmap, rather than
/// claiming a VA range the bitmap doesn't know about.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init_kernel_allocator() {
    let pages = config::KERNEL_HEAP_SIZE / config::PAGE_SIZE;
    let vaddr = {
        let mut bitmap = mm::vas::kernel_bitmap().lock();
        mm::malloc_page(mm::PoolKind::Kernel, pages, &mut bitmap)
            .expect("kernel heap reservation failed")
    };
    unsafe {
        ALLOCATOR.lock().init(vaddr.0 as *mut u8, config::KERNEL_HEAP_SIZE);
    }
}

// Host target: the system allocator, so unit tests can use Vec/String/Box
// normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod log_service;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod shell;
pub mod sync;
pub mod syscall;
pub mod util;

mod test_framework;

pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

#[cfg(test)]
pub use test_framework::test_runner;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler. Panic is intentional: heap exhaustion in a
/// no_std kernel has no recovery path other than crashing the offending task
/// (`spec.md` §7), and `alloc_error_handler`'s ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
