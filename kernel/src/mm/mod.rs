//! Physical and virtual memory management (`spec.md` §4.1, §4.2).
//!
//! Two physical frame pools (kernel, user), a virtual address reservation
//! bitmap per address space, manual two-level page tables built on the
//! self-referencing page-directory trick, and a slab-style small-object
//! allocator for `malloc`/`free`.

pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod user_validation;
pub mod vas;

pub use frame_allocator::{PhysAddr, PoolKind};
pub use page_table::VirtAddr;

use crate::config;
use crate::error::{KernelError, KernelResult};

/// Brings up the two frame pools, the kernel VA bitmap, and the kernel heap.
/// Must run once, before interrupts are enabled, with the identity/boot
/// page tables from the boot loader still active.
pub fn init(total_mem_bytes: usize) {
    let total_frames = total_mem_bytes / config::PAGE_SIZE;
    frame_allocator::init(total_frames);
    vas::init_kernel_bitmap();
    heap::init();
    log::info!(
        "mm: {} frames total, {} reserved below 1MiB+boot tables",
        total_frames,
        config::LOW_MEM_RESERVED_PAGES
    );
}

/// `malloc_page` (`spec.md` §4.1): reserves `n` contiguous virtual pages
/// from the given pool's VA bitmap, then maps each to a freshly allocated
/// frame from the same pool. On a sub-allocation failure, the partial
/// mapping is left in place: a documented, intentional leak rather than a
/// rollback, matching the original kernel's policy.
pub fn malloc_page(kind: PoolKind, n: usize, bitmap: &mut vas::VaBitmap) -> KernelResult<VirtAddr> {
    let vaddr = vas::vaddr_alloc(bitmap, kind, n)?;
    for i in 0..n {
        let v = VirtAddr(vaddr.0 + i * config::PAGE_SIZE);
        let frame = frame_allocator::palloc(kind)?;
        page_table::page_table_add(v, frame, kind)?;
    }
    Ok(vaddr)
}

/// `mfree_page` (`spec.md` §4.1): reverses `malloc_page` page by page.
pub fn mfree_page(kind: PoolKind, vaddr: VirtAddr, n: usize, bitmap: &mut vas::VaBitmap) {
    for i in 0..n {
        let v = VirtAddr(vaddr.0 + i * config::PAGE_SIZE);
        if let Some(frame) = page_table::addr_v2p(v) {
            frame_allocator::pfree(kind, frame);
            page_table::clear_pte(v);
            page_table::invlpg(v);
        }
    }
    vas::vaddr_free(bitmap, vaddr, n);
}

/// `get_a_page` (`spec.md` §4.1): binds a specific virtual address to a
/// fresh frame, marking the VA bit. Rejects a kernel/user-pool mismatch as
/// fatal, since that indicates a logic error in the caller, not a resource
/// shortage.
pub fn get_a_page(kind: PoolKind, v: VirtAddr, bitmap: &mut vas::VaBitmap) -> KernelResult<()> {
    if kind != bitmap.kind() {
        panic!("get_a_page: pool/bitmap kind mismatch");
    }
    vas::mark_used(bitmap, v)?;
    let frame = frame_allocator::palloc(kind)?;
    page_table::page_table_add(v, frame, kind)
}

/// `get_one_page_without_operate_vaddr_bitmap` (`spec.md` §4.4): identical
/// to [`get_a_page`] but does not touch the VA bitmap, since fork copies the
/// child's VA bitmap wholesale before any mapping exists.
pub fn get_one_page_raw(kind: PoolKind, v: VirtAddr) -> KernelResult<()> {
    let frame = frame_allocator::palloc(kind)?;
    page_table::page_table_add(v, frame, kind)
}

pub fn addr_v2p(v: VirtAddr) -> KernelResult<PhysAddr> {
    page_table::addr_v2p(v).ok_or(KernelError::InvalidArgument {
        name: "vaddr",
        value: "unmapped",
    })
}
