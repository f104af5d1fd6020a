//! Two-level IA-32 page tables and the self-referencing page-directory
//! trick (`spec.md` §4.1).
//!
//! The last PDE of every page directory points back at the directory
//! itself. That one entry is what lets [`pde_ptr`]/[`pte_ptr`] compute a
//! virtual address that aliases the *currently active* paging structures,
//! regardless of which process's CR3 is loaded: indexing through the
//! self-reference twice lands on a PDE, once lands on a PTE.

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::{self, PhysAddr, PoolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub fn pde_index(self) -> usize {
        self.0 >> 22
    }
    pub fn pte_index(self) -> usize {
        (self.0 >> 12) & 0x3FF
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

/// Index of the self-referencing entry: the last slot in a 1024-entry
/// directory.
const SELF_REF_INDEX: usize = 1023;

/// Virtual address of the currently active page directory, reached through
/// the self-reference: `pde_index = pte_index = 1023` selects the
/// directory frame itself as if it were a page table.
fn current_pgdir_vaddr() -> *mut u32 {
    ((SELF_REF_INDEX << 22) | (SELF_REF_INDEX << 12)) as *mut u32
}

/// Virtual address of the page table covering `v`, reached by indexing the
/// self-reference once (selects the directory as a table) and then by `v`'s
/// PDE index (selects the table covering `v`).
fn pte_ptr(v: VirtAddr) -> *mut u32 {
    let addr = (SELF_REF_INDEX << 22) | (v.pde_index() << 12) | (v.pte_index() * 4);
    addr as *mut u32
}

fn pde_ptr(v: VirtAddr) -> *mut u32 {
    let pgdir = current_pgdir_vaddr();
    unsafe { pgdir.add(v.pde_index()) }
}

/// `page_table_add(v, p)`: writes the PTE at `pte_ptr(v)`, auto-allocating
/// and zeroing the page table (a kernel-pool frame) if the PDE is absent.
pub fn page_table_add(v: VirtAddr, p: PhysAddr, kind: PoolKind) -> KernelResult<()> {
    // SAFETY: `pde_ptr`/`pte_ptr` alias the active paging structures through
    // the self-referencing PDE; both addresses are always mapped because
    // the directory maps itself, so these dereferences never fault.
    unsafe {
        let pde = pde_ptr(v);
        if *pde & PteFlags::PRESENT.bits() == 0 {
            let table_frame = frame_allocator::palloc(PoolKind::Kernel)?;
            *pde = table_frame.as_usize() as u32
                | (PteFlags::PRESENT | PteFlags::WRITABLE | user_bit(kind)).bits();
            // Zero the freshly mapped table through its own pte_ptr page,
            // which now resolves because the PDE above was just installed.
            let table_via_selfref = pte_ptr(VirtAddr(v.pde_index() << 22));
            core::ptr::write_bytes(table_via_selfref, 0, 1024);
        }
        let pte = pte_ptr(v);
        *pte = p.as_usize() as u32 | (PteFlags::PRESENT | PteFlags::WRITABLE | user_bit(kind)).bits();
    }
    invlpg(v);
    Ok(())
}

fn user_bit(kind: PoolKind) -> PteFlags {
    match kind {
        PoolKind::User => PteFlags::USER,
        PoolKind::Kernel => PteFlags::empty(),
    }
}

pub fn clear_pte(v: VirtAddr) {
    // SAFETY: same aliasing argument as `page_table_add`.
    unsafe {
        let pte = pte_ptr(v);
        *pte = 0;
    }
}

/// `addr_v2p`: walks the active paging structures to resolve a virtual
/// address to a physical one, returning `None` if unmapped.
pub fn addr_v2p(v: VirtAddr) -> Option<PhysAddr> {
    // SAFETY: reads only, through the always-mapped self-reference.
    unsafe {
        let pde = pde_ptr(v);
        if *pde & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        let pte = pte_ptr(v);
        if *pte & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        let frame = (*pte as usize) & config::PAGE_MASK;
        let offset = v.0 & !config::PAGE_MASK;
        Some(PhysAddr(frame + offset))
    }
}

pub fn invlpg(v: VirtAddr) {
    #[cfg(target_arch = "x86")]
    // SAFETY: invalidating a single TLB entry is always sound; it only
    // drops a cached translation, never creates an invalid one.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) v.0, options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = v;
}

/// Creates a new page directory whose upper 256 PDEs mirror the kernel's,
/// so every address space sees the same kernel mapping above
/// `KERNEL_BASE` (`spec.md` §4.4). Returns the physical frame backing the
/// new directory.
pub fn new_mirrored_page_directory() -> KernelResult<PhysAddr> {
    let frame = frame_allocator::palloc(PoolKind::Kernel)?;
    // Borrow a throwaway kernel-heap slot to map the new directory's frame
    // so it can be written before anything activates it as CR3.
    let scratch_v = VirtAddr(config::KERNEL_HEAP_BASE - config::PAGE_SIZE);
    page_table_add(scratch_v, frame, PoolKind::Kernel)?;
    // SAFETY: `scratch_v` was just freshly mapped to `frame` above, and the
    // self-reference keeps the currently active directory mapped too.
    unsafe {
        let dst = scratch_v.0 as *mut u32;
        core::ptr::write_bytes(dst, 0, 1024);
        let cur_dir = current_pgdir_vaddr();
        // Mirror PDEs 768..1023 (the kernel's 1 GiB range starting at
        // KERNEL_BASE = 0xC000_0000 = entry 768); the self-ref slot (1023)
        // is installed separately, pointing at this new directory's own
        // frame rather than the currently active one.
        for i in 768..1023 {
            *dst.add(i) = *cur_dir.add(i);
        }
        *dst.add(SELF_REF_INDEX) =
            frame.as_usize() as u32 | (PteFlags::PRESENT | PteFlags::WRITABLE).bits();
    }
    clear_pte(scratch_v);
    invlpg(scratch_v);
    Ok(frame)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn pde_pte_index_split_covers_full_address() {
        let v = VirtAddr(0xC010_3000);
        assert_eq!(v.pde_index(), 0xC01 >> 2);
        assert_eq!((v.pde_index() << 22) | (v.pte_index() << 12), v.0 & !0xFFF);
    }
}
