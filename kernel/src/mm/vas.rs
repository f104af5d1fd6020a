//! Virtual address reservation bitmaps (`spec.md` §4.1).
//!
//! Distinct from page-table presence: a bit set here means "this virtual
//! page belongs to this address space", independent of whether a page table
//! entry currently backs it. The kernel owns one bitmap covering its heap
//! region; every process owns its own, covering its user image region.

use spin::Mutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::PoolKind;
use crate::mm::page_table::VirtAddr;
use crate::util::bitmap::Bitmap;

/// 8 MiB of VA space per bitmap (2048 pages) is enough for the kernel heap
/// and for a process's user image in this kernel's scale.
const MAX_PAGES: usize = 2048;
const BITMAP_BYTES: usize = MAX_PAGES / 8;

pub struct VaBitmap {
    bits: [u8; BITMAP_BYTES],
    base: usize,
    kind: PoolKind,
}

impl VaBitmap {
    pub const fn new_empty(base: usize, kind: PoolKind) -> Self {
        Self {
            bits: [0u8; BITMAP_BYTES],
            base,
            kind,
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn clone_from(&mut self, other: &VaBitmap) {
        self.bits = other.bits;
        self.base = other.base;
        self.kind = other.kind;
    }

    /// Iterates every virtual address currently marked used, in ascending
    /// order. Used by `fork` to walk the parent's mappings (`spec.md` §4.4).
    pub fn iter_used(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        let base = self.base;
        (0..MAX_PAGES).filter_map(move |bit| {
            let byte = self.bits[bit / 8];
            if byte & (1 << (bit % 8)) != 0 {
                Some(VirtAddr(base + bit * config::PAGE_SIZE))
            } else {
                None
            }
        })
    }
}

static KERNEL_BITMAP: Mutex<VaBitmap> =
    Mutex::new(VaBitmap::new_empty(config::KERNEL_HEAP_BASE, PoolKind::Kernel));

pub fn init_kernel_bitmap() {
    // no-op: the static is already zeroed; kept as an explicit init hook so
    // mm::init's ordering reads the same as the other subsystems.
}

pub fn kernel_bitmap() -> &'static Mutex<VaBitmap> {
    &KERNEL_BITMAP
}

/// `vaddr_alloc(pool_kind, n)` (`spec.md` §4.1): scans the appropriate VA
/// bitmap for `n` contiguous zero bits and reserves them.
pub fn vaddr_alloc(bitmap: &mut VaBitmap, kind: PoolKind, n: usize) -> KernelResult<VirtAddr> {
    if bitmap.kind != kind {
        panic!("vaddr_alloc: pool/bitmap kind mismatch");
    }
    let base = bitmap.base;
    let mut bm = Bitmap::new(&mut bitmap.bits);
    let start = bm
        .alloc_contiguous(n)
        .ok_or(KernelError::ResourceExhausted { resource: "virtual address space" })?;
    Ok(VirtAddr(base + start * config::PAGE_SIZE))
}

pub fn vaddr_free(bitmap: &mut VaBitmap, addr: VirtAddr, n: usize) {
    let start = (addr.0 - bitmap.base) / config::PAGE_SIZE;
    let mut bm = Bitmap::new(&mut bitmap.bits);
    bm.free_contiguous(start, n);
}

/// Marks a single, caller-chosen virtual page as used without scanning,
/// used by [`super::get_a_page`] to bind a specific address.
pub fn mark_used(bitmap: &mut VaBitmap, addr: VirtAddr) -> KernelResult<()> {
    let bit = (addr.0 - bitmap.base) / config::PAGE_SIZE;
    let mut bm = Bitmap::new(&mut bitmap.bits);
    if bm.get(bit) {
        return Err(KernelError::AlreadyExists { name: "vaddr" });
    }
    bm.set(bit);
    Ok(())
}

/// A fresh user-image VA bitmap for a newly created process (`spec.md`
/// §4.4).
pub fn new_process_bitmap() -> VaBitmap {
    VaBitmap::new_empty(config::USER_IMAGE_BASE, PoolKind::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reserves_contiguous_range() {
        let mut vb = new_process_bitmap();
        let a = vaddr_alloc(&mut vb, PoolKind::User, 3).unwrap();
        assert_eq!(a.0, config::USER_IMAGE_BASE);
        let b = vaddr_alloc(&mut vb, PoolKind::User, 1).unwrap();
        assert_eq!(b.0, config::USER_IMAGE_BASE + 3 * config::PAGE_SIZE);
    }

    #[test]
    fn free_then_alloc_reuses_range() {
        let mut vb = new_process_bitmap();
        let a = vaddr_alloc(&mut vb, PoolKind::User, 2).unwrap();
        vaddr_free(&mut vb, a, 2);
        let b = vaddr_alloc(&mut vb, PoolKind::User, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clone_preserves_used_bits_for_fork() {
        let mut parent = new_process_bitmap();
        vaddr_alloc(&mut parent, PoolKind::User, 2).unwrap();
        let mut child = new_process_bitmap();
        child.clone_from(&parent);
        assert_eq!(child.iter_used().count(), 2);
    }
}
