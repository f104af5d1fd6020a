//! Slab-style small-object allocator (`spec.md` §4.2).
//!
//! Seven size classes doubling from 16 to 1024 bytes. Each arena is one
//! page: a header (`{class, free_count, large}`) followed by equal-sized
//! blocks, whose free list is threaded through the blocks' own memory so
//! there is zero per-block bookkeeping overhead. Requests above 1024 bytes
//! bypass the slab entirely and go straight to the page allocator.
//!
//! This is the allocator behind the `malloc`/`free` syscalls (`spec.md`
//! §4.8); it is independent of the `#[global_allocator]` registered in
//! `main.rs`, which backs the kernel's own internal `Vec`/`VecDeque` usage
//! via `linked_list_allocator` the way the run queue and wait lists need.

use core::ptr::NonNull;

use spin::Mutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::PoolKind;
use crate::mm::page_table::VirtAddr;
use crate::mm::vas::VaBitmap;

const NUM_CLASSES: usize = 7;
const CLASS_SIZES: [usize; NUM_CLASSES] = [16, 32, 64, 128, 256, 512, 1024];

#[repr(C)]
struct ArenaHeader {
    class: usize,
    free_count: usize,
    large: bool,
    pages: usize,
}

#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

struct Class {
    free_list: Option<NonNull<FreeBlock>>,
}

/// Per-process heap state. A kernel thread has no heap of its own and uses
/// [`KHeap::kernel()`] instead.
pub struct KHeap {
    classes: [Class; NUM_CLASSES],
    pool: PoolKind,
}

// SAFETY: `KHeap` is always accessed behind a `Mutex`; the raw pointers it
// holds point into pages owned exclusively by that heap.
unsafe impl Send for KHeap {}

impl KHeap {
    pub const fn new(pool: PoolKind) -> Self {
        const EMPTY: Class = Class { free_list: None };
        Self {
            classes: [EMPTY; NUM_CLASSES],
            pool,
        }
    }

    fn class_for(size: usize) -> Option<usize> {
        CLASS_SIZES.iter().position(|&s| s >= size)
    }

    /// `malloc` (`spec.md` §4.2 request path).
    pub fn alloc(&mut self, size: usize, bitmap: &mut VaBitmap) -> KernelResult<NonNull<u8>> {
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "zero",
            });
        }
        if size > CLASS_SIZES[NUM_CLASSES - 1] {
            return self.alloc_large(size, bitmap);
        }
        let class_idx = Self::class_for(size).expect("size already bounds-checked");
        if self.classes[class_idx].free_list.is_none() {
            self.grow_class(class_idx, bitmap)?;
        }
        let block = self.classes[class_idx].free_list.take().expect("just grew");
        // SAFETY: `block` came off this class's free list, so it points at
        // a live, exclusively-owned `FreeBlock`.
        unsafe {
            self.classes[class_idx].free_list = (*block.as_ptr()).next;
        }
        Ok(block.cast())
    }

    fn grow_class(&mut self, class_idx: usize, bitmap: &mut VaBitmap) -> KernelResult<()> {
        let page_v = super::malloc_page(self.pool, 1, bitmap)?;
        let block_size = CLASS_SIZES[class_idx];
        let header_size = core::mem::size_of::<ArenaHeader>();
        let usable = config::PAGE_SIZE - header_size;
        let n_blocks = usable / block_size;

        // SAFETY: `page_v` is a freshly mapped, exclusively-owned page.
        unsafe {
            let header = page_v.0 as *mut ArenaHeader;
            header.write(ArenaHeader {
                class: class_idx,
                free_count: n_blocks,
                large: false,
                pages: 1,
            });
            let base = (page_v.0 + header_size) as *mut u8;
            let mut head: Option<NonNull<FreeBlock>> = None;
            for i in (0..n_blocks).rev() {
                let block_ptr = base.add(i * block_size) as *mut FreeBlock;
                block_ptr.write(FreeBlock { next: head });
                head = Some(NonNull::new_unchecked(block_ptr));
            }
            self.classes[class_idx].free_list = head;
        }
        Ok(())
    }

    fn alloc_large(&mut self, size: usize, bitmap: &mut VaBitmap) -> KernelResult<NonNull<u8>> {
        let header_size = core::mem::size_of::<ArenaHeader>();
        let n_pages = (size + header_size + config::PAGE_SIZE - 1) / config::PAGE_SIZE;
        let page_v = super::malloc_page(self.pool, n_pages, bitmap)?;
        // SAFETY: `page_v` is freshly mapped and exclusively owned.
        unsafe {
            let header = page_v.0 as *mut ArenaHeader;
            header.write(ArenaHeader {
                class: 0,
                free_count: 0,
                large: true,
                pages: n_pages,
            });
            let payload = (page_v.0 + header_size) as *mut u8;
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// `free` (`spec.md` §4.2 free path). Recovers the owning arena by
    /// masking the pointer down to its page, then either frees the large
    /// arena's pages outright or returns the block to its class free list,
    /// releasing the whole page once every block in it is free again.
    pub fn free(&mut self, ptr: NonNull<u8>, bitmap: &mut VaBitmap) {
        let page_addr = (ptr.as_ptr() as usize) & config::PAGE_MASK;
        // SAFETY: every pointer this allocator hands out lives at a fixed
        // offset from the arena header at the start of its page.
        let header = unsafe { &mut *(page_addr as *mut ArenaHeader) };
        if header.large {
            let pages = header.pages;
            super::mfree_page(self.pool, VirtAddr(page_addr), pages, bitmap);
            return;
        }
        let class_idx = header.class;
        let block_size = CLASS_SIZES[class_idx];
        let header_size = core::mem::size_of::<ArenaHeader>();
        let n_blocks = (config::PAGE_SIZE - header_size) / block_size;

        // SAFETY: `ptr` is a block this allocator previously handed out
        // from this arena's class.
        unsafe {
            let block_ptr = ptr.cast::<FreeBlock>();
            block_ptr.as_ptr().write(FreeBlock {
                next: self.classes[class_idx].free_list,
            });
            self.classes[class_idx].free_list = Some(block_ptr);
        }
        header.free_count += 1;

        if header.free_count == n_blocks {
            // Every block in the arena is free: drain them from the class
            // list and release the page.
            self.drain_arena_from_class(class_idx, page_addr, n_blocks, header_size, block_size);
            super::mfree_page(self.pool, VirtAddr(page_addr), 1, bitmap);
        }
    }

    fn drain_arena_from_class(
        &mut self,
        class_idx: usize,
        page_addr: usize,
        n_blocks: usize,
        header_size: usize,
        block_size: usize,
    ) {
        let in_arena = |addr: usize| addr >= page_addr + header_size && addr < page_addr + config::PAGE_SIZE;
        let mut kept: Option<NonNull<FreeBlock>> = None;
        let mut kept_tail: Option<NonNull<FreeBlock>> = None;
        let mut cur = self.classes[class_idx].free_list;
        let mut removed = 0;
        while let Some(node) = cur {
            // SAFETY: `node` is a live free-list block owned by this class.
            let next = unsafe { (*node.as_ptr()).next };
            if in_arena(node.as_ptr() as usize) {
                removed += 1;
            } else {
                // SAFETY: re-threading a node we still own exclusively.
                unsafe {
                    (*node.as_ptr()).next = None;
                }
                match kept_tail {
                    Some(t) => unsafe { (*t.as_ptr()).next = Some(node) },
                    None => kept = Some(node),
                }
                kept_tail = Some(node);
            }
            cur = next;
        }
        debug_assert_eq!(removed, n_blocks, "arena free count disagreed with its class list");
        let _ = block_size;
        self.classes[class_idx].free_list = kept;
    }
}

static KERNEL_HEAP: Mutex<KHeap> = Mutex::new(KHeap::new(PoolKind::Kernel));
static KERNEL_HEAP_BITMAP: Mutex<()> = Mutex::new(());

pub fn init() {
    let _ = &KERNEL_HEAP;
    let _ = &KERNEL_HEAP_BITMAP;
    log::info!("heap: {NUM_CLASSES} slab classes, {:?}", CLASS_SIZES);
}

/// Kernel-side `kmalloc`, used by subsystems (not user processes) that need
/// small dynamic allocations outside of `alloc::Vec`/`Box`.
pub fn kmalloc(size: usize) -> KernelResult<NonNull<u8>> {
    let mut bitmap = crate::mm::vas::kernel_bitmap().lock();
    KERNEL_HEAP.lock().alloc(size, &mut bitmap)
}

/// SAFETY: `ptr` must have come from [`kmalloc`] and not already be freed.
pub unsafe fn kfree(ptr: NonNull<u8>) {
    let mut bitmap = crate::mm::vas::kernel_bitmap().lock();
    KERNEL_HEAP.lock().free(ptr, &mut bitmap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_alloc_rounds_up_to_class() {
        assert_eq!(KHeap::class_for(1), Some(0));
        assert_eq!(KHeap::class_for(16), Some(0));
        assert_eq!(KHeap::class_for(17), Some(1));
        assert_eq!(KHeap::class_for(1024), Some(6));
        assert_eq!(KHeap::class_for(1025), None);
    }
}
