//! Two-pool physical frame allocator (`spec.md` §4.1).
//!
//! The boot loader publishes total RAM size at a fixed low-memory address.
//! The kernel reserves the first megabyte plus 256 pages (the boot page
//! directory and the 255 page tables covering the kernel's 1 GiB range),
//! then splits everything else evenly between a kernel pool and a user
//! pool. Each pool owns its own frame bitmap behind its own mutex.

use spin::Mutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::util::bitmap::Bitmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Kernel,
    User,
}

/// Bitmap storage is sized for the largest system this kernel targets
/// (4 GiB of RAM => 1,048,576 frames => 128 KiB of bitmap per pool). Real
/// machines with less RAM simply leave the tail bits permanently set by
/// [`init`], so `alloc_one`/`alloc_contiguous` never hand them out.
const MAX_FRAMES_TOTAL: usize = 1 << 20;
const BITMAP_BYTES: usize = MAX_FRAMES_TOTAL / 8;

static KERNEL_POOL: Mutex<PoolState> = Mutex::new(PoolState::new());
static USER_POOL: Mutex<PoolState> = Mutex::new(PoolState::new());

/// Bundles a pool's bitmap storage with its frame-range metadata so both can
/// be guarded by a single mutex, matching `spec.md`'s "each pool owns a
/// frame bitmap and a mutex".
struct PoolState {
    bitmap: [u8; BITMAP_BYTES],
    base_frame: usize,
    frame_count: usize,
}

impl PoolState {
    const fn new() -> Self {
        Self {
            bitmap: [0u8; BITMAP_BYTES],
            base_frame: 0,
            frame_count: 0,
        }
    }
}

pub fn init(total_frames: usize) {
    let reserved = config::LOW_MEM_RESERVED_PAGES.min(total_frames);
    let usable = total_frames.saturating_sub(reserved);
    let kernel_frames = usable / 2;
    let user_frames = usable - kernel_frames;

    let mut kp = KERNEL_POOL.lock();
    kp.base_frame = reserved;
    kp.frame_count = kernel_frames;
    mark_tail_used(&mut kp.bitmap, kernel_frames);

    let mut up = USER_POOL.lock();
    up.base_frame = reserved + kernel_frames;
    up.frame_count = user_frames;
    mark_tail_used(&mut up.bitmap, user_frames);

    log::info!(
        "frame_allocator: kernel pool {} frames @ {}, user pool {} frames @ {}",
        kernel_frames,
        kp.base_frame,
        user_frames,
        up.base_frame
    );
}

/// Bits beyond a pool's real `frame_count` (up to the fixed bitmap capacity)
/// are marked used up front so a scan never wanders past real RAM.
fn mark_tail_used(bits: &mut [u8; BITMAP_BYTES], frame_count: usize) {
    let mut bm = Bitmap::new(bits);
    for bit in frame_count..bm.len_bits() {
        bm.set(bit);
    }
}

fn pool_mutex(kind: PoolKind) -> &'static Mutex<PoolState> {
    match kind {
        PoolKind::Kernel => &KERNEL_POOL,
        PoolKind::User => &USER_POOL,
    }
}

/// `palloc(pool)`: scans the pool bitmap for one zero bit, sets it, returns
/// the frame's physical address.
pub fn palloc(kind: PoolKind) -> KernelResult<PhysAddr> {
    let mut pool = pool_mutex(kind).lock();
    let base = pool.base_frame;
    let mut bm = Bitmap::new(&mut pool.bitmap);
    let bit = bm.alloc_one().ok_or(KernelError::OutOfMemory {
        requested: config::PAGE_SIZE,
        available: 0,
    })?;
    Ok(PhysAddr((base + bit) * config::PAGE_SIZE))
}

pub fn pfree(kind: PoolKind, frame: PhysAddr) {
    let mut pool = pool_mutex(kind).lock();
    let base = pool.base_frame;
    let frame_no = frame.as_usize() / config::PAGE_SIZE;
    let bit = frame_no - base;
    let mut bm = Bitmap::new(&mut pool.bitmap);
    bm.clear(bit);
}

pub fn free_frames(kind: PoolKind) -> usize {
    let pool = pool_mutex(kind).lock();
    let set: usize = pool.bitmap.iter().map(|b| b.count_ones() as usize).sum();
    pool.frame_count - set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palloc_and_pfree_round_trip() {
        init(4096);
        let f = palloc(PoolKind::Kernel).expect("frame available");
        pfree(PoolKind::Kernel, f);
        let f2 = palloc(PoolKind::Kernel).expect("frame available again");
        assert_eq!(f, f2, "freed frame should be reused first (first-fit)");
    }

    #[test]
    fn pools_are_independent() {
        init(4096);
        let kf = palloc(PoolKind::Kernel).unwrap();
        let uf = palloc(PoolKind::User).unwrap();
        assert_ne!(kf.as_usize(), uf.as_usize());
    }
}
