//! On-disk filesystem format (`spec.md` §4.6).
//!
//! Layout, in sectors from the start of the partition:
//! `[boot sector | superblock | block bitmap | inode bitmap | inode table | data blocks]`.
//! Blocks are one disk sector (`config::SECTOR_SIZE`) each. Every inode has
//! twelve direct block pointers plus one single-indirect block, giving
//! `config::MAX_BLOCKS_PER_FILE` blocks and `config::MAX_FILE_SIZE` bytes per
//! file -- there is no double- or triple-indirection.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config;
use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::util::bitmap::Bitmap;

pub type InodeNo = u32;

pub const NO_BLOCK: u32 = 0;

/// Pointers per indirect block, given `config::SECTOR_SIZE`-byte blocks of
/// 4-byte block numbers.
const POINTERS_PER_BLOCK: usize = config::SECTOR_SIZE / 4;

fn div_round_up(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

// ---------------------------------------------------------------------------
// On-disk structures
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub total_blocks: u32,
    pub inode_count: u32,
    pub block_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_start: u32,
    pub root_inode: InodeNo,
}

impl Superblock {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `Superblock` is `repr(C)` and made up entirely of `u32`s.
        unsafe {
            core::slice::from_raw_parts(
                self as *const Self as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut sb = Superblock {
            magic: 0,
            total_blocks: 0,
            inode_count: 0,
            block_bitmap_start: 0,
            inode_bitmap_start: 0,
            inode_table_start: 0,
            data_start: 0,
            root_inode: 0,
        };
        // SAFETY: `buf` is at least `size_of::<Superblock>()` bytes (one
        // whole sector), and every bit pattern of `Superblock` is valid.
        unsafe {
            core::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                &mut sb as *mut Self as *mut u8,
                core::mem::size_of::<Self>(),
            );
        }
        sb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeMode {
    Free,
    File,
    Directory,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DiskInode {
    pub mode: u8,
    pub size: u32,
    pub direct: [u32; config::DIRECT_BLOCKS],
    pub indirect: u32,
}

impl DiskInode {
    pub fn free() -> Self {
        Self {
            mode: 0,
            size: 0,
            direct: [NO_BLOCK; config::DIRECT_BLOCKS],
            indirect: NO_BLOCK,
        }
    }

    pub fn mode(&self) -> InodeMode {
        match self.mode {
            1 => InodeMode::File,
            2 => InodeMode::Directory,
            _ => InodeMode::Free,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: plain-old-data, `repr(C)`.
        unsafe {
            core::slice::from_raw_parts(
                self as *const Self as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut inode = DiskInode::free();
        // SAFETY: `buf` holds at least `size_of::<DiskInode>()` bytes and
        // every bit pattern is valid for this struct.
        unsafe {
            core::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                &mut inode as *mut Self as *mut u8,
                core::mem::size_of::<Self>(),
            );
        }
        inode
    }
}

const INODE_DISK_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// In-memory open-inode tracking
// ---------------------------------------------------------------------------

/// An inode kept resident while at least one process references it. Mirrors
/// `spec.md`'s open-inodes list: every `open()` bumps `open_count`, every
/// `close()` drops it, and the entry is written back and evicted at zero.
pub struct OpenInode {
    pub no: InodeNo,
    pub disk: DiskInode,
    pub open_count: u32,
    pub dirty: bool,
}

pub struct BlockFs {
    device: Mutex<Box<dyn BlockDevice>>,
    superblock: Superblock,
    block_bitmap: Mutex<Vec<u8>>,
    inode_bitmap: Mutex<Vec<u8>>,
    open_inodes: Mutex<BTreeMap<InodeNo, Mutex<OpenInode>>>,
}

static FS: Mutex<Option<BlockFs>> = Mutex::new(None);

/// Formats `device` with a fresh filesystem and mounts it. Corresponds to
/// `spec.md`'s disk-format step: lays out the superblock, zeroes both
/// bitmaps, and creates the root directory as inode 0.
pub fn format(device: Box<dyn BlockDevice>) -> KernelResult<()> {
    let fs = BlockFs::format(device)?;
    *FS.lock() = Some(fs);
    Ok(())
}

/// Mounts an already-formatted device, reading its superblock and bitmaps
/// back into memory.
pub fn mount(device: Box<dyn BlockDevice>) -> KernelResult<()> {
    let fs = BlockFs::mount(device)?;
    *FS.lock() = Some(fs);
    Ok(())
}

fn with_fs<R>(f: impl FnOnce(&BlockFs) -> KernelResult<R>) -> KernelResult<R> {
    let guard = FS.lock();
    let fs = guard.as_ref().ok_or(KernelError::Hardware { device: "ide0", code: 0 })?;
    f(fs)
}

pub fn root_inode() -> InodeNo {
    config::ROOT_INODE_NO as InodeNo
}

pub fn inode_open(no: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.inode_open(no))
}

pub fn inode_close(no: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.inode_close(no))
}

pub fn inode_sync(no: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.inode_sync(no))
}

pub fn inode_metadata(no: InodeNo) -> KernelResult<DiskInode> {
    with_fs(|fs| fs.inode_metadata(no))
}

pub fn inode_open_count(no: InodeNo) -> KernelResult<u32> {
    with_fs(|fs| fs.inode_open_count(no))
}

pub fn read_at(no: InodeNo, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
    with_fs(|fs| fs.read_at(no, offset, buf))
}

pub fn write_at(no: InodeNo, offset: usize, buf: &[u8]) -> KernelResult<usize> {
    with_fs(|fs| fs.write_at(no, offset, buf))
}

pub fn truncate(no: InodeNo, new_size: usize) -> KernelResult<()> {
    with_fs(|fs| fs.truncate(no, new_size))
}

pub fn alloc_inode(mode: InodeMode) -> KernelResult<InodeNo> {
    with_fs(|fs| fs.alloc_inode(mode))
}

pub fn free_inode(no: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.free_inode(no))
}

pub fn dir_add_entry(dir: InodeNo, name: &str, target: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.dir_add_entry(dir, name, target))
}

pub fn dir_lookup(dir: InodeNo, name: &str) -> KernelResult<InodeNo> {
    with_fs(|fs| fs.dir_lookup(dir, name))
}

pub fn dir_list(dir: InodeNo) -> KernelResult<Vec<(String, InodeNo)>> {
    with_fs(|fs| fs.dir_list(dir))
}

pub fn dir_is_empty(dir: InodeNo) -> KernelResult<bool> {
    with_fs(|fs| fs.dir_is_empty(dir))
}

pub fn dir_remove_entry(dir: InodeNo, name: &str) -> KernelResult<()> {
    with_fs(|fs| fs.dir_remove_entry(dir, name))
}

pub fn dir_init(dir: InodeNo, parent: InodeNo) -> KernelResult<()> {
    with_fs(|fs| fs.dir_init(dir, parent))
}

/// Re-exported under `blockfs::bump_open_count` so `process::fork`'s
/// reference to it resolves; the refcount it bumps lives on the
/// process-shared global file-table entry, not the inode itself.
pub use crate::fs::file::bump_open_count;

impl BlockFs {
    fn layout(total_blocks: u32) -> Superblock {
        let block_bitmap_blocks =
            div_round_up(total_blocks as usize, 8 * config::SECTOR_SIZE) as u32;
        let inode_bitmap_blocks =
            div_round_up(config::MAX_FILES_PER_PARTITION, 8 * config::SECTOR_SIZE) as u32;
        let inode_table_blocks = div_round_up(
            config::MAX_FILES_PER_PARTITION * INODE_DISK_SIZE,
            config::SECTOR_SIZE,
        ) as u32;

        let block_bitmap_start = 2; // sector 0 = boot, sector 1 = superblock
        let inode_bitmap_start = block_bitmap_start + block_bitmap_blocks;
        let inode_table_start = inode_bitmap_start + inode_bitmap_blocks;
        let data_start = inode_table_start + inode_table_blocks;

        Superblock {
            magic: config::SUPERBLOCK_MAGIC,
            total_blocks,
            inode_count: config::MAX_FILES_PER_PARTITION as u32,
            block_bitmap_start,
            inode_bitmap_start,
            inode_table_start,
            data_start,
            root_inode: config::ROOT_INODE_NO as InodeNo,
        }
    }

    fn format(mut device: Box<dyn BlockDevice>) -> KernelResult<Self> {
        let total_blocks = device.block_count() as u32;
        let sb = Self::layout(total_blocks);

        let mut sector = vec![0u8; config::SECTOR_SIZE];
        sector[..core::mem::size_of::<Superblock>()].copy_from_slice(sb.as_bytes());
        device
            .write_blocks(1, &sector)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;

        let block_bitmap_bytes =
            (sb.inode_bitmap_start - sb.block_bitmap_start) as usize * config::SECTOR_SIZE;
        let inode_bitmap_bytes =
            (sb.inode_table_start - sb.inode_bitmap_start) as usize * config::SECTOR_SIZE;
        let mut block_bitmap = vec![0u8; block_bitmap_bytes];
        let inode_bitmap = vec![0u8; inode_bitmap_bytes];

        // Reserve every block before `data_start` (boot + superblock +
        // bitmaps + inode table) so the allocator never hands one out.
        {
            let mut bm = Bitmap::new(&mut block_bitmap);
            for b in 0..sb.data_start {
                bm.set(b as usize);
            }
        }

        let fs = BlockFs {
            device: Mutex::new(device),
            superblock: sb,
            block_bitmap: Mutex::new(block_bitmap),
            inode_bitmap: Mutex::new(inode_bitmap),
            open_inodes: Mutex::new(BTreeMap::new()),
        };

        fs.flush_block_bitmap()?;
        fs.flush_inode_bitmap()?;

        // Write an all-free inode table.
        let free = DiskInode::free();
        let mut table_sector = vec![0u8; config::SECTOR_SIZE];
        let inodes_per_sector = config::SECTOR_SIZE / INODE_DISK_SIZE;
        for sector_idx in 0..(sb.inode_table_start - sb.inode_bitmap_start) {
            table_sector.fill(0);
            for slot in 0..inodes_per_sector {
                let off = slot * INODE_DISK_SIZE;
                table_sector[off..off + core::mem::size_of::<DiskInode>()]
                    .copy_from_slice(free.as_bytes());
            }
            fs.device
                .lock()
                .write_blocks((sb.inode_table_start + sector_idx) as u64, &table_sector)
                .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        }

        // Create the root directory as inode 0, its own parent.
        let root = fs.alloc_inode(InodeMode::Directory)?;
        debug_assert_eq!(root, sb.root_inode);
        fs.dir_init(root, root)?;

        Ok(fs)
    }

    fn mount(device: Box<dyn BlockDevice>) -> KernelResult<Self> {
        let mut sector = vec![0u8; config::SECTOR_SIZE];
        device
            .read_blocks(1, &mut sector)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        let sb = Superblock::from_bytes(&sector);
        if sb.magic != config::SUPERBLOCK_MAGIC {
            return Err(KernelError::Fs(FsError::CorruptSuperblock));
        }

        let block_bitmap_len =
            (sb.inode_bitmap_start - sb.block_bitmap_start) as usize * config::SECTOR_SIZE;
        let inode_bitmap_len =
            (sb.inode_table_start - sb.inode_bitmap_start) as usize * config::SECTOR_SIZE;
        let mut block_bitmap = vec![0u8; block_bitmap_len];
        let mut inode_bitmap = vec![0u8; inode_bitmap_len];

        for (i, chunk) in block_bitmap.chunks_mut(config::SECTOR_SIZE).enumerate() {
            device
                .read_blocks(sb.block_bitmap_start as u64 + i as u64, chunk)
                .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        }
        for (i, chunk) in inode_bitmap.chunks_mut(config::SECTOR_SIZE).enumerate() {
            device
                .read_blocks(sb.inode_bitmap_start as u64 + i as u64, chunk)
                .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        }

        Ok(BlockFs {
            device: Mutex::new(device),
            superblock: sb,
            block_bitmap: Mutex::new(block_bitmap),
            inode_bitmap: Mutex::new(inode_bitmap),
            open_inodes: Mutex::new(BTreeMap::new()),
        })
    }

    fn flush_block_bitmap(&self) -> KernelResult<()> {
        let bitmap = self.block_bitmap.lock();
        let mut dev = self.device.lock();
        for (i, chunk) in bitmap.chunks(config::SECTOR_SIZE).enumerate() {
            dev.write_blocks(self.superblock.block_bitmap_start as u64 + i as u64, chunk)
                .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        }
        Ok(())
    }

    fn flush_inode_bitmap(&self) -> KernelResult<()> {
        let bitmap = self.inode_bitmap.lock();
        let mut dev = self.device.lock();
        for (i, chunk) in bitmap.chunks(config::SECTOR_SIZE).enumerate() {
            dev.write_blocks(self.superblock.inode_bitmap_start as u64 + i as u64, chunk)
                .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        }
        Ok(())
    }

    fn alloc_block(&self) -> KernelResult<u32> {
        let mut bitmap = self.block_bitmap.lock();
        let total = self.superblock.total_blocks as usize;
        let mut bm = Bitmap::new(&mut bitmap);
        let b = bm
            .alloc_one()
            .filter(|b| *b < total)
            .ok_or(KernelError::Fs(FsError::FileTooLarge))?;
        drop(bitmap);
        self.flush_block_bitmap()?;
        Ok(b as u32)
    }

    fn free_block(&self, block: u32) -> KernelResult<()> {
        let mut bitmap = self.block_bitmap.lock();
        let mut bm = Bitmap::new(&mut bitmap);
        bm.clear(block as usize);
        drop(bitmap);
        self.flush_block_bitmap()
    }

    fn zero_block(&self, block: u32) -> KernelResult<()> {
        let zero = vec![0u8; config::SECTOR_SIZE];
        self.device
            .lock()
            .write_blocks(block as u64, &zero)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })
    }

    // -- inode allocation --------------------------------------------------

    pub fn alloc_inode(&self, mode: InodeMode) -> KernelResult<InodeNo> {
        let no = {
            let mut bitmap = self.inode_bitmap.lock();
            let mut bm = Bitmap::new(&mut bitmap);
            let n = bm
                .alloc_one()
                .filter(|n| *n < self.superblock.inode_count as usize)
                .ok_or(KernelError::ResourceExhausted { resource: "inode" })?;
            drop(bitmap);
            self.flush_inode_bitmap()?;
            n as InodeNo
        };
        let mut disk = DiskInode::free();
        disk.mode = match mode {
            InodeMode::File => 1,
            InodeMode::Directory => 2,
            InodeMode::Free => 0,
        };
        self.write_disk_inode(no, &disk)?;
        Ok(no)
    }

    pub fn free_inode(&self, no: InodeNo) -> KernelResult<()> {
        let disk = self.read_disk_inode(no)?;
        let blocks = self.all_blocks(&disk);
        for b in blocks.into_iter().flatten() {
            self.free_block(b)?;
        }
        if disk.indirect != NO_BLOCK {
            self.free_block(disk.indirect)?;
        }
        self.write_disk_inode(no, &DiskInode::free())?;
        let mut bitmap = self.inode_bitmap.lock();
        let mut bm = Bitmap::new(&mut bitmap);
        bm.clear(no as usize);
        drop(bitmap);
        self.flush_inode_bitmap()
    }

    fn inode_sector(&self, no: InodeNo) -> (u64, usize) {
        let inodes_per_sector = config::SECTOR_SIZE / INODE_DISK_SIZE;
        let sector =
            self.superblock.inode_table_start as u64 + no as u64 / inodes_per_sector as u64;
        let offset = (no as usize % inodes_per_sector) * INODE_DISK_SIZE;
        (sector, offset)
    }

    fn read_disk_inode(&self, no: InodeNo) -> KernelResult<DiskInode> {
        let (sector, offset) = self.inode_sector(no);
        let mut buf = vec![0u8; config::SECTOR_SIZE];
        self.device
            .lock()
            .read_blocks(sector, &mut buf)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        Ok(DiskInode::from_bytes(&buf[offset..]))
    }

    fn write_disk_inode(&self, no: InodeNo, inode: &DiskInode) -> KernelResult<()> {
        let (sector, offset) = self.inode_sector(no);
        let mut buf = vec![0u8; config::SECTOR_SIZE];
        self.device
            .lock()
            .read_blocks(sector, &mut buf)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        buf[offset..offset + core::mem::size_of::<DiskInode>()].copy_from_slice(inode.as_bytes());
        self.device
            .lock()
            .write_blocks(sector, &buf)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })
    }

    /// Builds the full `config::MAX_BLOCKS_PER_FILE`-entry block list for an
    /// inode: the twelve direct pointers followed by whatever the single
    /// indirect block holds, `None` for unallocated slots.
    fn all_blocks(&self, disk: &DiskInode) -> Vec<Option<u32>> {
        let mut blocks = Vec::with_capacity(config::MAX_BLOCKS_PER_FILE);
        for &b in disk.direct.iter() {
            blocks.push(if b == NO_BLOCK { None } else { Some(b) });
        }
        if disk.indirect != NO_BLOCK {
            let mut buf = vec![0u8; config::SECTOR_SIZE];
            let _ = self
                .device
                .lock()
                .read_blocks(disk.indirect as u64, &mut buf);
            for i in 0..POINTERS_PER_BLOCK {
                if blocks.len() >= config::MAX_BLOCKS_PER_FILE {
                    break;
                }
                let off = i * 4;
                let b = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
                blocks.push(if b == NO_BLOCK { None } else { Some(b) });
            }
        } else {
            while blocks.len() < config::MAX_BLOCKS_PER_FILE {
                blocks.push(None);
            }
        }
        blocks
    }

    /// Ensures block index `idx` (0-based, within
    /// `config::MAX_BLOCKS_PER_FILE`) is allocated for `disk`, growing the
    /// indirect block on demand. Mutates `disk` in place; caller persists it.
    fn ensure_block(&self, disk: &mut DiskInode, idx: usize) -> KernelResult<u32> {
        if idx >= config::MAX_BLOCKS_PER_FILE {
            return Err(KernelError::Fs(FsError::FileTooLarge));
        }
        if idx < config::DIRECT_BLOCKS {
            if disk.direct[idx] == NO_BLOCK {
                disk.direct[idx] = self.alloc_block()?;
                self.zero_block(disk.direct[idx])?;
            }
            return Ok(disk.direct[idx]);
        }

        let allocated_indirect = disk.indirect == NO_BLOCK;
        if allocated_indirect {
            disk.indirect = self.alloc_block()?;
            self.zero_block(disk.indirect)?;
        }
        // From here, any early return must roll back a freshly allocated
        // indirect block rather than leak it out of the free-block bitmap.
        let rollback_indirect = |disk: &mut DiskInode| {
            if allocated_indirect {
                let _ = self.free_block(disk.indirect);
                disk.indirect = NO_BLOCK;
            }
        };

        let slot = idx - config::DIRECT_BLOCKS;
        let mut buf = vec![0u8; config::SECTOR_SIZE];
        if self.device.lock().read_blocks(disk.indirect as u64, &mut buf).is_err() {
            rollback_indirect(disk);
            return Err(KernelError::Hardware { device: "ide0", code: 0 });
        }
        let off = slot * 4;
        let existing = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        if existing != NO_BLOCK {
            return Ok(existing);
        }
        let block = match self.alloc_block() {
            Ok(block) => block,
            Err(err) => {
                rollback_indirect(disk);
                return Err(err);
            }
        };
        self.zero_block(block)?;
        buf[off..off + 4].copy_from_slice(&block.to_le_bytes());
        if self.device.lock().write_blocks(disk.indirect as u64, &buf).is_err() {
            rollback_indirect(disk);
            return Err(KernelError::Hardware { device: "ide0", code: 0 });
        }
        Ok(block)
    }

    // -- open-inode bookkeeping ---------------------------------------------

    pub fn inode_open(&self, no: InodeNo) -> KernelResult<()> {
        let mut open = self.open_inodes.lock();
        if let Some(entry) = open.get(&no) {
            entry.lock().open_count += 1;
            return Ok(());
        }
        let disk = self.read_disk_inode(no)?;
        if disk.mode() == InodeMode::Free {
            return Err(KernelError::Fs(FsError::NoSuchInode));
        }
        open.insert(
            no,
            Mutex::new(OpenInode {
                no,
                disk,
                open_count: 1,
                dirty: false,
            }),
        );
        Ok(())
    }

    pub fn inode_close(&self, no: InodeNo) -> KernelResult<()> {
        let mut open = self.open_inodes.lock();
        let evict = {
            let entry = open
                .get(&no)
                .ok_or(KernelError::Fs(FsError::NoSuchInode))?;
            let mut state = entry.lock();
            state.open_count = state.open_count.saturating_sub(1);
            if state.open_count == 0 && state.dirty {
                self.write_disk_inode(no, &state.disk)?;
                state.dirty = false;
            }
            state.open_count == 0
        };
        if evict {
            open.remove(&no);
        }
        Ok(())
    }

    pub fn inode_sync(&self, no: InodeNo) -> KernelResult<()> {
        let open = self.open_inodes.lock();
        if let Some(entry) = open.get(&no) {
            let mut state = entry.lock();
            if state.dirty {
                self.write_disk_inode(no, &state.disk)?;
                state.dirty = false;
            }
        }
        Ok(())
    }

    pub fn inode_metadata(&self, no: InodeNo) -> KernelResult<DiskInode> {
        let open = self.open_inodes.lock();
        if let Some(entry) = open.get(&no) {
            return Ok(entry.lock().disk);
        }
        drop(open);
        self.read_disk_inode(no)
    }

    pub fn inode_open_count(&self, no: InodeNo) -> KernelResult<u32> {
        let open = self.open_inodes.lock();
        Ok(open.get(&no).map(|e| e.lock().open_count).unwrap_or(0))
    }

    fn with_open_mut<R>(
        &self,
        no: InodeNo,
        f: impl FnOnce(&mut OpenInode) -> KernelResult<R>,
    ) -> KernelResult<R> {
        let open = self.open_inodes.lock();
        let entry = open
            .get(&no)
            .ok_or(KernelError::Fs(FsError::NoSuchInode))?;
        let mut state = entry.lock();
        f(&mut state)
    }

    // -- data access --------------------------------------------------------

    pub fn read_at(&self, no: InodeNo, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let disk = self.inode_metadata(no)?;
        if offset >= disk.size as usize {
            return Ok(0);
        }
        let to_read = buf.len().min(disk.size as usize - offset);
        let blocks = self.all_blocks(&disk);
        let mut done = 0;
        while done < to_read {
            let pos = offset + done;
            let block_idx = pos / config::SECTOR_SIZE;
            let block_off = pos % config::SECTOR_SIZE;
            let chunk = (config::SECTOR_SIZE - block_off).min(to_read - done);
            match blocks.get(block_idx).copied().flatten() {
                Some(b) => {
                    let mut sector = vec![0u8; config::SECTOR_SIZE];
                    self.device
                        .lock()
                        .read_blocks(b as u64, &mut sector)
                        .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
                    buf[done..done + chunk]
                        .copy_from_slice(&sector[block_off..block_off + chunk]);
                }
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }
        Ok(done)
    }

    pub fn write_at(&self, no: InodeNo, offset: usize, buf: &[u8]) -> KernelResult<usize> {
        if offset + buf.len() > config::MAX_FILE_SIZE {
            return Err(KernelError::Fs(FsError::FileTooLarge));
        }
        self.with_open_mut(no, |state| {
            let mut done = 0;
            while done < buf.len() {
                let pos = offset + done;
                let block_idx = pos / config::SECTOR_SIZE;
                let block_off = pos % config::SECTOR_SIZE;
                let chunk = (config::SECTOR_SIZE - block_off).min(buf.len() - done);
                let block = self.ensure_block(&mut state.disk, block_idx)?;
                let mut sector = vec![0u8; config::SECTOR_SIZE];
                self.device
                    .lock()
                    .read_blocks(block as u64, &mut sector)
                    .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
                sector[block_off..block_off + chunk].copy_from_slice(&buf[done..done + chunk]);
                self.device
                    .lock()
                    .write_blocks(block as u64, &sector)
                    .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
                done += chunk;
            }
            let new_size = (offset + done) as u32;
            if new_size > state.disk.size {
                state.disk.size = new_size;
            }
            state.dirty = true;
            Ok(done)
        })
    }

    pub fn truncate(&self, no: InodeNo, new_size: usize) -> KernelResult<()> {
        self.with_open_mut(no, |state| {
            state.disk.size = new_size as u32;
            state.dirty = true;
            Ok(())
        })
    }

    // -- directories ----------------------------------------------------------

    /// Writes the `.` and `..` entries for a freshly allocated directory.
    pub fn dir_init(&self, dir: InodeNo, parent: InodeNo) -> KernelResult<()> {
        self.inode_open(dir)?;
        let r = (|| {
            self.dir_add_entry_locked(dir, ".", dir)?;
            self.dir_add_entry_locked(dir, "..", parent)
        })();
        self.inode_close(dir)?;
        r
    }

    fn dir_add_entry_locked(&self, dir: InodeNo, name: &str, target: InodeNo) -> KernelResult<()> {
        let entry = super::dir::DirEntryOnDisk::new(name, target)?;
        let disk = self.inode_metadata(dir)?;
        let count = disk.size as usize / super::dir::DIR_ENTRY_SIZE;
        let mut buf = [0u8; super::dir::DIR_ENTRY_SIZE];
        for i in 0..count {
            self.read_at(dir, i * super::dir::DIR_ENTRY_SIZE, &mut buf)?;
            if !super::dir::DirEntryOnDisk::from_bytes(&buf).in_use() {
                self.write_at(dir, i * super::dir::DIR_ENTRY_SIZE, &entry.to_bytes())?;
                return Ok(());
            }
        }
        let offset = disk.size as usize;
        self.write_at(dir, offset, &entry.to_bytes())?;
        Ok(())
    }

    pub fn dir_add_entry(&self, dir: InodeNo, name: &str, target: InodeNo) -> KernelResult<()> {
        self.inode_open(dir)?;
        let r = self.dir_add_entry_locked(dir, name, target);
        self.inode_close(dir)?;
        r
    }

    pub fn dir_lookup(&self, dir: InodeNo, name: &str) -> KernelResult<InodeNo> {
        let disk = self.inode_metadata(dir)?;
        let count = disk.size as usize / super::dir::DIR_ENTRY_SIZE;
        let mut buf = [0u8; super::dir::DIR_ENTRY_SIZE];
        for i in 0..count {
            self.read_at(dir, i * super::dir::DIR_ENTRY_SIZE, &mut buf)?;
            let entry = super::dir::DirEntryOnDisk::from_bytes(&buf);
            if entry.in_use() && entry.name_str() == name {
                return Ok(entry.inode);
            }
        }
        Err(KernelError::Fs(FsError::NotFound))
    }

    pub fn dir_list(&self, dir: InodeNo) -> KernelResult<Vec<(String, InodeNo)>> {
        let disk = self.inode_metadata(dir)?;
        let count = disk.size as usize / super::dir::DIR_ENTRY_SIZE;
        let mut buf = [0u8; super::dir::DIR_ENTRY_SIZE];
        let mut out = Vec::new();
        for i in 0..count {
            self.read_at(dir, i * super::dir::DIR_ENTRY_SIZE, &mut buf)?;
            let entry = super::dir::DirEntryOnDisk::from_bytes(&buf);
            if entry.in_use() {
                out.push((String::from(entry.name_str()), entry.inode));
            }
        }
        Ok(out)
    }

    pub fn dir_is_empty(&self, dir: InodeNo) -> KernelResult<bool> {
        Ok(self
            .dir_list(dir)?
            .iter()
            .all(|(n, _)| n == "." || n == ".."))
    }

    pub fn dir_remove_entry(&self, dir: InodeNo, name: &str) -> KernelResult<()> {
        self.inode_open(dir)?;
        let result = self.dir_remove_entry_locked(dir, name);
        self.inode_close(dir)?;
        result
    }

    fn dir_remove_entry_locked(&self, dir: InodeNo, name: &str) -> KernelResult<()> {
        let disk = self.inode_metadata(dir)?;
        let count = disk.size as usize / super::dir::DIR_ENTRY_SIZE;
        let mut buf = [0u8; super::dir::DIR_ENTRY_SIZE];
        let mut removed_index = None;
        for i in 0..count {
            self.read_at(dir, i * super::dir::DIR_ENTRY_SIZE, &mut buf)?;
            let mut entry = super::dir::DirEntryOnDisk::from_bytes(&buf);
            if entry.in_use() && entry.name_str() == name {
                entry.clear();
                self.write_at(dir, i * super::dir::DIR_ENTRY_SIZE, &entry.to_bytes())?;
                removed_index = Some(i);
                break;
            }
        }
        let Some(removed_index) = removed_index else {
            return Err(KernelError::Fs(FsError::NotFound));
        };

        // Only the last entry removed can shrink the directory: any earlier
        // cleared slot stays behind as a hole `dir_add_entry_locked` reuses.
        if removed_index + 1 == count {
            self.shrink_dir_trailing_holes(dir)?;
        }
        Ok(())
    }

    /// Trims trailing cleared entries off a directory's size after a
    /// removal, and frees any data block that falls entirely past the new
    /// size back to the bitmap. The first block is never freed: a directory
    /// keeps it resident even with zero live entries.
    fn shrink_dir_trailing_holes(&self, dir: InodeNo) -> KernelResult<()> {
        let disk = self.inode_metadata(dir)?;
        let mut count = disk.size as usize / super::dir::DIR_ENTRY_SIZE;
        let mut buf = [0u8; super::dir::DIR_ENTRY_SIZE];
        while count > 0 {
            self.read_at(dir, (count - 1) * super::dir::DIR_ENTRY_SIZE, &mut buf)?;
            if super::dir::DirEntryOnDisk::from_bytes(&buf).in_use() {
                break;
            }
            count -= 1;
        }

        let new_size = (count * super::dir::DIR_ENTRY_SIZE) as u32;
        if new_size == disk.size {
            return Ok(());
        }

        let old_blocks = (disk.size as usize).div_ceil(config::SECTOR_SIZE);
        let new_blocks = (new_size as usize).div_ceil(config::SECTOR_SIZE);

        self.with_open_mut(dir, |state| {
            state.disk.size = new_size;
            state.dirty = true;
            Ok(())
        })?;

        if new_blocks < old_blocks {
            let blocks = self.all_blocks(&self.inode_metadata(dir)?);
            for block_idx in new_blocks.max(1)..old_blocks {
                if let Some(b) = blocks.get(block_idx).copied().flatten() {
                    self.free_block(b)?;
                    self.clear_block_pointer(dir, block_idx)?;
                }
            }
        }
        Ok(())
    }

    /// Nulls out inode `dir`'s pointer to block index `block_idx` (direct or
    /// indirect) after the block itself has been freed.
    fn clear_block_pointer(&self, dir: InodeNo, block_idx: usize) -> KernelResult<()> {
        if block_idx < config::DIRECT_BLOCKS {
            return self.with_open_mut(dir, |state| {
                state.disk.direct[block_idx] = NO_BLOCK;
                state.dirty = true;
                Ok(())
            });
        }
        let disk = self.inode_metadata(dir)?;
        if disk.indirect == NO_BLOCK {
            return Ok(());
        }
        let slot = block_idx - config::DIRECT_BLOCKS;
        let mut buf = vec![0u8; config::SECTOR_SIZE];
        self.device
            .lock()
            .read_blocks(disk.indirect as u64, &mut buf)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })?;
        let off = slot * 4;
        buf[off..off + 4].copy_from_slice(&NO_BLOCK.to_le_bytes());
        self.device
            .lock()
            .write_blocks(disk.indirect as u64, &buf)
            .map_err(|_| KernelError::Hardware { device: "ide0", code: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn fresh_fs() -> KernelResult<()> {
        let dev = RamBlockDevice::new(String::from("ram0"), config::SECTOR_SIZE, 4096);
        format(Box::new(dev))
    }

    #[test]
    fn format_creates_root_directory() {
        fresh_fs().unwrap();
        let root = root_inode();
        let meta = inode_metadata(root).unwrap();
        assert_eq!(meta.mode(), InodeMode::Directory);
    }

    #[test]
    fn create_lookup_and_remove_roundtrip() {
        fresh_fs().unwrap();
        let root = root_inode();
        let file = alloc_inode(InodeMode::File).unwrap();
        dir_add_entry(root, "hello.txt", file).unwrap();

        let found = dir_lookup(root, "hello.txt").unwrap();
        assert_eq!(found, file);

        dir_remove_entry(root, "hello.txt").unwrap();
        assert!(dir_lookup(root, "hello.txt").is_err());
    }

    #[test]
    fn write_then_read_back_spans_multiple_blocks() {
        fresh_fs().unwrap();
        let file = alloc_inode(InodeMode::File).unwrap();
        inode_open(file).unwrap();
        let data: Vec<u8> = (0..(config::SECTOR_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        write_at(file, 0, &data).unwrap();
        let mut back = vec![0u8; data.len()];
        read_at(file, 0, &mut back).unwrap();
        assert_eq!(back, data);
        inode_close(file).unwrap();
    }

    #[test]
    fn write_past_direct_capacity_touches_indirect_block() {
        fresh_fs().unwrap();
        let file = alloc_inode(InodeMode::File).unwrap();
        inode_open(file).unwrap();
        let offset = (config::DIRECT_BLOCKS + 2) * config::SECTOR_SIZE;
        write_at(file, offset, b"past the direct blocks").unwrap();
        let mut back = [0u8; 22];
        read_at(file, offset, &mut back).unwrap();
        assert_eq!(&back, b"past the direct blocks");
        inode_close(file).unwrap();
    }
}
