//! Named kernel constants.
//!
//! Collects the magic numbers `spec.md` calls out by name (the low-memory
//! disk-count byte, the page-aligned mask, the kernel/user split) instead of
//! leaving them scattered through the arithmetic that uses them.

/// Size of one physical page / paging frame.
pub const PAGE_SIZE: usize = 4096;

/// Mask that clears the low 12 bits of an address, i.e. rounds down to a
/// page boundary. Also used to recover a TCB's base from any ESP within its
/// kernel stack page, and to recover an arena header from a block pointer.
pub const PAGE_MASK: usize = 0xFFFF_F000;

/// Kernel virtual address space starts here; everything below is user space.
pub const KERNEL_BASE: usize = 0xC000_0000;

/// BIOS-published low-memory address holding the total RAM size in bytes,
/// written by the (out-of-scope) boot loader before the kernel is entered.
pub const TOTAL_MEM_BYTES_ADDR: usize = 0x0b00;

/// BIOS-published low-memory address holding the number of hard disks.
pub const DISK_COUNT_ADDR: usize = 0x475;

/// Pages reserved below 1 MiB plus the boot page directory and the 255
/// page tables covering the kernel's 1 GiB virtual range — always "used"
/// before either pool bitmap is built.
pub const LOW_MEM_RESERVED_PAGES: usize = 256 + 256;

/// Kernel heap virtual base; the kernel VA bitmap starts scanning here.
pub const KERNEL_HEAP_BASE: usize = 0xC010_0000;

/// Size of the region backing the kernel's own `Vec`/`Box`/`String`
/// allocator (distinct from [`crate::mm::heap::KHeap`], the user-facing
/// `malloc`/`free` slab allocator). 4 MiB, identity-mapped by the boot page
/// tables ahead of the kernel VA bitmap's first scan.
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Per-process user image virtual base; a fresh process's VA bitmap starts
/// scanning here.
pub const USER_IMAGE_BASE: usize = 0x0804_8000;

/// Preemption tick frequency, in Hz, programmed into the PIT.
pub const TIMER_HZ: u32 = 100;

/// Sector size in bytes (also the filesystem block size).
pub const SECTOR_SIZE: usize = 512;

/// Maximum regular files + directories a partition can hold.
pub const MAX_FILES_PER_PARTITION: usize = 4096;

/// Bits covered by one sector of either on-disk bitmap.
pub const BITS_PER_BITMAP_SECTOR: usize = SECTOR_SIZE * 8;

/// Maximum path length accepted by path resolution.
pub const MAX_PATH_LEN: usize = 512;

/// Maximum filename length (on-disk directory entry field width).
pub const MAX_FILENAME_LEN: usize = 16;

/// Direct block pointers per inode.
pub const DIRECT_BLOCKS: usize = 12;

/// Total blocks addressable by one inode: 12 direct + 128 via the single
/// indirect block (512-byte sector / 4-byte LBA).
pub const MAX_BLOCKS_PER_FILE: usize = DIRECT_BLOCKS + SECTOR_SIZE / 4;

/// Maximum file size in bytes implied by `MAX_BLOCKS_PER_FILE`.
pub const MAX_FILE_SIZE: usize = MAX_BLOCKS_PER_FILE * SECTOR_SIZE;

/// On-disk superblock magic tag.
pub const SUPERBLOCK_MAGIC: u32 = 0x2000_0314;

/// Root directory's inode number.
pub const ROOT_INODE_NO: u32 = 0;

/// Per-process file descriptor table size.
pub const FD_TABLE_SIZE: usize = 8;

/// Global open-file table size (fds 0..2 reserved for stdin/stdout/stderr).
pub const GLOBAL_FILE_TABLE_SIZE: usize = 64;

/// Maximum primary partitions per disk.
pub const MAX_PRIMARY_PARTITIONS: usize = 4;

/// Maximum logical partitions per disk (inside the extended chain).
pub const MAX_LOGICAL_PARTITIONS: usize = 8;

/// IDE command/control port bases, indexed by channel.
pub const IDE_PORT_BASE: [u16; 2] = [0x1F0, 0x170];
pub const IDE_CONTROL_PORT: [u16; 2] = [0x3F6, 0x376];
pub const IDE_IRQ: [u8; 2] = [0x2E, 0x2F];

/// `busy_wait`'s spin timeout, per `spec.md` §4.5.
pub const IDE_BUSY_WAIT_TIMEOUT_MS: u32 = 30_000;
pub const IDE_BUSY_WAIT_POLL_MS: u32 = 10;

/// Extended-partition MBR type byte.
pub const PARTITION_TYPE_EXTENDED: u8 = 0x05;

/// MBR/EBR boot-sector signature.
pub const BOOT_SIGNATURE: u16 = 0x55AA;
