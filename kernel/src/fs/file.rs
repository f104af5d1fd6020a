//! Global open-file table (`spec.md` §4.6): the layer shared by every
//! process-local file descriptor. Two fds that came from the same `open()`
//! call family (a `fork()`ed pair) point at the same slot here and so share
//! one seek offset, matching Unix open-file-description semantics.

extern crate alloc;

use spin::Mutex;

use crate::config;
use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::blockfs::{self, InodeNo};

pub struct GlobalFileEntry {
    pub inode: InodeNo,
    pub offset: usize,
    pub writable: bool,
    pub refcount: u32,
}

static TABLE: Mutex<[Option<GlobalFileEntry>; config::GLOBAL_FILE_TABLE_SIZE]> =
    Mutex::new([const { None }; config::GLOBAL_FILE_TABLE_SIZE]);

/// Opens `inode` into a fresh global-table slot. Enforces single-writer
/// access: a second writable open of an inode already open for write fails
/// with `WriteDenied`.
pub fn open(inode: InodeNo, writable: bool) -> KernelResult<usize> {
    let mut table = TABLE.lock();

    if writable {
        let already_writable = table
            .iter()
            .flatten()
            .any(|e| e.inode == inode && e.writable);
        if already_writable {
            return Err(KernelError::WriteDenied);
        }
    }

    let slot = table
        .iter()
        .position(|e| e.is_none())
        .ok_or(KernelError::Fs(FsError::TooManyOpenFiles))?;

    blockfs::inode_open(inode)?;
    table[slot] = Some(GlobalFileEntry {
        inode,
        offset: 0,
        writable,
        refcount: 1,
    });
    Ok(slot)
}

/// Bumps the refcount on an existing slot, used when `fork()` copies a
/// parent fd table entry into the child: both now share one offset.
pub fn bump_open_count(global_index: usize) {
    let mut table = TABLE.lock();
    if let Some(entry) = table[global_index].as_mut() {
        entry.refcount += 1;
    }
}

pub fn close(global_index: usize) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let drop_entry = {
        let entry = table[global_index]
            .as_mut()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        entry.refcount -= 1;
        entry.refcount == 0
    };
    if drop_entry {
        let inode = table[global_index].as_ref().unwrap().inode;
        table[global_index] = None;
        drop(table);
        blockfs::inode_close(inode)?;
    }
    Ok(())
}

pub fn read(global_index: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let (inode, offset) = {
        let table = TABLE.lock();
        let entry = table[global_index]
            .as_ref()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        (entry.inode, entry.offset)
    };
    let n = blockfs::read_at(inode, offset, buf)?;
    let mut table = TABLE.lock();
    if let Some(entry) = table[global_index].as_mut() {
        entry.offset += n;
    }
    Ok(n)
}

pub fn write(global_index: usize, buf: &[u8]) -> KernelResult<usize> {
    let (inode, offset, writable) = {
        let table = TABLE.lock();
        let entry = table[global_index]
            .as_ref()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        (entry.inode, entry.offset, entry.writable)
    };
    if !writable {
        return Err(KernelError::WriteDenied);
    }
    let n = blockfs::write_at(inode, offset, buf)?;
    let mut table = TABLE.lock();
    if let Some(entry) = table[global_index].as_mut() {
        entry.offset += n;
    }
    Ok(n)
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

pub fn seek(global_index: usize, from: SeekFrom) -> KernelResult<usize> {
    let mut table = TABLE.lock();
    let entry = table[global_index]
        .as_mut()
        .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
    let size = blockfs::inode_metadata(entry.inode)?.size as usize;
    let new_offset = match from {
        SeekFrom::Start(off) => off,
        SeekFrom::Current(delta) => offset_by(entry.offset, delta)?,
        SeekFrom::End(delta) => offset_by(size, delta)?,
    };
    entry.offset = new_offset;
    Ok(new_offset)
}

fn offset_by(base: usize, delta: isize) -> KernelResult<usize> {
    if delta < 0 {
        base.checked_sub((-delta) as usize)
    } else {
        base.checked_add(delta as usize)
    }
    .ok_or(KernelError::InvalidArgument {
        name: "offset",
        value: "seek out of range",
    })
}

pub fn inode_of(global_index: usize) -> KernelResult<InodeNo> {
    TABLE.lock()[global_index]
        .as_ref()
        .map(|e| e.inode)
        .ok_or(KernelError::Fs(FsError::BadFileDescriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::blockfs::InodeMode;
    use alloc::boxed::Box;
    use alloc::string::String;

    fn fresh() -> InodeNo {
        let dev = RamBlockDevice::new(String::from("ram0"), config::SECTOR_SIZE, 4096);
        blockfs::format(Box::new(dev)).unwrap();
        blockfs::alloc_inode(InodeMode::File).unwrap()
    }

    #[test]
    fn second_writable_open_is_denied() {
        let inode = fresh();
        let a = open(inode, true).unwrap();
        assert!(open(inode, true).is_err());
        close(a).unwrap();
    }

    #[test]
    fn write_then_read_shares_no_offset_across_independent_opens() {
        let inode = fresh();
        let w = open(inode, true).unwrap();
        write(w, b"hello").unwrap();
        close(w).unwrap();

        let r = open(inode, false).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(read(r, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        close(r).unwrap();
    }

    #[test]
    fn bump_open_count_shares_offset_like_fork() {
        let inode = fresh();
        let a = open(inode, true).unwrap();
        write(a, b"abc").unwrap();
        bump_open_count(a);
        write(a, b"def").unwrap();
        close(a).unwrap();
        close(a).unwrap();
    }
}
