//! Filesystem layer (`spec.md` §4.6): wires the on-disk block format
//! ([`blockfs`]), the global open-file table ([`file`]), and path
//! resolution into the operations the syscall layer exposes to user space.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config;
use crate::error::{FsError, KernelError, KernelResult};

pub mod blockdev;
pub mod blockfs;
pub mod dir;
pub mod file;

pub use blockfs::InodeNo;
pub use file::SeekFrom;

/// Metadata returned by `stat` (`spec.md` §4.6).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub inode: InodeNo,
    pub is_dir: bool,
    pub size: usize,
}

/// Formats and mounts a fresh filesystem on `device`.
pub fn format(device: alloc::boxed::Box<dyn blockdev::BlockDevice>) -> KernelResult<()> {
    blockfs::format(device)
}

/// Mounts a previously formatted device.
pub fn mount(device: alloc::boxed::Box<dyn blockdev::BlockDevice>) -> KernelResult<()> {
    blockfs::mount(device)
}

pub fn root_inode() -> InodeNo {
    blockfs::root_inode()
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Splits an absolute or relative path into its components, ignoring empty
/// segments produced by repeated slashes.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Resolves `path` to an inode, starting from `cwd` for relative paths and
/// from the root for absolute ones. `..` and `.` are ordinary directory
/// entries every directory carries (`spec.md` §4.6), so resolution is just a
/// sequence of `dir_lookup` calls.
pub fn resolve(cwd: InodeNo, path: &str) -> KernelResult<InodeNo> {
    let mut current = if path.starts_with('/') {
        root_inode()
    } else {
        cwd
    };
    for component in components(path) {
        current = blockfs::dir_lookup(current, component)?;
    }
    Ok(current)
}

/// Resolves the parent directory and final-component name of `path`, for
/// operations (`create`, `mkdir`, `unlink`, `rmdir`) that need both.
fn resolve_parent<'a>(cwd: InodeNo, path: &'a str) -> KernelResult<(InodeNo, &'a str)> {
    let parts = components(path);
    let name = parts.last().copied().ok_or(KernelError::InvalidPath {
        reason: "path has no final component",
    })?;
    let mut current = if path.starts_with('/') {
        root_inode()
    } else {
        cwd
    };
    for component in &parts[..parts.len() - 1] {
        current = blockfs::dir_lookup(current, component)?;
    }
    Ok((current, name))
}

/// Reconstructs the absolute path of `inode` by repeatedly walking `..` and
/// matching the resulting inode number back against the parent's entries,
/// per `spec.md`'s described `getcwd` algorithm.
pub fn getcwd_path(mut inode: InodeNo) -> KernelResult<String> {
    let root = root_inode();
    if inode == root {
        return Ok(String::from("/"));
    }

    let mut segments: Vec<String> = Vec::new();
    loop {
        let parent = blockfs::dir_lookup(inode, "..")?;
        let entries = blockfs::dir_list(parent)?;
        let name = entries
            .into_iter()
            .find(|(_, no)| *no == inode)
            .map(|(name, _)| name)
            .ok_or(KernelError::Fs(FsError::NotFound))?;
        segments.push(name);
        if parent == root {
            break;
        }
        inode = parent;
    }

    let mut path = String::new();
    for segment in segments.iter().rev() {
        path.push('/');
        path.push_str(segment);
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Opens `path`, creating it as a fresh file when `create` is set and it
/// doesn't already exist. Returns a global file-table index, the thing a
/// process-local fd wraps.
pub fn open(cwd: InodeNo, path: &str, writable: bool, create: bool) -> KernelResult<usize> {
    let inode = match resolve(cwd, path) {
        Ok(inode) => inode,
        Err(_) if create => {
            let (parent, name) = resolve_parent(cwd, path)?;
            let inode = blockfs::alloc_inode(blockfs::InodeMode::File)?;
            blockfs::dir_add_entry(parent, name, inode)?;
            inode
        }
        Err(e) => return Err(e),
    };
    let meta = blockfs::inode_metadata(inode)?;
    if meta.mode() == blockfs::InodeMode::Directory {
        return Err(KernelError::IsADirectory);
    }
    file::open(inode, writable)
}

pub fn close(global_index: usize) -> KernelResult<()> {
    file::close(global_index)
}

pub fn read(global_index: usize, buf: &mut [u8]) -> KernelResult<usize> {
    file::read(global_index, buf)
}

pub fn write(global_index: usize, buf: &[u8]) -> KernelResult<usize> {
    file::write(global_index, buf)
}

pub fn lseek(global_index: usize, from: SeekFrom) -> KernelResult<usize> {
    file::seek(global_index, from)
}

/// Removes a file. Refuses inodes still referenced by an open file-table
/// entry (`spec.md`'s `FileOpen` condition) and directories (use `rmdir`).
pub fn unlink(cwd: InodeNo, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(cwd, path)?;
    let inode = blockfs::dir_lookup(parent, name)?;
    let meta = blockfs::inode_metadata(inode)?;
    if meta.mode() == blockfs::InodeMode::Directory {
        return Err(KernelError::IsADirectory);
    }
    if blockfs::inode_open_count(inode)? > 0 {
        return Err(KernelError::FileOpen);
    }
    blockfs::dir_remove_entry(parent, name)?;
    blockfs::free_inode(inode)
}

pub fn stat(cwd: InodeNo, path: &str) -> KernelResult<Stat> {
    let inode = resolve(cwd, path)?;
    let meta = blockfs::inode_metadata(inode)?;
    Ok(Stat {
        inode,
        is_dir: meta.mode() == blockfs::InodeMode::Directory,
        size: meta.size as usize,
    })
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

pub fn mkdir(cwd: InodeNo, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(cwd, path)?;
    if blockfs::dir_lookup(parent, name).is_ok() {
        return Err(KernelError::AlreadyExists { name: "mkdir target" });
    }
    let dir = blockfs::alloc_inode(blockfs::InodeMode::Directory)?;
    blockfs::dir_init(dir, parent)?;
    blockfs::dir_add_entry(parent, name, dir)
}

pub fn rmdir(cwd: InodeNo, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(cwd, path)?;
    let dir = blockfs::dir_lookup(parent, name)?;
    let meta = blockfs::inode_metadata(dir)?;
    if meta.mode() != blockfs::InodeMode::Directory {
        return Err(KernelError::NotADirectory);
    }
    if !blockfs::dir_is_empty(dir)? {
        return Err(KernelError::DirectoryNotEmpty);
    }
    blockfs::dir_remove_entry(parent, name)?;
    blockfs::free_inode(dir)
}

/// Resolves `path` relative to `cwd` and returns the new cwd inode, failing
/// if it isn't a directory.
pub fn chdir(cwd: InodeNo, path: &str) -> KernelResult<InodeNo> {
    let inode = resolve(cwd, path)?;
    let meta = blockfs::inode_metadata(inode)?;
    if meta.mode() != blockfs::InodeMode::Directory {
        return Err(KernelError::NotADirectory);
    }
    Ok(inode)
}

const DIR_STREAM_TABLE_SIZE: usize = 32;

struct DirStream {
    inode: InodeNo,
    position: usize,
}

static DIR_STREAMS: Mutex<[Option<DirStream>; DIR_STREAM_TABLE_SIZE]> =
    Mutex::new([const { None }; DIR_STREAM_TABLE_SIZE]);

/// Opens a directory for `readdir` iteration and returns a stream handle
/// distinct from the file-table index space.
pub fn opendir(cwd: InodeNo, path: &str) -> KernelResult<usize> {
    let inode = resolve(cwd, path)?;
    let meta = blockfs::inode_metadata(inode)?;
    if meta.mode() != blockfs::InodeMode::Directory {
        return Err(KernelError::NotADirectory);
    }
    blockfs::inode_open(inode)?;
    let mut streams = DIR_STREAMS.lock();
    let slot = streams
        .iter()
        .position(|s| s.is_none())
        .ok_or(KernelError::Fs(FsError::TooManyOpenFiles))?;
    streams[slot] = Some(DirStream { inode, position: 0 });
    Ok(slot)
}

pub fn closedir(handle: usize) -> KernelResult<()> {
    let mut streams = DIR_STREAMS.lock();
    let stream = streams[handle]
        .take()
        .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
    blockfs::inode_close(stream.inode)
}

pub fn rewinddir(handle: usize) -> KernelResult<()> {
    let mut streams = DIR_STREAMS.lock();
    let stream = streams[handle]
        .as_mut()
        .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
    stream.position = 0;
    Ok(())
}

/// Returns the next directory entry's name, or `None` at end of stream.
pub fn readdir(handle: usize) -> KernelResult<Option<String>> {
    let (inode, position) = {
        let streams = DIR_STREAMS.lock();
        let stream = streams[handle]
            .as_ref()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        (stream.inode, stream.position)
    };
    let entries = blockfs::dir_list(inode)?;
    let next = entries.into_iter().nth(position);
    let mut streams = DIR_STREAMS.lock();
    if let Some(stream) = streams[handle].as_mut() {
        stream.position += 1;
    }
    Ok(next.map(|(name, _)| name))
}

/// Size of the process-local fd table, re-exported here since both the fs
/// layer and `process::pcb` need to agree on it.
pub const FD_TABLE_SIZE: usize = config::FD_TABLE_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::string::String;
    use blockdev::RamBlockDevice;

    fn fresh_root() -> InodeNo {
        let dev = RamBlockDevice::new(String::from("ram0"), config::SECTOR_SIZE, 4096);
        format(Box::new(dev)).unwrap();
        root_inode()
    }

    #[test]
    fn mkdir_then_chdir_then_getcwd_round_trips() {
        let root = fresh_root();
        mkdir(root, "home").unwrap();
        let home = chdir(root, "home").unwrap();
        mkdir(home, "user").unwrap();
        let user = chdir(home, "user").unwrap();
        assert_eq!(getcwd_path(user).unwrap(), "/home/user");
    }

    #[test]
    fn open_create_write_read_and_unlink() {
        let root = fresh_root();
        let fd = open(root, "greeting.txt", true, true).unwrap();
        write(fd, b"hi").unwrap();
        close(fd).unwrap();

        let fd = open(root, "greeting.txt", false, false).unwrap();
        let mut buf = [0u8; 2];
        read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        close(fd).unwrap();

        unlink(root, "greeting.txt").unwrap();
        assert!(open(root, "greeting.txt", false, false).is_err());
    }

    #[test]
    fn unlink_refuses_while_open() {
        let root = fresh_root();
        let fd = open(root, "busy.txt", true, true).unwrap();
        assert!(matches!(unlink(root, "busy.txt"), Err(KernelError::FileOpen)));
        close(fd).unwrap();
        unlink(root, "busy.txt").unwrap();
    }

    #[test]
    fn rmdir_refuses_non_empty_directory() {
        let root = fresh_root();
        mkdir(root, "etc").unwrap();
        let etc = chdir(root, "etc").unwrap();
        mkdir(etc, "inner").unwrap();
        assert!(matches!(
            rmdir(root, "etc"),
            Err(KernelError::DirectoryNotEmpty)
        ));
    }

    #[test]
    fn readdir_lists_directory_entries() {
        let root = fresh_root();
        mkdir(root, "a").unwrap();
        mkdir(root, "b").unwrap();
        let handle = opendir(root, "/").unwrap();
        let mut names = Vec::new();
        while let Some(name) = readdir(handle).unwrap() {
            names.push(name);
        }
        closedir(handle).unwrap();
        assert!(names.contains(&String::from("a")));
        assert!(names.contains(&String::from("b")));
    }
}
