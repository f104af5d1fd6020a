//! Kernel error types.
//!
//! `spec.md` §7 names four kinds of failure (resource exhaustion, invalid
//! argument, conflict, fatal) and a fixed policy per kind. Internally every
//! fallible kernel function returns a `KernelError`; syscall handlers narrow
//! this down to the `isize` ABI (`-1` on error) at the boundary instead of
//! propagating the enum to userland.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Resource exhaustion: no free frame, no free VA bits, no free inode,
    /// no free data block, fd table full, file would exceed 140 blocks.
    OutOfMemory { requested: usize, available: usize },
    ResourceExhausted { resource: &'static str },

    /// Invalid argument: bad path, bad fd, bad whence, O_CREAT on an
    /// existing file, unlink of a directory, rmdir of a file.
    InvalidArgument { name: &'static str, value: &'static str },
    InvalidPath { reason: &'static str },
    BadFileDescriptor { fd: i32 },

    /// Conflict: write_deny already set, unlink of an open file, rmdir of a
    /// non-empty directory.
    AlreadyExists { name: &'static str },
    WriteDenied,
    FileOpen,
    DirectoryNotEmpty,
    NotADirectory,
    IsADirectory,

    /// Process/scheduling errors.
    ProcessNotFound { pid: i32 },

    /// Filesystem-specific errors not covered above.
    Fs(FsError),

    /// Hardware errors surfaced by the IDE driver before a panic is
    /// warranted (e.g. an out-of-range LBA caught against a cached
    /// IDENTIFY result).
    Hardware { device: &'static str, code: u32 },

    NotImplemented { feature: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    IsADirectory,
    InvalidPath,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    FileTooLarge,
    WriteDenied,
    FileOpen,
    NoSuchInode,
    CorruptSuperblock,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {requested} bytes, {available} available"
            ),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{name}': {value}")
            }
            Self::InvalidPath { reason } => write!(f, "invalid path: {reason}"),
            Self::BadFileDescriptor { fd } => write!(f, "bad file descriptor: {fd}"),
            Self::AlreadyExists { name } => write!(f, "already exists: {name}"),
            Self::WriteDenied => write!(f, "file is already open for write"),
            Self::FileOpen => write!(f, "file has opened"),
            Self::DirectoryNotEmpty => write!(f, "directory not empty"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::ProcessNotFound { pid } => write!(f, "process {pid} not found"),
            Self::Fs(e) => write!(f, "filesystem error: {e:?}"),
            Self::Hardware { device, code } => {
                write!(f, "hardware error on {device}: code 0x{code:x}")
            }
            Self::NotImplemented { feature } => write!(f, "not implemented: {feature}"),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

/// Narrow a `KernelError` to the syscall ABI's `-1` convention (`spec.md`
/// §7: resource exhaustion / invalid argument / conflict all surface as
/// `-1`; only fatal errors panic and never reach this function).
pub fn to_syscall_ret(err: KernelError) -> isize {
    log::warn!("syscall failed: {err}");
    -1
}
