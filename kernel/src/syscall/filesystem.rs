//! Filesystem syscall handlers (`spec.md` §4.6, §4.8): validate user
//! pointers, translate process-local fds to the global file table, and
//! delegate to [`crate::fs`].

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::fs::{self, SeekFrom};
use crate::mm::user_validation::{check_user_range, copy_user_cstr};
use crate::process;

pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_CREAT: u32 = 4;

const SEEK_START: u32 = 1;
const SEEK_CUR: u32 = 2;
const SEEK_END: u32 = 3;

/// Stat struct as seen by userland: fixed layout, no padding games.
#[repr(C)]
struct UserStat {
    inode: u32,
    is_dir: u32,
    size: u32,
}

fn current_cwd() -> fs::InodeNo {
    process::current_cwd()
}

fn fd_to_global(fd: i32) -> KernelResult<usize> {
    process::with_current_state(|state| state.fd_global_index(fd)).ok_or(KernelError::BadFileDescriptor { fd })
}

fn read_path(path_ptr: usize) -> KernelResult<alloc::string::String> {
    let mut buf = [0u8; config::MAX_PATH_LEN];
    let len = copy_user_cstr(path_ptr, &mut buf)?;
    core::str::from_utf8(&buf[..len])
        .map(alloc::string::String::from)
        .map_err(|_| KernelError::InvalidPath { reason: "not valid UTF-8" })
}

pub fn sys_write(fd: i32, buf_ptr: usize, len: usize) -> KernelResult<usize> {
    check_user_range(buf_ptr, len)?;
    // SAFETY: `check_user_range` confirmed `[buf_ptr, buf_ptr+len)` is
    // mapped and below `KERNEL_BASE`.
    let slice = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, len) };

    match fd {
        1 | 2 => {
            for &byte in slice {
                crate::drivers::console::putchar(byte);
            }
            Ok(len)
        }
        _ => fs::write(fd_to_global(fd)?, slice),
    }
}

pub fn sys_read(fd: i32, buf_ptr: usize, len: usize) -> KernelResult<usize> {
    check_user_range(buf_ptr, len)?;
    // SAFETY: see `sys_write`.
    let slice = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };

    match fd {
        0 => {
            for byte in slice.iter_mut() {
                *byte = crate::arch::interrupts::without_interrupts(|| {
                    crate::drivers::keyboard::KEYBOARD_RING.pop()
                });
            }
            Ok(len)
        }
        _ => fs::read(fd_to_global(fd)?, slice),
    }
}

pub fn sys_putchar(byte: u8) -> KernelResult<usize> {
    crate::drivers::console::putchar(byte);
    Ok(0)
}

pub fn sys_clear() -> KernelResult<usize> {
    crate::drivers::console::clear();
    Ok(0)
}

pub fn sys_open(path_ptr: usize, flags: u32) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    let writable = flags & (O_WRONLY | O_RDWR) != 0;
    let create = flags & O_CREAT != 0;
    let global_index = fs::open(current_cwd(), &path, writable, create)?;

    match process::with_current_state(|state| state.install_fd(global_index)) {
        Some(fd) => Ok(fd as usize),
        None => {
            let _ = fs::close(global_index);
            Err(KernelError::ResourceExhausted { resource: "fd_table" })
        }
    }
}

pub fn sys_close(fd: i32) -> KernelResult<usize> {
    let global_index = process::with_current_state(|state| state.clear_fd(fd))
        .ok_or(KernelError::BadFileDescriptor { fd })?;
    fs::close(global_index)?;
    Ok(0)
}

pub fn sys_lseek(fd: i32, offset: isize, whence: u32) -> KernelResult<usize> {
    let global_index = fd_to_global(fd)?;
    let from = match whence {
        SEEK_START => SeekFrom::Start(offset as usize),
        SEEK_CUR => SeekFrom::Current(offset),
        SEEK_END => SeekFrom::End(offset),
        _ => {
            return Err(KernelError::InvalidArgument { name: "whence", value: "out of range" });
        }
    };
    fs::lseek(global_index, from)
}

pub fn sys_unlink(path_ptr: usize) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    fs::unlink(current_cwd(), &path)?;
    Ok(0)
}

pub fn sys_mkdir(path_ptr: usize) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    fs::mkdir(current_cwd(), &path)?;
    Ok(0)
}

pub fn sys_rmdir(path_ptr: usize) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    fs::rmdir(current_cwd(), &path)?;
    Ok(0)
}

pub fn sys_chdir(path_ptr: usize) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    let new_cwd = fs::chdir(current_cwd(), &path)?;
    process::set_current_cwd(new_cwd);
    Ok(0)
}

pub fn sys_getcwd(buf_ptr: usize, len: usize) -> KernelResult<usize> {
    check_user_range(buf_ptr, len)?;
    let path = fs::getcwd_path(current_cwd())?;
    let bytes = path.as_bytes();
    let copy_len = bytes.len().min(len.saturating_sub(1));
    // SAFETY: `check_user_range` confirmed `[buf_ptr, buf_ptr+len)` is
    // mapped; `copy_len < len` leaves room for the NUL terminator.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), buf_ptr as *mut u8, copy_len);
        *((buf_ptr + copy_len) as *mut u8) = 0;
    }
    Ok(copy_len)
}

pub fn sys_stat(path_ptr: usize, stat_ptr: usize) -> KernelResult<usize> {
    check_user_range(stat_ptr, core::mem::size_of::<UserStat>())?;
    let path = read_path(path_ptr)?;
    let info = fs::stat(current_cwd(), &path)?;
    let user_stat = UserStat {
        inode: info.inode,
        is_dir: info.is_dir as u32,
        size: info.size as u32,
    };
    // SAFETY: `check_user_range` confirmed the full struct is mapped.
    unsafe {
        (stat_ptr as *mut UserStat).write(user_stat);
    }
    Ok(0)
}

pub fn sys_opendir(path_ptr: usize) -> KernelResult<usize> {
    let path = read_path(path_ptr)?;
    fs::opendir(current_cwd(), &path)
}

pub fn sys_closedir(handle: usize) -> KernelResult<usize> {
    fs::closedir(handle)?;
    Ok(0)
}

pub fn sys_rewinddir(handle: usize) -> KernelResult<usize> {
    fs::rewinddir(handle)?;
    Ok(0)
}

/// Writes the next entry's name (NUL-terminated) into the user buffer.
/// Returns 1 when an entry was written, 0 at end of directory.
pub fn sys_readdir(handle: usize, buf_ptr: usize, len: usize) -> KernelResult<usize> {
    check_user_range(buf_ptr, len)?;
    match fs::readdir(handle)? {
        Some(name) => {
            let bytes = name.as_bytes();
            let copy_len = bytes.len().min(len.saturating_sub(1));
            // SAFETY: see `sys_getcwd`.
            unsafe {
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), buf_ptr as *mut u8, copy_len);
                *((buf_ptr + copy_len) as *mut u8) = 0;
            }
            Ok(1)
        }
        None => Ok(0),
    }
}
