//! Validates pointers a syscall handler receives from user space before
//! dereferencing them, so a malicious or buggy process faults its own
//! syscall with `-1` instead of crashing the kernel.

use crate::config;
use crate::error::KernelError;
use crate::mm::page_table::{self, VirtAddr};

/// Checks that `[addr, addr+len)` lies below `KERNEL_BASE` and that every
/// page it spans is actually mapped in the calling process's address
/// space.
pub fn check_user_range(addr: usize, len: usize) -> Result<(), KernelError> {
    if len == 0 {
        return Ok(());
    }
    let end = addr.checked_add(len).ok_or(KernelError::InvalidArgument {
        name: "addr",
        value: "overflow",
    })?;
    if end > config::KERNEL_BASE {
        return Err(KernelError::InvalidArgument {
            name: "addr",
            value: "crosses into kernel space",
        });
    }
    let first_page = addr & config::PAGE_MASK;
    let last_page = (end - 1) & config::PAGE_MASK;
    let mut page = first_page;
    while page <= last_page {
        if page_table::addr_v2p(VirtAddr(page)).is_none() {
            return Err(KernelError::InvalidArgument {
                name: "addr",
                value: "unmapped",
            });
        }
        page += config::PAGE_SIZE;
    }
    Ok(())
}

/// Validates and copies a NUL-terminated user string into a kernel buffer,
/// used by `open`/`mkdir`/`unlink`/`chdir` to bring a path in from
/// userland. Rejects strings longer than `MAX_PATH_LEN`.
pub fn copy_user_cstr(addr: usize, out: &mut [u8; config::MAX_PATH_LEN]) -> Result<usize, KernelError> {
    for i in 0..config::MAX_PATH_LEN {
        check_user_range(addr + i, 1)?;
        // SAFETY: `check_user_range` just confirmed this byte is mapped
        // and below `KERNEL_BASE`.
        let byte = unsafe { *((addr + i) as *const u8) };
        out[i] = byte;
        if byte == 0 {
            return Ok(i);
        }
    }
    Err(KernelError::InvalidPath { reason: "not NUL-terminated within MAX_PATH_LEN" })
}
