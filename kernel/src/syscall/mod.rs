//! Syscall dispatch (`spec.md` §4.8): decodes the trap frame `int 0x80`
//! leaves on the stack, routes to the matching handler, and writes the
//! result back for the stub's `iretd`.

pub mod filesystem;
pub mod memory;
pub mod numbers;
pub mod process;

use crate::error::to_syscall_ret;

/// Mirrors the `pusha` + `push esp` layout of [`crate::arch::x86::idt`]'s
/// `syscall_stub`: `pusha` pushes EAX first (ending up at the highest
/// address) and EDI last (lowest), so the fields below read low-to-high.
#[repr(C)]
struct TrapFrame {
    edi: u32,
    esi: u32,
    ebp: u32,
    esp_dummy: u32,
    ebx: u32,
    edx: u32,
    ecx: u32,
    eax: u32,
}

#[no_mangle]
extern "C" fn dispatch_from_frame(frame: *mut TrapFrame) {
    // SAFETY: `syscall_stub` passes the address of its own `pusha` frame,
    // which is live for the duration of this call.
    let frame = unsafe { &mut *frame };
    let result = dispatch(frame.eax, frame.ebx as usize, frame.ecx as usize, frame.edx as usize);
    frame.eax = result as u32;
}

fn dispatch(num: u32, a1: usize, a2: usize, a3: usize) -> isize {
    use numbers::*;

    let result = match num {
        SYS_GETPID => process::sys_getpid(),
        SYS_MALLOC => memory::sys_malloc(a1),
        SYS_FREE => memory::sys_free(a1),
        SYS_WRITE => filesystem::sys_write(a1 as i32, a2, a3),
        SYS_FORK => process::sys_fork(),
        SYS_READ => filesystem::sys_read(a1 as i32, a2, a3),
        SYS_PUTCHAR => filesystem::sys_putchar(a1 as u8),
        SYS_CLEAR => filesystem::sys_clear(),
        SYS_GETCWD => filesystem::sys_getcwd(a1, a2),
        SYS_OPEN => filesystem::sys_open(a1, a2 as u32),
        SYS_CLOSE => filesystem::sys_close(a1 as i32),
        SYS_LSEEK => filesystem::sys_lseek(a1 as i32, a2 as isize, a3 as u32),
        SYS_UNLINK => filesystem::sys_unlink(a1),
        SYS_MKDIR => filesystem::sys_mkdir(a1),
        SYS_OPENDIR => filesystem::sys_opendir(a1),
        SYS_CLOSEDIR => filesystem::sys_closedir(a1),
        SYS_RMDIR => filesystem::sys_rmdir(a1),
        SYS_READDIR => filesystem::sys_readdir(a1, a2, a3),
        SYS_REWINDDIR => filesystem::sys_rewinddir(a1),
        SYS_STAT => filesystem::sys_stat(a1, a2),
        SYS_CHDIR => filesystem::sys_chdir(a1),
        SYS_PS => process::sys_ps(),
        _ => Err(crate::error::KernelError::NotImplemented { feature: "unknown syscall" }),
    };

    match result {
        Ok(value) => value as isize,
        Err(err) => to_syscall_ret(err),
    }
}
