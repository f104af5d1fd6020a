//! Process syscall handlers (`spec.md` §4.4, §4.8): `getpid`, `fork`, and
//! `ps`.

use crate::error::KernelResult;
use crate::process;

pub fn sys_getpid() -> KernelResult<usize> {
    Ok(process::getpid() as usize)
}

/// Forks the calling process. Returns the child's pid to the parent; the
/// child's own return path is patched by [`crate::process::fork`] to resume
/// at the same `int 0x80` with its own return value (conventionally 0)
/// already staged, so this handler itself only ever returns the parent's
/// view.
pub fn sys_fork() -> KernelResult<usize> {
    let parent = process::current();
    let child = process::fork(&parent)?;
    Ok(child.pid as usize)
}

/// Prints the process table directly to the console; there is no structured
/// return value because the shell's `ps` command has nothing to format
/// beyond what the kernel already knows how to print.
pub fn sys_ps() -> KernelResult<usize> {
    crate::println!("PID  PRIORITY  NAME");
    for (pid, name, priority) in process::ps() {
        crate::println!("{:<4} {:<9} {}", pid, priority, name);
    }
    Ok(0)
}
