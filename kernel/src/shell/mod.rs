//! The small shell (`spec.md` §1, §6): `pwd`, `cd`, `ls`, `ps`, `clear`,
//! `mkdir`, `rmdir`, `mkfile`, `rm`. Runs as an ordinary kernel thread (the
//! spec places the shell's own command parsing out of scope, not the
//! commands themselves, so the line reader and tokenizer here are kept as
//! plain as the driver boundary layer is elsewhere in this kernel) reading
//! from the keyboard ring and writing to the console through the same
//! `fs`/`process` calls the syscall layer wraps.

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::drivers::console;
use crate::drivers::keyboard::KEYBOARD_RING;
use crate::fs::{self, InodeNo};
use crate::process;

const BACKSPACE: u8 = 0x08;
const ENTER: u8 = b'\n';

fn read_line() -> String {
    let mut line = String::new();
    loop {
        let byte = KEYBOARD_RING.pop();
        match byte {
            ENTER => {
                console::putchar(b'\n');
                return line;
            }
            BACKSPACE => {
                if line.pop().is_some() {
                    console::putchar(BACKSPACE);
                }
            }
            byte => {
                console::putchar(byte);
                line.push(byte as char);
            }
        }
    }
}

fn print_error(cmd: &str, err: crate::error::KernelError) {
    crate::println!("{cmd}: {err}");
}

fn cmd_pwd(cwd: InodeNo) {
    match fs::getcwd_path(cwd) {
        Ok(path) => crate::println!("{path}"),
        Err(err) => print_error("pwd", err),
    }
}

fn cmd_cd(args: &[&str]) {
    let path = args.first().copied().unwrap_or("/");
    match fs::chdir(process::current_cwd(), path) {
        Ok(inode) => process::set_current_cwd(inode),
        Err(err) => print_error("cd", err),
    }
}

fn cmd_ls(args: &[&str]) {
    let long = args.contains(&"-l");
    let human = args.contains(&"-h");
    let path = args.iter().copied().find(|a| !a.starts_with('-')).unwrap_or(".");

    let cwd = process::current_cwd();
    let handle = match fs::opendir(cwd, path) {
        Ok(h) => h,
        Err(err) => return print_error("ls", err),
    };
    loop {
        match fs::readdir(handle) {
            Ok(Some(name)) => {
                if long {
                    let entry_path = format!("{path}/{name}");
                    match fs::stat(cwd, &entry_path) {
                        Ok(info) => {
                            let kind = if info.is_dir { 'd' } else { '-' };
                            let size = if human { human_size(info.size) } else { format!("{}", info.size) };
                            crate::println!("{kind} {size:>8} {name}");
                        }
                        Err(_) => crate::println!("{name}"),
                    }
                } else {
                    crate::println!("{name}");
                }
            }
            Ok(None) => break,
            Err(err) => {
                print_error("ls", err);
                break;
            }
        }
    }
    let _ = fs::closedir(handle);
}

fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut size = bytes as f32;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1}{}", UNITS[unit])
}

fn cmd_ps() {
    crate::println!("PID  PRIORITY  NAME");
    for (pid, name, priority) in process::ps() {
        crate::println!("{:<4} {:<9} {}", pid, priority, name);
    }
}

fn cmd_mkdir(args: &[&str]) {
    let Some(&path) = args.first() else {
        crate::println!("mkdir: missing operand");
        return;
    };
    if let Err(err) = fs::mkdir(process::current_cwd(), path) {
        print_error("mkdir", err);
    }
}

fn cmd_rmdir(args: &[&str]) {
    let Some(&path) = args.first() else {
        crate::println!("rmdir: missing operand");
        return;
    };
    if let Err(err) = fs::rmdir(process::current_cwd(), path) {
        print_error("rmdir", err);
    }
}

fn cmd_mkfile(args: &[&str]) {
    let Some(&path) = args.first() else {
        crate::println!("mkfile: missing operand");
        return;
    };
    match fs::open(process::current_cwd(), path, true, true) {
        Ok(global_index) => {
            let _ = fs::close(global_index);
        }
        Err(err) => print_error("mkfile", err),
    }
}

fn cmd_rm(args: &[&str]) {
    let Some(&path) = args.first() else {
        crate::println!("rm: missing operand");
        return;
    };
    if let Err(err) = fs::unlink(process::current_cwd(), path) {
        print_error("rm", err);
    }
}

fn dispatch(line: &str) {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else { return };
    let args: Vec<&str> = words.collect();

    match cmd {
        "pwd" => cmd_pwd(process::current_cwd()),
        "cd" => cmd_cd(&args),
        "ls" => cmd_ls(&args),
        "ps" => cmd_ps(),
        "clear" => console::clear(),
        "mkdir" => cmd_mkdir(&args),
        "rmdir" => cmd_rmdir(&args),
        "mkfile" => cmd_mkfile(&args),
        "rm" => cmd_rm(&args),
        other => crate::println!("{other}: command not found"),
    }
}

/// The shell kernel thread's entry point (`sched::task::Task::new_kernel_thread_with_entry`).
pub extern "C" fn run() -> ! {
    crate::println!("ferrite shell. Type a command.");
    loop {
        crate::print!("$ ");
        let line = read_line();
        dispatch(line.trim());
    }
}
