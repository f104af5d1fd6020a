//! Device drivers: the VGA console, the PS/2 keyboard, and the ATA/IDE disk
//! stack the filesystem mounts on top of.

pub mod console;
pub mod ide;
pub mod keyboard;
pub mod partition;

pub fn init() {
    console::init();
    keyboard::init();
    ide::init();
    crate::println!("[drivers] console, keyboard, ide ready");
}
