//! `print!`/`println!` write to the VGA text console (`spec.md`'s `putchar`
//! backing store); `serial_print!`/`serial_println!` (see [`crate::serial`])
//! go to COM1 instead, for boot-time logging before the console is usable
//! and for host test output.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::drivers::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
