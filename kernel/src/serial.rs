//! Serial console for kernel logging and host test output. The VGA text
//! console ([`crate::drivers::console`]) is what the booted kernel and
//! shell write to; this is the side channel `log` and host test runs use.

use core::fmt;

#[cfg(target_arch = "x86")]
mod hw {
    use core::fmt;

    use lazy_static::lazy_static;
    use spin::Mutex;
    use uart_16550::SerialPort;

    const COM1: u16 = 0x3F8;

    lazy_static! {
        static ref PORT: Mutex<SerialPort> = {
            let mut port = unsafe { SerialPort::new(COM1) };
            port.init();
            Mutex::new(port)
        };
    }

    pub fn init() {
        let _ = PORT.lock();
    }

    pub fn print(args: fmt::Arguments) {
        use core::fmt::Write;
        crate::arch::interrupts::without_interrupts(|| {
            PORT.lock().write_fmt(args).ok();
        });
    }
}

#[cfg(not(target_arch = "x86"))]
mod hw {
    use core::fmt;

    pub fn init() {}

    /// Host test runs have no COM1; route straight to stdout so
    /// `serial_println!` remains useful while developing off-target.
    pub fn print(args: fmt::Arguments) {
        std::print!("{args}");
    }
}

pub fn init() {
    hw::init();
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    hw::print(args);
}
