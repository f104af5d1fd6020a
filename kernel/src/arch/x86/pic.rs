//! 8259 PIC remapping and end-of-interrupt signaling, via the `pic8259`
//! crate the teacher already depended on for its x86_64 interrupt setup.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 0x20;
pub const PIC2_OFFSET: u8 = 0x28;

pub const TIMER_VECTOR: u8 = PIC1_OFFSET; // IRQ0
pub const KEYBOARD_VECTOR: u8 = PIC1_OFFSET + 1; // IRQ1
pub const IDE_PRIMARY_VECTOR: u8 = PIC1_OFFSET + 14; // IRQ14, matches config::IDE_IRQ[0]
pub const IDE_SECONDARY_VECTOR: u8 = PIC1_OFFSET + 15; // IRQ15, matches config::IDE_IRQ[1]

static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

pub fn init() {
    // SAFETY: runs once at boot, before interrupts are enabled, with the
    // PIC command/data ports owned exclusively by the kernel.
    unsafe { PICS.lock().initialize() };
}

pub fn end_of_interrupt(vector: u8) {
    // SAFETY: `vector` is a vector this PIC pair actually raised.
    unsafe { PICS.lock().notify_end_of_interrupt(vector) };
}
