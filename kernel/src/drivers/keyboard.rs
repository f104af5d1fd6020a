//! PS/2 keyboard: the IRQ1 handler feeds raw scancodes to the `pc_keyboard`
//! crate's decoder and pushes the resulting bytes into the keyboard ring
//! ([`crate::sync::io_ring`]) backing fd 0 (`spec.md` §4.7 — the ring's
//! producer API takes already-decoded bytes). `spec.md` §1's Non-goals place
//! scancode decoding itself out of scope, so this module doesn't implement
//! it — it only wires the port read to the decoder and the decoder to the
//! ring, the same division the teacher's x86_64 driver uses.

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::arch::port::inb;
use crate::sync::io_ring::IoRing;

const DATA_PORT: u16 = 0x60;

pub static KEYBOARD_RING: IoRing = IoRing::new();

static KEYBOARD: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn init() {
    *KEYBOARD.lock() = Some(Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore));
}

/// Called from [`crate::arch::x86::idt`]'s IRQ1 stub with interrupts still
/// disabled, matching the keyboard ring's entry requirement.
pub fn on_irq() {
    // SAFETY: port 0x60 is the PS/2 controller's data port, safe to read
    // from interrupt context on any PC-compatible system.
    let scancode = unsafe { inb(DATA_PORT) };

    let mut guard = KEYBOARD.lock();
    let Some(keyboard) = guard.as_mut() else { return };
    let Ok(Some(key_event)) = keyboard.add_byte(scancode) else { return };
    let Some(DecodedKey::Unicode(ch)) = keyboard.process_keyevent(key_event) else { return };
    if ch.is_ascii() {
        KEYBOARD_RING.push(ch as u8);
    }
}
