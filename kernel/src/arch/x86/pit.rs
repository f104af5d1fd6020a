//! Programs the 8253/8254 PIT to fire IRQ0 at `spec.md` §4.3's preemption
//! frequency.

use core::sync::atomic::{AtomicU64, Ordering};

use super::port::outb;
use crate::config;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn init(hz: u32) {
    let divisor = (PIT_BASE_FREQUENCY / hz) as u16;
    // SAFETY: these ports exist on every PC-compatible system and this
    // command sequence is the documented way to reprogram channel 0.
    unsafe {
        outb(PIT_COMMAND, 0x36);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

/// Called once per timer interrupt; backs [`get_timestamp_ms`].
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn get_timestamp_ms() -> u64 {
    TICKS.load(Ordering::Relaxed) * (1000 / config::TIMER_HZ as u64)
}
