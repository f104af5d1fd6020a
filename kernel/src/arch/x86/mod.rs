//! IA-32 protected-mode architecture support: GDT/TSS, IDT, the PIC, the
//! PIT preemption tick, port I/O, and the callee-saved-register context
//! switch.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod interrupts;
pub mod pic;
pub mod pit;
pub mod port;
pub mod trampoline;

pub use trampoline::intr_exit;

/// Boot-relative wall clock backing the log service's timestamps.
pub mod timer {
    pub use super::pit::get_timestamp_ms;
}

pub fn init() {
    gdt::init();
    idt::init();
    pic::init();
    pit::init(crate::config::TIMER_HZ);
}

/// Enables interrupts and parks the CPU until the next one arrives. The
/// idle loop calls this in a loop; every tick either re-enters here or
/// finds another task ready and switches away via the timer IRQ.
pub fn halt() -> ! {
    loop {
        // SAFETY: `sti` then `hlt` is the standard race-free idle sequence:
        // interrupts are enabled right before the CPU parks, so a pending
        // IRQ can't be lost between the two instructions.
        unsafe {
            core::arch::asm!("sti", "hlt", options(nomem, nostack));
        }
    }
}
