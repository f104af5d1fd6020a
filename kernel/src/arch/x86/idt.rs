//! Interrupt descriptor table: the timer tick (IRQ0), the keyboard (IRQ1),
//! the two IDE channels (IRQ14/15), and the syscall software interrupt
//! (`int 0x80`, `spec.md` §4.8).

use core::mem::size_of;

use spin::Mutex;

use super::gdt::KERNEL_CODE_SELECTOR;
use super::pic;

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: u32, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

const INTERRUPT_GATE: u8 = 0x8E; // present, ring 0, 32-bit interrupt gate
const TRAP_GATE_RING3: u8 = 0xEE; // present, ring 3, 32-bit trap gate (syscalls)

const IDT_ENTRIES: usize = 256;

static IDT: Mutex<[IdtEntry; IDT_ENTRIES]> = Mutex::new([IdtEntry::missing(); IDT_ENTRIES]);

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

pub fn init() {
    let mut idt = IDT.lock();
    idt[pic::TIMER_VECTOR as usize] = IdtEntry::new(timer_stub as u32, INTERRUPT_GATE);
    idt[pic::KEYBOARD_VECTOR as usize] = IdtEntry::new(keyboard_stub as u32, INTERRUPT_GATE);
    idt[pic::IDE_PRIMARY_VECTOR as usize] = IdtEntry::new(ide_primary_stub as u32, INTERRUPT_GATE);
    idt[pic::IDE_SECONDARY_VECTOR as usize] = IdtEntry::new(ide_secondary_stub as u32, INTERRUPT_GATE);
    idt[0x80] = IdtEntry::new(syscall_stub as u32, TRAP_GATE_RING3);

    let ptr = DescriptorTablePointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    // SAFETY: `ptr` describes the table just populated above.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
    }
}

extern "x86-interrupt" fn timer_stub() {
    super::pit::on_tick();
    crate::sched::scheduler::on_timer_tick();
    pic::end_of_interrupt(pic::TIMER_VECTOR);
}

extern "x86-interrupt" fn keyboard_stub() {
    crate::drivers::keyboard::on_irq();
    pic::end_of_interrupt(pic::KEYBOARD_VECTOR);
}

extern "x86-interrupt" fn ide_primary_stub() {
    crate::drivers::ide::on_irq(0);
    pic::end_of_interrupt(pic::IDE_PRIMARY_VECTOR);
}

extern "x86-interrupt" fn ide_secondary_stub() {
    crate::drivers::ide::on_irq(1);
    pic::end_of_interrupt(pic::IDE_SECONDARY_VECTOR);
}

/// The real syscall entry point needs to read EAX/EBX/ECX/EDX off the
/// trapped register frame and write a return value back into the saved
/// EAX before `iret` (`spec.md` §4.8); that marshalling lives in
/// `syscall::dispatch_from_frame`, which this naked stub hands off to.
#[naked]
extern "C" fn syscall_stub() {
    // SAFETY: this is the IDT's entry point for `int 0x80`; it runs with a
    // hardware-pushed interrupt frame on the stack and nothing else live.
    unsafe {
        core::arch::naked_asm!(
            "pusha",
            "push esp",
            "call {dispatch}",
            "add esp, 4",
            "mov [esp + 28], eax", // overwrite saved EAX (pusha's last push) with the return value
            "popa",
            "iretd",
            dispatch = sym crate::syscall::dispatch_from_frame,
        );
    }
}
