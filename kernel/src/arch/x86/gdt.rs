//! Global descriptor table and task-state segment.
//!
//! User processes need ring transitions, so the GDT carries ring-0/ring-3
//! code and data segments plus a TSS whose `esp0` field the scheduler
//! rewrites on every switch into a user process, so that the next
//! ring3->ring0 interrupt lands on that process's kernel stack
//! (`spec.md` §4.3).

use core::mem::size_of;

use spin::Mutex;

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, gran: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (gran & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct TaskStateSegment {
    prev_tss: u32,
    esp0: u32,
    ss0: u32,
    _rest: [u32; 22],
    _trailer: [u16; 3],
}

impl TaskStateSegment {
    const fn zeroed() -> Self {
        Self { prev_tss: 0, esp0: 0, ss0: 0, _rest: [0; 22], _trailer: [0; 3] }
    }
}

const KERNEL_CODE: u8 = 0x9A;
const KERNEL_DATA: u8 = 0x92;
const USER_CODE: u8 = 0xFA;
const USER_DATA: u8 = 0xF2;
const TSS_ACCESS: u8 = 0x89;
const GRAN_4K_32BIT: u8 = 0xC0;

const GDT_ENTRIES: usize = 6;

struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
    tss: TaskStateSegment,
}

static GDT: Mutex<Gdt> = Mutex::new(Gdt {
    entries: Gdt::table(),
    tss: TaskStateSegment::zeroed(),
});

impl Gdt {
    const fn table() -> [GdtEntry; GDT_ENTRIES] {
        [
            GdtEntry::null(),
            GdtEntry::new(0, 0xFFFFF, KERNEL_CODE, GRAN_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, KERNEL_DATA, GRAN_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, USER_CODE, GRAN_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, USER_DATA, GRAN_4K_32BIT),
            GdtEntry::null(), // patched with the TSS descriptor at init
        ]
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x1B; // RPL 3
pub const USER_DATA_SELECTOR: u16 = 0x23; // RPL 3
pub const TSS_SELECTOR: u16 = 0x28;

pub fn init() {
    let mut gdt = GDT.lock();
    gdt.entries = Gdt::table();
    gdt.tss.ss0 = KERNEL_DATA_SELECTOR as u32;

    let tss_base = &gdt.tss as *const _ as u32;
    let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;
    gdt.entries[5] = GdtEntry::new(tss_base, tss_limit, TSS_ACCESS, 0x00);

    let ptr = DescriptorTablePointer {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: gdt.entries.as_ptr() as u32,
    };
    // SAFETY: `ptr` describes the just-initialized table; `lgdt`/`ltr`
    // reload the segmentation state with selectors this module defines.
    unsafe {
        core::arch::asm!("lgdt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
        core::arch::asm!(
            "mov ax, {sel:x}",
            "ltr ax",
            sel = in(reg) TSS_SELECTOR,
            out("ax") _,
        );
    }
}

/// Called by the scheduler before switching into a process, so the next
/// ring3->ring0 transition on this CPU uses the new task's kernel stack.
pub fn set_kernel_stack(esp0: usize) {
    GDT.lock().tss.esp0 = esp0 as u32;
}
