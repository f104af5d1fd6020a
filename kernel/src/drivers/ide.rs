//! ATA/IDE driver: programmed-I/O sector read/write over the PC's two
//! legacy channels, synchronized with the controller through a per-channel
//! command mutex and completion semaphore (`spec.md` §4.5).

use spin::Mutex;

use crate::arch::port::{inb, inw, outb, outw};
use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::sync::Semaphore;

pub const SECTOR_SIZE: usize = config::SECTOR_SIZE;
const MAX_SECTORS_PER_BURST: usize = 256;

struct ChannelPorts {
    io_base: u16,
    control: u16,
}

const CHANNELS: [ChannelPorts; 2] = [
    ChannelPorts { io_base: config::IDE_PORT_BASE[0], control: config::IDE_CONTROL_PORT[0] },
    ChannelPorts { io_base: config::IDE_PORT_BASE[1], control: config::IDE_CONTROL_PORT[1] },
];

// Task-file register offsets from `io_base`.
const REG_DATA: u16 = 0;
const REG_ERROR: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_COMMAND: u16 = 7;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_IDENTIFY: u8 = 0xEC;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

const DRIVE_HEAD_LBA: u8 = 0xE0; // LBA mode, drive 0, reserved bits set

/// `config::IDE_BUSY_WAIT_TIMEOUT_MS` worth of `config::IDE_BUSY_WAIT_POLL_MS`
/// polling intervals, as the wait loop this is grounded on intends (the
/// original's `time_limit -= 10 >= 0` decrements by one per iteration
/// instead, which would spin for only a few microseconds — fixed here
/// rather than carried forward, see DESIGN.md).
const BUSY_WAIT_ITERATIONS: u32 = config::IDE_BUSY_WAIT_TIMEOUT_MS / config::IDE_BUSY_WAIT_POLL_MS;
const BUSY_WAIT_SPIN_PER_ITERATION: u32 = 10_000;

struct Channel {
    mutex: Mutex<()>,
    done: Semaphore,
    expecting_intr: core::sync::atomic::AtomicBool,
}

static CHANNELS_STATE: [Channel; 2] = [
    Channel {
        mutex: Mutex::new(()),
        done: Semaphore::new(0),
        expecting_intr: core::sync::atomic::AtomicBool::new(false),
    },
    Channel {
        mutex: Mutex::new(()),
        done: Semaphore::new(0),
        expecting_intr: core::sync::atomic::AtomicBool::new(false),
    },
];

/// Called from `arch::x86::idt`'s IRQ14/15 stubs.
pub fn on_irq(channel: usize) {
    let chan = &CHANNELS_STATE[channel];
    if chan.expecting_intr.swap(false, core::sync::atomic::Ordering::SeqCst) {
        // SAFETY: acknowledging the interrupt by reading the status
        // register is part of the documented ATA IRQ handshake.
        unsafe {
            inb(CHANNELS[channel].io_base + REG_STATUS);
        }
        chan.done.up();
    }
}

fn busy_wait(channel: usize) -> KernelResult<()> {
    let io_base = CHANNELS[channel].io_base;
    for _ in 0..BUSY_WAIT_ITERATIONS {
        // SAFETY: reading the status register is always safe.
        let status = unsafe { inb(io_base + REG_STATUS) };
        if status & STATUS_BSY == 0 && status & STATUS_DRQ != 0 {
            return Ok(());
        }
        if status & STATUS_ERR != 0 {
            return Err(KernelError::Hardware { device: "ide", code: status as u32 });
        }
        for _ in 0..BUSY_WAIT_SPIN_PER_ITERATION {
            core::hint::spin_loop();
        }
    }
    panic!("ide: busy_wait timed out on channel {channel}");
}

/// Like `busy_wait`, but for the `IDENTIFY` probe: an absent drive times out
/// by design, so that case returns `Err` instead of panicking.
fn busy_wait_poll_only(channel: usize) -> KernelResult<()> {
    let io_base = CHANNELS[channel].io_base;
    for _ in 0..BUSY_WAIT_ITERATIONS {
        // SAFETY: reading the status register is always safe.
        let status = unsafe { inb(io_base + REG_STATUS) };
        if status & STATUS_BSY == 0 && status & STATUS_DRQ != 0 {
            return Ok(());
        }
        if status & STATUS_ERR != 0 {
            return Err(KernelError::Hardware { device: "ide", code: status as u32 });
        }
        for _ in 0..BUSY_WAIT_SPIN_PER_ITERATION {
            core::hint::spin_loop();
        }
    }
    Err(KernelError::Hardware { device: "ide", code: 0 })
}

fn select_lba28(channel: usize, lba: u32, sector_count: u8) {
    let io_base = CHANNELS[channel].io_base;
    // SAFETY: programming the task-file registers with the channel mutex
    // held is the documented ATA PIO command sequence.
    unsafe {
        outb(io_base + REG_DRIVE_HEAD, DRIVE_HEAD_LBA | (((lba >> 24) & 0x0F) as u8));
        outb(io_base + REG_SECTOR_COUNT, sector_count);
        outb(io_base + REG_LBA_LOW, (lba & 0xFF) as u8);
        outb(io_base + REG_LBA_MID, ((lba >> 8) & 0xFF) as u8);
        outb(io_base + REG_LBA_HIGH, ((lba >> 16) & 0xFF) as u8);
    }
}

/// A single IDE drive addressed as `(channel, lba_base)`; implements
/// [`BlockDevice`] so the filesystem layer can mount it without knowing it's
/// talking to real hardware.
pub struct IdeDrive {
    channel: usize,
    total_sectors: u64,
}

impl IdeDrive {
    pub const fn new(channel: usize, total_sectors: u64) -> Self {
        Self { channel, total_sectors }
    }

    /// Probes a channel with `IDENTIFY DEVICE` (`spec.md`'s IDE driver line
    /// item) and builds a drive sized from the response's LBA28 sector
    /// count (words 60-61). Returns `None` if the channel reports no drive
    /// (status reads back all-1s / 0, the standard "floating bus" tell).
    pub fn identify(channel: usize) -> Option<Self> {
        let io_base = CHANNELS[channel].io_base;
        // SAFETY: programming the task-file for IDENTIFY with no other
        // command outstanding on this channel is the documented sequence.
        unsafe {
            outb(io_base + REG_DRIVE_HEAD, DRIVE_HEAD_LBA);
            outb(io_base + REG_SECTOR_COUNT, 0);
            outb(io_base + REG_LBA_LOW, 0);
            outb(io_base + REG_LBA_MID, 0);
            outb(io_base + REG_LBA_HIGH, 0);
            outb(io_base + REG_COMMAND, CMD_IDENTIFY);
        }
        // SAFETY: reading the status register right after issuing a
        // command is always safe.
        let status = unsafe { inb(io_base + REG_STATUS) };
        if status == 0 {
            return None;
        }
        if busy_wait_poll_only(channel).is_err() {
            return None;
        }

        let mut data = [0u16; 256];
        for word in data.iter_mut() {
            // SAFETY: DRQ is set, so exactly 256 words are available.
            *word = unsafe { inw(io_base + REG_DATA) };
        }
        let total_sectors = (data[61] as u64) << 16 | data[60] as u64;
        Some(Self::new(channel, total_sectors))
    }

    fn read_burst(&self, lba: u32, sector_count: usize, buf: &mut [u8]) -> KernelResult<()> {
        let chan_state = &CHANNELS_STATE[self.channel];
        let _guard = chan_state.mutex.lock();

        select_lba28(self.channel, lba, sector_count as u8);
        chan_state.expecting_intr.store(true, core::sync::atomic::Ordering::SeqCst);
        // SAFETY: issuing the read command after programming the task
        // file is the documented sequence.
        unsafe {
            outb(CHANNELS[self.channel].io_base + REG_COMMAND, CMD_READ_SECTORS);
        }
        chan_state.done.down();
        busy_wait(self.channel)?;

        for sector in 0..sector_count {
            let dst = &mut buf[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            for word in dst.chunks_exact_mut(2) {
                // SAFETY: the data register yields one 16-bit word per
                // read once DRQ is set, for exactly `sector_count * 256`
                // reads.
                let value = unsafe { inw(CHANNELS[self.channel].io_base + REG_DATA) };
                word[0] = (value & 0xFF) as u8;
                word[1] = (value >> 8) as u8;
            }
        }
        Ok(())
    }

    fn write_burst(&self, lba: u32, sector_count: usize, buf: &[u8]) -> KernelResult<()> {
        let chan_state = &CHANNELS_STATE[self.channel];
        let _guard = chan_state.mutex.lock();

        select_lba28(self.channel, lba, sector_count as u8);
        chan_state.expecting_intr.store(true, core::sync::atomic::Ordering::SeqCst);
        // SAFETY: see `read_burst`; the write command expects the same
        // task-file programming sequence.
        unsafe {
            outb(CHANNELS[self.channel].io_base + REG_COMMAND, CMD_WRITE_SECTORS);
        }
        busy_wait(self.channel)?;

        for sector in 0..sector_count {
            let src = &buf[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            for word in src.chunks_exact(2) {
                let value = u16::from(word[0]) | (u16::from(word[1]) << 8);
                // SAFETY: writing exactly `sector_count * 256` words to
                // the data register after DRQ is the documented sequence.
                unsafe {
                    outw(CHANNELS[self.channel].io_base + REG_DATA, value);
                }
            }
        }
        chan_state.done.down();
        Ok(())
    }
}

impl BlockDevice for IdeDrive {
    fn name(&self) -> &str {
        "ide"
    }

    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn block_count(&self) -> u64 {
        self.total_sectors
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> KernelResult<()> {
        let total_sectors = buffer.len() / SECTOR_SIZE;
        let mut done = 0;
        while done < total_sectors {
            let burst = (total_sectors - done).min(MAX_SECTORS_PER_BURST);
            self.read_burst(
                (start_block as usize + done) as u32,
                burst,
                &mut buffer[done * SECTOR_SIZE..(done + burst) * SECTOR_SIZE],
            )?;
            done += burst;
        }
        Ok(())
    }

    fn write_blocks(&mut self, start_block: u64, buffer: &[u8]) -> KernelResult<()> {
        let total_sectors = buffer.len() / SECTOR_SIZE;
        let mut done = 0;
        while done < total_sectors {
            let burst = (total_sectors - done).min(MAX_SECTORS_PER_BURST);
            self.write_burst(
                (start_block as usize + done) as u32,
                burst,
                &buffer[done * SECTOR_SIZE..(done + burst) * SECTOR_SIZE],
            )?;
            done += burst;
        }
        Ok(())
    }
}

/// Disables interrupt-driven completion for the control port's nIEN bit,
/// run once per channel during driver bring-up.
pub fn init() {
    for ports in &CHANNELS {
        // SAFETY: writing 0 to the device control register enables
        // interrupts on a channel that starts with them masked by
        // firmware; this is the standard bring-up sequence.
        unsafe {
            outb(ports.control, 0);
        }
    }
}

#[allow(dead_code)]
fn error_register(channel: usize) -> u8 {
    // SAFETY: the error register is always readable.
    unsafe { inb(CHANNELS[channel].io_base + REG_ERROR) }
}
