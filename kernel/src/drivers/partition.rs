//! MBR/EBR partition table scanner (`spec.md` §4.5): walks a disk's boot
//! sector and any extended-partition chain into a flat list of primary and
//! logical partitions the filesystem layer mounts by LBA range.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::BlockDevice;

const MBR_SIGNATURE_OFFSET: usize = 510;
const MBR_SIGNATURE: u16 = config::BOOT_SIGNATURE;
const PARTITION_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const EXTENDED_PARTITION_TYPE: u8 = config::PARTITION_TYPE_EXTENDED;

const MAX_PRIMARY_PARTITIONS: usize = config::MAX_PRIMARY_PARTITIONS;
const MAX_LOGICAL_PARTITIONS: usize = config::MAX_LOGICAL_PARTITIONS;

#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub start_lba: u32,
    pub sector_count: u32,
}

struct RawEntry {
    partition_type: u8,
    start_lba: u32,
    sector_count: u32,
}

fn read_entry(sector: &[u8], index: usize) -> RawEntry {
    let base = PARTITION_TABLE_OFFSET + index * ENTRY_SIZE;
    let partition_type = sector[base + 4];
    let start_lba = u32::from_le_bytes(sector[base + 8..base + 12].try_into().unwrap());
    let sector_count = u32::from_le_bytes(sector[base + 12..base + 16].try_into().unwrap());
    RawEntry { partition_type, start_lba, sector_count }
}

fn is_valid(entry: &RawEntry) -> bool {
    entry.partition_type != 0
}

/// Scans `disk` for primary and logical partitions, naming each
/// `"{disk_name}{index}"` (e.g. `sdb1`, `sdb2`, ...).
pub fn scan(disk: &dyn BlockDevice, disk_name: &str) -> KernelResult<Vec<Partition>> {
    let mut sector = alloc::vec![0u8; disk.block_size()];
    disk.read_blocks(0, &mut sector)?;

    let signature = u16::from_le_bytes([sector[MBR_SIGNATURE_OFFSET], sector[MBR_SIGNATURE_OFFSET + 1]]);
    if signature != MBR_SIGNATURE {
        return Err(KernelError::InvalidArgument { name: "mbr_signature", value: "missing 0x55AA" });
    }

    let mut partitions = Vec::new();
    let mut next_index = 1usize;

    for i in 0..MAX_PRIMARY_PARTITIONS {
        let entry = read_entry(&sector, i);
        if !is_valid(&entry) {
            continue;
        }
        if entry.partition_type == EXTENDED_PARTITION_TYPE {
            scan_extended(disk, disk_name, entry.start_lba, entry.start_lba, &mut partitions, &mut next_index)?;
        } else {
            partitions.push(Partition {
                name: alloc::format!("{disk_name}{next_index}"),
                start_lba: entry.start_lba,
                sector_count: entry.sector_count,
            });
            next_index += 1;
        }
    }

    Ok(partitions)
}

fn scan_extended(
    disk: &dyn BlockDevice,
    disk_name: &str,
    ebr_lba: u32,
    extended_base_lba: u32,
    partitions: &mut Vec<Partition>,
    next_index: &mut usize,
) -> KernelResult<()> {
    let mut logical_count = 0usize;
    let mut current_ebr_lba = ebr_lba;

    loop {
        if logical_count >= MAX_LOGICAL_PARTITIONS {
            break;
        }

        let mut sector = alloc::vec![0u8; disk.block_size()];
        disk.read_blocks(current_ebr_lba as u64, &mut sector)?;

        let signature = u16::from_le_bytes([sector[MBR_SIGNATURE_OFFSET], sector[MBR_SIGNATURE_OFFSET + 1]]);
        if signature != MBR_SIGNATURE {
            break;
        }

        let first = read_entry(&sector, 0);
        let next = read_entry(&sector, 1);

        if is_valid(&first) {
            partitions.push(Partition {
                name: alloc::format!("{disk_name}{}", *next_index),
                start_lba: current_ebr_lba + first.start_lba,
                sector_count: first.sector_count,
            });
            *next_index += 1;
            logical_count += 1;
        }

        if is_valid(&next) && next.partition_type == EXTENDED_PARTITION_TYPE {
            current_ebr_lba = extended_base_lba + next.start_lba;
        } else {
            break;
        }
    }

    Ok(())
}
