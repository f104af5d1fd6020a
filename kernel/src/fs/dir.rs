//! On-disk directory entry format (`spec.md` §4.6). A directory's data is a
//! flat array of fixed-size entries, one per `config::MAX_FILENAME_LEN`-byte
//! name plus a 32-bit inode number; a zero inode number marks a deleted slot
//! that a later `mkdir`/`create` can reuse.

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::fs::blockfs::InodeNo;

pub const DIR_ENTRY_SIZE: usize = config::MAX_FILENAME_LEN + 4;

pub struct DirEntryOnDisk {
    pub name: [u8; config::MAX_FILENAME_LEN],
    pub inode: InodeNo,
}

impl DirEntryOnDisk {
    pub fn new(name: &str, inode: InodeNo) -> KernelResult<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= config::MAX_FILENAME_LEN {
            return Err(KernelError::InvalidArgument {
                name: "name",
                value: "empty or too long for a directory entry",
            });
        }
        let mut buf = [0u8; config::MAX_FILENAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { name: buf, inode })
    }

    pub fn in_use(&self) -> bool {
        self.name[0] != 0
    }

    pub fn clear(&mut self) {
        self.name = [0u8; config::MAX_FILENAME_LEN];
        self.inode = 0;
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut out = [0u8; DIR_ENTRY_SIZE];
        out[..config::MAX_FILENAME_LEN].copy_from_slice(&self.name);
        out[config::MAX_FILENAME_LEN..].copy_from_slice(&self.inode.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; config::MAX_FILENAME_LEN];
        name.copy_from_slice(&buf[..config::MAX_FILENAME_LEN]);
        let inode = u32::from_le_bytes([
            buf[config::MAX_FILENAME_LEN],
            buf[config::MAX_FILENAME_LEN + 1],
            buf[config::MAX_FILENAME_LEN + 2],
            buf[config::MAX_FILENAME_LEN + 3],
        ]);
        Self { name, inode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let entry = DirEntryOnDisk::new("bin", 7).unwrap();
        let bytes = entry.to_bytes();
        let back = DirEntryOnDisk::from_bytes(&bytes);
        assert_eq!(back.name_str(), "bin");
        assert_eq!(back.inode, 7);
        assert!(back.in_use());
    }

    #[test]
    fn cleared_entry_is_not_in_use() {
        let mut entry = DirEntryOnDisk::new("gone", 3).unwrap();
        entry.clear();
        assert!(!entry.in_use());
    }

    #[test]
    fn rejects_name_too_long() {
        let long = "x".repeat(config::MAX_FILENAME_LEN);
        assert!(DirEntryOnDisk::new(&long, 1).is_err());
    }
}
