//! Inode codec: fixed-size metadata records addressed by inode number.
//!
//! Grounded in SFUSE's `include/inode.h` for the field set and in
//! `mkfs/src/ext2.rs`'s `INode` for the load/sync-by-number shape. The
//! C header's `links` field is intentionally dropped: this engine has no
//! hard-link support (spec.md §1 Non-goals), so the file's own directory
//! entry is its only link and a persistent link count is dead weight.
//!
//! spec.md §6 sums the field list to 72 bytes but enumerates 21 `u32`
//! fields (mode, uid, gid, size, atime, mtime, ctime, 12 direct pointers,
//! indirect, double_indirect) which is 84 bytes; the enumeration is taken
//! as authoritative and the record is padded out to `INODE_SIZE`.

use bincode::{Decode, Encode};

use crate::codec;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::{DIRECT_POINTERS, INODE_SIZE};
use crate::superblock::Superblock;

/// Encoded size of the field list proper, before padding to `INODE_SIZE`.
const RECORD_SIZE: usize = 21 * 4;

/// File type bits, matching the POSIX `S_IFMT` family the bridge expects in
/// `mode`.
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

/// A single inode record (spec.md §3 "Inode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Inode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub direct: [u32; DIRECT_POINTERS],
    pub indirect: u32,
    pub double_indirect: u32,
}

impl Inode {
    /// A zeroed record with the given `mode`, timestamped `now`.
    pub fn new(mode: u32, uid: u32, gid: u32, now: u32) -> Self {
        Self {
            mode,
            uid,
            gid,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            direct: [0; DIRECT_POINTERS],
            indirect: 0,
            double_indirect: 0,
        }
    }

    /// Whether this record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    /// Number of blocks this file currently occupies, rounded up.
    pub fn block_count(&self) -> u32 {
        crate::layout::ceil_div(self.size as u64, crate::layout::BLOCK_SIZE) as u32
    }

    /// Byte offset of inode record `i` within the backing store.
    fn offset(i: u32, sb: &Superblock) -> u64 {
        sb.inode_table_start as u64 * crate::layout::BLOCK_SIZE + i as u64 * INODE_SIZE
    }

    /// Reads inode `i`. Rejects `i == 0` or `i >= total_inodes`.
    pub fn load(device: &mut BlockDevice, sb: &Superblock, i: u32) -> Result<Self> {
        if i == 0 || i >= sb.total_inodes {
            return Err(Error::Invalid);
        }
        let mut buf = vec![0u8; INODE_SIZE as usize];
        device.read_at(Self::offset(i, sb), &mut buf)?;
        let (inode, _): (Inode, usize) =
            bincode::decode_from_slice(&buf[..RECORD_SIZE], codec::config())
                .map_err(|_| Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "corrupt inode record",
                )))?;
        Ok(inode)
    }

    /// Writes inode `i` back to its slot. Rejects `i == 0` or
    /// `i >= total_inodes`.
    pub fn sync(&self, device: &mut BlockDevice, sb: &Superblock, i: u32) -> Result<()> {
        if i == 0 || i >= sb.total_inodes {
            return Err(Error::Invalid);
        }
        let mut buf = vec![0u8; INODE_SIZE as usize];
        let n = bincode::encode_into_slice(self, &mut buf[..RECORD_SIZE], codec::config())
            .map_err(|_| Error::Invalid)?;
        debug_assert_eq!(n, RECORD_SIZE);
        device.write_at(Self::offset(i, sb), &buf)?;
        Ok(())
    }

    /// Writes an all-zero record to slot `i`, used when freeing an inode so
    /// that freed space cannot leak stale content (spec.md §3 Lifecycles).
    pub fn clear(device: &mut BlockDevice, sb: &Superblock, i: u32) -> Result<()> {
        if i == 0 || i >= sb.total_inodes {
            return Err(Error::Invalid);
        }
        let buf = vec![0u8; INODE_SIZE as usize];
        device.write_at(Self::offset(i, sb), &buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::BLOCK_SIZE;
    use std::io::{Seek, SeekFrom, Write};

    fn scratch(blocks: u64) -> (BlockDevice, Superblock) {
        let mut file = tempfile::tempfile().unwrap();
        file.seek(SeekFrom::Start(blocks * BLOCK_SIZE - 1)).unwrap();
        file.write_all(&[0u8]).unwrap();
        let sb = Superblock::format(blocks as u32, 128);
        (BlockDevice::new(file), sb)
    }

    #[test]
    fn rejects_inode_zero() {
        let (mut dev, sb) = scratch(1024);
        assert!(matches!(Inode::load(&mut dev, &sb, 0), Err(Error::Invalid)));
    }

    #[test]
    fn round_trip() {
        let (mut dev, sb) = scratch(1024);
        let mut ino = Inode::new(S_IFREG | 0o644, 1000, 1000, 12345);
        ino.direct[0] = sb.data_block_start;
        ino.size = 10;
        ino.sync(&mut dev, &sb, 1).unwrap();
        let loaded = Inode::load(&mut dev, &sb, 1).unwrap();
        assert_eq!(ino, loaded);
    }

    #[test]
    fn out_of_range_rejected() {
        let (mut dev, sb) = scratch(1024);
        assert!(matches!(
            Inode::load(&mut dev, &sb, sb.total_inodes),
            Err(Error::Invalid)
        ));
    }
}
