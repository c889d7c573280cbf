//! The volume superblock: geometry and free counts, read at mount and
//! rewritten whenever the allocators change or the volume is torn down.
//!
//! Grounded in SFUSE's `include/super.h`/`src/super.c` for the field set,
//! and in `mkfs/src/ext2.rs`'s `Superblock` for the load/sync/format shape —
//! reworked to use `bincode` encode/decode instead of an unsafe byte-slice
//! reinterpretation of a `#[repr(C, packed)]` struct.

use bincode::{Decode, Encode};

use crate::codec;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::{Geometry, BLOCK_SIZE, MAGIC};

/// On-disk byte offset of the superblock. It is always the very first bytes
/// of the backing store, ahead of block 1.
const SUPERBLOCK_OFFSET: u64 = 0;

/// On-disk size of the encoded superblock, in bytes: nine little-endian
/// `u32` fields.
pub const SUPERBLOCK_SIZE: usize = 9 * 4;

/// The persistent volume header (spec.md §3 "Superblock").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Superblock {
    pub magic: u32,
    pub total_inodes: u32,
    pub total_blocks: u32,
    pub free_inodes: u32,
    pub free_blocks: u32,
    pub inode_bitmap_start: u32,
    pub block_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_block_start: u32,
}

impl Superblock {
    /// Reads and validates the superblock from `device`. Fails with
    /// `Invalid` if the magic number doesn't match.
    pub fn load(device: &mut BlockDevice) -> Result<Self> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        device.read_at(SUPERBLOCK_OFFSET, &mut buf)?;
        let (sb, _): (Superblock, usize) =
            bincode::decode_from_slice(&buf, codec::config())
                .map_err(|_| Error::Invalid)?;
        if sb.magic != MAGIC {
            return Err(Error::Invalid);
        }
        if !(sb.inode_bitmap_start < sb.block_bitmap_start
            && sb.block_bitmap_start < sb.inode_table_start
            && sb.inode_table_start < sb.data_block_start
            && sb.data_block_start < sb.total_blocks)
        {
            return Err(Error::Invalid);
        }
        Ok(sb)
    }

    /// Writes the superblock back to its fixed offset.
    pub fn sync(&self, device: &mut BlockDevice) -> Result<()> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let n = bincode::encode_into_slice(self, &mut buf, codec::config())
            .map_err(|_| Error::Invalid)?;
        debug_assert_eq!(n, SUPERBLOCK_SIZE);
        device.write_at(SUPERBLOCK_OFFSET, &buf)?;
        Ok(())
    }

    /// Builds a fresh superblock for a backing store of `total_blocks`
    /// blocks, with `total_inodes` inode records, and two objects already
    /// allocated: inode 0 (reserved) and inode 1 (root, allocated by the
    /// caller after this returns).
    pub fn format(total_blocks: u32, total_inodes: u32) -> Self {
        let geom = Geometry::compute(total_blocks, total_inodes);
        Self {
            magic: MAGIC,
            total_inodes: geom.total_inodes,
            total_blocks: geom.total_blocks,
            // Inode 0 is reserved, inode 1 (root) is allocated by `Volume::format`.
            free_inodes: geom.total_inodes - 2,
            free_blocks: geom.total_blocks - geom.data_block_start,
            inode_bitmap_start: geom.inode_bitmap_start,
            block_bitmap_start: geom.block_bitmap_start,
            inode_table_start: geom.inode_table_start,
            data_block_start: geom.data_block_start,
        }
    }

    /// Number of blocks the inode bitmap occupies.
    pub fn inode_bitmap_blocks(&self) -> u32 {
        self.block_bitmap_start - self.inode_bitmap_start
    }

    /// Number of blocks the block bitmap occupies.
    pub fn block_bitmap_blocks(&self) -> u32 {
        self.inode_table_start - self.block_bitmap_start
    }

    /// Number of blocks the inode table occupies.
    pub fn inode_table_blocks(&self) -> u32 {
        self.data_block_start - self.inode_table_start
    }

    /// Number of data blocks available to allocate.
    pub fn data_blocks(&self) -> u32 {
        self.total_blocks - self.data_block_start
    }
}

/// Minimum backing-store length, in bytes, for a volume to be formattable:
/// room for the superblock plus at least one block in each region.
pub fn minimum_store_len() -> u64 {
    5 * BLOCK_SIZE
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn scratch_device(blocks: u64) -> BlockDevice {
        let mut file = tempfile::tempfile().unwrap();
        file.seek(SeekFrom::Start(blocks * BLOCK_SIZE - 1)).unwrap();
        file.write_all(&[0u8]).unwrap();
        BlockDevice::new(file)
    }

    #[test]
    fn round_trip() {
        let mut dev = scratch_device(1024);
        let sb = Superblock::format(1024, 128);
        sb.sync(&mut dev).unwrap();
        let loaded = Superblock::load(&mut dev).unwrap();
        assert_eq!(sb, loaded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut dev = scratch_device(1024);
        let zeros = [0u8; BLOCK_SIZE as usize];
        dev.write_at(0, &zeros).unwrap();
        assert!(matches!(Superblock::load(&mut dev), Err(Error::Invalid)));
    }
}
