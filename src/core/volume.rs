//! The mounted volume: owns the backing device, the superblock, and both
//! bitmaps for the duration of the mount (spec.md §3 "Volume", §5).
//!
//! Grounded in SFUSE's `fs_initialize`/`fs_teardown` (`src/fs.c`) for the
//! mount/teardown lifecycle, and in spec.md §4.8's state-machine notes for
//! the dirty-tracking and mount-time repair pass, which SFUSE itself never
//! implements (it simply trusts whatever the superblock says).

use std::fs::File;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::inode::{Inode, S_IFDIR};
use crate::layout::ROOT_INODE;
use crate::superblock::{self, Superblock};

/// Current time as a `u32` seconds-since-epoch timestamp, the resolution
/// every on-disk timestamp field uses.
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Whether the volume has unsynced allocator/metadata mutations pending
/// (spec.md §4.8: Unmounted / Mounted(clean) / Mounted(dirty)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Clean,
    Dirty,
}

/// A mounted volume: the single owner of the backing device and both
/// in-memory bitmaps. Every filesystem operation borrows this exclusively
/// for its duration (spec.md §5's coarse mutex is realized one level up, as
/// `Mutex<Volume>`).
pub struct Volume {
    pub device: BlockDevice,
    pub sb: Superblock,
    pub inode_bitmap: Bitmap,
    pub block_bitmap: Bitmap,
    state: MountState,
}

impl Volume {
    /// Mounts an already-formatted backing file: loads the superblock and
    /// both bitmaps, then runs the repair pass that recomputes free counts
    /// from the bitmaps themselves (spec.md §4.8, §9 open question 1 on
    /// normalizing legacy state).
    pub fn mount(file: File) -> Result<Self> {
        let mut device = BlockDevice::new(file);
        let sb = Superblock::load(&mut device)?;
        let inode_bitmap = Bitmap::load(&mut device, sb.inode_bitmap_start, sb.inode_bitmap_blocks())?;
        let block_bitmap = Bitmap::load(&mut device, sb.block_bitmap_start, sb.block_bitmap_blocks())?;
        let mut volume = Self {
            device,
            sb,
            inode_bitmap,
            block_bitmap,
            state: MountState::Clean,
        };
        volume.repair()?;
        Ok(volume)
    }

    /// Recomputes `free_inodes`/`free_blocks` from the bitmaps' own bit
    /// counts. A crash in the dirty state may have left the counters
    /// skewed; this is this engine's entire "fsck".
    fn repair(&mut self) -> Result<()> {
        let used_inodes = self.inode_bitmap.popcount(self.sb.total_inodes);
        let used_blocks = self.block_bitmap.popcount(self.sb.data_blocks());
        let fresh_free_inodes = self.sb.total_inodes - used_inodes;
        let fresh_free_blocks = self.sb.data_blocks() - used_blocks;
        if fresh_free_inodes != self.sb.free_inodes || fresh_free_blocks != self.sb.free_blocks {
            self.sb.free_inodes = fresh_free_inodes;
            self.sb.free_blocks = fresh_free_blocks;
            self.mark_dirty();
            self.sync()?;
        }
        Ok(())
    }

    /// Formats `file` into a fresh volume: builds a superblock sized from
    /// the file's own length, zeroes both bitmaps with inodes 0 and 1
    /// reserved and data block 0 reserved for nothing (data blocks start
    /// counting from `data_block_start`), and writes the root directory
    /// inode as an empty directory (spec.md §4.2 `format`).
    pub fn format(file: File, total_inodes: Option<u32>) -> Result<Self> {
        let mut device = BlockDevice::new(file);
        let len = device.len()?;
        let total_blocks = (len / crate::layout::BLOCK_SIZE) as u32;
        let total_inodes = total_inodes.unwrap_or_else(|| default_inode_count(total_blocks));
        let sb = Superblock::format(total_blocks, total_inodes);

        let mut inode_bitmap = Bitmap::zeroed(sb.inode_bitmap_start, sb.inode_bitmap_blocks());
        inode_bitmap.reserve(0);
        inode_bitmap.reserve(ROOT_INODE);

        let block_bitmap = Bitmap::zeroed(sb.block_bitmap_start, sb.block_bitmap_blocks());

        let mut volume = Self {
            device,
            sb,
            inode_bitmap,
            block_bitmap,
            state: MountState::Dirty,
        };

        let ts = now();
        let mut root = Inode::new(S_IFDIR | 0o755, 0, 0, ts);
        crate::directory::init_directory_block(
            &mut volume.device,
            &mut volume.sb,
            &mut volume.block_bitmap,
            &mut root,
            ROOT_INODE,
            ROOT_INODE,
        )?;
        root.sync(&mut volume.device, &volume.sb, ROOT_INODE)?;

        volume.sync()?;
        Ok(volume)
    }

    /// Marks the volume dirty. Every allocator, inode, or data-block
    /// mutation must call this (spec.md §4.8 state machine).
    pub fn mark_dirty(&mut self) {
        self.state = MountState::Dirty;
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    /// Writes the superblock and both bitmaps back, transitioning to
    /// clean. Called after every mutating operation completes and at
    /// teardown (spec.md §5: "the superblock and bitmaps are resynced at
    /// the end").
    pub fn sync(&mut self) -> Result<()> {
        self.sb.sync(&mut self.device)?;
        self.inode_bitmap.sync(&mut self.device)?;
        self.block_bitmap.sync(&mut self.device)?;
        self.state = MountState::Clean;
        Ok(())
    }

    /// Flushes the backing store without necessarily syncing in-memory
    /// metadata (spec.md §4.8 `flush`/`fsync`, which "do not traverse
    /// inodes").
    pub fn flush(&mut self, datasync: bool) -> Result<()> {
        self.device.flush(datasync)
    }

    /// Unmounts: resyncs metadata and flushes the backing store.
    pub fn teardown(&mut self) -> Result<()> {
        self.sync()?;
        self.flush(false)
    }
}

/// Picks a default inode count for a freshly formatted volume: one inode
/// per 4 data blocks, which keeps the inode table small relative to the
/// data region while still scaling with backing-store size (spec.md §9
/// open question 3: capacities are always derived, never hardcoded).
fn default_inode_count(total_blocks: u32) -> u32 {
    (total_blocks / 4).max(16)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn scratch_file(blocks: u64) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.seek(SeekFrom::Start(blocks * crate::layout::BLOCK_SIZE - 1))
            .unwrap();
        file.write_all(&[0u8]).unwrap();
        file
    }

    #[test]
    fn format_produces_clean_empty_root() {
        let file = scratch_file(4096);
        let mut volume = Volume::format(file, None).unwrap();
        let root = Inode::load(&mut volume.device, &volume.sb, ROOT_INODE).unwrap();
        assert!(root.is_dir());
        let entries = crate::directory::list(&mut volume.device, ROOT_INODE, ROOT_INODE, &root).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(volume.state(), MountState::Clean);
    }

    #[test]
    fn mount_after_format_has_matching_free_counts() {
        let file = scratch_file(4096);
        {
            let mut volume = Volume::format(file.try_clone().unwrap(), None).unwrap();
            volume.teardown().unwrap();
        }
        let volume = Volume::mount(file).unwrap();
        assert_eq!(volume.sb.free_inodes, volume.sb.total_inodes - 2);
    }

    #[test]
    fn repair_recomputes_skewed_counts() {
        let file = scratch_file(4096);
        let mut volume = Volume::format(file.try_clone().unwrap(), None).unwrap();
        volume.sb.free_inodes = 0;
        volume.sync().unwrap();
        drop(volume);
        let volume = Volume::mount(file).unwrap();
        assert_eq!(volume.sb.free_inodes, volume.sb.total_inodes - 2);
    }
}
