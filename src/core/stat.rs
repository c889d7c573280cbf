//! Public result types returned by `getattr` and `statfs`, decoupled from
//! both the on-disk `Inode`/`Superblock` layout and any particular kernel
//! bridge's FFI types.

use crate::inode::Inode;
use crate::layout::{BLOCK_SIZE, NAME_MAX};
use crate::superblock::Superblock;

/// Attributes of one file or directory (spec.md §4.8 `getattr`).
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inode_number: u32,
    pub mode: u32,
    pub link_count: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub block_size: u32,
    pub block_count: u64,
}

impl Attr {
    pub fn from_inode(inode_number: u32, inode: &Inode) -> Self {
        Self {
            inode_number,
            mode: inode.mode,
            link_count: if inode.is_dir() { 2 } else { 1 },
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size as u64,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            block_size: BLOCK_SIZE as u32,
            block_count: crate::layout::ceil_div(inode.size as u64, BLOCK_SIZE),
        }
    }
}

/// Volume-wide capacity/usage summary (spec.md §4.8 `statfs`).
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub max_name_length: u32,
}

impl StatFs {
    pub fn from_superblock(sb: &Superblock) -> Self {
        Self {
            block_size: BLOCK_SIZE as u32,
            total_blocks: sb.total_blocks as u64,
            free_blocks: sb.free_blocks as u64,
            total_inodes: sb.total_inodes as u64,
            free_inodes: sb.free_inodes as u64,
            max_name_length: NAME_MAX as u32,
        }
    }
}
