//! On-disk geometry constants shared by every other module.
//!
//! Nothing here touches I/O; it just derives block counts from a backing
//! store length the way `format` needs to, and is used again at mount time
//! to re-derive the same numbers from the superblock's own fields (spec
//! REDESIGN FLAGS item 3: capacities are always superblock-driven, never a
//! compiled-in constant).

/// Size of a block, in bytes.
pub const BLOCK_SIZE: u64 = 4096;

/// Filesystem magic number, identifying the on-disk format.
pub const MAGIC: u32 = 0xEF53;

/// Maximum length of a directory entry name, including the null terminator.
pub const NAME_MAX: usize = 256;

/// Number of direct block pointers in an inode.
pub const DIRECT_POINTERS: usize = 12;

/// On-disk size of one inode record, in bytes. Must divide `BLOCK_SIZE`
/// evenly; 128 gives 32 inodes per block, matching common ext2 practice.
pub const INODE_SIZE: u64 = 128;

/// Number of inode records packed into one block.
pub const INODES_PER_BLOCK: u64 = BLOCK_SIZE / INODE_SIZE;

/// Number of `u32` block pointers packed into one pointer block.
pub const PTRS_PER_BLOCK: u64 = BLOCK_SIZE / 4;

/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 1;

/// Rounds `total` up to the next multiple of `granularity`.
pub fn ceil_div(total: u64, granularity: u64) -> u64 {
    (total + granularity - 1) / granularity
}

/// The geometry of a freshly-sized volume: how many blocks each region
/// occupies, derived purely from the backing store's block count and the
/// requested inode count.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    /// Total blocks in the backing store.
    pub total_blocks: u32,
    /// Total inodes the inode table holds.
    pub total_inodes: u32,
    /// Block offset of the inode bitmap.
    pub inode_bitmap_start: u32,
    /// Block offset of the block bitmap.
    pub block_bitmap_start: u32,
    /// Block offset of the inode table.
    pub inode_table_start: u32,
    /// Block offset of the first data block.
    pub data_block_start: u32,
}

impl Geometry {
    /// Computes a fresh layout for a backing store of `total_blocks` blocks,
    /// sized to hold `total_inodes` inodes.
    ///
    /// Block 0 is reserved for the superblock (it occupies far less than a
    /// full block, but the region is block-granular like every other
    /// region).
    pub fn compute(total_blocks: u32, total_inodes: u32) -> Self {
        let bits_per_block = (BLOCK_SIZE * 8) as u32;
        let inode_bitmap_start = 1u32;
        let inode_bitmap_blocks = ceil_div(total_inodes as u64, bits_per_block as u64) as u32;
        let block_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
        let inode_table_blocks = ceil_div(total_inodes as u64, INODES_PER_BLOCK) as u32;

        // The block bitmap's own size depends on how many data blocks it
        // must describe, which in turn depends on the block bitmap's size.
        // Converge by fixed point: each iteration can only grow the bitmap
        // by the blocks the previous guess itself consumed, so this settles
        // in at most a couple of rounds.
        let mut block_bitmap_blocks = 1u32;
        loop {
            let inode_table_start = block_bitmap_start + block_bitmap_blocks;
            let data_block_start = inode_table_start + inode_table_blocks;
            let remaining = total_blocks.saturating_sub(data_block_start);
            let needed = ceil_div(remaining as u64, bits_per_block as u64).max(1) as u32;
            if needed == block_bitmap_blocks {
                break;
            }
            block_bitmap_blocks = needed;
        }
        let inode_table_start = block_bitmap_start + block_bitmap_blocks;
        let data_block_start = inode_table_start + inode_table_blocks;
        Self {
            total_blocks,
            total_inodes,
            inode_bitmap_start,
            block_bitmap_start,
            inode_table_start,
            data_block_start,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn geometry_orders_regions() {
        let g = Geometry::compute(16384, 1024);
        assert!(g.inode_bitmap_start < g.block_bitmap_start);
        assert!(g.block_bitmap_start < g.inode_table_start);
        assert!(g.inode_table_start < g.data_block_start);
        assert!(g.data_block_start < g.total_blocks);
    }

    #[test]
    fn geometry_scales_with_store_size() {
        let small = Geometry::compute(256, 64);
        let big = Geometry::compute(1 << 20, 65536);
        assert!(big.data_block_start > small.data_block_start);
    }
}
