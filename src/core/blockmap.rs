//! Logical-to-physical block resolution through the direct / single-indirect
//! / double-indirect pointer levels (spec.md §3, §4.5).
//!
//! Grounded in SFUSE's `src/fs.c` (`fs_read`/`fs_write`'s inline pointer
//! walks), generalized here into standalone read-path/write-path functions
//! shared by `read`, `write`, `truncate`, and `unlink` instead of being
//! duplicated inline at each call site.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::{BLOCK_SIZE, DIRECT_POINTERS, PTRS_PER_BLOCK};
use crate::superblock::Superblock;

/// Reads one absolute block number out of pointer block `block_no` at
/// `index`.
fn read_ptr(device: &mut BlockDevice, block_no: u32, index: u64) -> Result<u32> {
    let mut block = [0u8; BLOCK_SIZE as usize];
    device.read_block(block_no, &mut block)?;
    let off = (index * 4) as usize;
    Ok(u32::from_le_bytes([
        block[off],
        block[off + 1],
        block[off + 2],
        block[off + 3],
    ]))
}

/// Writes one absolute block number into pointer block `block_no` at
/// `index`.
fn write_ptr(device: &mut BlockDevice, block_no: u32, index: u64, value: u32) -> Result<()> {
    let mut block = [0u8; BLOCK_SIZE as usize];
    device.read_block(block_no, &mut block)?;
    let off = (index * 4) as usize;
    block[off..off + 4].copy_from_slice(&value.to_le_bytes());
    device.write_block(block_no, &block)
}

/// Allocates a fresh data block, zero-initializes it, and returns its
/// absolute block number.
fn alloc_block(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
) -> Result<u32> {
    let rel = bitmap.allocate(0, sb.data_blocks(), &mut sb.free_blocks)?;
    let abs = sb.data_block_start + rel;
    let zeros = [0u8; BLOCK_SIZE as usize];
    device.write_block(abs, &zeros)?;
    Ok(abs)
}

/// Resolves logical block `k` of `inode` to an absolute block number,
/// without allocating. Returns `Ok(0)` for a hole.
pub fn resolve_read(device: &mut BlockDevice, inode: &Inode, k: u64) -> Result<u32> {
    let p = PTRS_PER_BLOCK;
    if k < DIRECT_POINTERS as u64 {
        return Ok(inode.direct[k as usize]);
    }
    let k = k - DIRECT_POINTERS as u64;
    if k < p {
        if inode.indirect == 0 {
            return Ok(0);
        }
        return read_ptr(device, inode.indirect, k);
    }
    let k = k - p;
    if k >= p * p {
        return Err(Error::TooBig);
    }
    if inode.double_indirect == 0 {
        return Ok(0);
    }
    let outer_index = k / p;
    let inner_index = k % p;
    let inner_block = read_ptr(device, inode.double_indirect, outer_index)?;
    if inner_block == 0 {
        return Ok(0);
    }
    read_ptr(device, inner_block, inner_index)
}

/// Resolves logical block `k` of `inode` to an absolute block number,
/// allocating any pointer or data block needed along the way. The inode's
/// own fields are updated in memory; the caller syncs the inode once at the
/// end of the operation (spec.md §4.5).
pub fn resolve_write(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
    inode: &mut Inode,
    k: u64,
) -> Result<u32> {
    let p = PTRS_PER_BLOCK;
    if k < DIRECT_POINTERS as u64 {
        let idx = k as usize;
        if inode.direct[idx] == 0 {
            inode.direct[idx] = alloc_block(device, sb, bitmap)?;
        }
        return Ok(inode.direct[idx]);
    }
    let k = k - DIRECT_POINTERS as u64;
    if k < p {
        if inode.indirect == 0 {
            inode.indirect = alloc_block(device, sb, bitmap)?;
        }
        let existing = read_ptr(device, inode.indirect, k)?;
        if existing != 0 {
            return Ok(existing);
        }
        let fresh = alloc_block(device, sb, bitmap)?;
        write_ptr(device, inode.indirect, k, fresh)?;
        return Ok(fresh);
    }
    let k = k - p;
    if k >= p * p {
        return Err(Error::TooBig);
    }
    if inode.double_indirect == 0 {
        inode.double_indirect = alloc_block(device, sb, bitmap)?;
    }
    let outer_index = k / p;
    let inner_index = k % p;
    let mut inner_block = read_ptr(device, inode.double_indirect, outer_index)?;
    if inner_block == 0 {
        inner_block = alloc_block(device, sb, bitmap)?;
        write_ptr(device, inode.double_indirect, outer_index, inner_block)?;
    }
    let existing = read_ptr(device, inner_block, inner_index)?;
    if existing != 0 {
        return Ok(existing);
    }
    let fresh = alloc_block(device, sb, bitmap)?;
    write_ptr(device, inner_block, inner_index, fresh)?;
    Ok(fresh)
}

/// Frees every block reachable from `inode`: direct blocks, the
/// single-indirect block and everything it lists, and the double-indirect
/// tree and everything it lists. Data blocks are zeroed before release so
/// freed space cannot leak stale content (spec.md §3 Lifecycles, §4.8
/// unlink).
pub fn free_all(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
    inode: &mut Inode,
) -> Result<()> {
    let zeros = [0u8; BLOCK_SIZE as usize];
    let mut free_one = |device: &mut BlockDevice, sb: &mut Superblock, bitmap: &mut Bitmap, abs: u32| -> Result<()> {
        if abs == 0 {
            return Ok(());
        }
        device.write_block(abs, &zeros)?;
        let rel = abs - sb.data_block_start;
        bitmap.free(rel, sb.data_blocks(), &mut sb.free_blocks);
        Ok(())
    };

    for slot in inode.direct.iter_mut() {
        free_one(device, sb, bitmap, *slot)?;
        *slot = 0;
    }

    if inode.indirect != 0 {
        let p = PTRS_PER_BLOCK;
        for i in 0..p {
            let ptr = read_ptr(device, inode.indirect, i)?;
            free_one(device, sb, bitmap, ptr)?;
        }
        free_one(device, sb, bitmap, inode.indirect)?;
        inode.indirect = 0;
    }

    if inode.double_indirect != 0 {
        let p = PTRS_PER_BLOCK;
        for outer in 0..p {
            let inner_block = read_ptr(device, inode.double_indirect, outer)?;
            if inner_block == 0 {
                continue;
            }
            for inner in 0..p {
                let ptr = read_ptr(device, inner_block, inner)?;
                free_one(device, sb, bitmap, ptr)?;
            }
            free_one(device, sb, bitmap, inner_block)?;
        }
        free_one(device, sb, bitmap, inode.double_indirect)?;
        inode.double_indirect = 0;
    }

    Ok(())
}

/// Frees every allocated block whose logical index is `>= from_block`, for
/// truncate-shrink. After shrinking, releases any pointer block (indirect,
/// or an inner double-indirect block, or the outer double-indirect block)
/// that is now entirely zero.
pub fn shrink_to(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
    inode: &mut Inode,
    from_block: u64,
) -> Result<()> {
    let p = PTRS_PER_BLOCK;
    let zeros = [0u8; BLOCK_SIZE as usize];

    let mut free_one = |device: &mut BlockDevice, sb: &mut Superblock, bitmap: &mut Bitmap, abs: u32| -> Result<()> {
        if abs == 0 {
            return Ok(());
        }
        device.write_block(abs, &zeros)?;
        let rel = abs - sb.data_block_start;
        bitmap.free(rel, sb.data_blocks(), &mut sb.free_blocks);
        Ok(())
    };

    for k in from_block..DIRECT_POINTERS as u64 {
        let idx = k as usize;
        free_one(device, sb, bitmap, inode.direct[idx])?;
        inode.direct[idx] = 0;
    }

    if inode.indirect != 0 {
        let base = DIRECT_POINTERS as u64;
        for i in 0..p {
            if base + i < from_block {
                continue;
            }
            let ptr = read_ptr(device, inode.indirect, i)?;
            if ptr != 0 {
                free_one(device, sb, bitmap, ptr)?;
                write_ptr(device, inode.indirect, i, 0)?;
            }
        }
        if pointer_block_is_empty(device, inode.indirect)? {
            free_one(device, sb, bitmap, inode.indirect)?;
            inode.indirect = 0;
        }
    }

    if inode.double_indirect != 0 {
        let base = DIRECT_POINTERS as u64 + p;
        for outer in 0..p {
            let inner_block = read_ptr(device, inode.double_indirect, outer)?;
            if inner_block == 0 {
                continue;
            }
            for inner in 0..p {
                let k = base + outer * p + inner;
                if k < from_block {
                    continue;
                }
                let ptr = read_ptr(device, inner_block, inner)?;
                if ptr != 0 {
                    free_one(device, sb, bitmap, ptr)?;
                    write_ptr(device, inner_block, inner, 0)?;
                }
            }
            if pointer_block_is_empty(device, inner_block)? {
                free_one(device, sb, bitmap, inner_block)?;
                write_ptr(device, inode.double_indirect, outer, 0)?;
            }
        }
        if pointer_block_is_empty(device, inode.double_indirect)? {
            free_one(device, sb, bitmap, inode.double_indirect)?;
            inode.double_indirect = 0;
        }
    }

    Ok(())
}

fn pointer_block_is_empty(device: &mut BlockDevice, block_no: u32) -> Result<bool> {
    let mut block = [0u8; BLOCK_SIZE as usize];
    device.read_block(block_no, &mut block)?;
    Ok(block.iter().all(|&b| b == 0))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inode::{Inode, S_IFREG};
    use std::io::{Seek, SeekFrom, Write};

    fn scratch() -> (BlockDevice, Superblock, Bitmap) {
        let mut file = tempfile::tempfile().unwrap();
        let blocks = 2048u64;
        file.seek(SeekFrom::Start(blocks * BLOCK_SIZE - 1)).unwrap();
        file.write_all(&[0u8]).unwrap();
        let sb = Superblock::format(blocks as u32, 128);
        let bitmap = Bitmap::zeroed(sb.block_bitmap_start, sb.block_bitmap_blocks());
        (BlockDevice::new(file), sb, bitmap)
    }

    #[test]
    fn direct_block_round_trips() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut ino = Inode::new(S_IFREG | 0o644, 0, 0, 0);
        let abs = resolve_write(&mut dev, &mut sb, &mut bm, &mut ino, 0).unwrap();
        assert_eq!(ino.direct[0], abs);
        assert_eq!(resolve_read(&mut dev, &ino, 0).unwrap(), abs);
    }

    #[test]
    fn hole_reads_as_zero_pointer() {
        let (mut dev, _sb, _bm) = scratch();
        let ino = Inode::new(S_IFREG | 0o644, 0, 0, 0);
        assert_eq!(resolve_read(&mut dev, &ino, 5).unwrap(), 0);
    }

    #[test]
    fn indirect_allocation_sets_pointer() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut ino = Inode::new(S_IFREG | 0o644, 0, 0, 0);
        let k = DIRECT_POINTERS as u64 + 3;
        let abs = resolve_write(&mut dev, &mut sb, &mut bm, &mut ino, k).unwrap();
        assert_ne!(ino.indirect, 0);
        assert_eq!(resolve_read(&mut dev, &ino, k).unwrap(), abs);
    }

    #[test]
    fn free_all_clears_pointers() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut ino = Inode::new(S_IFREG | 0o644, 0, 0, 0);
        resolve_write(&mut dev, &mut sb, &mut bm, &mut ino, 0).unwrap();
        resolve_write(&mut dev, &mut sb, &mut bm, &mut ino, DIRECT_POINTERS as u64 + 1).unwrap();
        let before = sb.free_blocks;
        free_all(&mut dev, &mut sb, &mut bm, &mut ino).unwrap();
        assert_eq!(ino.direct[0], 0);
        assert_eq!(ino.indirect, 0);
        assert!(sb.free_blocks > before);
    }
}
