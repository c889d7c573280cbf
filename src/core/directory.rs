//! Directory layer: lookup/list/insert/remove over the packed directory
//! entry blocks held in an inode's direct pointers (spec.md §4.6).
//!
//! Directories use only the 12 direct pointers; grounded in SFUSE's
//! `src/dir.c` (`dir_load`/`dir_add_entry`/`dir_remove_entry`), but here
//! "." and ".." are written as real first-block entries at creation time
//! *and* synthesized by `list` for bridges that don't read them back off
//! disk — spec.md §9 accepts either and requires the former for bridges
//! that don't synthesize.

use crate::bitmap::Bitmap;
use crate::blockmap::resolve_write;
use crate::device::BlockDevice;
use crate::dirent::{DirEntry, DIRENT_SIZE, ENTRIES_PER_BLOCK};
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::{BLOCK_SIZE, DIRECT_POINTERS};
use crate::superblock::Superblock;

fn read_block_entries(device: &mut BlockDevice, block_no: u32) -> Result<Vec<DirEntry>> {
    let mut block = [0u8; BLOCK_SIZE as usize];
    device.read_block(block_no, &mut block)?;
    Ok((0..ENTRIES_PER_BLOCK)
        .map(|i| DirEntry::decode(&block[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE]))
        .collect())
}

fn write_block_entries(device: &mut BlockDevice, block_no: u32, entries: &[DirEntry]) -> Result<()> {
    let mut block = [0u8; BLOCK_SIZE as usize];
    for (i, entry) in entries.iter().enumerate() {
        entry.encode_into(&mut block[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE]);
    }
    device.write_block(block_no, &block)
}

/// Finds the inode number `name` maps to within directory `dir`.
pub fn lookup(device: &mut BlockDevice, dir: &Inode, name: &str) -> Result<u32> {
    for &block_no in dir.direct.iter() {
        if block_no == 0 {
            continue;
        }
        for entry in read_block_entries(device, block_no)? {
            if !entry.is_free() && entry.name() == name {
                return Ok(entry.inode);
            }
        }
    }
    Err(Error::NotFound)
}

/// Lists every live entry in `dir`, with "." and ".." synthesized first.
pub fn list(device: &mut BlockDevice, dir_ino: u32, parent_ino: u32, dir: &Inode) -> Result<Vec<(String, u32)>> {
    let mut out = vec![(".".to_string(), dir_ino), ("..".to_string(), parent_ino)];
    for &block_no in dir.direct.iter() {
        if block_no == 0 {
            continue;
        }
        for entry in read_block_entries(device, block_no)? {
            if entry.is_free() {
                continue;
            }
            let name = entry.name();
            if name == "." || name == ".." {
                continue;
            }
            out.push((name, entry.inode));
        }
    }
    Ok(out)
}

/// Inserts `name -> child_ino` into `dir`, reusing a free slot in any
/// allocated block or allocating and zero-initializing a fresh block if all
/// existing blocks are full. Growing the directory increases `dir.size` by
/// one block's worth of bytes.
pub fn insert(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
    dir: &mut Inode,
    name: &str,
    child_ino: u32,
) -> Result<()> {
    for &block_no in dir.direct.iter() {
        if block_no == 0 {
            continue;
        }
        let mut entries = read_block_entries(device, block_no)?;
        if let Some(slot) = entries.iter_mut().find(|e| e.is_free()) {
            *slot = DirEntry::new(child_ino, name);
            write_block_entries(device, block_no, &entries)?;
            return Ok(());
        }
    }

    for k in 0..DIRECT_POINTERS as u64 {
        if dir.direct[k as usize] != 0 {
            continue;
        }
        let block_no = resolve_write(device, sb, bitmap, dir, k)?;
        let mut entries: Vec<DirEntry> = (0..ENTRIES_PER_BLOCK).map(|_| DirEntry::free()).collect();
        entries[0] = DirEntry::new(child_ino, name);
        write_block_entries(device, block_no, &entries)?;
        dir.size += BLOCK_SIZE as u32;
        return Ok(());
    }

    Err(Error::NoSpace)
}

/// Zeroes the entry matching `name` in place. The block itself is retained
/// so later inserts can reuse the slot.
pub fn remove(device: &mut BlockDevice, dir: &Inode, name: &str) -> Result<()> {
    for &block_no in dir.direct.iter() {
        if block_no == 0 {
            continue;
        }
        let mut entries = read_block_entries(device, block_no)?;
        if let Some(slot) = entries.iter_mut().find(|e| !e.is_free() && e.name() == name) {
            *slot = DirEntry::free();
            write_block_entries(device, block_no, &entries)?;
            return Ok(());
        }
    }
    Err(Error::NotFound)
}

/// Whether `dir` contains any entry besides "." and "..", used by `rmdir`.
pub fn is_empty(device: &mut BlockDevice, dir: &Inode) -> Result<bool> {
    for &block_no in dir.direct.iter() {
        if block_no == 0 {
            continue;
        }
        for entry in read_block_entries(device, block_no)? {
            if entry.is_free() {
                continue;
            }
            let name = entry.name();
            if name != "." && name != ".." {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Writes the two-entry header ("." -> `self_ino`, ".." -> `parent_ino`)
/// into a freshly allocated first block of `dir`, for `mkdir`.
pub fn init_directory_block(
    device: &mut BlockDevice,
    sb: &mut Superblock,
    bitmap: &mut Bitmap,
    dir: &mut Inode,
    self_ino: u32,
    parent_ino: u32,
) -> Result<()> {
    let block_no = resolve_write(device, sb, bitmap, dir, 0)?;
    let mut entries: Vec<DirEntry> = (0..ENTRIES_PER_BLOCK).map(|_| DirEntry::free()).collect();
    entries[0] = DirEntry::new(self_ino, ".");
    entries[1] = DirEntry::new(parent_ino, "..");
    write_block_entries(device, block_no, &entries)?;
    dir.size += BLOCK_SIZE as u32;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inode::{Inode, S_IFDIR};
    use std::io::{Seek, SeekFrom, Write};

    fn scratch() -> (BlockDevice, Superblock, Bitmap) {
        let mut file = tempfile::tempfile().unwrap();
        let blocks = 2048u64;
        file.seek(SeekFrom::Start(blocks * BLOCK_SIZE as u64 - 1)).unwrap();
        file.write_all(&[0u8]).unwrap();
        let sb = Superblock::format(blocks as u32, 128);
        let bitmap = Bitmap::zeroed(sb.block_bitmap_start, sb.block_bitmap_blocks());
        (BlockDevice::new(file), sb, bitmap)
    }

    #[test]
    fn insert_then_lookup() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut dir = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        init_directory_block(&mut dev, &mut sb, &mut bm, &mut dir, 1, 1).unwrap();
        insert(&mut dev, &mut sb, &mut bm, &mut dir, "a.txt", 5).unwrap();
        assert_eq!(lookup(&mut dev, &dir, "a.txt").unwrap(), 5);
        assert!(matches!(lookup(&mut dev, &dir, "missing").unwrap_err(), Error::NotFound));
    }

    #[test]
    fn list_synthesizes_dot_entries() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut dir = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        init_directory_block(&mut dev, &mut sb, &mut bm, &mut dir, 2, 1).unwrap();
        insert(&mut dev, &mut sb, &mut bm, &mut dir, "f", 9).unwrap();
        let names: Vec<String> = list(&mut dev, 2, 1, &dir).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![".", "..", "f"]);
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut dir = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        init_directory_block(&mut dev, &mut sb, &mut bm, &mut dir, 1, 1).unwrap();
        insert(&mut dev, &mut sb, &mut bm, &mut dir, "a", 5).unwrap();
        remove(&mut dev, &dir, "a").unwrap();
        assert!(matches!(lookup(&mut dev, &dir, "a").unwrap_err(), Error::NotFound));
        insert(&mut dev, &mut sb, &mut bm, &mut dir, "b", 6).unwrap();
        assert_eq!(lookup(&mut dev, &dir, "b").unwrap(), 6);
    }

    #[test]
    fn empty_dir_reports_empty() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut dir = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        init_directory_block(&mut dev, &mut sb, &mut bm, &mut dir, 1, 1).unwrap();
        assert!(is_empty(&mut dev, &dir).unwrap());
        insert(&mut dev, &mut sb, &mut bm, &mut dir, "f", 2).unwrap();
        assert!(!is_empty(&mut dev, &dir).unwrap());
    }
}
