//! Path resolution: walk a slash-separated path from the root, one
//! component at a time, via the directory layer (spec.md §4.7).
//!
//! Grounded in SFUSE's `fs_resolve_path` (`src/fs.c`), which walks
//! components with `strtok`; this is the same walk expressed over
//! `str::split('/')` instead.

use crate::device::BlockDevice;
use crate::directory;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::ROOT_INODE;
use crate::superblock::Superblock;

/// Splits `path` into its non-empty components, ignoring a trailing slash.
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Resolves `path` to an inode number, starting from the root. Fails with
/// `NotFound` at the first missing component, or `NotDirectory` if a
/// non-terminal component isn't a directory.
pub fn resolve(device: &mut BlockDevice, sb: &Superblock, path: &str) -> Result<u32> {
    let mut current = ROOT_INODE;
    for component in components(path) {
        let current_inode = Inode::load(device, sb, current)?;
        if !current_inode.is_dir() {
            return Err(Error::NotDirectory);
        }
        current = directory::lookup(device, &current_inode, component)?;
    }
    Ok(current)
}

/// Splits `path` into its parent directory's inode number and the final
/// path component, for operations that need to mutate the parent's entry
/// list (`create`, `mkdir`, `unlink`, `rmdir`, `rename`).
pub fn resolve_parent<'a>(
    device: &mut BlockDevice,
    sb: &Superblock,
    path: &'a str,
) -> Result<(u32, &'a str)> {
    let parts = components(path);
    let (name, parent_parts) = parts.split_last().ok_or(Error::Invalid)?;
    if name.is_empty() {
        return Err(Error::Invalid);
    }
    let mut current = ROOT_INODE;
    for component in parent_parts {
        let current_inode = Inode::load(device, sb, current)?;
        if !current_inode.is_dir() {
            return Err(Error::NotDirectory);
        }
        current = directory::lookup(device, &current_inode, component)?;
    }
    let parent_inode = Inode::load(device, sb, current)?;
    if !parent_inode.is_dir() {
        return Err(Error::NotDirectory);
    }
    Ok((current, name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::directory;
    use crate::inode::{Inode, S_IFDIR};
    use crate::layout::BLOCK_SIZE;
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
    fn root_resolves_to_inode_one() {
        let (mut dev, sb, _bm) = scratch();
        let root = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        root.sync(&mut dev, &sb, ROOT_INODE).unwrap();
        assert_eq!(resolve(&mut dev, &sb, "/").unwrap(), ROOT_INODE);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (mut dev, sb, _bm) = scratch();
        let root = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        root.sync(&mut dev, &sb, ROOT_INODE).unwrap();
        assert!(matches!(
            resolve(&mut dev, &sb, "/nope").unwrap_err(),
            Error::NotFound
        ));
    }

    #[test]
    fn resolve_parent_splits_path() {
        let (mut dev, mut sb, mut bm) = scratch();
        let mut root = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        directory::init_directory_block(&mut dev, &mut sb, &mut bm, &mut root, ROOT_INODE, ROOT_INODE).unwrap();
        directory::insert(&mut dev, &mut sb, &mut bm, &mut root, "sub", 2).unwrap();
        root.sync(&mut dev, &sb, ROOT_INODE).unwrap();
        let mut sub = Inode::new(S_IFDIR | 0o755, 0, 0, 0);
        directory::init_directory_block(&mut dev, &mut sb, &mut bm, &mut sub, 2, ROOT_INODE).unwrap();
        sub.sync(&mut dev, &sb, 2).unwrap();
        let (parent, name) = resolve_parent(&mut dev, &sb, "/sub/file").unwrap();
        assert_eq!(parent, 2);
        assert_eq!(name, "file");
    }
}
