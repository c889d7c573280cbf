//! Directory entry codec: the fixed-size `{inode, name}` record packed into
//! directory data blocks (spec.md §3 "Directory", §6 on-disk format).
//!
//! Grounded in SFUSE's `include/dir.h` (`struct sfuse_dirent`) and
//! `src/dir.c`'s entry layout; encoded here with `bincode` rather than the
//! C struct's raw `char name[256]` overlay.

use bincode::{Decode, Encode};

use crate::codec;
use crate::layout::{BLOCK_SIZE, NAME_MAX};

/// On-disk size of one directory entry: a `u32` inode number plus a
/// `NAME_MAX`-byte name buffer.
pub const DIRENT_SIZE: usize = 4 + NAME_MAX;

/// Number of directory entries packed into one block.
pub const ENTRIES_PER_BLOCK: usize = (BLOCK_SIZE as usize) / DIRENT_SIZE;

/// One directory entry. `inode == 0` marks a free slot.
#[derive(Debug, Clone, Encode, Decode)]
pub struct DirEntry {
    pub inode: u32,
    name: [u8; NAME_MAX],
}

impl DirEntry {
    /// Builds an entry for `name` pointing at `inode`. Names longer than
    /// `NAME_MAX - 1` bytes are truncated; the buffer is always
    /// null-terminated.
    pub fn new(inode: u32, name: &str) -> Self {
        let mut buf = [0u8; NAME_MAX];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_MAX - 1);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self { inode, name: buf }
    }

    /// The free-slot sentinel: inode 0, empty name.
    pub fn free() -> Self {
        Self {
            inode: 0,
            name: [0u8; NAME_MAX],
        }
    }

    /// Whether this slot is free.
    pub fn is_free(&self) -> bool {
        self.inode == 0
    }

    /// The entry's name, decoded up to its null terminator. Lossy on
    /// non-UTF-8 bytes, which this engine never itself writes.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Decodes one entry from a `DIRENT_SIZE`-byte slice.
    pub fn decode(buf: &[u8]) -> Self {
        let (entry, _): (DirEntry, usize) =
            bincode::decode_from_slice(buf, codec::config()).expect("fixed-size dirent decode");
        entry
    }

    /// Encodes this entry into a `DIRENT_SIZE`-byte slice.
    pub fn encode_into(&self, buf: &mut [u8]) {
        let n = bincode::encode_into_slice(self, buf, codec::config())
            .expect("fixed-size dirent encode");
        debug_assert_eq!(n, DIRENT_SIZE);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let entry = DirEntry::new(7, "hello.txt");
        let mut buf = [0u8; DIRENT_SIZE];
        entry.encode_into(&mut buf);
        let decoded = DirEntry::decode(&buf);
        assert_eq!(decoded.inode, 7);
        assert_eq!(decoded.name(), "hello.txt");
    }

    #[test]
    fn truncates_long_names() {
        let long = "x".repeat(NAME_MAX + 10);
        let entry = DirEntry::new(1, &long);
        assert_eq!(entry.name().len(), NAME_MAX - 1);
    }

    #[test]
    fn free_slot_has_inode_zero() {
        let free = DirEntry::free();
        assert!(free.is_free());
        assert_eq!(free.name(), "");
    }
}
