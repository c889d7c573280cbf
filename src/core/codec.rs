//! The shared bincode configuration every on-disk record is encoded with.
//!
//! spec.md §6 mandates explicit little-endian, fixed-width fields with no
//! variable-length-integer framing. Centralizing the config here means every
//! codec module (`superblock`, `inode`, `dirent`) agrees on the exact same
//! byte layout, grounded in `other_examples`' `fuse-ufs`, which likewise
//! derives `bincode::Decode` on its on-disk structs rather than transmuting
//! raw bytes the way the teacher's older `mkfs/src/ext2.rs` does.

use bincode::config::{Configuration, Fixint, LittleEndian};

pub type WireConfig = Configuration<LittleEndian, Fixint>;

pub fn config() -> WireConfig {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}
