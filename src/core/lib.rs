//! `sfusefs_core` — the on-disk filesystem engine.
//!
//! This crate has no knowledge of FUSE, CLI parsing, or logging; those
//! concerns live in the `sfusefs` and `mkfs.sfusefs` binaries. It exposes a
//! `Volume` that a bridge mounts over a backing file and drives with the
//! POSIX-shaped operations in [`ops`].

pub mod bitmap;
pub mod blockmap;
pub mod codec;
pub mod device;
pub mod dirent;
pub mod directory;
pub mod error;
pub mod inode;
pub mod layout;
mod ops;
pub mod path;
pub mod stat;
pub mod superblock;
pub mod volume;

pub use device::BlockDevice;
pub use error::{Error, Result};
pub use inode::Inode;
pub use stat::{Attr, StatFs};
pub use superblock::Superblock;
pub use volume::Volume;
