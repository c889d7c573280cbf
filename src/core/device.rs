//! Positioned block I/O against the backing store.
//!
//! This is the only module that touches the backing file directly; every
//! other module goes through [`BlockDevice`]. There is no buffering,
//! caching, or read-ahead — each call is one positioned syscall.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::layout::BLOCK_SIZE;

/// Wraps the backing file (or block device) and exposes whole-block and
/// arbitrary-range positioned I/O.
pub struct BlockDevice {
    file: File,
}

impl BlockDevice {
    /// Takes ownership of an already-opened backing file. The file is
    /// expected to be opened read-write and is never truncated or created
    /// here (that's the caller's job, e.g. `mkfs.sfusefs`).
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Total length of the backing store, in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reads exactly `BLOCK_SIZE` bytes from block `block_no` into `out`.
    ///
    /// Any partial transfer is an `IoError`.
    pub fn read_block(&mut self, block_no: u32, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len() as u64, BLOCK_SIZE);
        self.read_at(block_no as u64 * BLOCK_SIZE, out)
    }

    /// Writes exactly `BLOCK_SIZE` bytes from `data` to block `block_no`.
    pub fn write_block(&mut self, block_no: u32, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len() as u64, BLOCK_SIZE);
        self.write_at(block_no as u64 * BLOCK_SIZE, data)
    }

    /// Reads `out.len()` bytes starting at byte offset `offset`. Used by the
    /// superblock codec, which addresses an arbitrary byte range rather than
    /// a whole block.
    pub fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(out).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "short read from backing store",
                ))
            } else {
                Error::IoError(e)
            }
        })
    }

    /// Writes `data` starting at byte offset `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Flushes the backing store. `datasync` requests a data-only flush
    /// where the platform distinguishes one.
    pub fn flush(&mut self, datasync: bool) -> Result<()> {
        self.file.flush()?;
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            let fd = self.file.as_raw_fd();
            let ret = unsafe {
                if datasync {
                    libc::fdatasync(fd)
                } else {
                    libc::fsync(fd)
                }
            };
            if ret < 0 {
                return Err(Error::IoError(std::io::Error::last_os_error()));
            }
        }
        #[cfg(not(unix))]
        let _ = datasync;
        Ok(())
    }
}
