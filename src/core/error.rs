//! The error taxonomy surfaced by the filesystem engine.

use std::fmt;
use std::io;

/// An error produced by an engine operation.
///
/// Every engine-level failure unwinds to one of these kinds; there is no
/// partial recovery inside the engine itself. Callers at the FUSE boundary
/// map each kind onto the closest POSIX errno.
#[derive(Debug)]
pub enum Error {
    /// A path component or directory entry does not exist.
    NotFound,
    /// The target of `create`/`mkdir`/`rename` already exists.
    Exists,
    /// A non-directory was used where a directory is required.
    NotDirectory,
    /// A directory was used where a file is required.
    IsDirectory,
    /// `rmdir` was called on a non-empty directory.
    NotEmpty,
    /// Malformed input: an empty name, inode 0, an out-of-range index, or a
    /// bad superblock magic at mount.
    Invalid,
    /// The inode or block bitmap has no free bit.
    NoSpace,
    /// The backing store failed or produced a short transfer on a metadata
    /// region.
    IoError(io::Error),
    /// A write would fall past the addressable extent of direct +
    /// single-indirect + double-indirect pointers.
    TooBig,
    /// Extended attributes and other unimplemented operations.
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::Exists => write!(f, "file exists"),
            Self::NotDirectory => write!(f, "not a directory"),
            Self::IsDirectory => write!(f, "is a directory"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::Invalid => write!(f, "invalid argument"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::TooBig => write!(f, "file too large"),
            Self::NotSupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl Error {
    /// Maps the error onto the closest POSIX errno, for use at the FUSE
    /// boundary.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::Invalid => libc::EINVAL,
            Self::NoSpace => libc::ENOSPC,
            Self::IoError(_) => libc::EIO,
            Self::TooBig => libc::EFBIG,
            Self::NotSupported => libc::ENOSYS,
        }
    }
}

/// Convenience alias for fallible engine operations.
pub type Result<T> = std::result::Result<T, Error>;
