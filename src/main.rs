//! `sfusefs` — mounts a formatted image at a mountpoint via FUSE.
//!
//! Grounded in `mutils`' `src/main.rs` dispatch shape for CLI plumbing and
//! `env_logger` initialization, reworked from a multi-binary-name dispatch
//! into a single-purpose mount driver with `clap`-derived arguments
//! (spec.md §6 CLI, §9 "replace the global force-format flag with an
//! explicit option").

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, error, info, warn};

use sfusefs_core::inode::Inode;
use sfusefs_core::{Attr, Error, Volume};

const TTL: Duration = Duration::from_secs(1);

/// Mount a sfusefs image at a directory.
#[derive(Parser, Debug)]
#[command(name = "sfusefs", version, about)]
struct Args {
    /// Path to the backing image file.
    image: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Format the image before mounting if it isn't already a valid
    /// sfusefs volume.
    #[arg(short = 'F', long = "force-format")]
    force_format: bool,

    /// Run the FUSE session in the foreground instead of daemonizing.
    #[arg(short, long)]
    foreground: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let volume = match open_volume(&args) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to prepare volume at {:?}: {e}", args.image);
            std::process::exit(1);
        }
    };

    let mut options = vec![MountOption::FSName("sfusefs".to_string())];
    if args.foreground {
        options.push(MountOption::AutoUnmount);
    }

    info!("mounting {:?} at {:?}", args.image, args.mountpoint);
    if let Err(e) = fuser::mount2(SfuseFs { volume: Mutex::new(volume) }, &args.mountpoint, &options) {
        error!("mount session ended: {e}");
        std::process::exit(1);
    }
}

fn open_volume(args: &Args) -> anyhow::Result<Volume> {
    let file = OpenOptions::new().read(true).write(true).open(&args.image)?;
    match Volume::mount(file) {
        Ok(v) => Ok(v),
        Err(Error::Invalid) if args.force_format => {
            warn!("{:?} is not a valid sfusefs image; formatting", args.image);
            let file = OpenOptions::new().read(true).write(true).open(&args.image)?;
            Ok(Volume::format(file, None)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Adapts a [`Volume`] to `fuser`'s callback-based trait, behind a single
/// coarse mutex (spec.md §5: "a single coarse mutex suffices").
struct SfuseFs {
    volume: Mutex<Volume>,
}

fn to_file_attr(attr: &Attr) -> FileAttr {
    let kind = if attr.mode & sfusefs_core::inode::S_IFDIR != 0 {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: attr.inode_number as u64,
        size: attr.size,
        blocks: attr.block_count,
        atime: UNIX_EPOCH + Duration::from_secs(attr.atime as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(attr.mtime as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(attr.ctime as u64),
        crtime: UNIX_EPOCH,
        kind,
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.link_count,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.block_size,
        flags: 0,
    }
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl SfuseFs {
    /// Reconstructs an absolute path from a `(parent, name)` pair. This
    /// engine resolves every call by walking the path from the root rather
    /// than keeping an inode-to-path cache, so only the root-relative case
    /// (parent is `FUSE_ROOT_ID`) and the general case routed through a
    /// prior `lookup`/`readdir` on that parent are needed: the kernel
    /// always issues `lookup` (establishing the name) before operating on
    /// a child, so `parent`'s own path has already been established by an
    /// ancestor `lookup`/`getattr` chain ending at the root.
    fn path_of(&self, volume: &mut Volume, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        let parent_path = self.ino_path(volume, parent)?;
        if parent_path == "/" {
            Some(format!("/{name}"))
        } else {
            Some(format!("{parent_path}/{name}"))
        }
    }

    /// Resolves an inode number back to one of its paths by walking the
    /// tree from the root. `fuser`'s `ino` is this engine's own inode
    /// number, so this is a bounded breadth-first search rather than an
    /// opaque handle translation.
    fn ino_path(&self, volume: &mut Volume, ino: u64) -> Option<String> {
        let ino = ino as u32;
        if ino == fuser::FUSE_ROOT_ID as u32 {
            return Some("/".to_string());
        }
        let mut frontier = vec!["/".to_string()];
        let mut visited = std::collections::HashSet::new();
        while let Some(dir_path) = frontier.pop() {
            if !visited.insert(dir_path.clone()) {
                continue;
            }
            let Ok(entries) = volume.readdir(&dir_path) else {
                continue;
            };
            for (name, child_ino) in entries {
                if name == "." || name == ".." {
                    continue;
                }
                let child_path = if dir_path == "/" {
                    format!("/{name}")
                } else {
                    format!("{dir_path}/{name}")
                };
                if child_ino == ino {
                    return Some(child_path);
                }
                if let Ok(inode) = Inode::load(&mut volume.device, &volume.sb, child_ino) {
                    if inode.is_dir() {
                        frontier.push(child_path);
                    }
                }
            }
        }
        None
    }
}

impl Filesystem for SfuseFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.path_of(&mut volume, parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.getattr(&path) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let mut volume = self.volume.lock().unwrap();
        match inode_attr(&mut volume, ino) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.ino_path(&mut volume, ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = (|| -> sfusefs_core::Result<()> {
            if let Some(size) = size {
                volume.truncate(&path, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                let ts = now_secs();
                let resolve = |t: Option<TimeOrNow>| match t {
                    Some(TimeOrNow::Now) | None => ts,
                    Some(TimeOrNow::SpecificTime(t)) => {
                        t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(ts)
                    }
                };
                volume.utimens(&path, resolve(atime), resolve(mtime))?;
            }
            Ok(())
        })();
        match result.and_then(|_| inode_attr(&mut volume, ino)) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.ino_path(&mut volume, ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match volume.readdir(&path) {
            Ok(e) => e,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        for (i, (name, child_ino)) in entries.into_iter().enumerate().skip(offset as usize) {
            let kind = match Inode::load(&mut volume.device, &volume.sb, child_ino) {
                Ok(inode) if inode.is_dir() => FileType::Directory,
                _ => FileType::RegularFile,
            };
            let full = reply.add(child_ino as u64, (i + 1) as i64, kind, name);
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let mut volume = self.volume.lock().unwrap();
        match Inode::load(&mut volume.device, &volume.sb, ino as u32) {
            Ok(_) => reply.opened(ino, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(ino, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let mut volume = self.volume.lock().unwrap();
        match volume.read(ino as u32, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let mut volume = self.volume.lock().unwrap();
        match volume.write(ino as u32, offset as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.path_of(&mut volume, parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.create(&path, mode, req.uid(), req.gid()) {
            Ok((ino, attr)) => reply.created(&TTL, &to_file_attr(&attr), 0, ino as u64, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.path_of(&mut volume, parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.mkdir(&path, mode, req.uid(), req.gid()) {
            Ok((_ino, attr)) => reply.entry(&TTL, &to_file_attr(&attr), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.path_of(&mut volume, parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut volume = self.volume.lock().unwrap();
        let Some(path) = self.path_of(&mut volume, parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let mut volume = self.volume.lock().unwrap();
        let (Some(from), Some(to)) = (
            self.path_of(&mut volume, parent, name),
            self.path_of(&mut volume, newparent, newname),
        ) else {
            reply.error(libc::EINVAL);
            return;
        };
        match volume.rename(&from, &to) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let mut volume = self.volume.lock().unwrap();
        match volume.flush(false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        let mut volume = self.volume.lock().unwrap();
        match volume.flush(datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let mut volume = self.volume.lock().unwrap();
        match Inode::load(&mut volume.device, &volume.sb, ino as u32) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let volume = self.volume.lock().unwrap();
        let s = volume.statfs();
        reply.statfs(
            s.total_blocks,
            s.free_blocks,
            s.free_blocks,
            s.total_inodes,
            s.free_inodes,
            s.block_size,
            s.max_name_length,
            s.block_size,
        );
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: fuser::ReplyXattr) {
        reply.size(0);
    }

    fn getxattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, _size: u32, reply: fuser::ReplyXattr) {
        reply.error(libc::ENODATA);
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOSYS);
    }

    fn destroy(&mut self) {
        let mut volume = self.volume.lock().unwrap();
        if let Err(e) = volume.teardown() {
            error!("teardown failed: {e}");
        } else {
            debug!("volume torn down cleanly");
        }
    }
}

fn inode_attr(volume: &mut Volume, ino: u64) -> sfusefs_core::Result<Attr> {
    let inode = Inode::load(&mut volume.device, &volume.sb, ino as u32)?;
    Ok(Attr::from_inode(ino as u32, &inode))
}
