//! `mkfs.sfusefs` — formats a backing image file.
//!
//! Grounded in `mutils`' own `mkfs` tool (`src/mkfs/mod.rs`'s `FSFactory`
//! dispatch and `mkfs/src/ext2.rs`'s `Ext2Factory::create`), specialized to
//! one filesystem type and driven non-interactively via `--force` instead
//! of `utils::prompt::prompt` (spec.md §4.10).

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use sfusefs_core::Volume;

/// Format an image file as a sfusefs volume.
#[derive(Parser, Debug)]
#[command(name = "mkfs.sfusefs", version, about)]
struct Args {
    /// Path to the image file to format. Created if `--size` is given and
    /// the file does not already exist.
    image: PathBuf,

    /// Total size of the image, e.g. "64M", "1G". Only meaningful when the
    /// image does not already exist.
    #[arg(long)]
    size: Option<String>,

    /// Number of inodes to provision. Defaults to one inode per four data
    /// blocks (spec.md §9: capacities are always derived, never hardcoded).
    #[arg(long)]
    inodes: Option<u32>,

    /// Reformat even if the image already holds a valid sfusefs volume.
    #[arg(long)]
    force: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("mkfs.sfusefs: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    if !args.image.exists() {
        let size = args
            .size
            .as_deref()
            .map(parse_size)
            .transpose()?
            .unwrap_or(64 * 1024 * 1024);
        let file = OpenOptions::new().read(true).write(true).create(true).open(&args.image)?;
        file.set_len(size)?;
    } else if !args.force {
        let file = OpenOptions::new().read(true).write(true).open(&args.image)?;
        if Volume::mount(file).is_ok() {
            anyhow::bail!("{:?} already holds a sfusefs volume; pass --force to reformat", args.image);
        }
    }

    let file = OpenOptions::new().read(true).write(true).open(&args.image)?;
    let volume = Volume::format(file, args.inodes)?;
    info!(
        "formatted {:?}: {} blocks, {} inodes",
        args.image, volume.sb.total_blocks, volume.sb.total_inodes
    );
    Ok(())
}

/// Parses a human size like `64M` or `1G` into bytes. Defaults to bytes if
/// no suffix is given.
fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1024),
        Some('m' | 'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some(_) => (s, 1),
        None => anyhow::bail!("empty size"),
    };
    let n: u64 = digits.trim().parse()?;
    Ok(n * mult)
}
