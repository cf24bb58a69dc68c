#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fj_block::FileFlashDevice;
use fj_journal::{inspect_device, registry, StoreReport};
use fj_types::{JrnlConfig, SectorIndex};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "fj", about = "FlashJrnl — crash-consistent write journal toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a flash image with a freshly initialised journal store.
    Create {
        /// Path of the image file to create.
        image: PathBuf,
        /// Volume size in sectors.
        #[arg(long, default_value_t = 1024)]
        sectors: u32,
        /// Sector size in bytes.
        #[arg(long, default_value_t = 4096)]
        sector_size: u32,
        /// Journal store reservation in sectors.
        #[arg(long, default_value_t = 32)]
        store_sectors: u32,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Decode the master record and operation log of an image (read-only).
    Inspect {
        /// Path to the image file.
        image: PathBuf,
        /// Sector size in bytes.
        #[arg(long, default_value_t = 4096)]
        sector_size: u32,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Mount an image with recovery enabled, finishing or discarding an
    /// interrupted transaction.
    Recover {
        /// Path to the image file.
        image: PathBuf,
        /// Sector size in bytes.
        #[arg(long, default_value_t = 4096)]
        sector_size: u32,
        /// Journal store reservation in sectors.
        #[arg(long, default_value_t = 32)]
        store_sectors: u32,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Write one journaled transaction into an image and read it back.
    Exercise {
        /// Path to the image file.
        image: PathBuf,
        /// Sector size in bytes.
        #[arg(long, default_value_t = 4096)]
        sector_size: u32,
        /// Journal store reservation in sectors.
        #[arg(long, default_value_t = 32)]
        store_sectors: u32,
        /// First target sector of the demo write.
        #[arg(long, default_value_t = 0)]
        target: u32,
        /// Number of sectors to write.
        #[arg(long, default_value_t = 2)]
        count: u32,
        /// Fill byte of the demo payload.
        #[arg(long, default_value_t = 0xAB)]
        fill: u8,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateOutput {
    image: PathBuf,
    sectors: u32,
    sector_size: u32,
    store_sectors: u32,
    fs_sectors: u32,
}

#[derive(Debug, Serialize)]
struct RecoverOutput {
    status_before: String,
    next_free_before: u32,
    status_after: String,
}

#[derive(Debug, Serialize)]
struct ExerciseOutput {
    target: u32,
    count: u32,
    fill: u8,
    verified: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Create {
            image,
            sectors,
            sector_size,
            store_sectors,
            json,
        } => create(&image, sectors, sector_size, store_sectors, json),
        Command::Inspect {
            image,
            sector_size,
            json,
        } => inspect(&image, sector_size, json),
        Command::Recover {
            image,
            sector_size,
            store_sectors,
            json,
        } => recover(&image, sector_size, store_sectors, json),
        Command::Exercise {
            image,
            sector_size,
            store_sectors,
            target,
            count,
            fill,
            json,
        } => exercise(&image, sector_size, store_sectors, target, count, fill, json),
    }
}

fn create(
    image: &PathBuf,
    sectors: u32,
    sector_size: u32,
    store_sectors: u32,
    json: bool,
) -> Result<()> {
    let dev = FileFlashDevice::create(
        image,
        u64::from(sectors) * u64::from(sector_size),
        sector_size,
    )
    .with_context(|| format!("create image {}", image.display()))?;

    let handle = registry::mount(
        dev.clone(),
        &JrnlConfig {
            store_size_sectors: store_sectors,
            force_format: true,
            ..JrnlConfig::default()
        },
    )
    .context("initialise journal store")?;
    let fs_sectors = registry::sector_count(handle).context("query sector count")?;
    registry::set_direct_io(handle, false).context("leave direct mode")?;
    registry::unmount(handle).context("unmount")?;
    dev.sync().context("sync image")?;

    let out = CreateOutput {
        image: image.clone(),
        sectors,
        sector_size,
        store_sectors,
        fs_sectors,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "created {}: {} sectors of {} bytes, {}-sector store, {} sectors for the file system",
            out.image.display(),
            out.sectors,
            out.sector_size,
            out.store_sectors,
            out.fs_sectors
        );
    }
    Ok(())
}

fn inspect(image: &PathBuf, sector_size: u32, json: bool) -> Result<()> {
    let dev = FileFlashDevice::open(image, sector_size)
        .with_context(|| format!("open image {}", image.display()))?;
    let report = inspect_device(dev).context("decode journal store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StoreReport) {
    let master = &report.master;
    println!("master record:");
    println!("  magic:              {:#010x}", master.magic);
    println!("  store_size_sectors: {}", master.store_size_sectors);
    println!("  store_offset:       {}", master.store_offset_sector);
    println!("  next_free_sector:   {}", master.next_free_sector);
    println!("  status:             {}", master.status);
    println!("  volume_size:        {}", master.volume_size);
    println!("  sector_size:        {}", master.sector_size);
    for op in &report.operations {
        println!(
            "operation @{}: target={} count={} crc32_data={:#010x} header_crc={}",
            op.store_sector,
            op.target_sector,
            op.sector_count,
            op.crc32_data,
            if op.header_crc_ok { "ok" } else { "BAD" }
        );
    }
}

fn recover(image: &PathBuf, sector_size: u32, store_sectors: u32, json: bool) -> Result<()> {
    let dev = FileFlashDevice::open(image, sector_size)
        .with_context(|| format!("open image {}", image.display()))?;
    let before = inspect_device(dev.clone()).context("decode journal store")?;

    // Mount with auto-replay disabled so the interrupted transaction, if
    // any, is still there for the explicit recovery call.
    let handle = registry::mount(
        dev.clone(),
        &JrnlConfig {
            store_size_sectors: store_sectors,
            replay_after_mount: false,
            ..JrnlConfig::default()
        },
    )
    .context("mount without auto-replay")?;
    registry::recover(handle).context("run recovery")?;
    registry::unmount(handle).context("unmount")?;
    dev.sync().context("sync image")?;

    let after = inspect_device(dev).context("re-decode journal store")?;
    let out = RecoverOutput {
        status_before: before.master.status.clone(),
        next_free_before: before.master.next_free_sector,
        status_after: after.master.status.clone(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "recovery: {} ({} buffered sectors) -> {}",
            out.status_before, out.next_free_before, out.status_after
        );
    }
    Ok(())
}

fn exercise(
    image: &PathBuf,
    sector_size: u32,
    store_sectors: u32,
    target: u32,
    count: u32,
    fill: u8,
    json: bool,
) -> Result<()> {
    if count == 0 {
        bail!("count must be at least 1");
    }
    let dev = FileFlashDevice::open(image, sector_size)
        .with_context(|| format!("open image {}", image.display()))?;

    let handle = registry::mount(
        dev.clone(),
        &JrnlConfig {
            store_size_sectors: store_sectors,
            ..JrnlConfig::default()
        },
    )
    .context("mount journal")?;

    let payload = vec![fill; count as usize * sector_size as usize];
    registry::transaction_begin(handle).context("begin transaction")?;
    registry::write(handle, SectorIndex(target), &payload).context("journaled write")?;
    registry::transaction_end(handle, true).context("commit transaction")?;

    let mut back = vec![0_u8; payload.len()];
    registry::read(handle, SectorIndex(target), &mut back).context("read back")?;
    registry::unmount(handle).context("unmount")?;
    dev.sync().context("sync image")?;

    let out = ExerciseOutput {
        target,
        count,
        fill,
        verified: back == payload,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "committed {} sector(s) of {:#04x} at sector {} ({})",
            out.count,
            out.fill,
            out.target,
            if out.verified { "verified" } else { "MISMATCH" }
        );
    }
    Ok(())
}
