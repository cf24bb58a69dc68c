#![forbid(unsafe_code)]
//! Flash block device abstraction.
//!
//! Provides the [`FlashDevice`] trait consumed by the journal engine, an
//! erase-aware in-memory device for tests and crash rigs, and a file-backed
//! device for disk images. All I/O is byte-addressed but must stay
//! sector-aligned; erased ranges read back as `0xFF` (NOR flash fill).

use fj_error::{JrnlError, Result};
use fj_types::{ByteOffset, VolumeGeometry};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Fill value of an erased flash range.
pub const ERASE_FILL: u8 = 0xFF;

/// Sector-addressed flash device, byte-offset API.
///
/// The journal engine is the only writer of the store region; the file
/// system owns the rest. Neither invariant is enforced here: this layer
/// only checks alignment and bounds, and propagates failures verbatim
/// without retrying.
pub trait FlashDevice: Send + Sync {
    /// Read exactly `buf.len()` bytes from `offset`.
    fn read(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`. Callers erase first.
    fn write(&self, offset: ByteOffset, buf: &[u8]) -> Result<()>;

    /// Erase `len` bytes starting at `offset`.
    fn erase_range(&self, offset: ByteOffset, len: u64) -> Result<()>;

    /// Sector size in bytes.
    fn sector_size(&self) -> u32;

    /// Total device size in bytes.
    fn total_size(&self) -> u64;
}

/// Validate that a byte range is sector-aligned and inside the device.
fn check_range(offset: ByteOffset, len: u64, sector_size: u32, total_size: u64) -> Result<()> {
    let sector_size = u64::from(sector_size);
    if offset.0 % sector_size != 0 || len % sector_size != 0 {
        return Err(JrnlError::InvalidArgument(format!(
            "unaligned flash access: offset={offset} len={len} sector_size={sector_size}"
        )));
    }
    let end = offset
        .checked_add(len)
        .ok_or_else(|| JrnlError::InvalidArgument(format!("flash range overflow: offset={offset} len={len}")))?;
    if end.0 > total_size {
        return Err(JrnlError::InvalidArgument(format!(
            "flash access out of bounds: offset={offset} len={len} total_size={total_size}"
        )));
    }
    Ok(())
}

/// In-memory flash device.
///
/// Backs the crash-scenario rigs: the byte vector survives instance drops
/// through its `Arc`, so "reboot after power cut" is modelled by dropping
/// the journal instance and remounting the same device.
#[derive(Debug)]
pub struct MemFlashDevice {
    bytes: RwLock<Vec<u8>>,
    geometry: VolumeGeometry,
}

impl MemFlashDevice {
    /// Create a fully-erased device of `volume_size` bytes.
    pub fn new(volume_size: u64, sector_size: u32) -> Result<Arc<Self>> {
        let geometry = VolumeGeometry::new(volume_size, sector_size)
            .map_err(|err| JrnlError::InvalidArgument(err.to_string()))?;
        let len = usize::try_from(volume_size)
            .map_err(|_| JrnlError::InvalidArgument(format!("volume size {volume_size} exceeds memory")))?;
        Ok(Arc::new(Self {
            bytes: RwLock::new(vec![ERASE_FILL; len]),
            geometry,
        }))
    }

    /// Snapshot one sector, for before/after comparisons in tests.
    pub fn sector_snapshot(&self, sector: u32) -> Result<Vec<u8>> {
        let sector_size = self.geometry.sector_size() as usize;
        let mut buf = vec![0_u8; sector_size];
        self.read(
            self.geometry.byte_of_sector(fj_types::SectorIndex(sector)),
            &mut buf,
        )?;
        Ok(buf)
    }
}

impl FlashDevice for MemFlashDevice {
    fn read(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.sector_size(), self.total_size())?;
        let bytes = self.bytes.read();
        let start = usize::try_from(offset.0)
            .map_err(|_| JrnlError::InvalidArgument(format!("offset {offset} exceeds memory")))?;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.sector_size(), self.total_size())?;
        let mut bytes = self.bytes.write();
        let start = usize::try_from(offset.0)
            .map_err(|_| JrnlError::InvalidArgument(format!("offset {offset} exceeds memory")))?;
        bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn erase_range(&self, offset: ByteOffset, len: u64) -> Result<()> {
        check_range(offset, len, self.sector_size(), self.total_size())?;
        trace!(target: "fj::block", event = "erase", offset = offset.0, len = len);
        let mut bytes = self.bytes.write();
        let start = usize::try_from(offset.0)
            .map_err(|_| JrnlError::InvalidArgument(format!("offset {offset} exceeds memory")))?;
        let end = start
            + usize::try_from(len)
                .map_err(|_| JrnlError::InvalidArgument(format!("erase length {len} exceeds memory")))?;
        bytes[start..end].fill(ERASE_FILL);
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        self.geometry.sector_size()
    }

    fn total_size(&self) -> u64 {
        self.geometry.volume_size()
    }
}

/// File-backed flash device using `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not require a
/// shared seek position.
#[derive(Debug)]
pub struct FileFlashDevice {
    file: File,
    geometry: VolumeGeometry,
}

impl FileFlashDevice {
    /// Create a new image file of `volume_size` bytes, fully erased.
    pub fn create(path: impl AsRef<Path>, volume_size: u64, sector_size: u32) -> Result<Arc<Self>> {
        let geometry = VolumeGeometry::new(volume_size, sector_size)
            .map_err(|err| JrnlError::InvalidArgument(err.to_string()))?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let fill = vec![ERASE_FILL; geometry.sector_size() as usize];
        for _ in 0..geometry.total_sectors() {
            file.write_all(&fill)?;
        }
        file.sync_all()?;
        Ok(Arc::new(Self { file, geometry }))
    }

    /// Open an existing image file; its length must be a whole number of
    /// sectors.
    pub fn open(path: impl AsRef<Path>, sector_size: u32) -> Result<Arc<Self>> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        let geometry = VolumeGeometry::new(len, sector_size)
            .map_err(|err| JrnlError::InvalidArgument(err.to_string()))?;
        Ok(Arc::new(Self { file, geometry }))
    }

    /// Flush pending writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl FlashDevice for FileFlashDevice {
    fn read(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.sector_size(), self.total_size())?;
        self.file.read_exact_at(buf, offset.0)?;
        Ok(())
    }

    fn write(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.sector_size(), self.total_size())?;
        self.file.write_all_at(buf, offset.0)?;
        Ok(())
    }

    fn erase_range(&self, offset: ByteOffset, len: u64) -> Result<()> {
        check_range(offset, len, self.sector_size(), self.total_size())?;
        trace!(target: "fj::block", event = "erase", offset = offset.0, len = len);
        let fill = vec![ERASE_FILL; self.sector_size() as usize];
        let mut at = offset.0;
        let end = offset.0 + len;
        while at < end {
            self.file.write_all_at(&fill, at)?;
            at += u64::from(self.sector_size());
        }
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        self.geometry.sector_size()
    }

    fn total_size(&self) -> u64 {
        self.geometry.volume_size()
    }
}
