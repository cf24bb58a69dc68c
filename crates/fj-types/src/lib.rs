#![forbid(unsafe_code)]
//! Shared newtypes and configuration for FlashJrnl.
//!
//! Unit-carrying wrappers keep the three address spaces apart: absolute
//! device sectors ([`SectorIndex`]), journal-store-relative sectors
//! ([`StoreSector`]) and raw byte offsets ([`ByteOffset`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Journal store identifier, first 32 bits of the master sector.
pub const JRNL_MAGIC: u32 = 0x6A6B_6C6D;

/// Minimum applicable store size: master sector + header + data.
pub const MIN_STORE_SECTORS: u32 = 3;

/// Smallest sector size the engine accepts.
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Absolute sector index on the underlying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorIndex(pub u32);

impl SectorIndex {
    /// Add a sector count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u32) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

impl fmt::Display for SectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sector index relative to the start of the journal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreSector(pub u32);

impl StoreSector {
    /// Add a sector count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u32) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

impl fmt::Display for StoreSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte offset on the underlying device (pread/pwrite semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque journal instance handle. `-1` is reserved as the invalid value so
/// the handle can travel through components that identify disks by small
/// signed integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JrnlHandle(pub i32);

impl JrnlHandle {
    pub const INVALID: Self = Self(-1);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Registry slot index, `None` for the invalid handle or negative values.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for JrnlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from [`VolumeGeometry`] validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("sector size {0} below minimum {MIN_SECTOR_SIZE}")]
    SectorSizeTooSmall(u32),
    #[error("volume size {volume_size} is not a multiple of sector size {sector_size}")]
    UnalignedVolume { volume_size: u64, sector_size: u32 },
    #[error("volume of {0} sectors does not fit the on-disk 32-bit sector index")]
    TooManySectors(u64),
}

/// Validated description of a journaled volume, immutable for the lifetime
/// of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    volume_size: u64,
    sector_size: u32,
}

impl VolumeGeometry {
    /// Validate `volume_size`/`sector_size` per the mount invariants:
    /// sector size at least [`MIN_SECTOR_SIZE`], volume size a whole number
    /// of sectors, and a sector count that fits the on-disk `u32` index.
    pub fn new(volume_size: u64, sector_size: u32) -> Result<Self, GeometryError> {
        if sector_size < MIN_SECTOR_SIZE {
            return Err(GeometryError::SectorSizeTooSmall(sector_size));
        }
        if volume_size % u64::from(sector_size) != 0 {
            return Err(GeometryError::UnalignedVolume {
                volume_size,
                sector_size,
            });
        }
        let sectors = volume_size / u64::from(sector_size);
        if u32::try_from(sectors).is_err() {
            return Err(GeometryError::TooManySectors(sectors));
        }
        Ok(Self {
            volume_size,
            sector_size,
        })
    }

    #[must_use]
    pub fn volume_size(self) -> u64 {
        self.volume_size
    }

    #[must_use]
    pub fn sector_size(self) -> u32 {
        self.sector_size
    }

    /// Total sector count of the volume.
    #[must_use]
    pub fn total_sectors(self) -> u32 {
        u32::try_from(self.volume_size / u64::from(self.sector_size)).unwrap_or(u32::MAX)
    }

    /// Byte offset of an absolute sector.
    #[must_use]
    pub fn byte_of_sector(self, sector: SectorIndex) -> ByteOffset {
        ByteOffset(u64::from(sector.0) * u64::from(self.sector_size))
    }

    /// Byte length of `count` sectors.
    #[must_use]
    pub fn sector_bytes(self, count: u32) -> u64 {
        u64::from(count) * u64::from(self.sector_size)
    }
}

/// User-facing journal mount configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JrnlConfig {
    /// Journal store size in sectors, reserved at the volume tail.
    pub store_size_sectors: u32,
    /// Discard any master record found on disk and start fresh.
    pub overwrite_existing: bool,
    /// Apply an unfinished-commit transaction if one is found during mount.
    pub replay_after_mount: bool,
    /// Caller intends to (re)format the journaled file system.
    pub force_format: bool,
}

impl Default for JrnlConfig {
    fn default() -> Self {
        Self {
            store_size_sectors: 32,
            overwrite_existing: false,
            replay_after_mount: true,
            force_format: false,
        }
    }
}
