//! Master record: the single persistent descriptor of a journal store,
//! kept in the last sector of the volume.

use crate::codec::{read_le_u32, write_le_u32};
use fj_error::{JrnlError, Result};
use fj_types::{SectorIndex, VolumeGeometry, JRNL_MAGIC};
use serde::Serialize;
use std::fmt;

/// Encoded size of the master record payload; the rest of the sector is
/// zero padding.
pub const MASTER_RECORD_BYTES: usize = 28;

/// Transaction status, persisted as a 32-bit word.
///
/// `Init` doubles as the direct-I/O state used while the file system is
/// being formatted or mounted on the journaled volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransStatus {
    /// File system being mounted/formatted; writes bypass the journal.
    Init,
    /// Fresh log, or the last transaction processed completely.
    Ready,
    /// Journaling transaction running.
    Open,
    /// Transaction being committed to the target disk.
    Commit,
}

impl TransStatus {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Init => 0,
            Self::Ready => 1,
            Self::Open => 2,
            Self::Commit => 3,
        }
    }

    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Ready),
            2 => Some(Self::Open),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for TransStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "Initialize/FS-direct",
            Self::Ready => "Ready",
            Self::Open => "Open",
            Self::Commit => "Commit",
        };
        f.write_str(name)
    }
}

/// In-memory image of the on-disk master sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterRecord {
    pub magic: u32,
    /// Length of the reserved store region, in sectors.
    pub store_size_sectors: u32,
    /// Absolute sector index where the store begins.
    pub store_offset_sector: SectorIndex,
    /// Store-relative cursor one past the last buffered sector; zero when
    /// no operation is buffered.
    pub next_free_sector: u32,
    pub status: TransStatus,
    /// Cached volume descriptor, checked for consistency at mount.
    pub volume: VolumeGeometry,
}

impl MasterRecord {
    /// Encode into a sector buffer: 28 little-endian payload bytes, the
    /// rest zeroed.
    pub fn encode_sector(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < MASTER_RECORD_BYTES {
            return Err(JrnlError::InvalidArgument(format!(
                "master sector buffer too small: {} bytes",
                buf.len()
            )));
        }
        let volume_size = u32::try_from(self.volume.volume_size()).map_err(|_| {
            JrnlError::InvalidArgument(format!(
                "volume size {} exceeds the on-disk 32-bit field",
                self.volume.volume_size()
            ))
        })?;
        buf.fill(0);
        write_le_u32(buf, 0, self.magic);
        write_le_u32(buf, 4, self.store_size_sectors);
        write_le_u32(buf, 8, self.store_offset_sector.0);
        write_le_u32(buf, 12, self.next_free_sector);
        write_le_u32(buf, 16, self.status.as_u32());
        write_le_u32(buf, 20, volume_size);
        write_le_u32(buf, 24, self.volume.sector_size());
        Ok(())
    }

    /// Decode a master sector read from disk.
    ///
    /// Returns `Ok(None)` when the magic does not match (no store present);
    /// a matching magic with garbage fields is reported as inconsistent.
    pub fn decode_sector(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < MASTER_RECORD_BYTES {
            return Err(JrnlError::InvalidArgument(format!(
                "master sector buffer too small: {} bytes",
                bytes.len()
            )));
        }
        let word = |offset| read_le_u32(bytes, offset).unwrap_or(0);
        let magic = word(0);
        if magic != JRNL_MAGIC {
            return Ok(None);
        }

        let status_raw = word(16);
        let status = TransStatus::from_u32(status_raw).ok_or_else(|| {
            JrnlError::Inconsistent(format!("unknown transaction status value {status_raw}"))
        })?;
        let volume = VolumeGeometry::new(u64::from(word(20)), word(24))
            .map_err(|err| JrnlError::Inconsistent(format!("master volume descriptor: {err}")))?;

        Ok(Some(Self {
            magic,
            store_size_sectors: word(4),
            store_offset_sector: SectorIndex(word(8)),
            next_free_sector: word(12),
            status,
            volume,
        }))
    }
}
