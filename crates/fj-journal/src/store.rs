//! Journal store: sector I/O relative to the reserved region at the tail
//! of the volume.

use crate::io::DiskIo;
use fj_error::{JrnlError, Result};
use fj_types::{SectorIndex, StoreSector, VolumeGeometry};

/// Store-relative view of the reserved sector range. The last store sector
/// holds the master record.
#[derive(Clone)]
pub(crate) struct JournalStore {
    io: DiskIo,
    store_size_sectors: u32,
    store_offset_sector: SectorIndex,
}

impl JournalStore {
    pub(crate) fn new(io: DiskIo, store_size_sectors: u32) -> Result<Self> {
        let total = io.geometry().total_sectors();
        if store_size_sectors >= total {
            return Err(JrnlError::InvalidArgument(format!(
                "store of {store_size_sectors} sectors does not fit a {total}-sector volume"
            )));
        }
        Ok(Self {
            io,
            store_size_sectors,
            store_offset_sector: SectorIndex(total - store_size_sectors),
        })
    }

    pub(crate) fn geometry(&self) -> VolumeGeometry {
        self.io.geometry()
    }

    pub(crate) fn size_sectors(&self) -> u32 {
        self.store_size_sectors
    }

    pub(crate) fn offset_sector(&self) -> SectorIndex {
        self.store_offset_sector
    }

    /// Store sector holding the master record: the last sector of the
    /// volume.
    pub(crate) fn master_sector(&self) -> StoreSector {
        StoreSector(self.store_size_sectors - 1)
    }

    /// Absolute disk sector of a store-relative index.
    pub(crate) fn disk_sector(&self, sector: StoreSector) -> SectorIndex {
        SectorIndex(self.store_offset_sector.0 + sector.0)
    }

    fn check(&self, sector: StoreSector, count: u32) -> Result<()> {
        let end = sector
            .checked_add(count)
            .ok_or_else(|| JrnlError::InvalidArgument(format!("store range overflow at {sector}")))?;
        if sector.0 >= self.store_size_sectors || end.0 > self.store_size_sectors {
            return Err(JrnlError::InvalidArgument(format!(
                "store access out of range: sector={sector} count={count} store_size={}",
                self.store_size_sectors
            )));
        }
        Ok(())
    }

    pub(crate) fn read(&self, sector: StoreSector, count: u32, buf: &mut [u8]) -> Result<()> {
        self.check(sector, count)?;
        self.io.read_sectors(self.disk_sector(sector), count, buf)
    }

    /// Erase-then-write, the flash discipline for isolated sector updates
    /// (master rewrites).
    pub(crate) fn write(&self, sector: StoreSector, count: u32, buf: &[u8]) -> Result<()> {
        self.check(sector, count)?;
        let disk = self.disk_sector(sector);
        self.io.erase_sectors(disk, count)?;
        self.io.write_sectors(disk, count, buf)
    }

    /// Write without erasing; the caller has erased the enclosing range.
    pub(crate) fn write_raw(&self, sector: StoreSector, count: u32, buf: &[u8]) -> Result<()> {
        self.check(sector, count)?;
        self.io.write_sectors(self.disk_sector(sector), count, buf)
    }

    pub(crate) fn erase(&self, sector: StoreSector, count: u32) -> Result<()> {
        self.check(sector, count)?;
        self.io.erase_sectors(self.disk_sector(sector), count)
    }
}
