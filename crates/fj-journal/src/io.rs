//! Sector-addressed indirection over the raw byte-offset device API.

use fj_block::FlashDevice;
use fj_error::{JrnlError, Result};
use fj_types::{SectorIndex, VolumeGeometry};
use std::sync::Arc;

/// Thin adapter: sector indices in, byte offsets out. No locking, no
/// retries; device failures propagate verbatim.
#[derive(Clone)]
pub(crate) struct DiskIo {
    dev: Arc<dyn FlashDevice>,
    geometry: VolumeGeometry,
}

impl DiskIo {
    pub(crate) fn new(dev: Arc<dyn FlashDevice>) -> Result<Self> {
        let geometry = VolumeGeometry::new(dev.total_size(), dev.sector_size())
            .map_err(|err| JrnlError::InvalidArgument(err.to_string()))?;
        Ok(Self { dev, geometry })
    }

    pub(crate) fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    pub(crate) fn device(&self) -> Arc<dyn FlashDevice> {
        Arc::clone(&self.dev)
    }

    fn check_buf(&self, count: u32, len: usize) -> Result<()> {
        let expected = self.geometry.sector_bytes(count);
        if len as u64 != expected {
            return Err(JrnlError::InvalidArgument(format!(
                "buffer of {len} bytes does not hold {count} sectors ({expected} bytes)"
            )));
        }
        Ok(())
    }

    pub(crate) fn read_sectors(
        &self,
        sector: SectorIndex,
        count: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        self.check_buf(count, buf.len())?;
        self.dev.read(self.geometry.byte_of_sector(sector), buf)
    }

    pub(crate) fn write_sectors(&self, sector: SectorIndex, count: u32, buf: &[u8]) -> Result<()> {
        self.check_buf(count, buf.len())?;
        self.dev.write(self.geometry.byte_of_sector(sector), buf)
    }

    pub(crate) fn erase_sectors(&self, sector: SectorIndex, count: u32) -> Result<()> {
        self.dev.erase_range(
            self.geometry.byte_of_sector(sector),
            self.geometry.sector_bytes(count),
        )
    }
}
