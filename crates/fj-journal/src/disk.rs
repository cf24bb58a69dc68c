//! Disk surface for a journaled file system.
//!
//! The shape a FAT driver's diskio layer binds to: sector reads and writes
//! against one mounted journal handle, with the disk size already reduced
//! by the store reservation. The file system never learns the store
//! exists.

use crate::registry;
use fj_error::Result;
use fj_types::{JrnlHandle, SectorIndex};

/// Sector-addressed view of the file-system area behind a journal handle.
#[derive(Debug, Clone, Copy)]
pub struct JournaledDisk {
    handle: JrnlHandle,
}

impl JournaledDisk {
    /// Bind to a mounted handle; fails if the handle does not resolve.
    pub fn new(handle: JrnlHandle) -> Result<Self> {
        registry::instance(handle)?;
        Ok(Self { handle })
    }

    #[must_use]
    pub fn handle(&self) -> JrnlHandle {
        self.handle
    }

    /// Disk size in sectors as the file system must see it.
    pub fn sector_count(&self) -> Result<u32> {
        registry::sector_count(self.handle)
    }

    pub fn sector_size(&self) -> Result<u32> {
        registry::sector_size(self.handle)
    }

    /// Read whole sectors from the file-system area.
    pub fn read_sectors(&self, sector: SectorIndex, buf: &mut [u8]) -> Result<()> {
        registry::read(self.handle, sector, buf)
    }

    /// Write whole sectors; journaled while a transaction is open, direct
    /// during format.
    pub fn write_sectors(&self, sector: SectorIndex, buf: &[u8]) -> Result<()> {
        registry::write(self.handle, sector, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::registry_gate;
    use fj_block::MemFlashDevice;
    use fj_error::JrnlError;
    use fj_types::JrnlConfig;

    const SS: u32 = 512;

    #[test]
    fn journaled_disk_round_trip() {
        let _gate = registry_gate();
        let dev = MemFlashDevice::new(64 * u64::from(SS), SS).expect("device");
        let handle = registry::mount(
            dev,
            &JrnlConfig {
                store_size_sectors: 16,
                ..JrnlConfig::default()
            },
        )
        .expect("mount");

        let disk = JournaledDisk::new(handle).expect("bind");
        assert_eq!(disk.sector_count().expect("count"), 48);
        assert_eq!(disk.sector_size().expect("size"), SS);

        let payload = vec![0xD7_u8; SS as usize];
        registry::transaction_begin(handle).expect("begin");
        disk.write_sectors(SectorIndex(9), &payload).expect("write");
        registry::transaction_end(handle, true).expect("commit");

        let mut back = vec![0_u8; SS as usize];
        disk.read_sectors(SectorIndex(9), &mut back).expect("read");
        assert_eq!(back, payload);

        registry::unmount(handle).expect("unmount");
        assert!(matches!(
            JournaledDisk::new(handle),
            Err(JrnlError::NotFound)
        ));
    }
}
