//! Store inspection: decode the master and the operation log into a
//! serialisable report, without mutating anything on disk.

use crate::entry::OpHeader;
use crate::io::DiskIo;
use crate::master::MasterRecord;
use crate::store::JournalStore;
use fj_block::FlashDevice;
use fj_error::{JrnlError, Result};
use fj_types::StoreSector;
use serde::Serialize;
use std::sync::Arc;

/// Decoded master record, ready for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct MasterReport {
    pub magic: u32,
    pub store_size_sectors: u32,
    pub store_offset_sector: u32,
    pub next_free_sector: u32,
    pub status: String,
    pub volume_size: u64,
    pub sector_size: u32,
}

impl MasterReport {
    pub(crate) fn from_record(master: &MasterRecord) -> Self {
        Self {
            magic: master.magic,
            store_size_sectors: master.store_size_sectors,
            store_offset_sector: master.store_offset_sector.0,
            next_free_sector: master.next_free_sector,
            status: master.status.to_string(),
            volume_size: master.volume.volume_size(),
            sector_size: master.volume.sector_size(),
        }
    }
}

/// One decoded operation entry header.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    /// Store-relative sector of the header.
    pub store_sector: u32,
    pub target_sector: u32,
    pub sector_count: u32,
    pub crc32_data: u32,
    pub crc32_header: u32,
    pub header_crc_ok: bool,
}

/// Full store walk: master plus every operation up to the free cursor.
#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub master: MasterReport,
    pub operations: Vec<OperationReport>,
}

/// Decode every operation header in `0..next_free`. The walk stops at the
/// first header whose checksum fails, reporting it with
/// `header_crc_ok = false`; the sectors beyond it cannot be framed.
pub(crate) fn walk_operations(
    store: &JournalStore,
    next_free: u32,
) -> Result<Vec<OperationReport>> {
    let mut operations = Vec::new();
    let mut buf = vec![0_u8; store.geometry().sector_size() as usize];
    let mut cursor = StoreSector(0);

    while cursor.0 < next_free {
        store.read(cursor, 1, &mut buf)?;
        let (header, stored_crc) = OpHeader::decode_sector(&buf)?;
        let header_crc_ok = header.header_crc() == stored_crc;
        operations.push(OperationReport {
            store_sector: cursor.0,
            target_sector: header.target_sector.0,
            sector_count: header.sector_count,
            crc32_data: header.crc32_data,
            crc32_header: stored_crc,
            header_crc_ok,
        });
        if !header_crc_ok {
            break;
        }
        cursor = StoreSector(cursor.0 + header.entry_sectors());
    }

    Ok(operations)
}

/// Read-only inspection of a device that may hold a journal store.
///
/// Unlike a mount this never rewrites the master, so it is safe to point at
/// an image mid-investigation. `store_size_sectors` is taken from the
/// on-disk master itself.
pub fn inspect_device(dev: Arc<dyn FlashDevice>) -> Result<StoreReport> {
    let io = DiskIo::new(dev)?;
    let geometry = io.geometry();

    let mut buf = vec![0_u8; geometry.sector_size() as usize];
    let last = fj_types::SectorIndex(geometry.total_sectors() - 1);
    io.read_sectors(last, 1, &mut buf)?;

    let master = MasterRecord::decode_sector(&buf)?
        .ok_or_else(|| JrnlError::Inconsistent("no journal master record on device".to_owned()))?;

    if master.volume.volume_size() != geometry.volume_size()
        || master.volume.sector_size() != geometry.sector_size()
    {
        return Err(JrnlError::Inconsistent(format!(
            "master volume descriptor ({} bytes, {}-byte sectors) does not match the device",
            master.volume.volume_size(),
            master.volume.sector_size()
        )));
    }

    let store = JournalStore::new(io, master.store_size_sectors)?;
    let operations = walk_operations(&store, master.next_free_sector)?;

    Ok(StoreReport {
        master: MasterReport::from_record(&master),
        operations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JournalInstance;
    use fj_block::MemFlashDevice;
    use fj_types::{JrnlConfig, SectorIndex};

    const SS: u32 = 512;

    #[test]
    fn inspect_requires_a_store() {
        let dev = MemFlashDevice::new(64 * u64::from(SS), SS).expect("device");
        assert!(matches!(
            inspect_device(dev),
            Err(JrnlError::Inconsistent(_))
        ));
    }

    #[test]
    fn inspect_decodes_buffered_operations() {
        let dev = MemFlashDevice::new(64 * u64::from(SS), SS).expect("device");
        let config = JrnlConfig {
            store_size_sectors: 16,
            ..JrnlConfig::default()
        };
        let jrnl = JournalInstance::mount(dev.clone(), &config).expect("mount");
        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(4), &vec![0x9A_u8; SS as usize])
            .expect("write");
        drop(jrnl);

        let report = inspect_device(dev).expect("inspect");
        assert_eq!(report.master.status, "Open");
        assert_eq!(report.master.store_offset_sector, 48);
        assert_eq!(report.master.next_free_sector, 2);
        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.operations[0].target_sector, 4);
        assert!(report.operations[0].header_crc_ok);

        let json = serde_json::to_string(&report).expect("serialise");
        assert!(json.contains("\"target_sector\":4"));
    }
}
