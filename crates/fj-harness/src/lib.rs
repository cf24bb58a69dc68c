#![forbid(unsafe_code)]
//! Crash-scenario rig for the journal engine.
//!
//! [`CrashRig`] owns an in-memory flash device and a mounted journal
//! handle, and models power loss the way the hardware does: the armed
//! power-cut point makes the engine bail out mid-commit, [`CrashRig::crash`]
//! drops the instance (losing all in-memory state), and a remount runs the
//! recovery protocol against whatever reached the flash. The device
//! outlives the instance, so disk state carries across "reboots".

use fj_block::{FlashDevice, MemFlashDevice};
use fj_error::{JrnlError, Result};
use fj_journal::{registry, CutPoint, MasterRecord, PowerCutPlan};
use fj_types::{ByteOffset, JrnlConfig, JrnlHandle, SectorIndex};
use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

/// Store size used by the canonical scenarios.
pub const STORE_SECTORS: u32 = 16;
/// Sector size used by the canonical scenarios.
pub const SECTOR_SIZE: u32 = 4096;
/// Whole-volume size in sectors; the file system sees the first
/// `TOTAL_SECTORS - STORE_SECTORS`.
pub const TOTAL_SECTORS: u32 = 64;

/// The journal registry is process-global with a bounded handle table;
/// scenario tests serialise on this gate so they never fight over slots.
pub fn scenario_gate() -> MutexGuard<'static, ()> {
    static GATE: Mutex<()> = const_mutex(());
    GATE.lock()
}

/// One journaled volume under test.
pub struct CrashRig {
    dev: Arc<MemFlashDevice>,
    config: JrnlConfig,
    handle: Option<JrnlHandle>,
}

impl CrashRig {
    /// Fresh fully-erased volume, mounted with the canonical 16-sector
    /// store.
    pub fn new() -> Result<Self> {
        Self::with_config(JrnlConfig {
            store_size_sectors: STORE_SECTORS,
            ..JrnlConfig::default()
        })
    }

    pub fn with_config(config: JrnlConfig) -> Result<Self> {
        let dev = MemFlashDevice::new(
            u64::from(TOTAL_SECTORS) * u64::from(SECTOR_SIZE),
            SECTOR_SIZE,
        )?;
        let handle = registry::mount(dev.clone(), &config)?;
        Ok(Self {
            dev,
            config,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Result<JrnlHandle> {
        self.handle
            .ok_or_else(|| JrnlError::InvalidState("rig is powered off".to_owned()))
    }

    #[must_use]
    pub fn device(&self) -> Arc<MemFlashDevice> {
        Arc::clone(&self.dev)
    }

    /// Simulated power loss: drop the instance without touching the disk.
    pub fn crash(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            debug!(target: "fj::harness", %handle, "power cut, dropping instance");
            registry::unmount(handle)?;
        }
        Ok(())
    }

    /// Reboot: drop the instance (if alive) and mount again with the rig's
    /// configuration, running recovery.
    pub fn remount(&mut self) -> Result<()> {
        let config = self.config;
        self.remount_with(config)
    }

    /// Reboot with a different configuration (consistency-check scenarios).
    pub fn remount_with(&mut self, config: JrnlConfig) -> Result<()> {
        self.crash()?;
        let handle = registry::mount(self.dev.clone(), &config)?;
        self.config = config;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        registry::transaction_begin(self.handle()?)
    }

    pub fn commit(&self) -> Result<()> {
        registry::transaction_end(self.handle()?, true)
    }

    pub fn cancel(&self) -> Result<()> {
        registry::transaction_end(self.handle()?, false)
    }

    /// Run on-demand recovery, for rigs remounted with replay disabled.
    pub fn recover(&self) -> Result<()> {
        registry::recover(self.handle()?)
    }

    /// Arm power-cut points on the live instance.
    pub fn arm(&self, points: &[CutPoint]) -> Result<()> {
        registry::set_power_cuts(self.handle()?, PowerCutPlan::armed(points))
    }

    pub fn write_bytes(&self, target: u32, bytes: &[u8]) -> Result<()> {
        registry::write(self.handle()?, SectorIndex(target), bytes)
    }

    pub fn write_fill(&self, target: u32, fill: u8, sectors: u32) -> Result<()> {
        self.write_bytes(target, &fill_payload(fill, sectors))
    }

    /// Seed file-system content outside any transaction, the way a format
    /// pass would: bracket a direct write with `set_direct_io`.
    pub fn direct_fill(&self, target: u32, fill: u8, sectors: u32) -> Result<()> {
        let handle = self.handle()?;
        registry::set_direct_io(handle, true)?;
        registry::write(handle, SectorIndex(target), &fill_payload(fill, sectors))?;
        registry::set_direct_io(handle, false)
    }

    /// Read through the engine's bounds-checked path.
    pub fn read_back(&self, target: u32, sectors: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; sectors as usize * SECTOR_SIZE as usize];
        registry::read(self.handle()?, SectorIndex(target), &mut buf)?;
        Ok(buf)
    }

    /// Raw device sector, bypassing the engine.
    pub fn sector(&self, index: u32) -> Result<Vec<u8>> {
        self.dev.sector_snapshot(index)
    }

    /// Bytes of the whole file-system area, for before/after comparisons.
    pub fn fs_area(&self) -> Result<Vec<u8>> {
        let sectors = TOTAL_SECTORS - self.config.store_size_sectors;
        let mut buf = vec![0_u8; sectors as usize * SECTOR_SIZE as usize];
        self.dev.read(ByteOffset::ZERO, &mut buf)?;
        Ok(buf)
    }

    /// Decode the persisted master record straight off the device.
    pub fn master_on_disk(&self) -> Result<MasterRecord> {
        let raw = self.dev.sector_snapshot(TOTAL_SECTORS - 1)?;
        MasterRecord::decode_sector(&raw)?
            .ok_or_else(|| JrnlError::Inconsistent("no master record on device".to_owned()))
    }
}

impl Drop for CrashRig {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = registry::unmount(handle);
        }
    }
}

/// A `sectors`-long payload of one repeated byte.
#[must_use]
pub fn fill_payload(fill: u8, sectors: u32) -> Vec<u8> {
    vec![fill; sectors as usize * SECTOR_SIZE as usize]
}

/// A `sectors`-long payload of a repeated byte pattern.
#[must_use]
pub fn pattern_payload(pattern: &[u8], sectors: u32) -> Vec<u8> {
    let len = sectors as usize * SECTOR_SIZE as usize;
    pattern.iter().copied().cycle().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fj_journal::TransStatus;

    #[test]
    fn rig_mounts_ready_with_reduced_disk() {
        let _gate = scenario_gate();
        let rig = CrashRig::new().expect("rig");
        let handle = rig.handle().expect("handle");
        assert_eq!(registry::sector_count(handle).expect("count"), 48);
        assert_eq!(registry::sector_size(handle).expect("size"), SECTOR_SIZE);
        assert_eq!(
            registry::instance(handle).expect("instance").status(),
            TransStatus::Ready
        );
    }

    #[test]
    fn crash_survives_and_remount_restores_handle() {
        let _gate = scenario_gate();
        let mut rig = CrashRig::new().expect("rig");
        rig.direct_fill(3, 0x77, 1).expect("seed");
        rig.crash().expect("crash");
        assert!(rig.handle().is_err());
        rig.remount().expect("remount");
        assert_eq!(rig.read_back(3, 1).expect("read"), fill_payload(0x77, 1));
    }

    #[test]
    fn pattern_payload_repeats_exactly() {
        let payload = pattern_payload(b"AB", 1);
        assert_eq!(payload.len(), SECTOR_SIZE as usize);
        assert_eq!(&payload[..4], b"ABAB");
        assert_eq!(payload[SECTOR_SIZE as usize - 1], b'B');
    }
}
