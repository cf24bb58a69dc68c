//! Process-wide table of mounted journal instances.
//!
//! `mount` hands out the lowest free slot index as an opaque handle;
//! everything else resolves the handle back to its instance. Only `mount`
//! and `unmount` mutate the table. The table and its mutex initialise
//! lazily on first mount and live for the process lifetime.

use crate::engine::JournalInstance;
use crate::hooks::PowerCutPlan;
use crate::report::StoreReport;
use fj_block::FlashDevice;
use fj_error::{JrnlError, Result};
use fj_types::{JrnlConfig, JrnlHandle, SectorIndex};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Size of the instance table.
pub const MAX_HANDLES: usize = 8;

type Slots = [Option<Arc<JournalInstance>>; MAX_HANDLES];

fn slots() -> &'static Mutex<Slots> {
    static REGISTRY: OnceLock<Mutex<Slots>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(std::array::from_fn(|_| None)))
}

/// Validate a handle against the table: `-1` is the reserved invalid
/// value, anything outside the table is an argument error, an empty slot
/// is not found.
fn check_slot(table: &Slots, handle: JrnlHandle) -> Result<usize> {
    if handle == JrnlHandle::INVALID {
        return Err(JrnlError::InvalidState("invalid handle".to_owned()));
    }
    let index = handle
        .index()
        .filter(|index| *index < MAX_HANDLES)
        .ok_or_else(|| JrnlError::InvalidArgument(format!("handle {handle} out of range")))?;
    if table[index].is_none() {
        return Err(JrnlError::NotFound);
    }
    Ok(index)
}

/// Resolve a handle to its instance.
pub fn instance(handle: JrnlHandle) -> Result<Arc<JournalInstance>> {
    let table = slots().lock();
    let index = check_slot(&table, handle)?;
    table[index].as_ref().map(Arc::clone).ok_or(JrnlError::NotFound)
}

/// Mount a journal instance on `dev` and register it.
///
/// Runs the full mount sequence (master validation, optional recovery,
/// reset) before the slot is published.
pub fn mount(dev: Arc<dyn FlashDevice>, config: &JrnlConfig) -> Result<JrnlHandle> {
    let mut table = slots().lock();
    let free = table.iter().position(Option::is_none).ok_or_else(|| {
        JrnlError::NoMemory(format!("all {MAX_HANDLES} journal handles in use"))
    })?;

    let instance = JournalInstance::mount(dev, config)?;
    table[free] = Some(Arc::new(instance));

    let handle = JrnlHandle(free as i32);
    debug!(target: "fj::journal", %handle, "journal mounted");
    Ok(handle)
}

/// Unregister and drop the instance behind `handle`.
pub fn unmount(handle: JrnlHandle) -> Result<()> {
    let mut table = slots().lock();
    let index = check_slot(&table, handle)?;
    table[index] = None;
    debug!(target: "fj::journal", %handle, "journal unmounted");
    Ok(())
}

/// Open a transaction on `handle`.
pub fn transaction_begin(handle: JrnlHandle) -> Result<()> {
    instance(handle)?.begin()
}

/// Commit (`commit = true`) or cancel the open transaction on `handle`.
pub fn transaction_end(handle: JrnlHandle, commit: bool) -> Result<()> {
    instance(handle)?.end(commit)
}

/// Journaled (or direct, during format) write of whole sectors.
pub fn write(handle: JrnlHandle, target: SectorIndex, buf: &[u8]) -> Result<()> {
    instance(handle)?.write(target, buf)
}

/// Bounds-checked read of the file-system area.
pub fn read(handle: JrnlHandle, target: SectorIndex, buf: &mut [u8]) -> Result<()> {
    instance(handle)?.read(target, buf)
}

/// Toggle direct I/O around file-system format operations.
pub fn set_direct_io(handle: JrnlHandle, on: bool) -> Result<()> {
    instance(handle)?.set_direct_io(on)
}

/// Sector count available to the file system (store reservation excluded).
pub fn sector_count(handle: JrnlHandle) -> Result<u32> {
    Ok(instance(handle)?.sector_count())
}

/// Sector size of the underlying device.
pub fn sector_size(handle: JrnlHandle) -> Result<u32> {
    Ok(instance(handle)?.sector_size())
}

/// Finish or discard an interrupted transaction on demand, for mounts
/// configured to skip replay.
pub fn recover(handle: JrnlHandle) -> Result<()> {
    instance(handle)?.recover()
}

/// Identity of the device backing `handle`, for collaborators that manage
/// the underlying disk.
pub fn device(handle: JrnlHandle) -> Result<Arc<dyn FlashDevice>> {
    Ok(instance(handle)?.device())
}

/// Arm power-cut points on `handle` for the crash harness.
pub fn set_power_cuts(handle: JrnlHandle, plan: PowerCutPlan) -> Result<()> {
    instance(handle)?.set_power_cuts(plan);
    Ok(())
}

/// Decode the master and operation log of `handle` into a report.
pub fn report(handle: JrnlHandle) -> Result<StoreReport> {
    instance(handle)?.report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::registry_gate;
    use fj_block::MemFlashDevice;

    const SS: u32 = 512;

    fn config() -> JrnlConfig {
        JrnlConfig {
            store_size_sectors: 4,
            ..JrnlConfig::default()
        }
    }

    fn mount_one() -> JrnlHandle {
        let dev = MemFlashDevice::new(16 * u64::from(SS), SS).expect("device");
        mount(dev, &config()).expect("mount")
    }

    #[test]
    fn handle_validation_distinguishes_error_classes() {
        let _gate = registry_gate();
        assert!(matches!(
            transaction_begin(JrnlHandle::INVALID),
            Err(JrnlError::InvalidState(_))
        ));
        assert!(matches!(
            transaction_begin(JrnlHandle(MAX_HANDLES as i32)),
            Err(JrnlError::InvalidArgument(_))
        ));
        assert!(matches!(
            transaction_begin(JrnlHandle(-2)),
            Err(JrnlError::InvalidArgument(_))
        ));

        let handle = mount_one();
        unmount(handle).expect("unmount");
        assert!(matches!(
            transaction_begin(handle),
            Err(JrnlError::NotFound)
        ));
    }

    #[test]
    fn mount_reuses_the_lowest_free_slot() {
        let _gate = registry_gate();
        let first = mount_one();
        let second = mount_one();
        assert_ne!(first, second);

        unmount(first).expect("unmount first");
        let third = mount_one();
        assert_eq!(third, first);

        unmount(second).expect("unmount second");
        unmount(third).expect("unmount third");
    }

    #[test]
    fn registry_exhaustion_reports_no_memory() {
        let _gate = registry_gate();
        let handles: Vec<JrnlHandle> = (0..MAX_HANDLES).map(|_| mount_one()).collect();

        let dev = MemFlashDevice::new(16 * u64::from(SS), SS).expect("device");
        assert!(matches!(
            mount(dev, &config()),
            Err(JrnlError::NoMemory(_))
        ));

        for handle in handles {
            unmount(handle).expect("unmount");
        }
    }

    #[test]
    fn double_unmount_is_not_found() {
        let _gate = registry_gate();
        let handle = mount_one();
        unmount(handle).expect("first unmount");
        assert!(matches!(unmount(handle), Err(JrnlError::NotFound)));
    }

    #[test]
    fn device_returns_the_backing_flash() {
        let _gate = registry_gate();
        let dev = MemFlashDevice::new(16 * u64::from(SS), SS).expect("device");
        let handle = mount(dev.clone(), &config()).expect("mount");

        let got = device(handle).expect("device");
        let expected: Arc<dyn FlashDevice> = dev;
        assert!(Arc::ptr_eq(&expected, &got));

        unmount(handle).expect("unmount");
        assert!(matches!(device(handle), Err(JrnlError::NotFound)));
    }

    #[test]
    fn handle_api_round_trip() {
        let _gate = registry_gate();
        let dev = MemFlashDevice::new(64 * u64::from(SS), SS).expect("device");
        let handle = mount(
            dev.clone(),
            &JrnlConfig {
                store_size_sectors: 16,
                ..JrnlConfig::default()
            },
        )
        .expect("mount");

        assert_eq!(sector_count(handle).expect("sector count"), 48);
        assert_eq!(sector_size(handle).expect("sector size"), SS);

        let payload = vec![0x5C_u8; SS as usize];
        transaction_begin(handle).expect("begin");
        write(handle, SectorIndex(7), &payload).expect("write");
        transaction_end(handle, true).expect("commit");

        let mut back = vec![0_u8; SS as usize];
        read(handle, SectorIndex(7), &mut back).expect("read");
        assert_eq!(back, payload);

        unmount(handle).expect("unmount");
    }
}
