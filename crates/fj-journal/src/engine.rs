//! Transaction engine: the journal state machine.
//!
//! One instance per mounted volume. A per-instance mutex serialises all
//! transactional work, including the full commit replay; a transaction is
//! atomic from the caller's perspective. Every state change is persisted by
//! rewriting the master sector before any dependent action, which is what
//! makes the crash protocol work:
//!
//! - `begin` persists OPEN before returning;
//! - `end(commit)` persists COMMIT before the first target write;
//! - replay persists READY with a zero cursor only after the last target
//!   write.

use crate::crc::crc32_journal;
use crate::entry::OpHeader;
use crate::hooks::{CutPoint, PowerCutPlan};
use crate::io::DiskIo;
use crate::master::{MasterRecord, TransStatus};
use crate::report::{walk_operations, MasterReport, StoreReport};
use crate::store::JournalStore;
use fj_block::FlashDevice;
use fj_error::{JrnlError, Result};
use fj_types::{JrnlConfig, SectorIndex, StoreSector, JRNL_MAGIC, MIN_STORE_SECTORS};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct InstanceState {
    master: MasterRecord,
    cuts: PowerCutPlan,
}

/// A mounted journal instance.
pub struct JournalInstance {
    io: DiskIo,
    store: JournalStore,
    state: Mutex<InstanceState>,
}

impl std::fmt::Debug for JournalInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalInstance").finish_non_exhaustive()
    }
}

impl JournalInstance {
    /// Mount the journal on `dev`.
    ///
    /// Reads and validates an existing master unless the configuration asks
    /// for a fresh store, optionally runs recovery, and leaves the master
    /// reset for the following file-system mount/format phase: INIT when the
    /// store is fresh (direct writes expected), READY otherwise.
    pub fn mount(dev: Arc<dyn FlashDevice>, config: &JrnlConfig) -> Result<Self> {
        if config.store_size_sectors < MIN_STORE_SECTORS {
            return Err(JrnlError::InvalidArgument(format!(
                "store of {} sectors below minimum {MIN_STORE_SECTORS}",
                config.store_size_sectors
            )));
        }

        let io = DiskIo::new(dev)?;
        let geometry = io.geometry();
        if u32::try_from(geometry.volume_size()).is_err() {
            return Err(JrnlError::InvalidArgument(format!(
                "volume size {} exceeds the on-disk 32-bit field",
                geometry.volume_size()
            )));
        }
        let store = JournalStore::new(io.clone(), config.store_size_sectors)?;

        debug!(
            target: "fj::journal",
            volume_size = geometry.volume_size(),
            sector_size = geometry.sector_size(),
            store_offset = store.offset_sector().0,
            "mounting journal store"
        );

        let fresh = config.overwrite_existing || config.force_format;
        let mut deferred = false;
        let instance = Self {
            io,
            store: store.clone(),
            state: Mutex::new(InstanceState {
                master: MasterRecord {
                    magic: JRNL_MAGIC,
                    store_size_sectors: config.store_size_sectors,
                    store_offset_sector: store.offset_sector(),
                    next_free_sector: 0,
                    status: TransStatus::Ready,
                    volume: geometry,
                },
                cuts: PowerCutPlan::NONE,
            }),
        };

        if !fresh {
            let mut buf = vec![0_u8; geometry.sector_size() as usize];
            instance.store.read(instance.store.master_sector(), 1, &mut buf)?;
            match MasterRecord::decode_sector(&buf)? {
                None => {
                    debug!(target: "fj::journal", "no valid journal record found");
                }
                Some(found) => {
                    trace!(
                        target: "fj::journal",
                        status = %found.status,
                        next_free = found.next_free_sector,
                        "found journal record, verifying consistency"
                    );
                    if found.volume.volume_size() != geometry.volume_size()
                        || found.volume.sector_size() != geometry.sector_size()
                        || found.store_size_sectors != config.store_size_sectors
                    {
                        return Err(JrnlError::Inconsistent(format!(
                            "on-disk store (size={} sectors, volume={} bytes, sector={} bytes) \
                             does not match the mount configuration",
                            found.store_size_sectors,
                            found.volume.volume_size(),
                            found.volume.sector_size(),
                        )));
                    }
                    let mut state = instance.state.lock();
                    state.master = found;
                    if config.replay_after_mount {
                        instance.recover_locked(&mut state)?;
                    } else {
                        deferred =
                            matches!(found.status, TransStatus::Open | TransStatus::Commit);
                        debug!(target: "fj::journal", "journal configured to stay unreplayed");
                    }
                }
            }
        }

        if deferred {
            // An interrupted transaction survives the mount untouched;
            // transactional work stays blocked until `recover` runs.
            debug!(
                target: "fj::journal",
                "leaving interrupted transaction for on-demand recovery"
            );
        } else {
            let mut state = instance.state.lock();
            instance.reset_master_locked(&mut state, fresh)?;
        }

        Ok(instance)
    }

    /// Open a new transaction. Legal only from READY.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.master.status != TransStatus::Ready {
            return Err(JrnlError::InvalidState(format!(
                "cannot open a transaction while {}",
                state.master.status
            )));
        }
        debug_assert_eq!(state.master.next_free_sector, 0);
        state.master.status = TransStatus::Open;
        debug!(target: "fj::journal", "transaction open");
        self.persist_master_locked(&state)
    }

    /// Retire the current transaction: replay it to the target sectors
    /// (`commit = true`) or drop it (`commit = false`).
    pub fn end(&self, commit: bool) -> Result<()> {
        let mut state = self.state.lock();

        if !commit {
            return match state.master.status {
                TransStatus::Open => {
                    debug!(target: "fj::journal", "cancelling transaction");
                    self.reset_master_locked(&mut state, false)
                }
                TransStatus::Ready => Ok(()),
                other => Err(JrnlError::InvalidState(format!(
                    "cannot cancel a transaction while {other}"
                ))),
            };
        }

        self.cut(&state, CutPoint::SkipCommit)?;

        if state.master.status != TransStatus::Open {
            return Err(JrnlError::InvalidState(format!(
                "cannot commit a transaction while {}",
                state.master.status
            )));
        }

        debug!(
            target: "fj::journal",
            buffered_sectors = state.master.next_free_sector,
            "committing transaction"
        );
        state.master.status = TransStatus::Commit;
        self.persist_master_locked(&state)?;
        self.cut(&state, CutPoint::AfterCommitMark)?;

        self.replay_locked(&mut state)
    }

    /// Intercept one block write.
    ///
    /// While a transaction is OPEN the write is appended to the store; in
    /// the INIT state it passes straight through to the device (file-system
    /// format/mount path). `buf` must hold a whole number of sectors.
    pub fn write(&self, target: SectorIndex, buf: &[u8]) -> Result<()> {
        let count = self.sector_count_of(buf.len())?;
        self.check_fs_range(target, count, "write")?;

        let mut state = self.state.lock();
        match state.master.status {
            TransStatus::Init => {
                trace!(target: "fj::journal", sector = target.0, count, "direct write");
                self.io.erase_sectors(target, count)?;
                self.io.write_sectors(target, count, buf)
            }
            TransStatus::Open => self.append_locked(&mut state, target, count, buf),
            other => Err(JrnlError::InvalidState(format!(
                "cannot write while {other}"
            ))),
        }
    }

    /// Bounds-checked passthrough read of the file-system area. Never
    /// consults the store: readers see the last successfully replayed
    /// state.
    pub fn read(&self, target: SectorIndex, buf: &mut [u8]) -> Result<()> {
        let count = self.sector_count_of(buf.len())?;
        self.check_fs_range(target, count, "read")?;
        self.io.read_sectors(target, count, buf)
    }

    /// Switch between direct and journaled I/O. Legal only outside a
    /// transaction; used to bracket file-system format operations.
    pub fn set_direct_io(&self, on: bool) -> Result<()> {
        let mut state = self.state.lock();
        match state.master.status {
            TransStatus::Init | TransStatus::Ready => {
                state.master.status = if on {
                    TransStatus::Init
                } else {
                    TransStatus::Ready
                };
                debug!(target: "fj::journal", direct = on, "switching I/O mode");
                self.persist_master_locked(&state)
            }
            other => Err(JrnlError::InvalidState(format!(
                "cannot switch I/O mode while {other}"
            ))),
        }
    }

    /// Finish or discard an interrupted transaction, as the mount-time
    /// recovery does: READY is a no-op, OPEN is discarded, COMMIT is
    /// replayed to completion. A mount with `replay_after_mount` disabled
    /// leaves any interrupted transaction in place for this call.
    pub fn recover(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.recover_locked(&mut state)
    }

    /// Sector count available to the file system (store excluded).
    #[must_use]
    pub fn sector_count(&self) -> u32 {
        self.store.offset_sector().0
    }

    /// Sector size of the underlying device.
    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.io.geometry().sector_size()
    }

    /// Identity of the underlying device, for collaborators that unmount
    /// or inspect it.
    #[must_use]
    pub fn device(&self) -> Arc<dyn FlashDevice> {
        self.io.device()
    }

    /// Current in-memory transaction status.
    #[must_use]
    pub fn status(&self) -> TransStatus {
        self.state.lock().master.status
    }

    /// Arm power-cut points for the crash harness.
    pub fn set_power_cuts(&self, plan: PowerCutPlan) {
        self.state.lock().cuts = plan;
    }

    /// Decode the master and every buffered operation header into a
    /// serialisable report.
    pub fn report(&self) -> Result<StoreReport> {
        let state = self.state.lock();
        Ok(StoreReport {
            master: MasterReport::from_record(&state.master),
            operations: walk_operations(&self.store, state.master.next_free_sector)?,
        })
    }

    fn sector_count_of(&self, len: usize) -> Result<u32> {
        let sector_size = self.io.geometry().sector_size() as usize;
        if len == 0 || len % sector_size != 0 {
            return Err(JrnlError::InvalidArgument(format!(
                "buffer of {len} bytes is not a whole number of {sector_size}-byte sectors"
            )));
        }
        u32::try_from(len / sector_size)
            .map_err(|_| JrnlError::InvalidArgument(format!("buffer of {len} bytes too large")))
    }

    /// The file-system area ends where the store begins; neither reads nor
    /// writes may cross into the store.
    fn check_fs_range(&self, target: SectorIndex, count: u32, what: &str) -> Result<()> {
        let end = target.checked_add(count).ok_or_else(|| {
            JrnlError::InvalidArgument(format!("{what} range overflow at sector {target}"))
        })?;
        if end.0 > self.store.offset_sector().0 {
            return Err(JrnlError::InvalidArgument(format!(
                "{what} of {count} sectors at {target} crosses into the journal store \
                 (file-system area ends at sector {})",
                self.store.offset_sector()
            )));
        }
        Ok(())
    }

    /// Append one operation entry: header sector plus `count` data sectors.
    ///
    /// The erase covers the whole entry up front and the master cursor is
    /// persisted last, so a crash mid-append leaves the partial entry
    /// invisible to replay.
    fn append_locked(
        &self,
        state: &mut InstanceState,
        target: SectorIndex,
        count: u32,
        buf: &[u8],
    ) -> Result<()> {
        let entry_sectors = 1 + u64::from(count);
        // Strict check: the sector before the master stays unused, as the
        // on-disk format has always had it.
        if u64::from(state.master.next_free_sector) + entry_sectors
            >= u64::from(self.store.size_sectors() - 1)
        {
            return Err(JrnlError::NoMemory(format!(
                "operation of {entry_sectors} sectors does not fit the store \
                 (next_free={}, store_size={})",
                state.master.next_free_sector,
                self.store.size_sectors()
            )));
        }

        let header = OpHeader {
            target_sector: target,
            sector_count: count,
            crc32_data: crc32_journal(buf),
        };
        let mut header_buf = vec![0_u8; self.io.geometry().sector_size() as usize];
        header.encode_sector(&mut header_buf)?;

        let at = StoreSector(state.master.next_free_sector);
        trace!(
            target: "fj::journal",
            store_sector = at.0,
            sector = target.0,
            count,
            "journaling write"
        );

        self.store.erase(at, 1 + count)?;
        self.store.write_raw(at, 1, &header_buf)?;
        self.store.write_raw(StoreSector(at.0 + 1), count, buf)?;

        state.master.next_free_sector += 1 + count;
        self.persist_master_locked(state)
    }

    /// Apply every buffered entry to its target range, oldest first, then
    /// reset the master. Idempotent: re-running after an interruption
    /// re-applies the same bytes to the same addresses.
    fn replay_locked(&self, state: &mut InstanceState) -> Result<()> {
        let sector_size = self.io.geometry().sector_size() as usize;
        let mut header_buf = vec![0_u8; sector_size];
        let mut cursor = StoreSector(0);

        while cursor.0 < state.master.next_free_sector {
            self.store.read(cursor, 1, &mut header_buf)?;
            let (header, stored_crc) = OpHeader::decode_sector(&header_buf)?;
            let computed = header.header_crc();
            if computed != stored_crc {
                return Err(JrnlError::InvalidChecksum {
                    sector: cursor.0,
                    detail: format!(
                        "operation header: computed {computed:#010x}, stored {stored_crc:#010x}"
                    ),
                });
            }

            let count = header.sector_count;
            let mut data = vec![0_u8; count as usize * sector_size];
            self.store.read(StoreSector(cursor.0 + 1), count, &mut data)?;
            let data_crc = crc32_journal(&data);
            if data_crc != header.crc32_data {
                return Err(JrnlError::InvalidChecksum {
                    sector: cursor.0 + 1,
                    detail: format!(
                        "operation payload: computed {data_crc:#010x}, stored {:#010x}",
                        header.crc32_data
                    ),
                });
            }

            self.io.erase_sectors(header.target_sector, count)?;
            self.cut(state, CutPoint::AfterReplayErase)?;
            self.io.write_sectors(header.target_sector, count, &data)?;
            self.cut(state, CutPoint::AfterReplayWrite)?;

            trace!(
                target: "fj::journal",
                sector = header.target_sector.0,
                count,
                "replayed operation"
            );
            cursor = StoreSector(cursor.0 + header.entry_sectors());
        }

        self.cut(state, CutPoint::BeforeMasterReset)?;
        self.reset_master_locked(state, false)
    }

    /// Mount-time recovery dispatch on the persisted status.
    fn recover_locked(&self, state: &mut InstanceState) -> Result<()> {
        match state.master.status {
            TransStatus::Init => Err(JrnlError::InvalidState(
                "recovery attempted on an uninitialized journal store".to_owned(),
            )),
            TransStatus::Ready => {
                debug!(target: "fj::journal", "journal log empty, nothing to recover");
                Ok(())
            }
            TransStatus::Open => {
                warn!(
                    target: "fj::journal",
                    buffered_sectors = state.master.next_free_sector,
                    "found uncommitted transaction, discarding"
                );
                self.reset_master_locked(state, false)
            }
            TransStatus::Commit => {
                debug!(target: "fj::journal", "found interrupted commit, replaying");
                self.replay_locked(state)
            }
        }
    }

    /// Reset the master to its defaults (magic stamped, cursor zeroed,
    /// READY or INIT) and persist it.
    fn reset_master_locked(&self, state: &mut InstanceState, fs_direct: bool) -> Result<()> {
        state.master.magic = JRNL_MAGIC;
        state.master.next_free_sector = 0;
        state.master.status = if fs_direct {
            TransStatus::Init
        } else {
            TransStatus::Ready
        };
        self.persist_master_locked(state)
    }

    /// Rewrite the master sector from the in-memory record.
    fn persist_master_locked(&self, state: &InstanceState) -> Result<()> {
        debug!(
            target: "fj::journal",
            status = %state.master.status,
            next_free = state.master.next_free_sector,
            "updating master record"
        );
        let mut buf = vec![0_u8; self.io.geometry().sector_size() as usize];
        state.master.encode_sector(&mut buf)?;
        self.store.write(self.store.master_sector(), 1, &buf)
    }

    /// Power-off emulation: fire only when journaled data exists, so the
    /// interruption is observable.
    fn cut(&self, state: &InstanceState, point: CutPoint) -> Result<()> {
        if state.master.next_free_sector > 0 && state.cuts.is_armed(point) {
            debug!(target: "fj::journal", point = point.name(), "injected power cut");
            return Err(JrnlError::PowerCut { point: point.name() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fj_block::{MemFlashDevice, ERASE_FILL};
    use std::sync::Arc;

    const SS: u32 = 512;
    const TOTAL_SECTORS: u64 = 64;

    fn device() -> Arc<MemFlashDevice> {
        MemFlashDevice::new(TOTAL_SECTORS * u64::from(SS), SS).expect("device")
    }

    fn config() -> JrnlConfig {
        JrnlConfig {
            store_size_sectors: 16,
            ..JrnlConfig::default()
        }
    }

    fn mounted(dev: &Arc<MemFlashDevice>) -> JournalInstance {
        let jrnl = JournalInstance::mount(dev.clone(), &config()).expect("mount");
        // Fresh device: no master yet, so the mount lands READY.
        assert_eq!(jrnl.status(), TransStatus::Ready);
        jrnl
    }

    fn payload(fill: u8, sectors: u32) -> Vec<u8> {
        vec![fill; sectors as usize * SS as usize]
    }

    #[test]
    fn fresh_format_mount_starts_direct() {
        let dev = device();
        let jrnl = JournalInstance::mount(
            dev.clone(),
            &JrnlConfig {
                store_size_sectors: 16,
                force_format: true,
                ..JrnlConfig::default()
            },
        )
        .expect("mount");
        assert_eq!(jrnl.status(), TransStatus::Init);
        assert_eq!(jrnl.sector_count(), 48);
        assert_eq!(jrnl.sector_size(), SS);

        // Direct writes pass straight through.
        jrnl.write(SectorIndex(5), &payload(0x11, 1)).expect("direct write");
        assert_eq!(dev.sector_snapshot(5).expect("snapshot"), payload(0x11, 1));

        jrnl.set_direct_io(false).expect("leave direct mode");
        assert_eq!(jrnl.status(), TransStatus::Ready);
    }

    #[test]
    fn mount_rejects_undersized_store() {
        let err = JournalInstance::mount(
            device(),
            &JrnlConfig {
                store_size_sectors: 2,
                ..JrnlConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, JrnlError::InvalidArgument(_)));
    }

    #[test]
    fn commit_applies_buffered_writes() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0xAB, 1)).expect("write");

        // Invisible until commit: the target still reads erased.
        assert!(dev
            .sector_snapshot(20)
            .expect("snapshot")
            .iter()
            .all(|b| *b == ERASE_FILL));

        jrnl.end(true).expect("commit");
        assert_eq!(jrnl.status(), TransStatus::Ready);
        assert_eq!(dev.sector_snapshot(20).expect("snapshot"), payload(0xAB, 1));
    }

    #[test]
    fn commit_preserves_write_order() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0x01, 1)).expect("first");
        jrnl.write(SectorIndex(20), &payload(0x02, 1)).expect("second");
        jrnl.end(true).expect("commit");

        // Last write wins: FIFO replay.
        assert_eq!(dev.sector_snapshot(20).expect("snapshot"), payload(0x02, 1));
    }

    #[test]
    fn cancel_leaves_targets_untouched() {
        let dev = device();
        let jrnl = mounted(&dev);

        let before = dev.sector_snapshot(20).expect("snapshot");
        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0xCD, 1)).expect("write");
        jrnl.end(false).expect("cancel");

        assert_eq!(jrnl.status(), TransStatus::Ready);
        assert_eq!(dev.sector_snapshot(20).expect("snapshot"), before);
        let report = jrnl.report().expect("report");
        assert_eq!(report.master.next_free_sector, 0);
    }

    #[test]
    fn begin_requires_ready() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");
        assert!(matches!(jrnl.begin(), Err(JrnlError::InvalidState(_))));
    }

    #[test]
    fn write_outside_transaction_is_rejected() {
        let dev = device();
        let jrnl = mounted(&dev);
        assert!(matches!(
            jrnl.write(SectorIndex(20), &payload(0, 1)),
            Err(JrnlError::InvalidState(_))
        ));
    }

    #[test]
    fn commit_without_open_transaction_is_rejected() {
        let dev = device();
        let jrnl = mounted(&dev);
        assert!(matches!(jrnl.end(true), Err(JrnlError::InvalidState(_))));
        // Cancel outside a transaction is a harmless no-op.
        jrnl.end(false).expect("cancel on READY");
    }

    #[test]
    fn unaligned_write_buffer_is_rejected() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");
        assert!(matches!(
            jrnl.write(SectorIndex(20), &[0_u8; 100]),
            Err(JrnlError::InvalidArgument(_))
        ));
        assert!(matches!(
            jrnl.write(SectorIndex(20), &[]),
            Err(JrnlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn store_capacity_check_is_strict() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");

        // Store of 16: master takes one sector, one more stays unused, so a
        // 14-sector entry (1 header + 13 data) is the largest that fits.
        jrnl.write(SectorIndex(0), &payload(0x55, 13)).expect("largest fit");
        let err = jrnl.write(SectorIndex(13), &payload(0x66, 1)).unwrap_err();
        assert!(matches!(err, JrnlError::NoMemory(_)));

        // The failed write leaves the transaction OPEN and consistent.
        assert_eq!(jrnl.status(), TransStatus::Open);
        let report = jrnl.report().expect("report");
        assert_eq!(report.master.next_free_sector, 14);
        assert_eq!(report.operations.len(), 1);
    }

    #[test]
    fn oversized_single_write_is_rejected() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");
        assert!(matches!(
            jrnl.write(SectorIndex(0), &payload(0x77, 14)),
            Err(JrnlError::NoMemory(_))
        ));
    }

    #[test]
    fn reads_stop_at_the_store_boundary() {
        let dev = device();
        let jrnl = mounted(&dev);
        let mut buf = payload(0, 1);

        // File-system area is sectors 0..48.
        jrnl.read(SectorIndex(47), &mut buf).expect("last fs sector");
        assert!(matches!(
            jrnl.read(SectorIndex(48), &mut buf),
            Err(JrnlError::InvalidArgument(_))
        ));
        let mut two = payload(0, 2);
        assert!(matches!(
            jrnl.read(SectorIndex(47), &mut two),
            Err(JrnlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn writes_cannot_cross_into_the_store() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");
        assert!(matches!(
            jrnl.write(SectorIndex(48), &payload(0, 1)),
            Err(JrnlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn begin_persists_open_to_disk() {
        let dev = device();
        let jrnl = mounted(&dev);
        jrnl.begin().expect("begin");

        let raw = dev.sector_snapshot(63).expect("master sector");
        let master = MasterRecord::decode_sector(&raw)
            .expect("decode")
            .expect("present");
        assert_eq!(master.status, TransStatus::Open);
        assert_eq!(master.next_free_sector, 0);
    }

    #[test]
    fn remount_with_mismatched_store_size_is_inconsistent() {
        let dev = device();
        let jrnl = mounted(&dev);
        drop(jrnl);

        let err = JournalInstance::mount(
            dev,
            &JrnlConfig {
                store_size_sectors: 8,
                ..JrnlConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, JrnlError::Inconsistent(_)));
    }

    #[test]
    fn overwrite_existing_discards_mismatched_store() {
        let dev = device();
        drop(mounted(&dev));

        let jrnl = JournalInstance::mount(
            dev,
            &JrnlConfig {
                store_size_sectors: 8,
                overwrite_existing: true,
                ..JrnlConfig::default()
            },
        )
        .expect("destructive remount");
        assert_eq!(jrnl.status(), TransStatus::Init);
    }

    #[test]
    fn replay_rejects_corrupted_payload() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0xEE, 1)).expect("write");

        // Flip one byte of the journaled payload (store data sector 1,
        // absolute sector 49).
        let mut data = dev.sector_snapshot(49).expect("snapshot");
        data[0] ^= 0xFF;
        dev.write(
            fj_types::ByteOffset(49 * u64::from(SS)),
            &data,
        )
        .expect("corrupt");

        let err = jrnl.end(true).unwrap_err();
        assert!(matches!(err, JrnlError::InvalidChecksum { .. }));
    }

    #[test]
    fn interrupted_commit_is_finished_on_remount() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.set_power_cuts(PowerCutPlan::armed(&[CutPoint::AfterCommitMark]));
        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0x42, 2)).expect("write");
        let err = jrnl.end(true).unwrap_err();
        assert!(matches!(err, JrnlError::PowerCut { .. }));
        drop(jrnl);

        // The COMMIT mark reached disk, so the remount replays.
        let jrnl = JournalInstance::mount(dev.clone(), &config()).expect("remount");
        assert_eq!(jrnl.status(), TransStatus::Ready);
        assert_eq!(dev.sector_snapshot(20).expect("snapshot"), payload(0x42, 1));
        assert_eq!(dev.sector_snapshot(21).expect("snapshot"), payload(0x42, 1));
    }

    #[test]
    fn deferred_mount_preserves_interrupted_commit_for_recovery() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.set_power_cuts(PowerCutPlan::armed(&[CutPoint::AfterCommitMark]));
        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0x42, 1)).expect("write");
        assert!(matches!(jrnl.end(true), Err(JrnlError::PowerCut { .. })));
        drop(jrnl);

        let jrnl = JournalInstance::mount(
            dev.clone(),
            &JrnlConfig {
                store_size_sectors: 16,
                replay_after_mount: false,
                ..JrnlConfig::default()
            },
        )
        .expect("deferred mount");

        // The interrupted transaction survived the mount untouched and
        // blocks new transactions until recovery runs.
        assert_eq!(jrnl.status(), TransStatus::Commit);
        assert!(matches!(jrnl.begin(), Err(JrnlError::InvalidState(_))));
        assert!(dev
            .sector_snapshot(20)
            .expect("snapshot")
            .iter()
            .all(|b| *b == ERASE_FILL));

        jrnl.recover().expect("on-demand recovery");
        assert_eq!(jrnl.status(), TransStatus::Ready);
        assert_eq!(dev.sector_snapshot(20).expect("snapshot"), payload(0x42, 1));

        // Recovered for good: transactions open again.
        jrnl.begin().expect("begin after recovery");
        jrnl.end(false).expect("cancel");
    }

    #[test]
    fn deferred_mount_discards_open_transaction_on_demand() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.set_power_cuts(PowerCutPlan::armed(&[CutPoint::SkipCommit]));
        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(20), &payload(0x77, 1)).expect("write");
        assert!(matches!(jrnl.end(true), Err(JrnlError::PowerCut { .. })));
        drop(jrnl);

        let jrnl = JournalInstance::mount(
            dev.clone(),
            &JrnlConfig {
                store_size_sectors: 16,
                replay_after_mount: false,
                ..JrnlConfig::default()
            },
        )
        .expect("deferred mount");
        assert_eq!(jrnl.status(), TransStatus::Open);

        jrnl.recover().expect("on-demand recovery");
        assert_eq!(jrnl.status(), TransStatus::Ready);
        // The uncommitted transaction is discarded, not applied.
        assert!(dev
            .sector_snapshot(20)
            .expect("snapshot")
            .iter()
            .all(|b| *b == ERASE_FILL));
    }

    #[test]
    fn report_lists_buffered_operations() {
        let dev = device();
        let jrnl = mounted(&dev);

        jrnl.begin().expect("begin");
        jrnl.write(SectorIndex(10), &payload(0x10, 1)).expect("write");
        jrnl.write(SectorIndex(30), &payload(0x30, 2)).expect("write");

        let report = jrnl.report().expect("report");
        assert_eq!(report.master.status, "Open");
        assert_eq!(report.master.next_free_sector, 5);
        assert_eq!(report.operations.len(), 2);
        assert_eq!(report.operations[0].target_sector, 10);
        assert_eq!(report.operations[0].sector_count, 1);
        assert!(report.operations[0].header_crc_ok);
        assert_eq!(report.operations[1].target_sector, 30);
        assert_eq!(report.operations[1].sector_count, 2);
    }
}
