//! The volume engine: mount/unmount/format state machine, the index write
//! pipeline, EOD recovery and the read-only policy derivation. Ties
//! together [`crate::device::TapeBackend`], [`crate::index::Index`],
//! [`crate::label::Label`] and [`crate::journal::Journal`] under the fixed
//! lock hierarchy (volume lock, then index `dirty_lock`, then dentry
//! locks, then device locks).

pub mod recovery;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::dentry::Partition;
use crate::device::{CoherencyRecord, LoadOption, TapeBackend, MAM_COHERENCY_ATTRIBUTE_ID};
use crate::error::{Result, RustLtfsError};
use crate::index::{self, BlockAddress, Index, VolumeLockState};
use crate::journal::Journal;
use crate::label::{Barcode, Label, PartitionIdMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    LabelsRead,
    CoherencyChecked,
    IndexLoaded,
    Mounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalState {
    Idle,
    Running,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub force_full: bool,
    pub deep_recovery: bool,
    pub recover_extra: bool,
    pub recover_symlink: bool,
    pub target_gen: u64,
    pub readonly: bool,
}

/// A tape partition's effective write-perm classification, derived from
/// the device's latch bits plus the MAM-sourced volume lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveReadOnly {
    Writable,
    WriteProtect,
    WriteError,
}

pub struct Volume {
    device: Mutex<Box<dyn TapeBackend>>,
    label: RwLock<Option<Label>>,
    index: RwLock<Option<Arc<Index>>>,
    partitions: PartitionIdMap,
    state: Mutex<MountState>,
    reval_state: Mutex<RevalState>,
    reval_cond: Condvar,
    coherency: Mutex<[Option<CoherencyRecord>; 2]>,
    journal: Mutex<Journal>,
    rollback_mount: AtomicBool,
    force_read_only: AtomicBool,
    volume_change_ref: Mutex<u32>,
    session_uuid: String,
}

impl Volume {
    pub fn new(device: Box<dyn TapeBackend>, partitions: PartitionIdMap) -> Arc<Self> {
        Arc::new(Self {
            device: Mutex::new(device),
            label: RwLock::new(None),
            index: RwLock::new(None),
            partitions,
            state: Mutex::new(MountState::Unmounted),
            reval_state: Mutex::new(RevalState::Idle),
            reval_cond: Condvar::new(),
            coherency: Mutex::new([None, None]),
            journal: Mutex::new(Journal::new()),
            rollback_mount: AtomicBool::new(false),
            force_read_only: AtomicBool::new(false),
            volume_change_ref: Mutex::new(0),
            session_uuid: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    pub fn is_rollback_mount(&self) -> bool {
        self.rollback_mount.load(Ordering::SeqCst)
    }

    pub fn is_force_read_only(&self) -> bool {
        self.force_read_only.load(Ordering::SeqCst)
    }

    pub fn index(&self) -> Option<Arc<Index>> {
        self.index.read().clone()
    }

    pub fn journal(&self) -> &Mutex<Journal> {
        &self.journal
    }

    fn wait_for_revalidation(&self) {
        let mut state = self.reval_state.lock();
        while *state == RevalState::Running {
            self.reval_cond.wait(&mut state);
        }
    }

    fn fence_for_revalidation(&self) {
        *self.reval_state.lock() = RevalState::Running;
    }

    fn unfence(&self, failed: bool) {
        let mut state = self.reval_state.lock();
        *state = if failed { RevalState::Failed } else { RevalState::Idle };
        self.reval_cond.notify_all();
    }

    /// Step 5 of format (§4.4.5): generate a new UUID/label, write it to
    /// both partitions, then write an initial empty index to DP then IP.
    pub fn format(
        &self,
        barcode: Barcode,
        block_size: u32,
        compression: bool,
        worm: bool,
        creator: &str,
        now: &str,
    ) -> Result<()> {
        self.wait_for_revalidation();
        let mut device = self.device.lock();

        for &(num, _) in &[
            (self.partitions.dp_num, self.partitions.dp_id),
            (self.partitions.ip_num, self.partitions.ip_id),
        ] {
            let pos = device.position(num)?;
            if pos.block_number != 0 {
                return Err(RustLtfsError::Formatted);
            }
            if worm && device.has_eod(num).unwrap_or(false) {
                return Err(RustLtfsError::WormRollback);
            }
            if device
                .write_protect_flags(num)
                .intersects(crate::device::WriteProtectFlags::PHYSICAL | crate::device::WriteProtectFlags::LOGICAL)
            {
                return Err(RustLtfsError::WriteProtect);
            }
        }

        let volume_uuid = uuid::Uuid::new_v4().to_string();
        let label = Label::new(
            volume_uuid.clone(),
            creator.to_string(),
            now.to_string(),
            block_size,
            compression,
            barcode,
            self.partitions,
        )?;

        for &num in &[self.partitions.dp_num, self.partitions.ip_num] {
            device.erase_partition(num)?;
            device.write_block(num, &label.ansi_bytes())?;
            device.write_filemark(num, 1, true)?;
            device.write_block(num, label.to_xml()?.as_bytes())?;
            device.write_filemark(num, 1, true)?;
        }
        drop(device);

        *self.label.write() = Some(label);
        let index = Index::new_formatted(volume_uuid, creator.to_string(), now);
        *self.index.write() = Some(index.clone());

        self.write_index_locked(Partition::DataPartition, "format", now)?;
        self.write_index_locked(Partition::IndexPartition, "format", now)?;

        *self.state.lock() = MountState::Unmounted;
        Ok(())
    }

    fn partition_num(&self, partition: Partition) -> u8 {
        match partition {
            Partition::DataPartition => self.partitions.dp_num,
            Partition::IndexPartition => self.partitions.ip_num,
        }
    }

    /// The index-write pipeline (§4.4.2), steps 2-12; step 1 (recursive DP
    /// write before a stale IP write) is handled by the caller via
    /// [`Self::write_index`].
    fn write_index_locked(&self, partition: Partition, reason: &str, now: &str) -> Result<()> {
        // §4.4.1 step 7 / S5: a rollback mount forces the volume read-only;
        // no write, including a later user-driven index write, may proceed
        // or re-dirty the index once that latch is set.
        if self.force_read_only.load(Ordering::SeqCst) {
            return Err(RustLtfsError::WriteProtect);
        }
        let index = self
            .index
            .read()
            .clone()
            .ok_or(RustLtfsError::NoIndex)?;
        let num = self.partition_num(partition);
        let mut device = self.device.lock();

        let was_dirty = index.is_dirty();
        let saved_generation = index.generation();
        let saved_self = *index.self_pointer.lock();
        let saved_back = *index.previous_generation_pointer.lock();

        let write_perm_recovery = reason == "writeperm";

        let run = || -> Result<()> {
            if was_dirty {
                index.advance_generation();
            }

            // §4.4.2 step 3: a write-perm-recovery write clears the latch
            // and re-derives the append point from the device's actual EOD
            // rather than the (possibly stale) cached append position, so
            // the write lands exactly at end-of-data.
            let append = if write_perm_recovery {
                device.set_write_error(num, false);
                device.seek_eod(num)?
            } else {
                device.append_position(num)
            };
            device.seek(num, append)?;

            if let Some(cur_self) = saved_self {
                if cur_self.partition == Partition::DataPartition {
                    *index.previous_generation_pointer.lock() = Some(cur_self);
                }
            }

            // The backend writes at its current block and only then
            // advances, so the self-pointer is that block, not the one
            // after it.
            let pos = device.position(num)?;
            *index.self_pointer.lock() = Some(BlockAddress {
                partition,
                block: pos.block_number,
            });

            let xml = index::xml::serialize(&index)?;
            device.write_block(num, xml.as_bytes())?;
            let immediate = reason == "format";
            device.write_filemark(num, 1, immediate)?;

            // §6 "Trailing EOD": the written index is the new end-of-data,
            // so stamp the marker right after the terminating filemark
            // before any partition-specific append-position rebasing below.
            let new_append = device.append_position(num);
            device.reconstruct_eod_at(num, new_append)?;

            if matches!(partition, Partition::IndexPartition) && !device.is_worm() {
                device.set_append_position(num, new_append.saturating_sub(1));
            }

            let mut coherency = self.coherency.lock();
            let slot = if partition == Partition::DataPartition { 0 } else { 1 };
            let vcr = {
                let mut v = self.volume_change_ref.lock();
                *v += 1;
                *v
            };
            let record = CoherencyRecord {
                generation: index.generation(),
                volume_change_ref: vcr,
                partition: num,
                block: index.self_pointer.lock().map(|p| p.block).unwrap_or(0),
                volume_uuid: index.volume_uuid.clone(),
            };
            let _ = device.write_mam_attribute(
                num,
                crate::device::MamAttribute {
                    attribute_id: MAM_COHERENCY_ATTRIBUTE_ID,
                    format: crate::device::MamAttributeFormat::Binary,
                    data: record.encode(),
                },
            );
            coherency[slot] = Some(record);

            // The write-perm condition is a standing drive state, not
            // cleared by one successful write, so it's reasserted once the
            // recovery write has landed.
            if write_perm_recovery {
                device.set_write_error(num, true);
            }
            Ok(())
        };

        match run() {
            Ok(()) => {
                index.unset_index_dirty(true);
                *index.mod_time.lock() = now.to_string();
                Ok(())
            }
            Err(e) if e.is_downgradable_on_index_write() => {
                tracing::warn!(error = %e, "index write downgraded to success");
                index.unset_index_dirty(true);
                Ok(())
            }
            Err(e) => {
                index.set_generation(saved_generation);
                *index.self_pointer.lock() = saved_self;
                *index.previous_generation_pointer.lock() = saved_back;
                if e.needs_revalidation() {
                    self.unfence(true);
                }
                Err(e)
            }
        }
    }

    /// `write_index(partition, reason)`: writes DP first when IP is stale,
    /// per step 1 of §4.4.2.
    pub fn write_index(&self, partition: Partition, reason: &str, now: &str) -> Result<()> {
        self.wait_for_revalidation();
        if partition == Partition::IndexPartition {
            self.write_index_locked(Partition::DataPartition, reason, now)?;
        }
        self.write_index_locked(partition, reason, now)
    }

    /// Mount algorithm (§4.4.1). A minimal, test-backend-oriented rendition:
    /// labels are compared, the newer-generation index is chosen from the
    /// cached coherency records, and the tree is rebuilt from its XML.
    pub fn mount(&self, opts: MountOptions) -> Result<()> {
        self.wait_for_revalidation();
        *self.state.lock() = MountState::Unmounted;

        let mut device = self.device.lock();
        device.load(LoadOption::LoadThreaded)?;
        device.seek(self.partitions.dp_num, 0)?;
        device.seek(self.partitions.ip_num, 0)?;

        let dp_cap = device.capacity_bytes(self.partitions.dp_num);
        let ip_cap = device.capacity_bytes(self.partitions.ip_num);
        if dp_cap == 0 || ip_cap == 0 {
            return Err(RustLtfsError::NotPartitioned);
        }

        let dp_label = self.read_label(&mut *device, self.partitions.dp_num)?;
        let ip_label = self.read_label(&mut *device, self.partitions.ip_num)?;
        if dp_label.volume_uuid != ip_label.volume_uuid {
            return Err(RustLtfsError::LabelMismatch(dp_label.volume_uuid));
        }
        *self.state.lock() = MountState::LabelsRead;

        // §4.4.1 step 3: a coherency record whose UUID doesn't match the
        // label is treated as invalid and zeroed, forcing the full-medium
        // fallback below to pick the newer partition by EOD instead.
        let dp_coherency = device
            .read_mam_attribute(self.partitions.dp_num, MAM_COHERENCY_ATTRIBUTE_ID)?
            .and_then(|a| CoherencyRecord::decode(&a.data))
            .filter(|c| c.volume_uuid == dp_label.volume_uuid);
        let ip_coherency = device
            .read_mam_attribute(self.partitions.ip_num, MAM_COHERENCY_ATTRIBUTE_ID)?
            .and_then(|a| CoherencyRecord::decode(&a.data))
            .filter(|c| c.volume_uuid == ip_label.volume_uuid);
        *self.coherency.lock() = [dp_coherency.clone(), ip_coherency.clone()];
        *self.state.lock() = MountState::CoherencyChecked;

        let (newer_partition, newer_num, newer_block) = match (dp_coherency, ip_coherency) {
            (Some(dp), Some(ip)) if ip.generation >= dp.generation => {
                (Partition::IndexPartition, self.partitions.ip_num, Some(ip.block))
            }
            (Some(dp), _) => (Partition::DataPartition, self.partitions.dp_num, Some(dp.block)),
            (None, Some(ip)) => (Partition::IndexPartition, self.partitions.ip_num, Some(ip.block)),
            (None, None) => {
                // No usable coherency record: fall back to locating the
                // last index by EOD. `seek_eod` lands one block past the
                // last record; the record layout writes the index itself
                // then a single terminating filemark, so the index sits two
                // blocks back from EOD, not one (one back is the filemark).
                let block = device.seek_eod(self.partitions.dp_num)?;
                (Partition::DataPartition, self.partitions.dp_num, Some(block.saturating_sub(2)))
            }
        };
        let _ = opts.force_full;

        // Seek to the coherency-recorded block rather than trusting
        // whatever position label-reading left the head at.
        if let Some(block) = newer_block {
            device.seek(newer_num, block)?;
        }
        let mut buf = Vec::new();
        device.read_block(newer_num, &mut buf)?;
        let xml = String::from_utf8(buf)
            .map_err(|e| RustLtfsError::IndexInvalid(e.to_string()))?;
        let index = index::xml::deserialize(&xml, false)?;

        if opts.target_gen != 0 && index.generation() != opts.target_gen {
            return self.rollback_mount(&mut device, &index, opts.target_gen);
        }

        let append = device.position(self.partitions.ip_num)?.block_number;
        device.set_append_position(self.partitions.ip_num, append.saturating_sub(1));

        if index.highest_file_uid() == 0 {
            tracing::warn!("UID counter exhausted on mount");
        }

        drop(device);
        *self.index.write() = Some(index);
        self.journal.lock().clear();
        *self.label.write() = Some(dp_label);
        self.force_read_only.store(opts.readonly, Ordering::SeqCst);
        *self.state.lock() = MountState::IndexLoaded;
        *self.state.lock() = MountState::Mounted;
        let _ = newer_partition;
        Ok(())
    }

    /// Walk backward from the just-loaded `start` index via its own
    /// back-pointer chain (not the device's current position, which may
    /// belong to whichever partition turned out newer) until `target_gen`
    /// is found on the index partition.
    fn rollback_mount(
        &self,
        device: &mut Box<dyn TapeBackend>,
        start: &Index,
        target_gen: u64,
    ) -> Result<()> {
        let mut back = *start.previous_generation_pointer.lock();
        let mut found_gen = start.generation();
        loop {
            // The back-pointer chain lives on whichever partition actually
            // keeps a full history: DP's append position only grows, so
            // each DP write's previous_generation_pointer names the prior
            // DP record; IP is overwritten in place each cycle and so only
            // ever points at its own generation's DP sibling. Either way
            // the next hop's partition is named by the pointer itself, not
            // fixed to IP.
            let bp = match back {
                Some(bp) => bp,
                None => {
                    return Err(RustLtfsError::GenerationMismatch {
                        wanted: target_gen,
                        found: found_gen,
                    })
                }
            };
            let num = self.partition_num(bp.partition);
            device.seek(num, bp.block)?;
            let mut buf = Vec::new();
            if device.read_block(num, &mut buf).is_err() {
                return Err(RustLtfsError::GenerationMismatch {
                    wanted: target_gen,
                    found: found_gen,
                });
            }
            let xml = String::from_utf8(buf).map_err(|e| RustLtfsError::IndexInvalid(e.to_string()))?;
            let index = index::xml::deserialize(&xml, false)?;
            found_gen = index.generation();
            if found_gen == target_gen {
                *self.index.write() = Some(index);
                self.rollback_mount.store(true, Ordering::SeqCst);
                self.force_read_only.store(true, Ordering::SeqCst);
                self.journal.lock().clear();
                *self.state.lock() = MountState::Mounted;
                return Ok(());
            }
            back = *index.previous_generation_pointer.lock();
        }
    }

    fn read_label(&self, device: &mut dyn TapeBackend, partition: u8) -> Result<Label> {
        device.seek(partition, 2)?;
        let mut buf = Vec::new();
        device.read_block(partition, &mut buf)?;
        let xml = String::from_utf8(buf).map_err(|e| RustLtfsError::LabelInvalid(e.to_string()))?;
        Label::from_xml(&xml)
    }

    pub fn unmount(&self, now: &str) -> Result<()> {
        self.wait_for_revalidation();
        if self.state() != MountState::Mounted {
            return Ok(());
        }
        let index = self.index.read().clone();
        if let Some(index) = index {
            if index.is_dirty() {
                self.write_index(Partition::IndexPartition, "unmount", now)?;
            }
        }
        self.device.lock().unload()?;
        *self.index.write() = None;
        *self.state.lock() = MountState::Unmounted;
        Ok(())
    }

    /// §4.4.4: collapse write-perm state into an error classification.
    pub fn effective_read_only(&self) -> EffectiveReadOnly {
        if self.force_read_only.load(Ordering::SeqCst) {
            return EffectiveReadOnly::WriteProtect;
        }
        let device = self.device.lock();
        for &num in &[self.partitions.dp_num, self.partitions.ip_num] {
            let flags = device.write_protect_flags(num);
            if flags.contains(crate::device::WriteProtectFlags::WRITE_ERROR) {
                return EffectiveReadOnly::WriteError;
            }
            if flags.intersects(
                crate::device::WriteProtectFlags::PHYSICAL
                    | crate::device::WriteProtectFlags::LOGICAL
                    | crate::device::WriteProtectFlags::FORCE_READ_ONLY,
            ) {
                return EffectiveReadOnly::WriteProtect;
            }
        }
        let lock_state = self
            .index
            .read()
            .as_ref()
            .map(|i| *i.volume_lock_state.lock())
            .unwrap_or(VolumeLockState::Unlocked);
        match lock_state {
            VolumeLockState::Locked | VolumeLockState::PermLocked => EffectiveReadOnly::WriteProtect,
            VolumeLockState::Unlocked => EffectiveReadOnly::Writable,
        }
    }

    pub fn session_uuid(&self) -> &str {
        &self.session_uuid
    }

    pub fn partitions(&self) -> PartitionIdMap {
        self.partitions
    }

    pub fn label(&self) -> Option<Label> {
        self.label.read().clone()
    }

    pub fn capacity_bytes(&self, partition: Partition) -> u64 {
        let num = self.partition_num(partition);
        self.device.lock().capacity_bytes(num)
    }

    /// Append `data` as a single data-partition record at the current
    /// append position and return the extent describing it. Used by
    /// callers (the CLI `write` command) that need to place file content
    /// on tape before attaching the resulting extent to a dentry.
    pub fn append_data_block(&self, data: &[u8]) -> Result<crate::dentry::Extent> {
        self.wait_for_revalidation();
        let num = self.partition_num(Partition::DataPartition);
        let mut device = self.device.lock();
        let append = device.append_position(num);
        device.seek(num, append)?;
        device.write_block(num, data)?;
        Ok(crate::dentry::Extent {
            partition: Partition::DataPartition,
            start_block: append,
            byte_offset: 0,
            byte_count: data.len() as u64,
            file_offset: 0,
        })
    }

    /// Read back the bytes an extent describes.
    pub fn read_extent(&self, extent: &crate::dentry::Extent) -> Result<Vec<u8>> {
        self.wait_for_revalidation();
        let num = self.partition_num(extent.partition);
        let mut device = self.device.lock();
        device.seek(num, extent.start_block)?;
        let mut buf = Vec::new();
        device.read_block(num, &mut buf)?;
        let start = extent.byte_offset as usize;
        let end = start + extent.byte_count as usize;
        Ok(buf.get(start..end).map(|s| s.to_vec()).unwrap_or_default())
    }

    /// Test-support hook: latch (or clear) a write-perm sense on
    /// `partition`, delegating to [`crate::device::TapeBackend::set_write_error`].
    /// Mirrors the `as_any_mut`/EOD-removal hooks `volume::recovery`'s own
    /// tests use to simulate a drive condition no operator API triggers.
    pub fn inject_write_error(&self, partition: Partition, on: bool) {
        let num = self.partition_num(partition);
        self.device.lock().set_write_error(num, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_backend::FileBackend;

    fn partitions() -> PartitionIdMap {
        PartitionIdMap {
            dp_num: 0,
            dp_id: 'a',
            ip_num: 1,
            ip_id: 'b',
        }
    }

    fn new_volume(dir: &std::path::Path) -> Arc<Volume> {
        let backend = FileBackend::new(dir, 2_000_000_000).unwrap();
        Volume::new(Box::new(backend), partitions())
    }

    #[test]
    fn format_then_mount_yields_generation_one_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let vol = new_volume(dir.path());
        vol.format(
            Barcode::parse("VOL001").unwrap(),
            524288,
            true,
            false,
            "rust-ltfs-test",
            "2026-01-01T00:00:00Z",
        )
        .unwrap();
        vol.mount(MountOptions::default()).unwrap();
        let index = vol.index().unwrap();
        assert_eq!(index.root.uid, crate::dentry::UID_ROOT);
        assert_eq!(index.file_count(), 0);
        assert_eq!(index.root.contents.read().len(), 0);
    }

    #[test]
    fn unmount_writes_dirty_index_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let vol = new_volume(dir.path());
        vol.format(
            Barcode::none(),
            524288,
            true,
            false,
            "rust-ltfs-test",
            "2026-01-01T00:00:00Z",
        )
        .unwrap();
        vol.mount(MountOptions::default()).unwrap();
        let index = vol.index().unwrap();
        index
            .allocate_dentry(&index.root, "a", true, false, "2026-01-01T00:00:00Z")
            .unwrap();
        vol.unmount("2026-01-01T00:01:00Z").unwrap();
        assert_eq!(vol.state(), MountState::Unmounted);
    }
}
