//! EOD reconstruction (§4.4.3): when a partition's end-of-data marker is
//! missing, locate the last valid record by reading the opposite
//! partition's most recent index and following its back-pointer, then
//! re-write an EOD there. Refuses when both partitions lack EOD.

use crate::dentry::Partition;
use crate::device::{EodStatus, LoadOption, TapeBackend};
use crate::error::{Result, RustLtfsError};
use crate::index;

use super::Volume;

fn opposite(p: Partition) -> Partition {
    match p {
        Partition::DataPartition => Partition::IndexPartition,
        Partition::IndexPartition => Partition::DataPartition,
    }
}

impl Volume {
    /// §4.4.3 step 0: does `partition` currently have an EOD marker?
    pub fn check_eod_status(&self, partition: Partition) -> Result<EodStatus> {
        let num = self.partition_num(partition);
        self.device.lock().eod_status(num)
    }

    /// Test-support hook: remove `partition`'s EOD marker on the file-backed
    /// test device, mirroring [`super::Volume::inject_write_error`]. Fails
    /// with [`RustLtfsError::Unsupported`] against a non-file-backed device
    /// (a real drive has no operator-facing way to trigger this condition).
    pub fn inject_missing_eod(&self, partition: Partition) -> Result<()> {
        let num = self.partition_num(partition);
        let mut device = self.device.lock();
        let backend = device
            .as_any_mut()
            .downcast_mut::<crate::device::file_backend::FileBackend>()
            .ok_or_else(|| RustLtfsError::unsupported("EOD removal requires the file-backed test device"))?;
        backend.remove_eod(num)
    }

    /// Reconstruct a missing EOD on `missing`. Reads the opposite
    /// partition's most recently written index and follows its
    /// back-pointer onto `missing` to find the last record this partition
    /// actually holds; when no such back-pointer is recorded (MAM version
    /// 0), falls back to this partition's own cached append position.
    /// Unload/load brackets the final write to defeat drive fencing.
    pub fn recover_eod(&self, missing: Partition) -> Result<()> {
        self.wait_for_revalidation();
        let other = opposite(missing);
        let other_num = self.partition_num(other);
        let missing_num = self.partition_num(missing);

        let mut device = self.device.lock();
        if device.eod_status(other_num)? == EodStatus::Missing {
            return Err(RustLtfsError::BothEodMissing);
        }
        if device.eod_status(missing_num)? == EodStatus::Present {
            return Ok(());
        }

        let append = device.append_position(other_num);
        let last_index_block = append.saturating_sub(1);
        device.seek(other_num, last_index_block)?;
        let mut buf = Vec::new();
        device.read_block(other_num, &mut buf)?;
        let xml =
            String::from_utf8(buf).map_err(|e| RustLtfsError::IndexInvalid(e.to_string()))?;
        let other_index = index::xml::deserialize(&xml, false)?;

        let target_block = {
            let back = *other_index.previous_generation_pointer.lock();
            match back {
                // `bp.block` is the index record's own self-pointer, i.e.
                // where the XML itself starts; the write pipeline always
                // follows it with exactly one terminating filemark, so the
                // EOD marker belongs two blocks further out, not at the
                // index record itself.
                Some(bp) if bp.partition == missing => bp.block + 2,
                _ => device.append_position(missing_num),
            }
        };

        device.unload()?;
        device.load(LoadOption::LoadThreaded)?;
        device.reconstruct_eod_at(missing_num, target_block)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_backend::FileBackend;
    use crate::label::{Barcode, PartitionIdMap};
    use crate::volume::MountOptions;

    fn partitions() -> PartitionIdMap {
        PartitionIdMap {
            dp_num: 0,
            dp_id: 'a',
            ip_num: 1,
            ip_id: 'b',
        }
    }

    #[test]
    fn missing_dp_eod_is_reconstructed_from_ip_backpointer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 2_000_000_000).unwrap();
        let vol = Volume::new(Box::new(backend), partitions());
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

        assert_eq!(
            vol.check_eod_status(Partition::DataPartition).unwrap(),
            EodStatus::Present
        );

        {
            let mut device = vol.device.lock();
            let removed = device
                .as_any_mut()
                .downcast_mut::<FileBackend>()
                .expect("file backend");
            removed.remove_eod(partitions().dp_num).unwrap();
        }
        assert_eq!(
            vol.check_eod_status(Partition::DataPartition).unwrap(),
            EodStatus::Missing
        );

        vol.recover_eod(Partition::DataPartition).unwrap();
        assert_eq!(
            vol.check_eod_status(Partition::DataPartition).unwrap(),
            EodStatus::Present
        );
    }

    #[test]
    fn recovery_is_refused_when_both_partitions_lack_eod() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 2_000_000_000).unwrap();
        let vol = Volume::new(Box::new(backend), partitions());
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

        {
            let mut device = vol.device.lock();
            let be = device
                .as_any_mut()
                .downcast_mut::<FileBackend>()
                .expect("file backend");
            be.remove_eod(partitions().dp_num).unwrap();
            be.remove_eod(partitions().ip_num).unwrap();
        }

        let err = vol.recover_eod(Partition::DataPartition).unwrap_err();
        assert!(matches!(err, RustLtfsError::BothEodMissing));
    }
}
