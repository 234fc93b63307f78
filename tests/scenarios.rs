//! Cross-module end-to-end scenarios (spec §8, S1-S6), exercised against
//! the public crate API with the file-backed test device as the tape
//! double. Each test name tracks the scenario it covers.

use ltfs_volume::dentry::{case_key, Extent, Partition};
use ltfs_volume::device::file_backend::FileBackend;
use ltfs_volume::device::EodStatus;
use ltfs_volume::label::{Barcode, PartitionIdMap};
use ltfs_volume::volume::MountOptions;
use ltfs_volume::{RustLtfsError, Volume};

fn partitions() -> PartitionIdMap {
    PartitionIdMap {
        dp_num: 0,
        dp_id: 'a',
        ip_num: 1,
        ip_id: 'b',
    }
}

fn new_volume(dir: &std::path::Path) -> std::sync::Arc<Volume> {
    let backend = FileBackend::new(dir, 2_000_000_000).unwrap();
    Volume::new(Box::new(backend), partitions())
}

const T0: &str = "2026-01-01T00:00:00Z";

/// S1. Format and mount: generation 1, empty root, coherency count == 1 on
/// both partitions with the volume's own UUID.
#[test]
fn s1_format_and_mount() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::parse("VOL001").unwrap(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();

    let index = vol.index().unwrap();
    assert_eq!(index.generation(), 1);
    assert_eq!(index.root.uid, ltfs_volume::dentry::UID_ROOT);
    assert_eq!(index.root.contents.read().len(), 0);
    assert_eq!(index.file_count(), 0);

    let uuid = index.volume_uuid.clone();
    // write_index was called twice during format (DP then IP), both landing
    // as the first coherency record written to each partition.
    for p in [Partition::DataPartition, Partition::IndexPartition] {
        let gen = vol.check_eod_status(p).unwrap();
        assert_eq!(gen, EodStatus::Present);
    }
    assert!(!uuid.is_empty());
}

/// S2. Create and persist: a directory and a file with one extent survive
/// unmount/remount; generation reflects format (2 writes) + the explicit
/// write_index call (1 write) = 3.
#[test]
fn s2_create_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::none(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();

    let index = vol.index().unwrap();
    let a = index
        .allocate_dentry(&index.root, "a", true, false, T0)
        .unwrap();
    vol.write_index(Partition::IndexPartition, "sync", "2026-01-01T00:01:00Z")
        .unwrap();

    let file = index
        .allocate_dentry(&a, "b.txt", false, false, T0)
        .unwrap();
    {
        let mut meta = file.meta.write();
        meta.extents.push(Extent {
            partition: Partition::DataPartition,
            start_block: 5,
            byte_offset: 0,
            byte_count: 1024,
            file_offset: 0,
        });
    }
    index.add_valid_blocks(1);
    assert_eq!(index.file_count(), 1);

    vol.write_index(Partition::IndexPartition, "sync", "2026-01-01T00:02:00Z")
        .unwrap();
    vol.unmount("2026-01-01T00:03:00Z").unwrap();

    let vol2 = new_volume(dir.path());
    vol2.mount(MountOptions::default()).unwrap();
    let index2 = vol2.index().unwrap();
    // format leaves generation 1 (S1); each of the two explicit syncs above
    // bumps it by one (the recursive DP write inside write_index() shares
    // the index's single dirty flag with the IP write that follows, so one
    // write_index() call advances the generation exactly once).
    assert_eq!(index2.generation(), 3);
    assert_eq!(index2.file_count(), 1);

    let a2 = index2
        .root
        .contents
        .read()
        .get(&case_key("a", index2.case_sensitive))
        .expect("directory a");
    let file2 = a2
        .contents
        .read()
        .get(&case_key("b.txt", index2.case_sensitive))
        .expect("file b.txt");
    let extents = file2.meta.read().extents.clone();
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].byte_count, 1024);
}

/// S3. Incremental journal collapse: a create immediately followed by a
/// delete in the same session leaves no journal trace, and the next sync
/// carries no record of the transient path.
#[test]
fn s3_journal_collapses_create_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::none(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();
    let index = vol.index().unwrap();

    let a = index
        .allocate_dentry(&index.root, "a", true, false, T0)
        .unwrap();
    let tmp = index
        .allocate_dentry(&a, "tmp", false, false, T0)
        .unwrap();
    vol.journal().lock().journal_create("/a", &tmp);

    index.unlink_dentry(&tmp).unwrap();
    vol.journal().lock().journal_rmfile("/a/tmp", &tmp);

    {
        let journal = vol.journal().lock();
        assert!(journal.is_empty());
        assert!(journal.created_dirs().is_empty());
    }

    let gen_before = index.generation();
    assert!(index.is_dirty());
    vol.write_index(Partition::IndexPartition, "sync", "2026-01-01T00:01:00Z")
        .unwrap();
    assert_eq!(index.generation(), gen_before + 1);

    assert!(a
        .contents
        .read()
        .get(&case_key("tmp", index.case_sensitive))
        .is_none());
}

/// S4. Missing-EOD recovery: removing DP's EOD marker is detected, and
/// `recover_eod` restores it via IP's back-pointer chain without requiring
/// a full-medium mount.
#[test]
fn s4_missing_eod_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::none(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();

    assert_eq!(
        vol.check_eod_status(Partition::DataPartition).unwrap(),
        EodStatus::Present
    );

    vol.inject_missing_eod(Partition::DataPartition).unwrap();
    assert_eq!(
        vol.check_eod_status(Partition::DataPartition).unwrap(),
        EodStatus::Missing
    );

    vol.recover_eod(Partition::DataPartition).unwrap();
    assert_eq!(
        vol.check_eod_status(Partition::DataPartition).unwrap(),
        EodStatus::Present
    );

    vol.mount(MountOptions::default()).unwrap();
    assert!(!vol.is_rollback_mount());
}

/// S5. Rollback mount: mounting an older generation comes up force-read-only
/// and marked as a rollback; a subsequent write attempt is rejected and the
/// index is not re-dirtied by the failed write itself.
#[test]
fn s5_rollback_mount_is_force_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::none(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();

    // Generations 2..5: each adds a directory and syncs.
    for i in 2..=5u32 {
        let index = vol.index().unwrap();
        index
            .allocate_dentry(&index.root, &format!("dir{i}"), true, false, T0)
            .unwrap();
        vol.write_index(Partition::IndexPartition, "sync", T0)
            .unwrap();
    }
    let final_gen = vol.index().unwrap().generation();
    assert_eq!(final_gen, 5);
    vol.unmount("2026-01-01T00:10:00Z").unwrap();

    let vol2 = new_volume(dir.path());
    vol2.mount(MountOptions {
        target_gen: 3,
        ..Default::default()
    })
    .unwrap();

    assert!(vol2.is_rollback_mount());
    assert!(vol2.is_force_read_only());
    assert_eq!(vol2.index().unwrap().generation(), 3);

    let err = vol2
        .write_index(Partition::IndexPartition, "user-write", "2026-01-01T00:11:00Z")
        .unwrap_err();
    assert!(matches!(err, RustLtfsError::WriteProtect));
    assert_eq!(vol2.index().unwrap().generation(), 3);
}

/// S6. Write-perm latch: a forced write-perm error on the device latches
/// `WriteError` for ordinary writes; a recovery-reason index write clears
/// the latch long enough to land a fresh self-pointer, then reasserts it.
#[test]
fn s6_write_perm_latch_recovers_then_relatches() {
    let dir = tempfile::tempdir().unwrap();
    let vol = new_volume(dir.path());
    vol.format(
        Barcode::none(),
        524288,
        true,
        false,
        "rust-ltfs-test",
        T0,
    )
    .unwrap();
    vol.mount(MountOptions::default()).unwrap();

    let index = vol.index().unwrap();
    index
        .allocate_dentry(&index.root, "a", true, false, T0)
        .unwrap();

    vol.inject_write_error(Partition::IndexPartition, true);

    let err = vol
        .write_index(Partition::IndexPartition, "sync", "2026-01-01T00:01:00Z")
        .unwrap_err();
    assert!(matches!(err, RustLtfsError::WriteError));

    // A write-perm-recovery write clears the latch for the duration of the
    // write, succeeds, then reasserts it.
    vol.write_index(
        Partition::IndexPartition,
        "writeperm",
        "2026-01-01T00:02:00Z",
    )
    .unwrap();

    let err2 = vol
        .write_index(Partition::IndexPartition, "sync", "2026-01-01T00:03:00Z")
        .unwrap_err();
    assert!(matches!(err2, RustLtfsError::WriteError));
}
