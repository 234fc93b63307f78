//! The in-memory index: generation counter, dirty tracking, UID allocation,
//! and the file/block counters that ride along with every mutation.
//!
//! Mirrors `original_source/src/libltfs/tape.c`'s `struct ltfs_index` and
//! its `dirty_lock`-guarded counters, rebuilt around the `Arc<Dentry>` tree
//! in [`crate::dentry`] and [`crate::fs_tree`].

pub mod xml;

use crate::dentry::Dentry;
use crate::error::{Result, RustLtfsError};
use crate::fs_tree::{attach_child, generate_platform_safe_name};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeLockState {
    Unlocked,
    Locked,
    PermLocked,
}

impl VolumeLockState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::PermLocked => "permlocked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unlocked" => Ok(Self::Unlocked),
            "locked" => Ok(Self::Locked),
            "permlocked" => Ok(Self::PermLocked),
            other => Err(RustLtfsError::ltfs_index(format!(
                "unrecognized volumelockstate: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddress {
    pub partition: crate::dentry::Partition,
    pub block: u64,
}

/// Placement policy applied to new files; fixed at format time unless
/// `criteria_allow_update` is set.
#[derive(Debug, Clone, Default)]
pub struct DataPlacementCriteria {
    pub rules: Vec<String>,
}

/// Counters and dirty flags protected together, matching the original's
/// single `dirty_lock` covering both.
#[derive(Debug, Default)]
struct DirtyState {
    dirty: bool,
    atime_dirty: bool,
    file_count: u64,
    valid_block_count: u64,
}

pub struct Index {
    pub root: Arc<Dentry>,
    pub volume_uuid: String,
    pub creator: String,
    pub volume_name: String,
    pub schema_version: String,
    generation: AtomicU64,
    pub mod_time: Mutex<String>,
    pub self_pointer: Mutex<Option<BlockAddress>>,
    pub previous_generation_pointer: Mutex<Option<BlockAddress>>,
    dirty_state: Mutex<DirtyState>,
    refcount: AtomicU64,
    next_uid: AtomicU64,
    pub commit_message: Mutex<String>,
    pub volume_lock_state: Mutex<VolumeLockState>,
    pub placement_criteria: Mutex<DataPlacementCriteria>,
    pub criteria_allow_update: std::sync::atomic::AtomicBool,
    pub use_atime: std::sync::atomic::AtomicBool,
    pub case_sensitive: bool,
}

impl Index {
    pub fn new_formatted(volume_uuid: String, creator: String, now: &str) -> Arc<Self> {
        Arc::new(Self {
            root: Dentry::new_root(now),
            volume_uuid,
            creator,
            volume_name: String::new(),
            schema_version: "2.4.0".to_string(),
            generation: AtomicU64::new(1),
            mod_time: Mutex::new(now.to_string()),
            self_pointer: Mutex::new(None),
            previous_generation_pointer: Mutex::new(None),
            dirty_state: Mutex::new(DirtyState::default()),
            refcount: AtomicU64::new(1),
            next_uid: AtomicU64::new(crate::dentry::UID_ROOT + 1),
            commit_message: Mutex::new(String::new()),
            volume_lock_state: Mutex::new(VolumeLockState::Unlocked),
            placement_criteria: Mutex::new(DataPlacementCriteria::default()),
            criteria_allow_update: std::sync::atomic::AtomicBool::new(true),
            use_atime: std::sync::atomic::AtomicBool::new(false),
            case_sensitive: false,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bump the generation number; called once per successful index write.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Force the generation to a specific value, used when mounting an
    /// index whose generation was read back off tape.
    pub fn set_generation(&self, gen: u64) {
        self.generation.store(gen, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_state.lock().dirty
    }

    pub fn set_index_dirty(&self, touch_atime: bool) {
        let mut s = self.dirty_state.lock();
        s.dirty = true;
        if touch_atime {
            s.atime_dirty = true;
        }
    }

    pub fn unset_index_dirty(&self, unset_atime: bool) {
        let mut s = self.dirty_state.lock();
        s.dirty = false;
        if unset_atime {
            s.atime_dirty = false;
        }
    }

    pub fn file_count(&self) -> u64 {
        self.dirty_state.lock().file_count
    }

    pub fn valid_block_count(&self) -> u64 {
        self.dirty_state.lock().valid_block_count
    }

    fn bump_file_count(&self, delta: i64) {
        let mut s = self.dirty_state.lock();
        if delta >= 0 {
            s.file_count += delta as u64;
        } else {
            s.file_count = s.file_count.saturating_sub((-delta) as u64);
        }
    }

    /// Set the file counter directly after rebuilding a tree from an
    /// on-tape document, bypassing the per-allocation increment path.
    pub fn set_file_count(&self, count: u64) {
        self.dirty_state.lock().file_count = count;
    }

    pub fn add_valid_blocks(&self, blocks: u64) {
        self.dirty_state.lock().valid_block_count += blocks;
    }

    pub fn sub_valid_blocks(&self, blocks: u64) {
        let mut s = self.dirty_state.lock();
        s.valid_block_count = s.valid_block_count.saturating_sub(blocks);
    }

    /// Reference count used to keep an index alive across a mount-time
    /// swap: the old index is dropped only once the last reader releases
    /// it.
    pub fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) -> u64 {
        self.refcount.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Allocate the next UID from the monotonic per-volume counter. Returns
    /// [`crate::dentry::UID_SENTINEL`] only on overflow, matching the
    /// original's allocation-failure sentinel.
    fn allocate_uid(&self) -> u64 {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        if uid == 0 {
            crate::dentry::UID_SENTINEL
        } else {
            uid
        }
    }

    /// Ensure future UID allocation never collides with `seen`, used after
    /// loading an index off tape whose `highestfileuid` (or a freshly
    /// walked tree) established a watermark.
    pub fn observe_uid(&self, seen: u64) {
        let mut cur = self.next_uid.load(Ordering::SeqCst);
        while seen >= cur {
            match self.next_uid.compare_exchange_weak(
                cur,
                seen + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn highest_file_uid(&self) -> u64 {
        self.next_uid.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Allocate a new dentry under `parent`, deriving its platform-safe name
    /// for uniqueness, inheriting the parent's index association, and
    /// bumping the file counter for non-directories.
    pub fn allocate_dentry(
        &self,
        parent: &Arc<Dentry>,
        canonical_name: &str,
        is_directory: bool,
        read_only: bool,
        now: &str,
    ) -> Result<Arc<Dentry>> {
        if !parent.is_directory() {
            return Err(RustLtfsError::invalid_path(format!(
                "{} is not a directory",
                parent.canonical_name()
            )));
        }
        let platform_safe =
            generate_platform_safe_name(parent, canonical_name, self.case_sensitive)?;

        let uid = self.allocate_uid();
        if uid == crate::dentry::UID_SENTINEL {
            return Err(RustLtfsError::no_memory("UID space exhausted"));
        }

        let child = Dentry::new(
            uid,
            canonical_name.to_string(),
            platform_safe,
            is_directory,
            read_only,
            now,
        );
        attach_child(parent, &child, self.case_sensitive);
        if !is_directory {
            self.bump_file_count(1);
        }
        self.set_index_dirty(false);
        Ok(child)
    }

    /// Detach `dentry` from its parent's child map and retire it, releasing
    /// any extents it held back to the free pool via `sub_valid_blocks`
    /// (the caller is expected to have already accounted for them).
    pub fn unlink_dentry(&self, dentry: &Arc<Dentry>) -> Result<()> {
        if dentry.is_root() {
            return Err(RustLtfsError::UnlinkRoot);
        }
        if dentry.is_directory() && !dentry.contents.read().is_empty() {
            return Err(RustLtfsError::DirNotEmpty(dentry.canonical_name()));
        }
        crate::fs_tree::gc_dentry(dentry, self.case_sensitive);
        if !dentry.is_directory() {
            self.bump_file_count(-1);
        }
        self.set_index_dirty(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_dentry_increments_file_count_for_files_only() {
        let idx = Index::new_formatted("uuid".into(), "test".into(), "2026-01-01T00:00:00Z");
        let dir = idx
            .allocate_dentry(&idx.root, "sub", true, false, "2026-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(idx.file_count(), 0);
        idx.allocate_dentry(&dir, "a.txt", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(idx.file_count(), 1);
    }

    #[test]
    fn uid_allocation_is_monotonic_and_unique() {
        let idx = Index::new_formatted("uuid".into(), "test".into(), "2026-01-01T00:00:00Z");
        let a = idx
            .allocate_dentry(&idx.root, "a", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        let b = idx
            .allocate_dentry(&idx.root, "b", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        assert_ne!(a.uid, b.uid);
        assert!(b.uid > a.uid);
    }

    #[test]
    fn unlink_rejects_nonempty_directory() {
        let idx = Index::new_formatted("uuid".into(), "test".into(), "2026-01-01T00:00:00Z");
        let dir = idx
            .allocate_dentry(&idx.root, "sub", true, false, "2026-01-01T00:00:00Z")
            .unwrap();
        idx.allocate_dentry(&dir, "a.txt", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        let err = idx.unlink_dentry(&dir).unwrap_err();
        assert!(matches!(err, RustLtfsError::DirNotEmpty(_)));
    }

    #[test]
    fn unlink_rejects_root() {
        let idx = Index::new_formatted("uuid".into(), "test".into(), "2026-01-01T00:00:00Z");
        let err = idx.unlink_dentry(&idx.root).unwrap_err();
        assert!(matches!(err, RustLtfsError::UnlinkRoot));
    }

    #[test]
    fn observe_uid_raises_watermark_past_seen() {
        let idx = Index::new_formatted("uuid".into(), "test".into(), "2026-01-01T00:00:00Z");
        idx.observe_uid(500);
        let a = idx
            .allocate_dentry(&idx.root, "a", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        assert!(a.uid > 500);
    }
}
