//! Dentry (directory entry) — the node type of the in-memory filesystem
//! tree.
//!
//! A dentry is held behind an `Arc` so multiple lookups can hand out
//! references safely; the parent link is a `Weak` so ownership flows
//! strictly top-down through the parent's child map, matching the
//! "parent is non-owning" invariant. `contents_lock` and `meta_lock` are
//! modeled as two independent `parking_lot::RwLock`s rather than collapsed
//! into one, per the fixed lock-ordering design note: contents before meta.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub const LTFS_FILENAME_MAX: usize = 255;

/// UID 0 is reserved as the allocation-failure sentinel; UID 1 is root.
pub const UID_SENTINEL: u64 = 0;
pub const UID_ROOT: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub partition: Partition,
    pub start_block: u64,
    pub byte_offset: u32,
    pub byte_count: u64,
    pub file_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    IndexPartition,
    DataPartition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedAttribute {
    pub name: String,
    pub value: Vec<u8>,
    pub percent_encode: bool,
}

/// An unrecognized element from a future schema version, preserved verbatim
/// so a round-trip through this implementation doesn't lose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedTag {
    pub raw_xml: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DentryFlags {
    pub is_directory: bool,
    pub is_read_only: bool,
    pub is_deleted: bool,
    pub is_dirty: bool,
    pub is_out_of_sync: bool,
}

#[derive(Debug, Clone)]
pub struct Timestamps {
    pub creation: String,
    pub change: String,
    pub modify: String,
    pub access: String,
    pub backup: String,
}

impl Timestamps {
    pub fn new_at(now: &str) -> Self {
        Self {
            creation: now.to_string(),
            change: now.to_string(),
            modify: now.to_string(),
            access: now.to_string(),
            backup: String::new(),
        }
    }
}

/// Opaque handle owned by the (external, out of scope) I/O scheduler plugin.
#[derive(Debug, Clone, Default)]
pub struct IoSchedHandle(pub Option<u64>);

/// Fields guarded by `meta_lock`: everything about a dentry except its
/// child map.
#[derive(Debug)]
pub struct DentryMeta {
    pub flags: DentryFlags,
    pub timestamps: Timestamps,
    pub numhandles: u64,
    pub link_count: u32,
    pub extents: Vec<Extent>,
    pub xattrs: Vec<ExtendedAttribute>,
    pub symlink_target: Option<String>,
    pub used_blocks: u64,
    pub preserved_tags: Vec<PreservedTag>,
}

impl DentryMeta {
    fn new_directory(now: &str) -> Self {
        Self {
            flags: DentryFlags {
                is_directory: true,
                ..Default::default()
            },
            timestamps: Timestamps::new_at(now),
            numhandles: 1,
            link_count: 2,
            extents: Vec::new(),
            xattrs: Vec::new(),
            symlink_target: None,
            used_blocks: 0,
            preserved_tags: Vec::new(),
        }
    }

    fn new_file(now: &str, read_only: bool) -> Self {
        Self {
            flags: DentryFlags {
                is_directory: false,
                is_read_only: read_only,
                ..Default::default()
            },
            timestamps: Timestamps::new_at(now),
            numhandles: 1,
            link_count: 1,
            extents: Vec::new(),
            xattrs: Vec::new(),
            symlink_target: None,
            used_blocks: 0,
            preserved_tags: Vec::new(),
        }
    }
}

/// A name's dual representation: the name as the user wrote it, and the
/// name actually stored in the parent's child map and on tape.
#[derive(Debug, Clone)]
pub struct DentryName {
    pub canonical: String,
    pub platform_safe: String,
}

/// Case-fold key used to index the child map. On case-sensitive hosts this
/// equals `platform_safe`; on case-insensitive hosts it is ASCII-lowercased
/// (a deliberate stand-in for full ICU case-folding, which belongs to a
/// locale-aware collation layer outside this crate).
pub type CaseKey = String;

pub fn case_key(platform_safe_name: &str, case_sensitive: bool) -> CaseKey {
    if case_sensitive {
        platform_safe_name.to_string()
    } else {
        platform_safe_name.to_ascii_lowercase()
    }
}

#[derive(Debug, Default)]
pub struct ChildMap {
    by_case_key: HashMap<CaseKey, Arc<Dentry>>,
}

impl ChildMap {
    pub fn get(&self, key: &str) -> Option<Arc<Dentry>> {
        self.by_case_key.get(key).cloned()
    }

    pub fn insert(&mut self, key: CaseKey, child: Arc<Dentry>) {
        self.by_case_key.insert(key, child);
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<Dentry>> {
        self.by_case_key.remove(key)
    }

    pub fn clear(&mut self) {
        self.by_case_key.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_case_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_case_key.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Dentry>> {
        self.by_case_key.values()
    }

    /// Children ordered by UID, for deterministic serialization. Computed
    /// on demand rather than kept as a second always-sorted index, since
    /// it is only needed on the (infrequent) index-write path.
    pub fn values_by_uid(&self) -> Vec<Arc<Dentry>> {
        let mut v: Vec<Arc<Dentry>> = self.by_case_key.values().cloned().collect();
        v.sort_by_key(|d| d.uid);
        v
    }

    pub fn directory_count(&self) -> u32 {
        self.by_case_key
            .values()
            .filter(|d| d.meta.read().flags.is_directory)
            .count() as u32
    }
}

pub struct Dentry {
    pub uid: u64,
    name: RwLock<DentryName>,
    parent: RwLock<Weak<Dentry>>,
    pub contents: RwLock<ChildMap>,
    pub meta: RwLock<DentryMeta>,
    iosched_lock: Mutex<IoSchedHandle>,
}

impl std::fmt::Debug for Dentry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dentry")
            .field("uid", &self.uid)
            .field("name", &self.name.read().canonical)
            .finish()
    }
}

impl Dentry {
    pub fn new_root(now: &str) -> Arc<Self> {
        Arc::new(Self {
            uid: UID_ROOT,
            name: RwLock::new(DentryName {
                canonical: "/".to_string(),
                platform_safe: "/".to_string(),
            }),
            parent: RwLock::new(Weak::new()),
            contents: RwLock::new(ChildMap::default()),
            meta: RwLock::new(DentryMeta::new_directory(now)),
            iosched_lock: Mutex::new(IoSchedHandle::default()),
        })
    }

    pub fn new(
        uid: u64,
        canonical: String,
        platform_safe: String,
        is_directory: bool,
        read_only: bool,
        now: &str,
    ) -> Arc<Self> {
        let meta = if is_directory {
            DentryMeta::new_directory(now)
        } else {
            DentryMeta::new_file(now, read_only)
        };
        Arc::new(Self {
            uid,
            name: RwLock::new(DentryName {
                canonical,
                platform_safe,
            }),
            parent: RwLock::new(Weak::new()),
            contents: RwLock::new(ChildMap::default()),
            meta: RwLock::new(meta),
            iosched_lock: Mutex::new(IoSchedHandle::default()),
        })
    }

    pub fn canonical_name(&self) -> String {
        self.name.read().canonical.clone()
    }

    pub fn platform_safe_name(&self) -> String {
        self.name.read().platform_safe.clone()
    }

    pub fn set_platform_safe_name(&self, name: String) {
        self.name.write().platform_safe = name;
    }

    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().upgrade()
    }

    pub fn set_parent(&self, parent: &Arc<Dentry>) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    pub fn is_directory(&self) -> bool {
        self.meta.read().flags.is_directory
    }

    pub fn is_root(&self) -> bool {
        self.uid == UID_ROOT
    }

    /// Block count covered by this dentry's extents, rounded up per extent.
    pub fn used_blocks(&self, block_size: u64) -> u64 {
        self.meta
            .read()
            .extents
            .iter()
            .map(|e| e.byte_offset as u64 + e.byte_count)
            .map(|span| span.div_ceil(block_size))
            .sum()
    }

    /// Acquire `meta_lock` for write and bump `numhandles`. Used by
    /// `path_lookup` on the dentry it resolves to.
    pub fn acquire_handle(&self) {
        self.meta.write().numhandles += 1;
    }

    /// Acquire `meta_lock` for write and drop `numhandles` by one,
    /// returning the post-decrement value.
    pub fn release_handle(&self) -> u64 {
        let mut meta = self.meta.write();
        debug_assert!(meta.numhandles > 0, "numhandles underflow");
        meta.numhandles = meta.numhandles.saturating_sub(1);
        meta.numhandles
    }

    pub fn set_iosched_handle(&self, handle: IoSchedHandle) {
        *self.iosched_lock.lock() = handle;
    }

    pub fn iosched_handle(&self) -> IoSchedHandle {
        self.iosched_lock.lock().clone()
    }
}

/// True iff `a` lies on the parent chain of `b`.
pub fn is_predecessor(a: &Arc<Dentry>, b: &Arc<Dentry>) -> bool {
    let mut cur = b.parent();
    while let Some(p) = cur {
        if Arc::ptr_eq(&p, a) {
            return true;
        }
        cur = p.parent();
    }
    false
}

/// Reconstruct a dentry's absolute path by walking its parent chain, holding
/// each parent's `contents_lock` for read while reading its name.
pub fn absolute_path(d: &Arc<Dentry>) -> String {
    let mut components = Vec::new();
    let mut cur = d.clone();
    while let Some(parent) = cur.parent() {
        let _guard = parent.contents.read();
        components.push(cur.canonical_name());
        cur = parent;
    }
    if components.is_empty() {
        return "/".to_string();
    }
    components.reverse();
    format!("/{}", components.join("/"))
}
