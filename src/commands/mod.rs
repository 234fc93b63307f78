//! CLI subcommand handlers, one module per [`crate::cli::Commands`] variant.

pub mod format;
pub mod read;
pub mod space;
pub mod write;

use crate::device::file_backend::FileBackend;
use crate::error::Result;
use crate::label::PartitionIdMap;
use crate::volume::{MountOptions, Volume};
use std::path::Path;
use std::sync::Arc;

/// Fixed DP/IP partition assignment used against the file-backed device:
/// partition 0 is the data partition, partition 1 the index partition.
pub(crate) fn default_partitions() -> PartitionIdMap {
    PartitionIdMap {
        dp_num: 0,
        dp_id: 'a',
        ip_num: 1,
        ip_id: 'b',
    }
}

/// The file backend doesn't persist a capacity figure of its own, so
/// reopening an already-formatted directory just assumes this ceiling
/// rather than the one originally passed to `format`.
const DEFAULT_CAPACITY_BYTES: u64 = 2_500_000_000_000;

/// Open the file-backed device at `device` and mount it.
pub(crate) fn open_and_mount(device: &Path) -> Result<Arc<Volume>> {
    let backend = FileBackend::new(device, DEFAULT_CAPACITY_BYTES)?;
    let volume = Volume::new(Box::new(backend), default_partitions());
    volume.mount(MountOptions::default())?;
    Ok(volume)
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
