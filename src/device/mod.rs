//! Tape device abstraction: a position model plus a backend operation table,
//! kept deliberately backend-agnostic. `volume.rs` depends only on the
//! [`TapeBackend`] trait; SCSI command encoding (which backend
//! implementations must eventually speak to move a real drive) is an
//! external collaborator this crate does not implement.

pub mod file_backend;
pub mod types;

#[cfg(windows)]
pub mod hardware;

pub use types::*;

use crate::error::Result;

bitflags::bitflags! {
    /// Write-protect/error latch bitmask tracked per partition (the
    /// effective read-only policy derivation lives in `volume.rs`; this is
    /// just the device-reported bits it reconciles).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteProtectFlags: u8 {
        const PHYSICAL = 0b0001;
        const LOGICAL = 0b0010;
        const FORCE_READ_ONLY = 0b0100;
        const WRITE_ERROR = 0b1000;
    }
}

/// Backend-reported space state for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceState {
    Writable,
    LessSpace,
    NoSpace,
}

/// The operations a tape driver (real or simulated) must expose. Named and
/// grouped after the interface enumerated for the backend collaborator:
/// position/seek/space, read/write/locate, MAM attributes, capacity and
/// write-protect state, load/unload and reservation.
pub trait TapeBackend: Send {
    /// Downcast support for backend-specific test/debug hooks (e.g. the
    /// file-backed test backend's ability to delete an EOD marker to
    /// exercise recovery).
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_ready(&self) -> Result<bool>;

    fn position(&self, partition: u8) -> Result<TapePosition>;
    fn seek(&mut self, partition: u8, block: u64) -> Result<()>;
    fn seek_eod(&mut self, partition: u8) -> Result<u64>;
    fn space_filemarks(&mut self, partition: u8, n: i64) -> Result<()>;

    fn read_block(&mut self, partition: u8, buf: &mut Vec<u8>) -> Result<usize>;
    fn write_block(&mut self, partition: u8, data: &[u8]) -> Result<()>;
    fn write_filemark(&mut self, partition: u8, count: u32, immediate: bool) -> Result<()>;

    fn append_position(&self, partition: u8) -> u64;
    fn set_append_position(&mut self, partition: u8, block: u64);

    fn space_state(&self, partition: u8) -> SpaceState;
    fn write_protect_flags(&self, partition: u8) -> WriteProtectFlags;
    fn set_force_read_only(&mut self, partition: u8, on: bool);

    /// Latch (or clear) a write-perm sense on `partition`, surfaced by
    /// [`Self::write_block`] as [`crate::error::RustLtfsError::WriteError`].
    /// Real hardware backends have no operator-facing hook for this, so the
    /// default is a no-op; the file-backed test backend overrides it.
    fn set_write_error(&mut self, _partition: u8, _on: bool) {}

    fn read_mam_attribute(&self, partition: u8, id: u16) -> Result<Option<MamAttribute>>;
    fn write_mam_attribute(&mut self, partition: u8, attr: MamAttribute) -> Result<()>;

    fn load(&mut self, option: LoadOption) -> Result<()>;
    fn unload(&mut self) -> Result<()>;
    fn reserve_unit(&mut self) -> Result<()>;
    fn release_unit(&mut self) -> Result<()>;

    fn erase_partition(&mut self, partition: u8) -> Result<()>;
    fn capacity_bytes(&self, partition: u8) -> u64;
    fn media_type(&self) -> MediaType;
    fn is_worm(&self) -> bool {
        self.media_type().is_worm()
    }
    fn drive_info(&self) -> DriveInfo;

    /// Whether EOD is currently present at the partition's append position
    /// (used by mount/recovery to decide whether reconstruction is needed).
    fn has_eod(&self, partition: u8) -> Result<bool>;

    /// [`EodStatus`] wrapper over [`Self::has_eod`].
    fn eod_status(&self, partition: u8) -> Result<EodStatus> {
        Ok(if self.has_eod(partition)? {
            EodStatus::Present
        } else {
            EodStatus::Missing
        })
    }

    /// Re-write a partition's EOD marker at `block`, used by §4.4.3
    /// recovery once the last valid record has been located via the
    /// opposite partition's back-pointer chain.
    fn reconstruct_eod_at(&mut self, partition: u8, block: u64) -> Result<()>;
}
