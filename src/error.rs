//! Error taxonomy for the volume engine.
//!
//! One variant per error kind, not per call site. Kinds that are pure
//! signals carry no payload; kinds that need context for a useful message
//! carry a `String`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustLtfsError>;

#[derive(Error, Debug)]
pub enum RustLtfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("null argument: {0}")]
    NullArg(String),

    #[error("out of memory: {0}")]
    NoMemory(String),

    #[error("invalid argument: {0}")]
    BadArg(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("no such dentry: {0}")]
    NoDentry(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("dentry already exists: {0}")]
    DentryExists(String),

    #[error("directory not empty: {0}")]
    DirNotEmpty(String),

    #[error("cannot unlink root")]
    UnlinkRoot,

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("is a file: {0}")]
    IsFile(String),

    #[error("block size too small: {0}")]
    SmallBlockSize(u32),

    #[error("block size too large: {0}")]
    LargeBlockSize(u32),

    #[error("label invalid: {0}")]
    LabelInvalid(String),

    #[error("label mismatch between partitions: {0}")]
    LabelMismatch(String),

    #[error("label possibly valid but unreadable: {0}")]
    LabelPossiblyValid(String),

    #[error("index invalid: {0}")]
    IndexInvalid(String),

    #[error("unsupported index schema version: {0}")]
    UnsupportedIndexVersion(String),

    #[error("no index found")]
    NoIndex,

    #[error("more than one index candidate found")]
    ManyIndexes,

    #[error("inconsistent volume state: {0}")]
    Inconsistent(String),

    #[error("unsupported medium: {0}")]
    UnsupportedMedium(String),

    #[error("medium is not partitioned")]
    NotPartitioned,

    #[error("end of data marker missing on partition {0}")]
    EodMissing(String),

    #[error("end of data marker missing on both partitions")]
    BothEodMissing,

    #[error("index generation mismatch: wanted {wanted}, found {found}")]
    GenerationMismatch { wanted: u64, found: u64 },

    #[error("MAM cache invalid: {0}")]
    MamCacheInvalid(String),

    #[error("index cache invalid: {0}")]
    IndexCacheInvalid(String),

    #[error("data placement policy is immutable for this volume")]
    PolicyImmutable,

    #[error("invalid data placement policy: {0}")]
    PolicyInvalid(String),

    #[error("bad partition number: {0}")]
    BadPartnum(u8),

    #[error("bad locate target: {0}")]
    BadLocate(String),

    #[error("no space left on partition")]
    NoSpace,

    #[error("partition nearly full (early warning)")]
    LessSpace,

    #[error("write protected")]
    WriteProtect,

    #[error("write error")]
    WriteError,

    #[error("device not ready: {0}")]
    DeviceUnready(String),

    #[error("no medium loaded")]
    NoMedium,

    #[error("device fenced pending revalidation")]
    DeviceFenced,

    #[error("revalidation already running")]
    RevalRunning,

    #[error("revalidation failed, volume unusable")]
    RevalFailed,

    #[error("operation interrupted")]
    Interrupted,

    #[error("signal handler installation failed: {0}")]
    SigHandlerErr(String),

    #[error("cannot rewrite a WORM cartridge")]
    WormRollback,

    #[error("deep recovery is unsupported on WORM media")]
    WormDeepRecovery,

    #[error("barcode has wrong length: {0}")]
    BarcodeLength(String),

    #[error("barcode contains invalid characters: {0}")]
    BarcodeInvalid(String),

    #[error("medium is already formatted")]
    Formatted,

    #[error("WORM media cannot use this rule set")]
    RulesWorm,

    #[error("bad block size: {0}")]
    BadBlocksize(u32),

    #[error("bad volume name: {0}")]
    BadVolname(String),

    #[error("bad placement rules: {0}")]
    BadRules(String),

    #[error("bad generation number: {0}")]
    BadGeneration(u64),

    #[error("SCSI operation error: {0}")]
    Scsi(String),

    #[error("tape device error: {0}")]
    TapeDevice(String),

    #[error("file operation error: {0}")]
    FileOperation(String),

    #[error("system error: {0}")]
    System(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("LTFS index error: {0}")]
    LtfsIndex(String),

    #[error("parameter validation error: {0}")]
    ParameterValidation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl RustLtfsError {
    pub fn null_arg<T: Into<String>>(msg: T) -> Self {
        Self::NullArg(msg.into())
    }
    pub fn no_memory<T: Into<String>>(msg: T) -> Self {
        Self::NoMemory(msg.into())
    }
    pub fn bad_arg<T: Into<String>>(msg: T) -> Self {
        Self::BadArg(msg.into())
    }
    pub fn name_too_long<T: Into<String>>(msg: T) -> Self {
        Self::NameTooLong(msg.into())
    }
    pub fn no_dentry<T: Into<String>>(msg: T) -> Self {
        Self::NoDentry(msg.into())
    }
    pub fn invalid_path<T: Into<String>>(msg: T) -> Self {
        Self::InvalidPath(msg.into())
    }
    pub fn dentry_exists<T: Into<String>>(msg: T) -> Self {
        Self::DentryExists(msg.into())
    }
    pub fn scsi<T: Into<String>>(msg: T) -> Self {
        Self::Scsi(msg.into())
    }
    pub fn tape_device<T: Into<String>>(msg: T) -> Self {
        Self::TapeDevice(msg.into())
    }
    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        Self::FileOperation(msg.into())
    }
    pub fn system<T: Into<String>>(msg: T) -> Self {
        Self::System(msg.into())
    }
    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }
    pub fn ltfs_index<T: Into<String>>(msg: T) -> Self {
        Self::LtfsIndex(msg.into())
    }
    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }
    pub fn unsupported<T: Into<String>>(msg: T) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether this error indicates the device connection itself may be
    /// suspect and the volume must fence the device and revalidate before
    /// accepting further operations.
    pub fn needs_revalidation(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnready(_) | Self::NoMedium | Self::TapeDevice(_)
        )
    }

    /// Whether the error is recoverable inside the write-index pipeline by
    /// downgrading to success (early-warning space pressure is logged and
    /// the write proceeds rather than aborting).
    pub fn is_downgradable_on_index_write(&self) -> bool {
        matches!(self, Self::LessSpace)
    }
}
