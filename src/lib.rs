//! LTFS volume engine: in-memory dentry tree, on-tape index lifecycle,
//! incremental journal, and the mount/format/recovery state machine built
//! over a pluggable tape device backend.

pub mod cli;
pub mod commands;
pub mod config;
pub mod dentry;
pub mod device;
pub mod error;
pub mod fs_tree;
pub mod index;
pub mod journal;
pub mod label;
pub mod logger;
pub mod volume;

pub use error::{Result, RustLtfsError};
pub use index::Index;
pub use volume::Volume;
