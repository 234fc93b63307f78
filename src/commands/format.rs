//! `format`: erase both partitions and write a fresh label and empty index.

use crate::commands::{default_partitions, now};
use crate::device::file_backend::FileBackend;
use crate::error::Result;
use crate::label::Barcode;
use crate::volume::Volume;
use std::path::PathBuf;
use tracing::info;

pub fn execute(
    device: PathBuf,
    capacity_bytes: u64,
    block_size: u32,
    barcode: Option<String>,
    compression: bool,
    worm: bool,
) -> Result<()> {
    let backend = FileBackend::new(&device, capacity_bytes)?;
    let volume = Volume::new(Box::new(backend), default_partitions());

    let barcode = match barcode {
        Some(b) => Barcode::parse(&b)?,
        None => Barcode::none(),
    };
    let now = now();
    volume.format(barcode, block_size, compression, worm, "ltfsvol", &now)?;

    info!(path = %device.display(), block_size, "volume formatted");
    println!(
        "Formatted {} (capacity {} bytes, block size {})",
        device.display(),
        capacity_bytes,
        block_size
    );
    Ok(())
}
