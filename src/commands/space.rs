//! `space`: report capacity and usage for both partitions.

use crate::commands::now;
use crate::dentry::Partition;
use crate::error::{Result, RustLtfsError};
use std::path::PathBuf;

pub fn execute(device: PathBuf, detailed: bool) -> Result<()> {
    let volume = super::open_and_mount(&device)?;
    let label = volume.label().ok_or(RustLtfsError::NoIndex)?;
    let index = volume.index().ok_or(RustLtfsError::NoIndex)?;

    let dp_cap = volume.capacity_bytes(Partition::DataPartition);
    let ip_cap = volume.capacity_bytes(Partition::IndexPartition);
    let used = index.valid_block_count() * label.block_size as u64;

    println!("Volume {}", label.volume_uuid);
    println!("  Data partition capacity:  {dp_cap} bytes");
    println!("  Index partition capacity: {ip_cap} bytes");
    println!("  Files: {}", index.file_count());
    println!("  Used (approx): {used} bytes");

    if detailed {
        println!("  Block size: {}", label.block_size);
        println!("  Compression: {}", label.compression);
        println!("  Generation: {}", index.generation());
        println!("  Barcode: {}", label.barcode.as_str().trim());
    }

    volume.unmount(&now())?;
    Ok(())
}
