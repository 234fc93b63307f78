//! `write`: place a file or directory tree onto the data partition and
//! attach the resulting extents under `destination` in the index tree.

use crate::commands::now;
use crate::dentry::{case_key, Dentry, Partition};
use crate::error::{Result, RustLtfsError};
use crate::index::Index;
use crate::volume::Volume;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// `mkdir -p`-style resolution: walk `path`'s components from the root,
/// creating any directory that doesn't exist yet.
fn ensure_dir(index: &Index, path: &str, now: &str) -> Result<Arc<Dentry>> {
    let mut current = index.root.clone();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if !current.is_directory() {
            return Err(RustLtfsError::IsFile(current.canonical_name()));
        }
        let key = case_key(component, index.case_sensitive);
        let next = current.contents.read().get(&key);
        current = match next {
            Some(child) => child,
            None => index.allocate_dentry(&current, component, true, false, now)?,
        };
    }
    Ok(current)
}

fn write_one_file(
    volume: &Arc<Volume>,
    index: &Index,
    parent: &Arc<Dentry>,
    src: &Path,
    name: &str,
    now: &str,
) -> Result<u64> {
    let data = std::fs::read(src)?;
    let file = index.allocate_dentry(parent, name, false, false, now)?;
    let extent = volume.append_data_block(&data)?;
    let len = data.len() as u64;
    let block_size = volume_block_size(volume);
    let blocks = {
        let mut meta = file.meta.write();
        meta.extents.push(extent);
        meta.used_blocks = file_blocks(&meta.extents, block_size);
        meta.used_blocks
    };
    index.add_valid_blocks(blocks);
    Ok(len)
}

fn volume_block_size(volume: &Arc<Volume>) -> u64 {
    volume.label().map(|l| l.block_size as u64).unwrap_or(1)
}

fn file_blocks(extents: &[crate::dentry::Extent], block_size: u64) -> u64 {
    extents
        .iter()
        .map(|e| (e.byte_offset as u64 + e.byte_count).div_ceil(block_size))
        .sum()
}

pub fn execute(
    source: PathBuf,
    device: PathBuf,
    destination: String,
    verify: bool,
    progress: bool,
) -> Result<()> {
    if !source.exists() {
        return Err(RustLtfsError::invalid_path(format!(
            "source path does not exist: {}",
            source.display()
        )));
    }

    let volume = super::open_and_mount(&device)?;
    let now = now();
    let index = volume.index().ok_or(RustLtfsError::NoIndex)?;

    let mut written: Vec<(PathBuf, crate::dentry::Extent)> = Vec::new();
    let mut file_count = 0u64;
    let mut byte_count = 0u64;

    if source.is_file() {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RustLtfsError::invalid_path(source.display().to_string()))?;
        let dest_dir = ensure_dir(&index, &destination, &now)?;
        let len = write_one_file(&volume, &index, &dest_dir, &source, name, &now)?;
        if verify {
            let dentry = dest_dir
                .contents
                .read()
                .get(&case_key(name, index.case_sensitive))
                .ok_or_else(|| RustLtfsError::no_dentry(name.to_string()))?;
            written.push((source.clone(), dentry.meta.read().extents[0].clone()));
        }
        file_count += 1;
        byte_count += len;
        if progress {
            println!("wrote {}", source.display());
        }
    } else {
        for entry in WalkDir::new(&source).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&source)
                .unwrap_or(entry.path());
            let name = rel
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| RustLtfsError::invalid_path(rel.display().to_string()))?;
            let rel_dir = rel.parent().map(|p| p.to_string_lossy().to_string());
            let dest_path = match &rel_dir {
                Some(d) if !d.is_empty() => format!("{destination}/{d}"),
                _ => destination.clone(),
            };
            let dest_dir = ensure_dir(&index, &dest_path, &now)?;
            let len = write_one_file(&volume, &index, &dest_dir, entry.path(), name, &now)?;
            if verify {
                let dentry = dest_dir
                    .contents
                    .read()
                    .get(&case_key(name, index.case_sensitive))
                    .ok_or_else(|| RustLtfsError::no_dentry(name.to_string()))?;
                written.push((entry.path().to_path_buf(), dentry.meta.read().extents[0].clone()));
            }
            file_count += 1;
            byte_count += len;
            if progress {
                println!("wrote {}", rel.display());
            }
        }
    }

    volume.write_index(Partition::IndexPartition, "write", &now)?;

    if verify {
        for (path, extent) in &written {
            let original = std::fs::read(path)?;
            let restored = volume.read_extent(extent)?;
            if original != restored {
                return Err(RustLtfsError::Inconsistent(format!(
                    "verify mismatch for {}",
                    path.display()
                )));
            }
        }
        info!(files = written.len(), "verify passed");
    }

    volume.unmount(&now)?;
    println!("Wrote {file_count} file(s), {byte_count} bytes");
    if file_count == 0 {
        warn!("write operation found no files under {}", source.display());
    }
    Ok(())
}
