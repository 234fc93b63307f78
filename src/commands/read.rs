//! `read`: print the directory tree, list a directory, or extract a file.

use crate::commands::now;
use crate::dentry::Dentry;
use crate::error::{Result, RustLtfsError};
use crate::fs_tree::{path_lookup, release_dentry};
use crate::volume::Volume;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn print_tree(d: &Arc<Dentry>, depth: usize) {
    let indent = "  ".repeat(depth);
    if depth > 0 {
        println!("{indent}{}", d.canonical_name());
    }
    let mut children = d.contents.read().values().cloned().collect::<Vec<_>>();
    children.sort_by_key(|c| c.canonical_name());
    for child in &children {
        if child.is_directory() {
            print_tree(child, depth + 1);
        } else {
            let size: u64 = child.meta.read().extents.iter().map(|e| e.byte_count).sum();
            println!("{}  {} ({size} bytes)", indent, child.canonical_name());
        }
    }
}

fn list_directory(d: &Arc<Dentry>) {
    let mut children = d.contents.read().values().cloned().collect::<Vec<_>>();
    children.sort_by_key(|c| c.canonical_name());
    for child in &children {
        let kind = if child.is_directory() { "dir" } else { "file" };
        println!("{kind:>4}  {}", child.canonical_name());
    }
}

fn read_file_contents(volume: &Arc<Volume>, d: &Arc<Dentry>) -> Result<Vec<u8>> {
    let mut extents = d.meta.read().extents.clone();
    extents.sort_by_key(|e| e.file_offset);
    let mut out = Vec::new();
    for extent in &extents {
        out.extend(volume.read_extent(extent)?);
    }
    Ok(out)
}

pub fn execute(device: PathBuf, source: Option<String>, output: Option<PathBuf>) -> Result<()> {
    let volume = super::open_and_mount(&device)?;
    let index = volume.index().ok_or(RustLtfsError::NoIndex)?;

    match source {
        None => {
            println!("Volume UUID: {}", index.volume_uuid);
            println!("Generation: {}", index.generation());
            println!("Files: {}", index.file_count());
            print_tree(&index.root, 0);
        }
        Some(path) => {
            let dentry = path_lookup(&index.root, &path, index.case_sensitive)?;
            if dentry.is_directory() {
                list_directory(&dentry);
            } else {
                let data = read_file_contents(&volume, &dentry)?;
                match output {
                    Some(out) => std::fs::write(&out, &data)?,
                    None => std::io::stdout().write_all(&data)?,
                }
            }
            release_dentry(&dentry, index.case_sensitive);
        }
    }

    volume.unmount(&now())?;
    Ok(())
}
