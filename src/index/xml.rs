//! On-tape XML index document: the schema this crate reads and writes to
//! the index partition, and the walk that converts it to and from the
//! in-memory [`crate::dentry::Dentry`] tree.
//!
//! Field names and shapes follow the LTFS index schema's usual `serde`
//! modeling as a flat `Directory`/`File` tree; this version adds
//! `highestfileuid` and `volumelockstate` round-tripping and drives itself
//! off the `Arc<Dentry>` tree instead of a standalone parsed document.

use crate::dentry::{Dentry, Extent, ExtendedAttribute, Partition};
use crate::error::{Result, RustLtfsError};
use crate::index::{BlockAddress, Index, VolumeLockState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "ltfsindex")]
pub struct XmlIndex {
    #[serde(rename = "@version")]
    pub version: String,
    pub creator: String,
    pub volumeuuid: String,
    pub generationnumber: u64,
    pub updatetime: String,
    pub location: XmlLocation,
    #[serde(default)]
    pub previousgenerationlocation: Option<XmlLocation>,
    #[serde(default)]
    pub allowpolicyupdate: Option<bool>,
    #[serde(default)]
    pub volumelockstate: Option<String>,
    #[serde(default)]
    pub highestfileuid: Option<u64>,
    #[serde(rename = "directory")]
    pub root_directory: XmlDirectory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlLocation {
    pub partition: String,
    #[serde(rename = "startblock")]
    pub start_block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlDirectory {
    pub name: String,
    #[serde(rename = "fileuid")]
    pub uid: u64,
    #[serde(rename = "creationtime")]
    pub creation_time: String,
    #[serde(rename = "changetime")]
    pub change_time: String,
    #[serde(rename = "modifytime")]
    pub modify_time: String,
    #[serde(rename = "accesstime")]
    pub access_time: String,
    #[serde(rename = "backuptime")]
    pub backup_time: String,
    #[serde(rename = "readonly")]
    pub read_only: bool,
    pub contents: XmlDirectoryContents,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XmlDirectoryContents {
    #[serde(rename = "directory", default)]
    pub directories: Vec<XmlDirectory>,
    #[serde(rename = "file", default)]
    pub files: Vec<XmlFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlFile {
    pub name: String,
    #[serde(rename = "fileuid")]
    pub uid: u64,
    pub length: u64,
    #[serde(rename = "creationtime")]
    pub creation_time: String,
    #[serde(rename = "changetime")]
    pub change_time: String,
    #[serde(rename = "modifytime")]
    pub modify_time: String,
    #[serde(rename = "accesstime")]
    pub access_time: String,
    #[serde(rename = "backuptime")]
    pub backup_time: String,
    #[serde(rename = "readonly")]
    pub read_only: bool,
    #[serde(default)]
    pub symlink: Option<String>,
    #[serde(rename = "extentinfo", default)]
    pub extent_info: XmlExtentInfo,
    #[serde(rename = "extendedattributes", default)]
    pub extended_attributes: Option<XmlExtendedAttributes>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XmlExtentInfo {
    #[serde(rename = "extent", default)]
    pub extents: Vec<XmlExtent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlExtent {
    pub partition: String,
    #[serde(rename = "startblock")]
    pub start_block: u64,
    #[serde(rename = "bytecount")]
    pub byte_count: u64,
    #[serde(rename = "fileoffset")]
    pub file_offset: u64,
    #[serde(rename = "byteoffset")]
    pub byte_offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XmlExtendedAttributes {
    #[serde(rename = "xattr", default)]
    pub attributes: Vec<XmlXattr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlXattr {
    pub key: String,
    pub value: String,
    #[serde(rename = "@percentencoded", default, skip_serializing_if = "is_false")]
    pub percent_encoded: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn partition_str(p: Partition) -> &'static str {
    match p {
        Partition::IndexPartition => "a",
        Partition::DataPartition => "b",
    }
}

fn partition_from_str(s: &str) -> Result<Partition> {
    match s {
        "a" => Ok(Partition::IndexPartition),
        "b" => Ok(Partition::DataPartition),
        other => Err(RustLtfsError::ltfs_index(format!(
            "unrecognized partition id: {other}"
        ))),
    }
}

/// Attribute values containing control characters or `%` are percent-encoded
/// on write and decoded on read, mirroring the supplementary percent-encode
/// rule carried over from the original xattr serialization path.
fn percent_encode_if_needed(value: &[u8]) -> (String, bool) {
    let needs_encoding = value
        .iter()
        .any(|&b| b < 0x20 || b == b'%' || !value.is_ascii());
    if !needs_encoding {
        if let Ok(s) = std::str::from_utf8(value) {
            return (s.to_string(), false);
        }
    }
    let mut out = String::with_capacity(value.len() * 3);
    for &b in value {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    (out, true)
}

/// Name percent-encoding: a byte is encoded iff it is `:` or an ASCII
/// control byte other than TAB/LF/CR, written as uppercase `%XX`. Other
/// bytes, including UTF-8 multi-byte sequences, pass through untouched.
fn encode_name(name: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(name.len());
    for &b in name.as_bytes() {
        let needs_encoding = b == b':' || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'));
        if needs_encoding {
            out.extend_from_slice(format!("%{b:02X}").as_bytes());
        } else {
            out.push(b);
        }
    }
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn decode_name(name: &str) -> String {
    String::from_utf8_lossy(&percent_decode(name)).into_owned()
}

fn percent_decode(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn dentry_to_xml_file(d: &Arc<Dentry>) -> XmlFile {
    let meta = d.meta.read();
    let ts = &meta.timestamps;
    let extents = meta
        .extents
        .iter()
        .map(|e| XmlExtent {
            partition: partition_str(e.partition).to_string(),
            start_block: e.start_block,
            byte_count: e.byte_count,
            file_offset: e.file_offset,
            byte_offset: e.byte_offset,
        })
        .collect();
    let length = meta
        .extents
        .iter()
        .map(|e| e.file_offset + e.byte_count)
        .max()
        .unwrap_or(0);
    let xattrs: Vec<XmlXattr> = meta
        .xattrs
        .iter()
        .map(|a| {
            let (value, encoded) = percent_encode_if_needed(&a.value);
            XmlXattr {
                key: a.name.clone(),
                value,
                percent_encoded: encoded,
            }
        })
        .collect();
    XmlFile {
        name: encode_name(&d.canonical_name()),
        uid: d.uid,
        length,
        creation_time: ts.creation.clone(),
        change_time: ts.change.clone(),
        modify_time: ts.modify.clone(),
        access_time: ts.access.clone(),
        backup_time: ts.backup.clone(),
        read_only: meta.flags.is_read_only,
        symlink: meta.symlink_target.clone(),
        extent_info: XmlExtentInfo { extents },
        extended_attributes: if xattrs.is_empty() {
            None
        } else {
            Some(XmlExtendedAttributes { attributes: xattrs })
        },
    }
}

fn dentry_to_xml_directory(d: &Arc<Dentry>) -> XmlDirectory {
    let (ts, read_only) = {
        let meta = d.meta.read();
        (meta.timestamps.clone(), meta.flags.is_read_only)
    };

    let children = d.contents.read().values_by_uid();
    let mut directories = Vec::new();
    let mut files = Vec::new();
    for child in &children {
        if child.is_directory() {
            directories.push(dentry_to_xml_directory(child));
        } else {
            files.push(dentry_to_xml_file(child));
        }
    }
    XmlDirectory {
        name: encode_name(&d.canonical_name()),
        uid: d.uid,
        creation_time: ts.creation,
        change_time: ts.change,
        modify_time: ts.modify,
        access_time: ts.access,
        backup_time: ts.backup,
        read_only,
        contents: XmlDirectoryContents { directories, files },
    }
}

/// Serialize `index`'s tree into the on-tape XML document, including the
/// self-pointer location and whichever generation/lock-state fields are set.
pub fn serialize(index: &Index) -> Result<String> {
    let self_pointer = index.self_pointer.lock().unwrap_or(BlockAddress {
        partition: Partition::IndexPartition,
        block: 0,
    });
    let doc = XmlIndex {
        version: index.schema_version.clone(),
        creator: index.creator.clone(),
        volumeuuid: index.volume_uuid.clone(),
        generationnumber: index.generation(),
        updatetime: index.mod_time.lock().clone(),
        location: XmlLocation {
            partition: partition_str(self_pointer.partition).to_string(),
            start_block: self_pointer.block,
        },
        previousgenerationlocation: index.previous_generation_pointer.lock().map(|p| XmlLocation {
            partition: partition_str(p.partition).to_string(),
            start_block: p.block,
        }),
        allowpolicyupdate: Some(
            index
                .criteria_allow_update
                .load(std::sync::atomic::Ordering::SeqCst),
        ),
        volumelockstate: Some(index.volume_lock_state.lock().as_str().to_string()),
        highestfileuid: Some(index.highest_file_uid()),
        root_directory: dentry_to_xml_directory(&index.root),
    };
    quick_xml::se::to_string(&doc).map_err(|e| RustLtfsError::ltfs_index(e.to_string()))
}

/// Parse an on-tape XML index document and rebuild the dentry tree plus an
/// [`Index`] whose counters and UID watermark reflect what was read.
pub fn deserialize(xml: &str, case_sensitive: bool) -> Result<Arc<Index>> {
    let doc: XmlIndex =
        quick_xml::de::from_str(xml).map_err(|e| RustLtfsError::ltfs_index(e.to_string()))?;

    let index = Index::new_formatted(
        doc.volumeuuid.clone(),
        doc.creator.clone(),
        &doc.root_directory.creation_time,
    );
    index.set_generation(doc.generationnumber);
    *index.mod_time.lock() = doc.updatetime.clone();
    *index.self_pointer.lock() = Some(BlockAddress {
        partition: partition_from_str(&doc.location.partition)?,
        block: doc.location.start_block,
    });
    if let Some(prev) = &doc.previousgenerationlocation {
        *index.previous_generation_pointer.lock() = Some(BlockAddress {
            partition: partition_from_str(&prev.partition)?,
            block: prev.start_block,
        });
    }
    if let Some(state) = &doc.volumelockstate {
        *index.volume_lock_state.lock() = VolumeLockState::parse(state)?;
    }
    index
        .criteria_allow_update
        .store(doc.allowpolicyupdate.unwrap_or(true), std::sync::atomic::Ordering::SeqCst);

    // Replace the freshly-formatted root with one carrying the parsed root's
    // identity and attributes, then recursively rebuild its subtree.
    apply_directory_fields(&index.root, &doc.root_directory);
    let mut file_count = 0u64;
    let mut highest_uid = index.root.uid;
    rebuild_children(
        &index,
        &index.root,
        &doc.root_directory.contents,
        case_sensitive,
        &mut file_count,
        &mut highest_uid,
    )?;
    if let Some(declared) = doc.highestfileuid {
        highest_uid = highest_uid.max(declared);
    }
    index.observe_uid(highest_uid);
    index.set_file_count(file_count);
    index.unset_index_dirty(true);
    Ok(index)
}

fn apply_directory_fields(d: &Arc<Dentry>, x: &XmlDirectory) {
    let mut meta = d.meta.write();
    meta.timestamps.creation = x.creation_time.clone();
    meta.timestamps.change = x.change_time.clone();
    meta.timestamps.modify = x.modify_time.clone();
    meta.timestamps.access = x.access_time.clone();
    meta.timestamps.backup = x.backup_time.clone();
    meta.flags.is_read_only = x.read_only;
}

fn rebuild_children(
    index: &Arc<Index>,
    parent: &Arc<Dentry>,
    contents: &XmlDirectoryContents,
    case_sensitive: bool,
    file_count: &mut u64,
    highest_uid: &mut u64,
) -> Result<()> {
    for xdir in &contents.directories {
        let name = decode_name(&xdir.name);
        let child = Dentry::new(
            xdir.uid,
            name.clone(),
            name,
            true,
            xdir.read_only,
            &xdir.creation_time,
        );
        crate::fs_tree::attach_child(parent, &child, case_sensitive);
        apply_directory_fields(&child, xdir);
        *highest_uid = (*highest_uid).max(xdir.uid);
        rebuild_children(
            index,
            &child,
            &xdir.contents,
            case_sensitive,
            file_count,
            highest_uid,
        )?;
    }
    for xfile in &contents.files {
        let name = decode_name(&xfile.name);
        let child = Dentry::new(
            xfile.uid,
            name.clone(),
            name,
            false,
            xfile.read_only,
            &xfile.creation_time,
        );
        crate::fs_tree::attach_child(parent, &child, case_sensitive);
        {
            let mut meta = child.meta.write();
            meta.timestamps.change = xfile.change_time.clone();
            meta.timestamps.modify = xfile.modify_time.clone();
            meta.timestamps.access = xfile.access_time.clone();
            meta.timestamps.backup = xfile.backup_time.clone();
            meta.symlink_target = xfile.symlink.clone();
            meta.extents = xfile
                .extent_info
                .extents
                .iter()
                .map(|e| Result::<Extent>::Ok(Extent {
                    partition: partition_from_str(&e.partition)?,
                    start_block: e.start_block,
                    byte_offset: e.byte_offset,
                    byte_count: e.byte_count,
                    file_offset: e.file_offset,
                }))
                .collect::<Result<Vec<_>>>()?;
            if let Some(xattrs) = &xfile.extended_attributes {
                meta.xattrs = xattrs
                    .attributes
                    .iter()
                    .map(|a| ExtendedAttribute {
                        name: a.key.clone(),
                        value: if a.percent_encoded {
                            percent_decode(&a.value)
                        } else {
                            a.value.clone().into_bytes()
                        },
                        percent_encode: a.percent_encoded,
                    })
                    .collect();
            }
        }
        *highest_uid = (*highest_uid).max(xfile.uid);
        *file_count += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_tree() {
        let index = Index::new_formatted(
            "11111111-1111-1111-1111-111111111111".into(),
            "rust-ltfs-test".into(),
            "2026-01-01T00:00:00Z",
        );
        *index.self_pointer.lock() = Some(BlockAddress {
            partition: Partition::IndexPartition,
            block: 5,
        });
        let dir = index
            .allocate_dentry(&index.root, "docs", true, false, "2026-01-01T00:00:00Z")
            .unwrap();
        let file = index
            .allocate_dentry(&dir, "a.txt", false, false, "2026-01-01T00:00:00Z")
            .unwrap();
        file.meta.write().extents.push(Extent {
            partition: Partition::DataPartition,
            start_block: 10,
            byte_offset: 0,
            byte_count: 100,
            file_offset: 0,
        });

        let xml = serialize(&index).unwrap();
        let restored = deserialize(&xml, false).unwrap();

        assert_eq!(restored.volume_uuid, index.volume_uuid);
        assert_eq!(restored.generation(), index.generation());
        let restored_dir = restored.root.contents.read().get("docs").unwrap();
        assert!(restored_dir.is_directory());
        let restored_file = restored_dir.contents.read().get("a.txt").unwrap();
        assert_eq!(restored_file.meta.read().extents.len(), 1);
    }

    #[test]
    fn percent_encodes_binary_xattr_values() {
        let (encoded, flag) = percent_encode_if_needed(&[0x00, b'%', b'a']);
        assert!(flag);
        assert_eq!(encoded, "%00%25a");
        assert_eq!(percent_decode(&encoded), vec![0x00, b'%', b'a']);
    }

    #[test]
    fn name_encoding_escapes_only_colon_and_control_bytes() {
        let encoded = encode_name("a:b\x01c\td\ne");
        assert_eq!(encoded, "a%3Ab%01c\td\ne");
        assert_eq!(decode_name(&encoded), "a:b\x01c\td\ne");
    }

    #[test]
    fn name_round_trip_preserves_a_colon_in_a_directory_name() {
        let index = Index::new_formatted(
            "11111111-1111-1111-1111-111111111111".into(),
            "rust-ltfs-test".into(),
            "2026-01-01T00:00:00Z",
        );
        index
            .allocate_dentry(&index.root, "drive:c", true, false, "2026-01-01T00:00:00Z")
            .unwrap();
        let xml = serialize(&index).unwrap();
        assert!(xml.contains("drive%3Ac"));
        let restored = deserialize(&xml, false).unwrap();
        assert!(restored.root.contents.read().get("drive:c").is_some());
    }
}
