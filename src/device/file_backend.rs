//! File-backed test/simulated tape backend: every tape record becomes a
//! file under a base directory, named `{partition}_{block}_{suffix}` with
//! suffix `R` (data block), `F` (filemark) or `E` (EOD marker). This is the
//! backend exercised by the CLI's `--device <DIR>` form and by the
//! integration tests; it never touches a real drive.

use super::{
    DriveInfo, LoadOption, MamAttribute, MamAttributeFormat, MediaType, SpaceState, TapeBackend,
    TapePosition, WriteProtectFlags,
};
use crate::error::{Result, RustLtfsError};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct PartitionState {
    current_block: u64,
    append_pos: u64,
    space_state: SpaceState,
    wp_flags: WriteProtectFlags,
}

impl Default for PartitionState {
    fn default() -> Self {
        Self {
            current_block: 0,
            append_pos: 0,
            space_state: SpaceState::Writable,
            wp_flags: WriteProtectFlags::empty(),
        }
    }
}

pub struct FileBackend {
    root: PathBuf,
    partitions: [PartitionState; 2],
    capacity_bytes: u64,
    media_type: MediaType,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>, capacity_bytes: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            partitions: [PartitionState::default(), PartitionState::default()],
            capacity_bytes,
            media_type: MediaType::Lto8Rw,
        })
    }

    fn record_path(&self, partition: u8, block: u64, suffix: char) -> PathBuf {
        self.root.join(format!("{partition}_{block}_{suffix}"))
    }

    /// MAM attributes live in Cartridge Memory, not the data stream, so they
    /// are persisted as their own file (`mam_{partition}_{id}`) rather than a
    /// `{block}_{suffix}` record — a new `FileBackend` over the same root
    /// (a fresh process remounting the same simulated cartridge) must see
    /// the same coherency attributes the previous instance wrote.
    fn mam_path(&self, partition: u8, id: u16) -> PathBuf {
        self.root.join(format!("mam_{partition}_{id:04x}"))
    }

    /// Highest block number any data record (`R`) or filemark (`F`) occupies
    /// on `partition`, plus one — i.e. the position immediately after the
    /// last real record, where a trailing EOD marker belongs. EOD (`E`)
    /// files themselves are excluded from this scan: counting them would
    /// shift "highest" one block past an EOD marker that was itself placed
    /// here, so `has_eod` would look for it one block too far out.
    fn highest_recorded_block(&self, partition: u8) -> u64 {
        let prefix = format!("{partition}_");
        let mut highest = 0u64;
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some((block_str, suffix)) = rest.rsplit_once('_') {
                    if suffix == "E" {
                        continue;
                    }
                    if let Ok(block) = block_str.parse::<u64>() {
                        highest = highest.max(block + 1);
                    }
                }
            }
        }
        highest
    }

    fn part_idx(partition: u8) -> usize {
        (partition & 1) as usize
    }
}

impl TapeBackend for FileBackend {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> Result<bool> {
        Ok(self.root.is_dir())
    }

    fn position(&self, partition: u8) -> Result<TapePosition> {
        let p = &self.partitions[Self::part_idx(partition)];
        Ok(TapePosition {
            partition,
            block_number: p.current_block,
            file_number: 0,
            set_number: 0,
            end_of_data: self.has_eod(partition)?,
            beginning_of_partition: p.current_block == 0,
        })
    }

    fn seek(&mut self, partition: u8, block: u64) -> Result<()> {
        self.partitions[Self::part_idx(partition)].current_block = block;
        Ok(())
    }

    fn seek_eod(&mut self, partition: u8) -> Result<u64> {
        let block = self.highest_recorded_block(partition);
        let p = &mut self.partitions[Self::part_idx(partition)];
        p.current_block = block;
        p.append_pos = block;
        Ok(block)
    }

    fn space_filemarks(&mut self, partition: u8, n: i64) -> Result<()> {
        let idx = Self::part_idx(partition);
        let mut block = self.partitions[idx].current_block as i128;
        let step: i128 = if n >= 0 { 1 } else { -1 };
        let mut remaining = n.unsigned_abs();
        while remaining > 0 {
            block += step;
            if block < 0 {
                return Err(RustLtfsError::bad_arg("space before beginning of partition"));
            }
            if self.record_path(partition, block as u64, 'F').exists() {
                remaining -= 1;
            }
            if block as u64 > self.highest_recorded_block(partition) + 1 {
                return Err(RustLtfsError::EodMissing(format!("partition {partition}")));
            }
        }
        self.partitions[idx].current_block = block as u64;
        Ok(())
    }

    fn read_block(&mut self, partition: u8, buf: &mut Vec<u8>) -> Result<usize> {
        let idx = Self::part_idx(partition);
        let block = self.partitions[idx].current_block;
        let data_path = self.record_path(partition, block, 'R');
        if data_path.exists() {
            let data = fs::read(&data_path)?;
            buf.clear();
            buf.extend_from_slice(&data);
            self.partitions[idx].current_block += 1;
            return Ok(data.len());
        }
        if self.record_path(partition, block, 'F').exists() {
            self.partitions[idx].current_block += 1;
            return Ok(0);
        }
        Err(RustLtfsError::EodMissing(format!("partition {partition}")))
    }

    fn write_block(&mut self, partition: u8, data: &[u8]) -> Result<()> {
        let idx = Self::part_idx(partition);
        if self.partitions[idx]
            .wp_flags
            .intersects(WriteProtectFlags::PHYSICAL | WriteProtectFlags::LOGICAL | WriteProtectFlags::FORCE_READ_ONLY)
        {
            return Err(RustLtfsError::WriteProtect);
        }
        if self.partitions[idx].wp_flags.contains(WriteProtectFlags::WRITE_ERROR) {
            return Err(RustLtfsError::WriteError);
        }
        match self.partitions[idx].space_state {
            SpaceState::NoSpace => return Err(RustLtfsError::NoSpace),
            SpaceState::LessSpace => tracing::warn!(partition, "writing in less-space state"),
            SpaceState::Writable => {}
        }
        let block = self.partitions[idx].current_block;
        fs::write(self.record_path(partition, block, 'R'), data)?;
        self.partitions[idx].current_block += 1;
        self.partitions[idx].append_pos = self.partitions[idx].current_block;
        Ok(())
    }

    fn write_filemark(&mut self, partition: u8, count: u32, _immediate: bool) -> Result<()> {
        let idx = Self::part_idx(partition);
        for _ in 0..count.max(1) {
            let block = self.partitions[idx].current_block;
            fs::write(self.record_path(partition, block, 'F'), [])?;
            self.partitions[idx].current_block += 1;
        }
        self.partitions[idx].append_pos = self.partitions[idx].current_block;
        Ok(())
    }

    fn append_position(&self, partition: u8) -> u64 {
        self.partitions[Self::part_idx(partition)].append_pos
    }

    fn set_append_position(&mut self, partition: u8, block: u64) {
        let idx = Self::part_idx(partition);
        self.partitions[idx].append_pos = block;
        self.partitions[idx].current_block = block;
    }

    fn space_state(&self, partition: u8) -> SpaceState {
        self.partitions[Self::part_idx(partition)].space_state
    }

    fn write_protect_flags(&self, partition: u8) -> WriteProtectFlags {
        self.partitions[Self::part_idx(partition)].wp_flags
    }

    fn set_force_read_only(&mut self, partition: u8, on: bool) {
        let idx = Self::part_idx(partition);
        self.partitions[idx]
            .wp_flags
            .set(WriteProtectFlags::FORCE_READ_ONLY, on);
    }

    fn set_write_error(&mut self, partition: u8, on: bool) {
        let idx = Self::part_idx(partition);
        self.partitions[idx].wp_flags.set(WriteProtectFlags::WRITE_ERROR, on);
    }

    fn read_mam_attribute(&self, partition: u8, id: u16) -> Result<Option<MamAttribute>> {
        let path = self.mam_path(partition, id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let Some((&format_byte, data)) = bytes.split_first() else {
            return Ok(None);
        };
        let format = match format_byte {
            0x00 => MamAttributeFormat::Binary,
            0x01 => MamAttributeFormat::Ascii,
            _ => MamAttributeFormat::Text,
        };
        Ok(Some(MamAttribute {
            attribute_id: id,
            format,
            data: data.to_vec(),
        }))
    }

    fn write_mam_attribute(&mut self, partition: u8, attr: MamAttribute) -> Result<()> {
        let mut bytes = Vec::with_capacity(1 + attr.data.len());
        bytes.push(attr.format as u8);
        bytes.extend_from_slice(&attr.data);
        fs::write(self.mam_path(partition, attr.attribute_id), bytes)?;
        Ok(())
    }

    fn load(&mut self, _option: LoadOption) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        Ok(())
    }

    fn reserve_unit(&mut self) -> Result<()> {
        Ok(())
    }

    fn release_unit(&mut self) -> Result<()> {
        Ok(())
    }

    fn erase_partition(&mut self, partition: u8) -> Result<()> {
        let prefix = format!("{partition}_");
        for entry in fs::read_dir(&self.root)?.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        let idx = Self::part_idx(partition);
        self.partitions[idx] = PartitionState::default();
        Ok(())
    }

    fn capacity_bytes(&self, _partition: u8) -> u64 {
        self.capacity_bytes
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn drive_info(&self) -> DriveInfo {
        DriveInfo {
            vendor_id: "RUSTLTFS".to_string(),
            product_id: "FILEBACKEND".to_string(),
            serial_number: "000000".to_string(),
            device_path: self.root.to_string_lossy().to_string(),
        }
    }

    fn has_eod(&self, partition: u8) -> Result<bool> {
        let highest = self.highest_recorded_block(partition);
        Ok(self.record_path(partition, highest, 'E').exists())
    }

    fn reconstruct_eod_at(&mut self, partition: u8, block: u64) -> Result<()> {
        fs::write(self.record_path(partition, block, 'E'), [])?;
        Ok(())
    }
}

impl FileBackend {
    /// Write the EOD marker file at the current highest recorded block.
    pub fn write_eod(&mut self, partition: u8) -> Result<()> {
        let block = self.highest_recorded_block(partition);
        fs::write(self.record_path(partition, block, 'E'), [])?;
        Ok(())
    }

    pub fn remove_eod(&mut self, partition: u8) -> Result<()> {
        let block = self.highest_recorded_block(partition);
        let path = self.record_path(partition, block, 'E');
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut be = FileBackend::new(dir.path(), 1_000_000).unwrap();
        be.write_block(0, b"hello").unwrap();
        be.write_filemark(0, 1, false).unwrap();
        be.seek(0, 0).unwrap();
        let mut buf = Vec::new();
        let n = be.read_block(0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        let n = be.read_block(0, &mut buf).unwrap();
        assert_eq!(n, 0); // filemark
    }

    #[test]
    fn seek_eod_finds_highest_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut be = FileBackend::new(dir.path(), 1_000_000).unwrap();
        be.write_block(1, b"a").unwrap();
        be.write_block(1, b"b").unwrap();
        let block = be.seek_eod(1).unwrap();
        assert_eq!(block, 2);
    }

    #[test]
    fn write_protect_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut be = FileBackend::new(dir.path(), 1_000_000).unwrap();
        be.set_force_read_only(0, true);
        let err = be.write_block(0, b"x").unwrap_err();
        assert!(matches!(err, RustLtfsError::WriteProtect));
    }

    #[test]
    fn eod_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut be = FileBackend::new(dir.path(), 1_000_000).unwrap();
        be.write_block(0, b"a").unwrap();
        assert!(!be.has_eod(0).unwrap());
        be.write_eod(0).unwrap();
        assert!(be.has_eod(0).unwrap());
    }
}
