//! Vocabulary shared by every tape device backend: media identity, position
//! reporting, MAM attributes and the space/locate primitives a backend must
//! expose. Trimmed to the subset a backend-agnostic volume engine needs —
//! the full SCSI command-set enumeration lives one layer further down,
//! inside the (out of scope) CDB encoder.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    NoTape,
    Lto3Rw,
    Lto3Worm,
    Lto3Ro,
    Lto4Rw,
    Lto4Worm,
    Lto4Ro,
    Lto5Rw,
    Lto5Worm,
    Lto5Ro,
    Lto6Rw,
    Lto6Worm,
    Lto6Ro,
    Lto7Rw,
    Lto7Worm,
    Lto7Ro,
    Lto8Rw,
    Lto8Worm,
    Lto8Ro,
    Lto9Rw,
    Lto9Worm,
    Lto9Ro,
    Unknown(u16),
}

impl MediaType {
    pub fn from_media_type_code(code: u16) -> Self {
        match code {
            0x0044 => Self::Lto3Rw,
            0x0144 => Self::Lto3Worm,
            0x0244 => Self::Lto3Ro,
            0x0046 => Self::Lto4Rw,
            0x0146 => Self::Lto4Worm,
            0x0246 => Self::Lto4Ro,
            0x0058 => Self::Lto5Rw,
            0x0158 => Self::Lto5Worm,
            0x0258 => Self::Lto5Ro,
            0x005A => Self::Lto6Rw,
            0x015A => Self::Lto6Worm,
            0x025A => Self::Lto6Ro,
            0x005C => Self::Lto7Rw,
            0x015C => Self::Lto7Worm,
            0x025C => Self::Lto7Ro,
            0x005E => Self::Lto8Rw,
            0x015E => Self::Lto8Worm,
            0x025E => Self::Lto8Ro,
            0x0060 => Self::Lto9Rw,
            0x0160 => Self::Lto9Worm,
            0x0260 => Self::Lto9Ro,
            _ => Self::Unknown(code),
        }
    }

    pub fn is_worm(&self) -> bool {
        matches!(
            self,
            Self::Lto3Worm | Self::Lto4Worm | Self::Lto5Worm | Self::Lto6Worm
                | Self::Lto7Worm | Self::Lto8Worm | Self::Lto9Worm
        )
    }
}

/// Where the device head currently sits, reported after every locate/space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapePosition {
    pub partition: u8,
    pub block_number: u64,
    pub file_number: u64,
    pub set_number: u64,
    pub end_of_data: bool,
    pub beginning_of_partition: bool,
}

/// A Cartridge Memory / MAM attribute. Attribute `0x080C` carries the
/// application-defined coherency record used at mount time to pick the
/// newest index between partitions without a full scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MamAttribute {
    pub attribute_id: u16,
    pub format: MamAttributeFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MamAttributeFormat {
    Binary = 0x00,
    Ascii = 0x01,
    Text = 0x02,
}

pub const MAM_COHERENCY_ATTRIBUTE_ID: u16 = 0x080C;

/// Coherency record written alongside every index-partition commit so a
/// mount can tell which partition holds the newer generation without
/// reading both indexes. Mirrors spec §6's attribute `0x080C` payload
/// (VCR, count, set id, "LTFS" magic, volume UUID, version) closely enough
/// to support Property 5 (uuid/count/set_id agreement after a write), with
/// the UUID stored as a fixed 37-byte field rather than the exact ASCII
/// packing the real MAM attribute uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoherencyRecord {
    pub generation: u64,
    pub volume_change_ref: u32,
    pub partition: u8,
    pub block: u64,
    pub volume_uuid: String,
}

impl CoherencyRecord {
    const UUID_FIELD_LEN: usize = 37;
    pub const ENCODED_LEN: usize = 8 + 4 + 1 + 8 + Self::UUID_FIELD_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.generation.to_be_bytes());
        out.extend_from_slice(&self.volume_change_ref.to_be_bytes());
        out.push(self.partition);
        out.extend_from_slice(&self.block.to_be_bytes());
        let mut uuid_field = [0u8; Self::UUID_FIELD_LEN];
        let bytes = self.volume_uuid.as_bytes();
        let n = bytes.len().min(Self::UUID_FIELD_LEN);
        uuid_field[..n].copy_from_slice(&bytes[..n]);
        out.extend_from_slice(&uuid_field);
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::ENCODED_LEN {
            return None;
        }
        let uuid_bytes = &data[21..21 + Self::UUID_FIELD_LEN];
        let uuid_end = uuid_bytes.iter().position(|&b| b == 0).unwrap_or(uuid_bytes.len());
        let volume_uuid = String::from_utf8_lossy(&uuid_bytes[..uuid_end]).into_owned();
        Some(Self {
            generation: u64::from_be_bytes(data[0..8].try_into().ok()?),
            volume_change_ref: u32::from_be_bytes(data[8..12].try_into().ok()?),
            partition: data[12],
            block: u64::from_be_bytes(data[13..21].try_into().ok()?),
            volume_uuid,
        })
    }
}

/// Whether a partition's end-of-data marker is present, used by recovery
/// (§4.4.3) to decide whether EOD reconstruction is needed or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodStatus {
    Present,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceType {
    Blocks,
    FileMarks,
    SequentialFileMarks,
    EndOfData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateDestType {
    Block,
    FileMark,
    Eod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveType {
    Standard,
    Slr3,
    Slr1,
    M2488,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOption {
    Unthread,
    LoadThreaded,
    Retension,
}

#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub vendor_id: String,
    pub product_id: String,
    pub serial_number: String,
    pub device_path: String,
}
