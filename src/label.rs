//! Volume label: the ANSI tape label plus the XML label record written at
//! block 2 of each partition.

use crate::error::{Result, RustLtfsError};
use serde::{Deserialize, Serialize};

pub const ANSI_LABEL_LEN: usize = 80;

/// Physical partition number (0/1) paired with the logical id character
/// ('a'..'z') LTFS uses in the index and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionIdMap {
    pub dp_num: u8,
    pub dp_id: char,
    pub ip_num: u8,
    pub ip_id: char,
}

impl PartitionIdMap {
    pub fn validate(&self) -> Result<()> {
        if self.dp_id == self.ip_id {
            return Err(RustLtfsError::LabelInvalid(
                "dp_id and ip_id must differ".to_string(),
            ));
        }
        if !self.dp_id.is_ascii_lowercase() || !self.ip_id.is_ascii_lowercase() {
            return Err(RustLtfsError::LabelInvalid(
                "partition ids must be 'a'..'z'".to_string(),
            ));
        }
        if self.dp_num == self.ip_num {
            return Err(RustLtfsError::LabelInvalid(
                "dp_num and ip_num must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exactly 6 alphanumeric characters, or six spaces meaning "no barcode".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode(String);

impl Barcode {
    pub fn parse(s: &str) -> Result<Self> {
        if s.chars().count() != 6 {
            return Err(RustLtfsError::BarcodeLength(s.to_string()));
        }
        let blank = s.chars().all(|c| c == ' ');
        let valid = blank || s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(RustLtfsError::BarcodeInvalid(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn none() -> Self {
        Self("      ".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "ltfslabel")]
pub struct XmlLabel {
    #[serde(rename = "@version")]
    pub version: String,
    pub creator: String,
    pub formattime: String,
    pub volumeuuid: String,
    pub blocksize: u32,
    pub compression: bool,
    pub barcode: Option<String>,
    pub partitions: XmlPartitionMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlPartitionMap {
    pub dataindex: String,
    pub index: String,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub volume_uuid: String,
    pub creator: String,
    pub format_time: String,
    pub block_size: u32,
    pub compression: bool,
    pub barcode: Barcode,
    pub partitions: PartitionIdMap,
}

pub const MIN_BLOCK_SIZE: u32 = 4096;

impl Label {
    pub fn new(
        volume_uuid: String,
        creator: String,
        format_time: String,
        block_size: u32,
        compression: bool,
        barcode: Barcode,
        partitions: PartitionIdMap,
    ) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(RustLtfsError::SmallBlockSize(block_size));
        }
        partitions.validate()?;
        Ok(Self {
            volume_uuid,
            creator,
            format_time,
            block_size,
            compression,
            barcode,
            partitions,
        })
    }

    /// 80-byte ANSI VOL1 label, left-padded per field, space-filled.
    pub fn ansi_bytes(&self) -> [u8; ANSI_LABEL_LEN] {
        let mut buf = [b' '; ANSI_LABEL_LEN];
        buf[0..4].copy_from_slice(b"VOL1");
        let barcode = self.barcode.as_str().as_bytes();
        let n = barcode.len().min(6);
        buf[4..4 + n].copy_from_slice(&barcode[..n]);
        buf[79] = b'3';
        buf
    }

    pub fn to_xml(&self) -> Result<String> {
        let doc = XmlLabel {
            version: "2.4.0".to_string(),
            creator: self.creator.clone(),
            formattime: self.format_time.clone(),
            volumeuuid: self.volume_uuid.clone(),
            blocksize: self.block_size,
            compression: self.compression,
            barcode: if self.barcode == Barcode::none() {
                None
            } else {
                Some(self.barcode.as_str().to_string())
            },
            partitions: XmlPartitionMap {
                dataindex: self.partitions.dp_id.to_string(),
                index: self.partitions.ip_id.to_string(),
            },
        };
        quick_xml::se::to_string(&doc).map_err(|e| RustLtfsError::LabelInvalid(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc: XmlLabel =
            quick_xml::de::from_str(xml).map_err(|e| RustLtfsError::LabelInvalid(e.to_string()))?;
        let dp_id = doc
            .partitions
            .dataindex
            .chars()
            .next()
            .ok_or_else(|| RustLtfsError::LabelInvalid("empty dataindex id".to_string()))?;
        let ip_id = doc
            .partitions
            .index
            .chars()
            .next()
            .ok_or_else(|| RustLtfsError::LabelInvalid("empty index id".to_string()))?;
        let barcode = match &doc.barcode {
            Some(b) => Barcode::parse(b)?,
            None => Barcode::none(),
        };
        Label::new(
            doc.volumeuuid,
            doc.creator,
            doc.formattime,
            doc.blocksize,
            doc.compression,
            barcode,
            PartitionIdMap {
                dp_num: 0,
                dp_id,
                ip_num: 1,
                ip_id,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> PartitionIdMap {
        PartitionIdMap {
            dp_num: 0,
            dp_id: 'a',
            ip_num: 1,
            ip_id: 'b',
        }
    }

    #[test]
    fn rejects_small_block_size() {
        let err = Label::new(
            "uuid".into(),
            "c".into(),
            "t".into(),
            1024,
            true,
            Barcode::none(),
            sample_map(),
        )
        .unwrap_err();
        assert!(matches!(err, RustLtfsError::SmallBlockSize(1024)));
    }

    #[test]
    fn rejects_duplicate_partition_ids() {
        let mut map = sample_map();
        map.ip_id = 'a';
        let err = Label::new(
            "uuid".into(),
            "c".into(),
            "t".into(),
            524288,
            true,
            Barcode::none(),
            map,
        )
        .unwrap_err();
        assert!(matches!(err, RustLtfsError::LabelInvalid(_)));
    }

    #[test]
    fn barcode_accepts_six_spaces_as_none() {
        let b = Barcode::parse("      ").unwrap();
        assert_eq!(b, Barcode::none());
    }

    #[test]
    fn barcode_rejects_wrong_length() {
        let err = Barcode::parse("ABC").unwrap_err();
        assert!(matches!(err, RustLtfsError::BarcodeLength(_)));
    }

    #[test]
    fn xml_round_trips() {
        let label = Label::new(
            "11111111-1111-1111-1111-111111111111".into(),
            "rust-ltfs-test".into(),
            "2026-01-01T00:00:00Z".into(),
            524288,
            true,
            Barcode::parse("VOL001").unwrap(),
            sample_map(),
        )
        .unwrap();
        let xml = label.to_xml().unwrap();
        let restored = Label::from_xml(&xml).unwrap();
        assert_eq!(restored.volume_uuid, label.volume_uuid);
        assert_eq!(restored.block_size, label.block_size);
    }
}
