//! Cache record schema definitions and versioning.
//!
//! Every cached subject is its own redb database file. All table
//! definitions are compile-time constants.
//!
//! # Table Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE                                               │
//! │   Key: &str                                                  │
//! │   Value: &[u8] (bincode)                                     │
//! │   Entries: "record_metadata" -> RecordMetadata               │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ FIELDS_TABLE                                                 │
//! │   Key: &str (field name)                                     │
//! │   Value: &[u8] (bincode-serialized FieldValue, tagged)       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ TENSORS_TABLE                                                │
//! │   Key: &str ("dff")                                          │
//! │   Value: &[u8] (raw little-endian f32, row-major)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bincode::Options;
use redb::TableDefinition;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Current schema version.
///
/// Records written with another version are treated as stale and rebuilt.
pub const SCHEMA_VERSION: u32 = 2;

/// Upper bound on one bincode-encoded field or metadata value.
pub const MAX_FIELD_BYTES: u64 = 64 * 1024 * 1024;

/// Metadata key in the metadata table.
pub const METADATA_KEY: &str = "record_metadata";

/// Key of the aligned tensor in the tensors table.
pub const DFF_KEY: &str = "dff";

/// Record-level metadata.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Named, tagged subject fields.
pub const FIELDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("fields");

/// Raw tensor payloads.
pub const TENSORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tensors");

/// Metadata stored in every cache record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// When the record was written.
    pub written_at: Timestamp,
}

impl RecordMetadata {
    /// Metadata for a record written now.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            written_at: Timestamp::now(),
        }
    }

    /// Checks if this record is compatible with the current schema.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// bincode options for every metadata and field value.
///
/// Fixed-width integers, as `bincode::serialize` writes them, with a size
/// limit so a damaged length prefix cannot request an unbounded allocation.
pub fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_FIELD_BYTES)
}

/// Encodes a tensor payload as little-endian f32 bytes in logical order.
pub fn encode_f32(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(f32::to_le_bytes).collect()
}

/// Decodes little-endian f32 bytes; `None` if the length is not a multiple
/// of 4.
pub fn decode_f32(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        assert_eq!(SCHEMA_VERSION, 2);
    }

    #[test]
    fn test_record_metadata_new() {
        let meta = RecordMetadata::new();
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert!(meta.is_compatible());
    }

    #[test]
    fn test_incompatible_metadata() {
        let meta = RecordMetadata {
            schema_version: SCHEMA_VERSION + 1,
            written_at: Timestamp::from_millis(0),
        };
        assert!(!meta.is_compatible());
    }

    #[test]
    fn test_f32_bytes_are_bit_exact() {
        let values = vec![0.0f32, -0.0, 1.5, f32::MIN_POSITIVE, f32::NAN, f32::INFINITY];
        let restored = decode_f32(&encode_f32(values.iter().copied())).unwrap();
        let bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        let restored_bits: Vec<u32> = restored.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, restored_bits);
    }

    #[test]
    fn test_codec_matches_default_bincode() {
        let meta = RecordMetadata::new();
        assert_eq!(
            codec().serialize(&meta).unwrap(),
            bincode::serialize(&meta).unwrap()
        );
    }

    #[test]
    fn test_codec_rejects_oversized_length_prefix() {
        // A u64 length prefix claiming u64::MAX elements.
        let bytes = u64::MAX.to_le_bytes();
        assert!(codec().deserialize::<Vec<u64>>(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        assert!(decode_f32(&[0, 0, 128]).is_none());
    }
}
