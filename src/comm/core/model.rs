//! Block mapping: stable data model.
//!
//! Conventions:
//! - offsets are 0-based byte positions inside one block; booleans add a bit index (`N.B`)
//! - every multi-byte number on the wire is big-endian
//! - a field is identified by `(block_id, offset)`; its name is only unique inside its block

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SCHEMA_VERSION_V1: u32 = 1;

/// Byte count used for `HEX_BLOB` fields that do not declare a `length`.
pub const DEFAULT_HEX_BLOB_LEN: usize = 4;

/// Two header bytes (max length, actual length) precede the characters of a `STRING`.
pub const STRING_HEADER_LEN: usize = 2;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SemanticType {
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "BYTE")]
    Byte,
    #[serde(rename = "INT16")]
    Int16,
    #[serde(rename = "UINT16")]
    UInt16,
    #[serde(rename = "INT32")]
    Int32,
    #[serde(rename = "UINT32")]
    UInt32,
    #[serde(rename = "FLOAT32")]
    Float32,
    #[serde(rename = "CHAR")]
    Char,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "HEX_BLOB")]
    HexBlob,
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl SemanticType {
    /// Maps a type token from a field table (canonical name or vendor alias) to a type.
    ///
    /// Matching is case-insensitive; anything unrecognised becomes `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEEN" => SemanticType::Bool,
            "BYTE" => SemanticType::Byte,
            "CHAR" | "CARACTER" | "CARACTERE" => SemanticType::Char,
            "INT16" | "INT" => SemanticType::Int16,
            "UINT16" | "WORD" | "DEC" => SemanticType::UInt16,
            "INT32" | "DINT" => SemanticType::Int32,
            "UINT32" | "DWORD" | "DUREE" => SemanticType::UInt32,
            "FLOAT32" | "REAL" | "VIRGULE_FLOTTANTE" => SemanticType::Float32,
            "STRING" => SemanticType::String,
            "HEX_BLOB" | "HEXA" => SemanticType::HexBlob,
            _ => SemanticType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Bool => "BOOL",
            SemanticType::Byte => "BYTE",
            SemanticType::Int16 => "INT16",
            SemanticType::UInt16 => "UINT16",
            SemanticType::Int32 => "INT32",
            SemanticType::UInt32 => "UINT32",
            SemanticType::Float32 => "FLOAT32",
            SemanticType::Char => "CHAR",
            SemanticType::String => "STRING",
            SemanticType::HexBlob => "HEX_BLOB",
            SemanticType::Unknown => "UNKNOWN",
        }
    }

    /// Width in bytes for fixed-size types; `None` for STRING, HEX_BLOB and unknown types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            SemanticType::Bool | SemanticType::Byte | SemanticType::Char => Some(1),
            SemanticType::Int16 | SemanticType::UInt16 => Some(2),
            SemanticType::Int32 | SemanticType::UInt32 | SemanticType::Float32 => Some(4),
            SemanticType::String | SemanticType::HexBlob | SemanticType::Unknown => None,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffsetParseError {
    #[error("invalid offset '{0}'")]
    Invalid(String),

    #[error("bit index {bit} out of range 0..=7 in offset '{raw}'")]
    BitOutOfRange { raw: String, bit: u32 },
}

/// Position of a field inside a block: a byte offset, plus a bit index for booleans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldOffset {
    pub byte: u32,
    pub bit: Option<u8>,
}

impl FieldOffset {
    pub fn byte(byte: u32) -> Self {
        Self { byte, bit: None }
    }

    pub fn bit(byte: u32, bit: u8) -> Self {
        Self {
            byte,
            bit: Some(bit),
        }
    }
}

impl FromStr for FieldOffset {
    type Err = OffsetParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        let invalid = || OffsetParseError::Invalid(raw.to_string());

        match text.split_once('.') {
            None => {
                let byte = text.parse::<u32>().map_err(|_| invalid())?;
                Ok(FieldOffset::byte(byte))
            }
            Some((byte_part, bit_part)) => {
                let byte = byte_part.parse::<u32>().map_err(|_| invalid())?;
                let bit = bit_part.parse::<u32>().map_err(|_| invalid())?;
                if bit > 7 {
                    return Err(OffsetParseError::BitOutOfRange {
                        raw: raw.to_string(),
                        bit,
                    });
                }
                Ok(FieldOffset::bit(byte, bit as u8))
            }
        }
    }
}

impl TryFrom<String> for FieldOffset {
    type Error = OffsetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldOffset> for String {
    fn from(value: FieldOffset) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FieldOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "{}.{}", self.byte, bit),
            None => write!(f, "{}", self.byte),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub offset: FieldOffset,
    pub semantic_type: SemanticType,
    /// Type token exactly as written in the field table.
    pub type_token: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// HEX_BLOB: byte count. STRING: declared maximum character count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl FieldDescriptor {
    /// Bytes covered by this field starting at `offset.byte`, when known before reading.
    pub fn width(&self) -> Option<usize> {
        match self.semantic_type {
            SemanticType::String => self.length.map(|len| STRING_HEADER_LEN + len as usize),
            SemanticType::HexBlob => Some(
                self.length
                    .map(|len| len as usize)
                    .unwrap_or(DEFAULT_HEX_BLOB_LEN),
            ),
            other => other.fixed_width(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlockConfig {
    pub block_id: u32,
    pub display_name: String,
    pub fields: BTreeMap<FieldOffset, FieldDescriptor>,
}

impl SourceBlockConfig {
    pub fn new(block_id: u32, display_name: impl Into<String>) -> Self {
        Self {
            block_id,
            display_name: display_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Fields in ascending offset order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Smallest read length covering every field, or `None` if some width is unknown up front.
    ///
    /// Fields of unknown type are ignored: they never decode, whatever the buffer holds.
    pub fn required_len(&self) -> Option<usize> {
        let mut required = 0usize;
        for field in self.fields() {
            if field.semantic_type == SemanticType::Unknown {
                continue;
            }
            let width = field.width()?;
            required = required.max(field.offset.byte as usize + width);
        }
        Some(required)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawBlockSnapshot {
    pub block_id: u32,
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub read_succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawBlockSnapshot {
    pub fn succeeded(block_id: u32, bytes: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            block_id,
            bytes,
            captured_at,
            read_succeeded: true,
            error: None,
        }
    }

    pub fn failed(block_id: u32, captured_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            block_id,
            bytes: Vec::new(),
            captured_at,
            read_succeeded: false,
            error: Some(error.into()),
        }
    }

    pub fn is_all_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Lowercase hex of the raw bytes, as used by raw exports.
    pub fn to_hex(&self) -> String {
        to_hex_lower(&self.bytes)
    }
}

pub fn to_hex_lower(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "BYTE")]
    Byte(u8),
    #[serde(rename = "CHAR")]
    Char(char),
    #[serde(rename = "INT16")]
    Int16(i16),
    #[serde(rename = "UINT16")]
    UInt16(u16),
    #[serde(rename = "INT32")]
    Int32(i32),
    #[serde(rename = "UINT32")]
    UInt32(u32),
    #[serde(rename = "FLOAT32")]
    Float32(f32),
    #[serde(rename = "STRING", rename_all = "camelCase")]
    String {
        text: String,
        max_length: u8,
        actual_length: u8,
    },
    #[serde(rename = "HEX_BLOB")]
    HexBlob(Vec<u8>),
}

impl FieldValue {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            FieldValue::Bool(_) => SemanticType::Bool,
            FieldValue::Byte(_) => SemanticType::Byte,
            FieldValue::Char(_) => SemanticType::Char,
            FieldValue::Int16(_) => SemanticType::Int16,
            FieldValue::UInt16(_) => SemanticType::UInt16,
            FieldValue::Int32(_) => SemanticType::Int32,
            FieldValue::UInt32(_) => SemanticType::UInt32,
            FieldValue::Float32(_) => SemanticType::Float32,
            FieldValue::String { .. } => SemanticType::String,
            FieldValue::HexBlob(_) => SemanticType::HexBlob,
        }
    }

    pub fn to_value_display(&self) -> String {
        match self {
            FieldValue::Bool(value) => value.to_string(),
            FieldValue::Byte(value) => value.to_string(),
            FieldValue::Char(value) => value.to_string(),
            FieldValue::Int16(value) => value.to_string(),
            FieldValue::UInt16(value) => value.to_string(),
            FieldValue::Int32(value) => value.to_string(),
            FieldValue::UInt32(value) => value.to_string(),
            FieldValue::Float32(value) => format!("{value:.3}"),
            FieldValue::String { text, .. } => text.clone(),
            FieldValue::HexBlob(bytes) => format!("0x{}", to_hex_lower(bytes).to_ascii_uppercase()),
        }
    }

    /// Numeric view used by the scanner's non-zero checks; `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Byte(value) => Some(f64::from(*value)),
            FieldValue::Int16(value) => Some(f64::from(*value)),
            FieldValue::UInt16(value) => Some(f64::from(*value)),
            FieldValue::Int32(value) => Some(f64::from(*value)),
            FieldValue::UInt32(value) => Some(f64::from(*value)),
            FieldValue::Float32(value) => Some(f64::from(*value)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Quality {
    Ok,
    Timeout,
    TransportFailure,
    DecodeError,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedValue {
    pub field_name: String,
    pub semantic_type: SemanticType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: String,
    pub offset: FieldOffset,
    pub decode_succeeded: bool,
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecodedValue {
    pub fn decoded(field: &FieldDescriptor, value: FieldValue) -> Self {
        Self {
            field_name: field.name.clone(),
            semantic_type: field.semantic_type,
            value: Some(value),
            unit: field.unit.clone(),
            description: field.description.clone(),
            offset: field.offset,
            decode_succeeded: true,
            quality: Quality::Ok,
            error: None,
        }
    }

    pub fn absent(field: &FieldDescriptor, quality: Quality, error: impl Into<String>) -> Self {
        Self {
            field_name: field.name.clone(),
            semantic_type: field.semantic_type,
            value: None,
            unit: field.unit.clone(),
            description: field.description.clone(),
            offset: field.offset,
            decode_succeeded: false,
            quality,
            error: Some(error.into()),
        }
    }

    pub fn value_display(&self) -> Option<String> {
        self.value.as_ref().map(FieldValue::to_value_display)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRecord {
    pub block_id: u32,
    pub display_name: String,
    pub captured_at: DateTime<Utc>,
    pub values: Vec<DecodedValue>,
}

impl DecodedRecord {
    pub fn get(&self, field_name: &str) -> Option<&DecodedValue> {
        self.values.iter().find(|v| v.field_name == field_name)
    }

    pub fn ok_count(&self) -> usize {
        self.values.iter().filter(|v| v.decode_succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.values.len() - self.ok_count()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub blocks: u32,
    pub blocks_failed: u32,
    pub total: u32,
    pub ok: u32,
    pub timeout: u32,
    pub transport_failure: u32,
    pub decode_error: u32,
    pub duration_ms: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleWarning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<u32>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connected,
    Cycling,
    Disconnected,
}
