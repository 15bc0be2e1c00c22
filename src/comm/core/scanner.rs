//! Block mapping: heuristic scanner for blocks without a field table.
//!
//! Results are guesses. Fields are named by their S7-style address (`DBD0`, `DBW4`, `DBB9`,
//! `DBX2.3`) and carry a "heuristic" description; they are a discovery aid only and must not be
//! treated as decoded configuration.
//!
//! Three independent passes, never interleaved:
//! - [`scan_numeric`]: left to right, FLOAT32 → INT32 → INT16 → UINT16 → BYTE, first plausible wins
//! - [`scan_bools`]: every set bit over a byte span
//! - [`scan_strings`]: plausible `[max][actual][chars]` headers

use serde::{Deserialize, Serialize};

use super::codec::decode;
use super::model::{
    DecodedValue, FieldDescriptor, FieldOffset, FieldValue, SemanticType, STRING_HEADER_LEN,
};

pub const DEFAULT_BOOL_SPAN: usize = 8;

/// Plausibility limits for the numeric scan. Tuning values, not structural constants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanThresholds {
    /// Floats at or above this magnitude (or NaN/Inf) are implausible.
    pub float_reject_magnitude: f64,
    /// Floats are only accepted below this magnitude.
    pub float_max_magnitude: f64,
    /// Upper bound on numeric guesses per buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_values: Option<usize>,
}

impl Default for ScanThresholds {
    fn default() -> Self {
        Self {
            float_reject_magnitude: 1e10,
            float_max_magnitude: 1e6,
            max_values: None,
        }
    }
}

const NUMERIC_ORDER: [SemanticType; 5] = [
    SemanticType::Float32,
    SemanticType::Int32,
    SemanticType::Int16,
    SemanticType::UInt16,
    SemanticType::Byte,
];

/// Numeric guess over the whole buffer; an all-zero buffer yields nothing.
pub fn scan(buffer: &[u8], thresholds: &ScanThresholds) -> Vec<DecodedValue> {
    scan_numeric(buffer, 0, thresholds)
}

pub fn scan_numeric(
    buffer: &[u8],
    start_offset: usize,
    thresholds: &ScanThresholds,
) -> Vec<DecodedValue> {
    let mut found = Vec::new();
    let mut offset = start_offset;

    while offset < buffer.len() {
        if thresholds.max_values.is_some_and(|max| found.len() >= max) {
            break;
        }

        let guess = NUMERIC_ORDER.iter().find_map(|semantic_type| {
            let value = decode(buffer, offset, *semantic_type, None).ok()?;
            is_plausible(&value, thresholds).then_some((*semantic_type, value))
        });

        match guess {
            Some((semantic_type, value)) => {
                let width = semantic_type.fixed_width().unwrap_or(1);
                found.push(tentative(FieldOffset::byte(offset as u32), semantic_type, value));
                offset += width;
            }
            None => offset += 1,
        }
    }

    log::debug!(
        "[scan] numeric len={} start={} found={}",
        buffer.len(),
        start_offset,
        found.len()
    );
    found
}

/// Every set bit in `buffer[start_byte..start_byte + span]` (clamped to the buffer).
pub fn scan_bools(buffer: &[u8], start_byte: usize, span: usize) -> Vec<DecodedValue> {
    let end = start_byte.saturating_add(span).min(buffer.len());
    let mut found = Vec::new();

    for byte in start_byte..end {
        for bit in 0..8u8 {
            if let Ok(FieldValue::Bool(true)) = decode(buffer, byte, SemanticType::Bool, Some(bit)) {
                found.push(tentative(
                    FieldOffset::bit(byte as u32, bit),
                    SemanticType::Bool,
                    FieldValue::Bool(true),
                ));
            }
        }
    }
    found
}

/// Walks every position looking for a plausible STRING header; skips past accepted strings.
pub fn scan_strings(buffer: &[u8]) -> Vec<DecodedValue> {
    let mut found = Vec::new();
    let mut offset = 0usize;

    while offset + STRING_HEADER_LEN < buffer.len() {
        let max_length = buffer[offset];
        let accepted = decode(buffer, offset, SemanticType::String, None)
            .ok()
            .filter(|value| {
                matches!(
                    value,
                    FieldValue::String { text, max_length, .. }
                        if *max_length < u8::MAX && !text.trim().is_empty()
                )
            });

        match accepted {
            Some(value) => {
                found.push(tentative(
                    FieldOffset::byte(offset as u32),
                    SemanticType::String,
                    value,
                ));
                offset += STRING_HEADER_LEN + max_length as usize;
            }
            None => offset += 1,
        }
    }
    found
}

/// S7-style address of a tentative value.
pub fn s7_address(offset: FieldOffset, semantic_type: SemanticType) -> String {
    match (semantic_type, offset.bit) {
        (_, Some(bit)) => format!("DBX{}.{}", offset.byte, bit),
        (SemanticType::Float32 | SemanticType::Int32 | SemanticType::UInt32, None) => {
            format!("DBD{}", offset.byte)
        }
        (SemanticType::Int16 | SemanticType::UInt16, None) => format!("DBW{}", offset.byte),
        (_, None) => format!("DBB{}", offset.byte),
    }
}

fn is_plausible(value: &FieldValue, thresholds: &ScanThresholds) -> bool {
    match value {
        FieldValue::Float32(v) => {
            let v = f64::from(*v);
            v.is_finite()
                && v.abs() < thresholds.float_reject_magnitude
                && v.abs() < thresholds.float_max_magnitude
                && v != 0.0
        }
        other => other.as_f64().is_some_and(|v| v != 0.0),
    }
}

fn tentative(offset: FieldOffset, semantic_type: SemanticType, value: FieldValue) -> DecodedValue {
    let field = FieldDescriptor {
        offset,
        semantic_type,
        type_token: semantic_type.as_str().to_string(),
        name: s7_address(offset, semantic_type),
        description: format!("heuristic {semantic_type} guess"),
        unit: None,
        length: None,
    };
    DecodedValue::decoded(&field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[DecodedValue]) -> Vec<String> {
        values.iter().map(|v| v.field_name.clone()).collect()
    }

    #[test]
    fn all_zero_buffers_yield_nothing() {
        for len in [0usize, 1, 3, 4, 64, 1024] {
            let buffer = vec![0u8; len];
            assert!(scan(&buffer, &ScanThresholds::default()).is_empty());
            assert!(scan_bools(&buffer, 0, len).is_empty());
            assert!(scan_strings(&buffer).is_empty());
        }
    }

    #[test]
    fn numeric_scan_prefers_plausible_floats_then_integers() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&21.5f32.to_be_bytes());
        // huge float bits: rejected as REAL, kept as DINT
        buffer.extend_from_slice(&0x7F00_0001u32.to_be_bytes());
        buffer.extend_from_slice(&[0x00, 0x05]);

        let found = scan(&buffer, &ScanThresholds::default());
        assert_eq!(names(&found), vec!["DBD0", "DBD4", "DBW8"]);
        assert_eq!(found[0].value, Some(FieldValue::Float32(21.5)));
        assert_eq!(found[1].value, Some(FieldValue::Int32(0x7F00_0001)));
        assert_eq!(found[2].value, Some(FieldValue::Int16(5)));
        assert!(found.iter().all(|v| v.description.starts_with("heuristic")));
    }

    #[test]
    fn numeric_scan_tail_falls_back_to_narrow_types() {
        let buffer = [0x00, 0x00, 0x00, 0x00, 0x00, 0x07];
        let found = scan(&buffer, &ScanThresholds::default());
        assert_eq!(names(&found), vec!["DBD2"]);

        let tail = [0x09];
        let found = scan(&tail, &ScanThresholds::default());
        assert_eq!(names(&found), vec!["DBB0"]);
        assert_eq!(found[0].value, Some(FieldValue::Byte(9)));
    }

    #[test]
    fn thresholds_are_configurable() {
        let buffer = 5000.0f32.to_be_bytes();
        let strict = ScanThresholds {
            float_max_magnitude: 1000.0,
            ..ScanThresholds::default()
        };
        let found = scan(&buffer, &strict);
        assert_eq!(found[0].semantic_type, SemanticType::Int32);

        let found = scan(&buffer, &ScanThresholds::default());
        assert_eq!(found[0].value, Some(FieldValue::Float32(5000.0)));

        let capped = ScanThresholds {
            max_values: Some(2),
            ..ScanThresholds::default()
        };
        assert_eq!(scan(&[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0], &capped).len(), 2);
    }

    #[test]
    fn bool_scan_reports_every_set_bit_within_span() {
        let buffer = [0b0000_0101u8, 0x00, 0x80, 0xFF];
        let found = scan_bools(&buffer, 0, 3);
        assert_eq!(names(&found), vec!["DBX0.0", "DBX0.2", "DBX2.7"]);

        let found = scan_bools(&buffer, 3, 100);
        assert_eq!(found.len(), 8);
    }

    #[test]
    fn string_scan_skips_past_accepted_strings() {
        let mut buffer = vec![0x00, 0x04, 0x03];
        buffer.extend_from_slice(b"abc\0");
        buffer.extend_from_slice(&[0x00, 0x06, 0x02]);
        buffer.extend_from_slice(b"ok\0\0\0\0");

        let found = scan_strings(&buffer);
        assert_eq!(names(&found), vec!["DBB1", "DBB8"]);
        assert_eq!(found[0].value_display().as_deref(), Some("abc"));
        assert_eq!(found[1].value_display().as_deref(), Some("ok"));
    }

    #[test]
    fn string_scan_rejects_blank_and_overlong_headers() {
        let blank = [0x03, 0x02, b' ', b' ', 0x00];
        assert!(scan_strings(&blank).is_empty());

        let overlong = [0x02, 0x03, b'a', b'b', b'c'];
        assert!(scan_strings(&overlong).is_empty());
    }

    #[test]
    fn s7_addresses_follow_type_width() {
        assert_eq!(s7_address(FieldOffset::byte(4), SemanticType::Float32), "DBD4");
        assert_eq!(s7_address(FieldOffset::byte(4), SemanticType::UInt16), "DBW4");
        assert_eq!(s7_address(FieldOffset::byte(4), SemanticType::Byte), "DBB4");
        assert_eq!(s7_address(FieldOffset::bit(4, 2), SemanticType::Bool), "DBX4.2");
    }
}
