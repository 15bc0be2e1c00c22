//! Block mapping: typed decoder (codec).
//!
//! Pure functions from `(buffer, offset, type, bit?)` to a typed value. Every failure is a
//! `DecodeError` value; nothing here panics on short or malformed input.
//!
//! Conventions:
//! - multi-byte integers and FLOAT32 are big-endian
//! - BOOL reads `(buffer[byte] >> bit) & 1`; a BOOL without bit index reads bit 0
//! - STRING is `[max_len][actual_len][chars...]` starting at the field offset

use thiserror::Error;

use super::model::{
    FieldDescriptor, FieldValue, SemanticType, DEFAULT_HEX_BLOB_LEN, STRING_HEADER_LEN,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("out of bounds: offset {offset} + width {width} exceeds buffer length {len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("malformed string at offset {offset}: max_length={max_length} actual_length={actual_length}")]
    MalformedString {
        offset: usize,
        max_length: u8,
        actual_length: u8,
    },

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("bit index {bit} out of range 0..=7")]
    BitOutOfRange { bit: u8 },
}

/// Bytes a value of `semantic_type` occupies; `None` when it depends on the data or the caller.
pub fn type_width(semantic_type: SemanticType) -> Option<usize> {
    semantic_type.fixed_width()
}

pub fn decode(
    buffer: &[u8],
    offset: usize,
    semantic_type: SemanticType,
    bit: Option<u8>,
) -> Result<FieldValue, DecodeError> {
    match semantic_type {
        SemanticType::Bool => {
            let bit = bit.unwrap_or(0);
            if bit > 7 {
                return Err(DecodeError::BitOutOfRange { bit });
            }
            let [byte] = take::<1>(buffer, offset)?;
            Ok(FieldValue::Bool((byte >> bit) & 1 == 1))
        }
        SemanticType::Byte => {
            let [byte] = take::<1>(buffer, offset)?;
            Ok(FieldValue::Byte(byte))
        }
        SemanticType::Char => {
            let [byte] = take::<1>(buffer, offset)?;
            Ok(FieldValue::Char(char::from(byte)))
        }
        SemanticType::Int16 => Ok(FieldValue::Int16(i16::from_be_bytes(take(buffer, offset)?))),
        SemanticType::UInt16 => Ok(FieldValue::UInt16(u16::from_be_bytes(take(buffer, offset)?))),
        SemanticType::Int32 => Ok(FieldValue::Int32(i32::from_be_bytes(take(buffer, offset)?))),
        SemanticType::UInt32 => Ok(FieldValue::UInt32(u32::from_be_bytes(take(buffer, offset)?))),
        SemanticType::Float32 => {
            Ok(FieldValue::Float32(f32::from_be_bytes(take(buffer, offset)?)))
        }
        SemanticType::String => decode_string(buffer, offset),
        SemanticType::HexBlob => decode_hex_blob(buffer, offset, DEFAULT_HEX_BLOB_LEN),
        SemanticType::Unknown => Err(DecodeError::UnsupportedType(
            SemanticType::Unknown.as_str().to_string(),
        )),
    }
}

pub fn decode_hex_blob(buffer: &[u8], offset: usize, len: usize) -> Result<FieldValue, DecodeError> {
    let bytes = slice(buffer, offset, len)?;
    Ok(FieldValue::HexBlob(bytes.to_vec()))
}

/// Decodes one configured field. Unknown types report the token from the field table.
pub fn decode_field(buffer: &[u8], field: &FieldDescriptor) -> Result<FieldValue, DecodeError> {
    let offset = field.offset.byte as usize;
    match field.semantic_type {
        SemanticType::Unknown => Err(DecodeError::UnsupportedType(field.type_token.clone())),
        SemanticType::HexBlob => {
            let len = field
                .length
                .map(|len| len as usize)
                .unwrap_or(DEFAULT_HEX_BLOB_LEN);
            decode_hex_blob(buffer, offset, len)
        }
        other => decode(buffer, offset, other, field.offset.bit),
    }
}

fn decode_string(buffer: &[u8], offset: usize) -> Result<FieldValue, DecodeError> {
    let [max_length, actual_length] = take::<STRING_HEADER_LEN>(buffer, offset)?;
    if actual_length == 0 || actual_length > max_length {
        return Err(DecodeError::MalformedString {
            offset,
            max_length,
            actual_length,
        });
    }

    let chars = slice(
        buffer,
        offset,
        STRING_HEADER_LEN + actual_length as usize,
    )?;
    let text = String::from_utf8_lossy(&chars[STRING_HEADER_LEN..]).into_owned();

    Ok(FieldValue::String {
        text,
        max_length,
        actual_length,
    })
}

fn slice(buffer: &[u8], offset: usize, width: usize) -> Result<&[u8], DecodeError> {
    let end = offset.checked_add(width);
    match end {
        Some(end) if end <= buffer.len() => Ok(&buffer[offset..end]),
        _ => Err(DecodeError::OutOfBounds {
            offset,
            width,
            len: buffer.len(),
        }),
    }
}

fn take<const N: usize>(buffer: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    let bytes = slice(buffer, offset, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::core::model::FieldOffset;

    fn field(offset: &str, token: &str, length: Option<u32>) -> FieldDescriptor {
        FieldDescriptor {
            offset: offset.parse().unwrap(),
            semantic_type: SemanticType::from_token(token),
            type_token: token.to_string(),
            name: format!("F_{offset}"),
            description: String::new(),
            unit: None,
            length,
        }
    }

    #[test]
    fn float32_is_big_endian() {
        let value = decode(&[0xBF, 0x80, 0x00, 0x00], 0, SemanticType::Float32, None).unwrap();
        assert_eq!(value, FieldValue::Float32(-1.0));
    }

    #[test]
    fn uint16_is_big_endian() {
        let value = decode(&[0x00, 0x64], 0, SemanticType::UInt16, None).unwrap();
        assert_eq!(value, FieldValue::UInt16(100));
    }

    #[test]
    fn decode_vectors_cover_fixed_width_types() {
        struct Case {
            name: &'static str,
            semantic_type: SemanticType,
            offset: usize,
            bytes: Vec<u8>,
            expected: FieldValue,
        }

        let cases = vec![
            Case {
                name: "int16-negative",
                semantic_type: SemanticType::Int16,
                offset: 0,
                bytes: vec![0xFF, 0xFE],
                expected: FieldValue::Int16(-2),
            },
            Case {
                name: "int32-at-offset",
                semantic_type: SemanticType::Int32,
                offset: 2,
                bytes: vec![0x00, 0x00, 0xF8, 0xA4, 0x32, 0xEB],
                expected: FieldValue::Int32(-123_456_789),
            },
            Case {
                name: "uint32",
                semantic_type: SemanticType::UInt32,
                offset: 0,
                bytes: vec![0x11, 0x22, 0x33, 0x44],
                expected: FieldValue::UInt32(0x1122_3344),
            },
            Case {
                name: "byte",
                semantic_type: SemanticType::Byte,
                offset: 1,
                bytes: vec![0x00, 0xA5],
                expected: FieldValue::Byte(0xA5),
            },
            Case {
                name: "char",
                semantic_type: SemanticType::Char,
                offset: 0,
                bytes: vec![b'Z'],
                expected: FieldValue::Char('Z'),
            },
            Case {
                name: "float32-pi",
                semantic_type: SemanticType::Float32,
                offset: 0,
                bytes: 3.5f32.to_be_bytes().to_vec(),
                expected: FieldValue::Float32(3.5),
            },
        ];

        for case in cases {
            let got = decode(&case.bytes, case.offset, case.semantic_type, None)
                .unwrap_or_else(|e| panic!("{} failed: {e}", case.name));
            assert_eq!(got, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn float32_round_trips_bit_for_bit() {
        for value in [0.0f32, -0.0, 1.0e-38, 123.456, -9.99e20, f32::MAX, f32::MIN_POSITIVE] {
            let mut buffer = vec![0xAA, 0xBB];
            buffer.extend_from_slice(&value.to_be_bytes());
            match decode(&buffer, 2, SemanticType::Float32, None).unwrap() {
                FieldValue::Float32(got) => assert_eq!(got.to_bits(), value.to_bits()),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }

    #[test]
    fn out_of_bounds_is_reported_for_every_type() {
        let buffer = [0x01, 0x02, 0x03];
        for semantic_type in [
            SemanticType::Int32,
            SemanticType::UInt32,
            SemanticType::Float32,
        ] {
            assert_eq!(
                decode(&buffer, 0, semantic_type, None).unwrap_err(),
                DecodeError::OutOfBounds {
                    offset: 0,
                    width: 4,
                    len: 3
                }
            );
        }
        assert_eq!(
            decode(&buffer, 2, SemanticType::Int16, None).unwrap_err(),
            DecodeError::OutOfBounds {
                offset: 2,
                width: 2,
                len: 3
            }
        );
        assert!(decode(&buffer, 3, SemanticType::Bool, Some(0)).is_err());
        assert!(decode(&buffer, usize::MAX, SemanticType::Byte, None).is_err());
        assert!(decode(&[], 0, SemanticType::String, None).is_err());
    }

    #[test]
    fn bool_matches_bitmask_for_every_bit() {
        let buffer = [0b1010_0101u8, 0xFF, 0x00];
        for byte in 0..buffer.len() {
            for bit in 0..8u8 {
                let expected = ((buffer[byte] >> bit) & 1) == 1;
                let got = decode(&buffer, byte, SemanticType::Bool, Some(bit)).unwrap();
                assert_eq!(got, FieldValue::Bool(expected), "byte {byte} bit {bit}");
            }
        }
        assert_eq!(
            decode(&buffer, 0, SemanticType::Bool, Some(8)).unwrap_err(),
            DecodeError::BitOutOfRange { bit: 8 }
        );
    }

    #[test]
    fn string_header_is_validated() {
        let mut buffer = vec![0x0A, 0x03];
        buffer.extend_from_slice(b"abc");
        assert_eq!(
            decode(&buffer, 0, SemanticType::String, None).unwrap(),
            FieldValue::String {
                text: "abc".to_string(),
                max_length: 10,
                actual_length: 3
            }
        );

        buffer[1] = 0x0B;
        assert_eq!(
            decode(&buffer, 0, SemanticType::String, None).unwrap_err(),
            DecodeError::MalformedString {
                offset: 0,
                max_length: 10,
                actual_length: 11
            }
        );

        let empty = [0x0A, 0x00, 0x00];
        assert!(matches!(
            decode(&empty, 0, SemanticType::String, None),
            Err(DecodeError::MalformedString { .. })
        ));

        let truncated = [0x0A, 0x05, b'a', b'b'];
        assert_eq!(
            decode(&truncated, 0, SemanticType::String, None).unwrap_err(),
            DecodeError::OutOfBounds {
                offset: 0,
                width: 7,
                len: 4
            }
        );
    }

    #[test]
    fn decode_field_uses_descriptor_length_and_token() {
        let buffer = [0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02];

        let blob = decode_field(&buffer, &field("1", "HEXA", None)).unwrap();
        assert_eq!(blob.to_value_display(), "0xDEADBEEF");

        let blob = decode_field(&buffer, &field("1", "HEX_BLOB", Some(6))).unwrap();
        assert_eq!(blob, FieldValue::HexBlob(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]));

        assert_eq!(
            decode_field(&buffer, &field("0", "LREAL", None)).unwrap_err(),
            DecodeError::UnsupportedType("LREAL".to_string())
        );

        let flag = decode_field(&buffer, &field("5.0", "BOOLEEN", None)).unwrap();
        assert_eq!(flag, FieldValue::Bool(true));
        assert_eq!(FieldOffset::bit(5, 0), "5.0".parse().unwrap());
    }

    #[test]
    fn type_width_matches_declared_widths() {
        assert_eq!(type_width(SemanticType::Bool), Some(1));
        assert_eq!(type_width(SemanticType::UInt16), Some(2));
        assert_eq!(type_width(SemanticType::Float32), Some(4));
        assert_eq!(type_width(SemanticType::String), None);
        assert_eq!(type_width(SemanticType::HexBlob), None);
    }
}
