//! Raw block export: one `DB<id>_raw.txt` per block holding the lowercase hex of its bytes.
//!
//! Exports are overwritten every cycle. The same files feed the snapshot reader for replay.

use std::path::{Path, PathBuf};

use crate::comm::core::model::{to_hex_lower, RawBlockSnapshot};

use super::{write_atomic, StorageError};

pub fn raw_export_path(dir: &Path, block_id: u32) -> PathBuf {
    dir.join(format!("DB{block_id}_raw.txt"))
}

pub fn export_raw(dir: &Path, snapshot: &RawBlockSnapshot) -> Result<PathBuf, StorageError> {
    let path = raw_export_path(dir, snapshot.block_id);
    write_atomic(&path, to_hex_lower(&snapshot.bytes).as_bytes())?;
    Ok(path)
}

pub fn read_raw_export(dir: &Path, block_id: u32) -> Result<Option<Vec<u8>>, StorageError> {
    let path = raw_export_path(dir, block_id);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    parse_hex(&text).map(Some)
}

/// Parses a hex dump; surrounding whitespace and line breaks are ignored, case is not significant.
///
/// `position` in an `InvalidHex` error counts hex digits, not characters of `text`.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, StorageError> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|err| {
        let position = match &err {
            hex::FromHexError::InvalidHexCharacter { index, .. } => *index,
            _ => digits.len(),
        };
        StorageError::InvalidHex {
            position,
            message: err.to_string(),
        }
    })
}
