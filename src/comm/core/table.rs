//! Block mapping: field descriptor table.
//!
//! Raw entries (as found in declarative files) are validated one by one. An invalid entry is
//! skipped with a warning and recorded; it never fails the block or the load.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{
    FieldDescriptor, FieldOffset, OffsetParseError, SemanticType, SourceBlockConfig,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("missing required attribute '{attribute}'")]
    MissingAttribute { attribute: &'static str },

    #[error("no block id found in identifier '{identifier}'")]
    MissingBlockId { identifier: String },

    #[error("invalid offset '{raw}': {reason}")]
    InvalidOffset { raw: String, reason: String },

    #[error("duplicate offset {offset} in block {block_id}")]
    DuplicateOffset { block_id: u32, offset: FieldOffset },

    #[error("duplicate field name '{name}' in block {block_id}")]
    DuplicateName { block_id: u32, name: String },

    #[error("bit-addressed offset {offset} declared for non-BOOL type {semantic_type}")]
    BitOnNonBool {
        offset: FieldOffset,
        semantic_type: SemanticType,
    },
}

/// One field entry before validation; every attribute is optional at this stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFieldEntry {
    pub block_id: u32,
    pub block_name: Option<String>,
    pub offset: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub unit: Option<String>,
    pub byte_offset: Option<u32>,
    pub bit_position: Option<u32>,
    pub length: Option<u32>,
    /// Where the entry came from (file and position), used for attribution in reports.
    pub source: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<u32>,
    pub source: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockTable {
    blocks: BTreeMap<u32, SourceBlockConfig>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: SourceBlockConfig) {
        self.blocks.insert(block.block_id, block);
    }

    pub fn get(&self, block_id: u32) -> Option<&SourceBlockConfig> {
        self.blocks.get(&block_id)
    }

    /// Blocks in ascending block id order.
    pub fn blocks(&self) -> impl Iterator<Item = &SourceBlockConfig> {
        self.blocks.values()
    }

    pub fn block_ids(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn field_count(&self) -> usize {
        self.blocks.values().map(SourceBlockConfig::len).sum()
    }

    /// Keeps only the listed blocks; ids with no configuration are returned.
    pub fn retain_blocks(&mut self, block_ids: &[u32]) -> Vec<u32> {
        let wanted: HashSet<u32> = block_ids.iter().copied().collect();
        self.blocks.retain(|id, _| wanted.contains(id));
        let mut missing: Vec<u32> = wanted
            .into_iter()
            .filter(|id| !self.blocks.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing
    }
}

#[derive(Debug, Default)]
pub struct BlockTableBuilder {
    table: BlockTable,
    skipped: Vec<SkippedEntry>,
}

impl BlockTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds one entry. On error the entry is skipped, logged and recorded.
    pub fn push(&mut self, entry: RawFieldEntry) -> Result<(), ConfigValidationError> {
        let block_id = entry.block_id;
        let source = entry.source.clone();
        self.try_push(entry).map_err(|err| {
            self.record_skip(block_id, source, &err);
            err
        })
    }

    /// Like [`push`](Self::push) for bulk loading: a rejected entry only lands in the skip list.
    pub fn add(&mut self, entry: RawFieldEntry) {
        let block_id = entry.block_id;
        let source = entry.source.clone();
        if let Err(err) = self.try_push(entry) {
            self.record_skip(block_id, source, &err);
        }
    }

    /// Records an entry rejected before it could be attributed to a block.
    pub fn skip_unattributed(&mut self, source: impl Into<String>, err: &ConfigValidationError) {
        let source = source.into();
        log::warn!("[config] skip entry={source}: {err}");
        self.skipped.push(SkippedEntry {
            block_id: None,
            source,
            reason: err.to_string(),
        });
    }

    pub fn build(self) -> (BlockTable, Vec<SkippedEntry>) {
        (self.table, self.skipped)
    }

    fn record_skip(&mut self, block_id: u32, source: String, err: &ConfigValidationError) {
        log::warn!("[config] skip block={block_id} entry={source}: {err}");
        self.skipped.push(SkippedEntry {
            block_id: Some(block_id),
            source,
            reason: err.to_string(),
        });
    }

    fn try_push(&mut self, entry: RawFieldEntry) -> Result<(), ConfigValidationError> {
        let raw_offset = non_empty(entry.offset).ok_or(ConfigValidationError::MissingAttribute {
            attribute: "offset",
        })?;
        let name = non_empty(entry.symbol).ok_or(ConfigValidationError::MissingAttribute {
            attribute: "symbol",
        })?;
        let type_token = non_empty(entry.data_type).ok_or(
            ConfigValidationError::MissingAttribute {
                attribute: "data_type",
            },
        )?;
        let semantic_type = SemanticType::from_token(&type_token);

        let parsed: FieldOffset =
            raw_offset
                .parse()
                .map_err(|err: OffsetParseError| ConfigValidationError::InvalidOffset {
                    raw: raw_offset.clone(),
                    reason: err.to_string(),
                })?;

        let offset = match (semantic_type, parsed.bit) {
            (SemanticType::Bool, Some(_)) => parsed,
            (SemanticType::Bool, None) => {
                let byte = entry.byte_offset.unwrap_or(parsed.byte);
                let bit = entry.bit_position.unwrap_or(0);
                if bit > 7 {
                    return Err(ConfigValidationError::InvalidOffset {
                        raw: raw_offset,
                        reason: format!("bit_position {bit} out of range 0..=7"),
                    });
                }
                FieldOffset::bit(byte, bit as u8)
            }
            (other, Some(_)) => {
                return Err(ConfigValidationError::BitOnNonBool {
                    offset: parsed,
                    semantic_type: other,
                })
            }
            (_, None) => parsed,
        };

        let block_id = entry.block_id;
        let block = self
            .table
            .blocks
            .entry(block_id)
            .or_insert_with(|| SourceBlockConfig::new(block_id, format!("DB{block_id}")));
        if let Some(display_name) = non_empty(entry.block_name) {
            if block.is_empty() {
                block.display_name = display_name;
            }
        }

        if block.fields.contains_key(&offset) {
            return Err(ConfigValidationError::DuplicateOffset { block_id, offset });
        }
        if block.fields().any(|f| f.name == name) {
            return Err(ConfigValidationError::DuplicateName { block_id, name });
        }

        block.fields.insert(
            offset,
            FieldDescriptor {
                offset,
                semantic_type,
                type_token,
                name,
                description: entry.description.unwrap_or_default().trim().to_string(),
                unit: non_empty(entry.unit),
                length: entry.length,
            },
        );
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
