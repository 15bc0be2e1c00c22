//! Block mapping: per-cycle read plan.
//!
//! One job per configured block, in ascending block id order. The read length is the smallest
//! byte count covering every field's `offset + width`; when any width is only known after
//! reading (STRING without declared length), the conservative ceiling is used instead.

use serde::{Deserialize, Serialize};

use super::table::BlockTable;

pub const DEFAULT_READ_CEILING: u32 = 1024;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    pub read_ceiling: u32,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            read_ceiling: DEFAULT_READ_CEILING,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadPlan {
    pub jobs: Vec<ReadJob>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadJob {
    pub block_id: u32,
    pub start_offset: u32,
    pub length: u32,
    /// True when `length` came from the ceiling rather than the field widths.
    pub uses_ceiling: bool,
}

pub fn build_read_plan(table: &BlockTable, options: &PlanOptions) -> ReadPlan {
    let mut jobs = Vec::with_capacity(table.len());

    for block in table.blocks() {
        if block.is_empty() {
            log::debug!("[plan] block={} has no fields, not read", block.block_id);
            continue;
        }

        let (length, uses_ceiling) = match block.required_len() {
            Some(required) => (saturating_u32(required), false),
            None => {
                let known = block
                    .fields()
                    .filter_map(|f| f.width().map(|w| f.offset.byte as usize + w))
                    .max()
                    .unwrap_or(0);
                (saturating_u32(known).max(options.read_ceiling), true)
            }
        };

        jobs.push(ReadJob {
            block_id: block.block_id,
            start_offset: 0,
            length,
            uses_ceiling,
        });
    }

    ReadPlan { jobs }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
