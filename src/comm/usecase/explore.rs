//! Exploration mode: reads blocks that have no field table and reports heuristic guesses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::comm::adapters::reader::{BlockReader, ReaderError};
use crate::comm::core::model::DecodedValue;
use crate::comm::core::plan::DEFAULT_READ_CEILING;
use crate::comm::core::scanner::{
    scan_bools, scan_numeric, scan_strings, ScanThresholds, DEFAULT_BOOL_SPAN,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ExploreOptions {
    pub read_ceiling: u32,
    pub read_timeout: Duration,
    pub thresholds: ScanThresholds,
    /// Bytes covered by the boolean scan, from offset 0.
    pub bool_span: usize,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            read_ceiling: DEFAULT_READ_CEILING,
            read_timeout: Duration::from_millis(2000),
            thresholds: ScanThresholds::default(),
            bool_span: DEFAULT_BOOL_SPAN,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockScan {
    pub block_id: u32,
    pub length: usize,
    pub has_data: bool,
    pub numeric: Vec<DecodedValue>,
    pub bools: Vec<DecodedValue>,
    pub strings: Vec<DecodedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockScan {
    fn empty(block_id: u32, length: usize) -> Self {
        Self {
            block_id,
            length,
            has_data: false,
            numeric: Vec::new(),
            bools: Vec::new(),
            strings: Vec::new(),
            error: None,
        }
    }
}

/// Connects, scans every block in `block_ids` order and disconnects.
///
/// A block that cannot be read is reported with its error; the remaining blocks are still scanned.
pub async fn explore(
    reader: &dyn BlockReader,
    block_ids: &[u32],
    options: &ExploreOptions,
) -> Result<Vec<BlockScan>, ReaderError> {
    match tokio::time::timeout(options.read_timeout, reader.connect()).await {
        Ok(connected) => connected?,
        Err(_) => return Err(ReaderError::Timeout),
    }

    let mut scans = Vec::with_capacity(block_ids.len());
    for &block_id in block_ids {
        let read = tokio::time::timeout(
            options.read_timeout,
            reader.read(block_id, 0, options.read_ceiling),
        )
        .await
        .unwrap_or(Err(ReaderError::Timeout));

        let scan = match read {
            Ok(bytes) => scan_block(block_id, &bytes, options),
            Err(err) => {
                log::warn!("[scan] block={} read failed: {}", block_id, err);
                BlockScan {
                    error: Some(err.to_string()),
                    ..BlockScan::empty(block_id, 0)
                }
            }
        };
        scans.push(scan);
    }

    if let Err(err) = reader.disconnect().await {
        log::warn!("[scan] endpoint={} disconnect failed: {}", reader.endpoint(), err);
    }
    Ok(scans)
}

pub fn scan_block(block_id: u32, bytes: &[u8], options: &ExploreOptions) -> BlockScan {
    if bytes.iter().all(|b| *b == 0) {
        log::info!("[scan] block={} all zero ({} bytes), skipped", block_id, bytes.len());
        return BlockScan::empty(block_id, bytes.len());
    }

    let scan = BlockScan {
        block_id,
        length: bytes.len(),
        has_data: true,
        numeric: scan_numeric(bytes, 0, &options.thresholds),
        bools: scan_bools(bytes, 0, options.bool_span),
        strings: scan_strings(bytes),
        error: None,
    };
    log::info!(
        "[scan] block={} bytes={} numeric={} bools={} strings={}",
        block_id,
        scan.length,
        scan.numeric.len(),
        scan.bools.len(),
        scan.strings.len()
    );
    scan
}
