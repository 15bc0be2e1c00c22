//! In-process sink that keeps every record it receives.

use parking_lot::Mutex;

use super::{RecordSink, SinkFuture};
use crate::comm::core::model::DecodedRecord;

#[derive(Debug, Default)]
pub struct MemorySink {
    name: String,
    records: Mutex<Vec<DecodedRecord>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<DecodedRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, block_id: u32) -> Vec<DecodedRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.block_id == block_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a self, records: &'a [DecodedRecord]) -> SinkFuture<'a> {
        Box::pin(async move {
            self.records.lock().extend_from_slice(records);
            Ok(())
        })
    }
}
