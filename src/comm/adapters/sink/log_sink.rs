//! Sink that summarises each record as one log line.

use super::{RecordSink, SinkFuture};
use crate::comm::core::model::DecodedRecord;

#[derive(Clone, Debug)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            name: "log".to_string(),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a self, records: &'a [DecodedRecord]) -> SinkFuture<'a> {
        Box::pin(async move {
            for record in records {
                log::info!(
                    "[sink] block={} name={} capturedAt={} ok={} failed={}",
                    record.block_id,
                    record.display_name,
                    record.captured_at.to_rfc3339(),
                    record.ok_count(),
                    record.failed_count()
                );
            }
            Ok(())
        })
    }
}
