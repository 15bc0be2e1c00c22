//! JSON-lines sink: one serialized `DecodedRecord` per line.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{RecordSink, SinkFuture};
use crate::comm::core::model::DecodedRecord;

#[derive(Debug)]
pub struct JsonLinesSink {
    name: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("jsonLines:{}", path.display()),
            path,
            lock: Mutex::new(()),
        }
    }
}

impl RecordSink for JsonLinesSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a self, records: &'a [DecodedRecord]) -> SinkFuture<'a> {
        Box::pin(async move {
            let mut text = String::new();
            for record in records {
                text.push_str(&serde_json::to_string(record)?);
                text.push('\n');
            }

            let _guard = self.lock.lock().await;
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
    }
}
