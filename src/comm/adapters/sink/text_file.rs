//! Human-readable text sink: appends one block of lines per record.
//!
//! ```text
//! --- Extracted Values from Line A (DB102) - 2024-05-01 10:00:00 ---
//! ----------------------------------------------------------------------
//! Offset      0: 21.500          - TEMP - Oven temperature (°C) [FLOAT32]
//! Offset      4: Not extracted   - PRESSURE - Line pressure (bar) [FLOAT32]
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{RecordSink, SinkFuture};
use crate::comm::core::model::{DecodedRecord, DecodedValue};

const RULE_WIDTH: usize = 70;

#[derive(Debug)]
pub struct TextFileSink {
    name: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl TextFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("textFile:{}", path.display()),
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn format_record(record: &DecodedRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n--- Extracted Values from {} (DB{}) - {} ---",
        record.display_name,
        record.block_id,
        record.captured_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    for value in &record.values {
        let _ = writeln!(out, "{}", format_value_line(value));
    }
    out
}

fn format_value_line(value: &DecodedValue) -> String {
    let shown = value
        .value_display()
        .unwrap_or_else(|| "Not extracted".to_string());
    let unit = value
        .unit
        .as_deref()
        .map(|u| format!(" ({u})"))
        .unwrap_or_default();
    let mut line = format!(
        "Offset {:>6}: {:<15} - {} - {}{} [{}]",
        value.offset.to_string(),
        shown,
        value.field_name,
        value.description,
        unit,
        value.semantic_type
    );
    if let Some(error) = &value.error {
        let _ = write!(line, " error: {error}");
    }
    line
}

impl RecordSink for TextFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a self, records: &'a [DecodedRecord]) -> SinkFuture<'a> {
        Box::pin(async move {
            let text: String = records.iter().map(format_record).collect();

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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use crate::comm::core::model::{
        FieldDescriptor, FieldOffset, FieldValue, Quality, SemanticType,
    };

    fn descriptor(offset: FieldOffset, name: &str, unit: Option<&str>) -> FieldDescriptor {
        FieldDescriptor {
            offset,
            semantic_type: SemanticType::Float32,
            type_token: "REAL".to_string(),
            name: name.to_string(),
            description: format!("{name} description"),
            unit: unit.map(str::to_string),
            length: None,
        }
    }

    fn sample_record() -> DecodedRecord {
        DecodedRecord {
            block_id: 102,
            display_name: "Line A".to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            values: vec![
                DecodedValue::decoded(
                    &descriptor(FieldOffset::byte(0), "TEMP", Some("°C")),
                    FieldValue::Float32(21.5),
                ),
                DecodedValue::absent(
                    &descriptor(FieldOffset::byte(4), "PRESSURE", None),
                    Quality::DecodeError,
                    "out of bounds",
                ),
            ],
        }
    }

    #[test]
    fn record_format_has_header_rule_and_one_line_per_field() {
        let text = format_record(&sample_record());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(
            lines[1],
            "--- Extracted Values from Line A (DB102) - 2024-05-01 10:00:00 ---"
        );
        assert_eq!(lines[2], "-".repeat(70));
        assert_eq!(
            lines[3],
            "Offset      0: 21.500          - TEMP - TEMP description (°C) [FLOAT32]"
        );
        assert!(lines[4].starts_with("Offset      4: Not extracted   - PRESSURE"));
        assert!(lines[4].ends_with("[FLOAT32] error: out of bounds"));
    }

    #[tokio::test]
    async fn appends_across_writes() {
        let dir = std::env::temp_dir().join(format!("plc-block-mapper-text-{}", Uuid::new_v4()));
        let sink = TextFileSink::new(dir.join("values.txt"));

        sink.write(&[sample_record()]).await.unwrap();
        sink.write(&[sample_record()]).await.unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.matches("--- Extracted Values from").count(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }
}
