//! Poller settings document (`schemaVersion: 1`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::comm::core::model::SCHEMA_VERSION_V1;
use crate::comm::core::plan::DEFAULT_READ_CEILING;
use crate::comm::core::scanner::ScanThresholds;

use super::{read_json_optional, write_json_atomic, StorageError};

pub const SETTINGS_FILE_NAME: &str = "poller.v1.json";
pub const SIMULATED_SCHEME: &str = "sim://";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SinkKind {
    TextFile,
    JsonLines,
    Log,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SinkSettings {
    pub kind: SinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollerSettingsV1 {
    pub schema_version: u32,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_read_ceiling")]
    pub read_ceiling: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_table: Option<PathBuf>,
    /// Restricts polling to these block ids; all configured blocks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_export_dir: Option<PathBuf>,
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkSettings>,
    #[serde(default)]
    pub scan_thresholds: ScanThresholds,
}

impl Default for PollerSettingsV1 {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1,
            endpoint: default_endpoint(),
            interval_ms: default_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            retry_count: 0,
            read_ceiling: default_read_ceiling(),
            field_table: None,
            blocks: None,
            raw_export_dir: None,
            sink_queue_capacity: default_sink_queue_capacity(),
            sink_timeout_ms: default_sink_timeout_ms(),
            sinks: default_sinks(),
            scan_thresholds: ScanThresholds::default(),
        }
    }
}

impl PollerSettingsV1 {
    /// True when the endpoint is a `sim://` endpoint serving zero-filled blocks, which is the default.
    pub fn uses_simulated_endpoint(&self) -> bool {
        self.endpoint.starts_with(SIMULATED_SCHEME)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms.max(1))
    }
}

fn default_endpoint() -> String {
    format!("{SIMULATED_SCHEME}local")
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_read_ceiling() -> u32 {
    DEFAULT_READ_CEILING
}

fn default_sink_queue_capacity() -> usize {
    64
}

fn default_sink_timeout_ms() -> u64 {
    5000
}

fn default_sinks() -> Vec<SinkSettings> {
    vec![SinkSettings {
        kind: SinkKind::Log,
        path: None,
    }]
}

pub fn default_settings_path(base_dir: &Path) -> PathBuf {
    base_dir.join(SETTINGS_FILE_NAME)
}

pub fn load_settings(path: &Path) -> Result<Option<PollerSettingsV1>, StorageError> {
    let settings: Option<PollerSettingsV1> = read_json_optional(path)?;
    match settings {
        Some(settings) if settings.schema_version != SCHEMA_VERSION_V1 => Err(
            StorageError::UnsupportedSchemaVersion(settings.schema_version),
        ),
        other => Ok(other),
    }
}

pub fn save_settings(path: &Path, settings: &PollerSettingsV1) -> Result<(), StorageError> {
    if settings.schema_version != SCHEMA_VERSION_V1 {
        return Err(StorageError::UnsupportedSchemaVersion(
            settings.schema_version,
        ));
    }
    write_json_atomic(path, settings)
}
