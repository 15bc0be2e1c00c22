//! Structured, serializable load and run errors. The CLI prints a load failure as one JSON report.

use serde::{Deserialize, Serialize};

use super::adapters::config_loader::ConfigLoadError;
use super::adapters::storage::StorageError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadErrorKind {
    #[serde(rename = "FieldTableReadError")]
    FieldTableReadError,
    #[serde(rename = "FieldTableParseError")]
    FieldTableParseError,
    #[serde(rename = "FieldTableFormatError")]
    FieldTableFormatError,
    #[serde(rename = "FieldTableNotFound")]
    FieldTableNotFound,
    #[serde(rename = "SettingsReadError")]
    SettingsReadError,
    #[serde(rename = "SettingsUnsupportedSchemaVersion")]
    SettingsUnsupportedSchemaVersion,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoadErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadErrorReport {
    pub kind: LoadErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<LoadErrorDetails>,
}

impl From<&ConfigLoadError> for LoadErrorReport {
    fn from(err: &ConfigLoadError) -> Self {
        let message = err.to_string();
        match err {
            ConfigLoadError::Io { path, .. } => LoadErrorReport {
                kind: LoadErrorKind::FieldTableReadError,
                message,
                details: Some(LoadErrorDetails {
                    path: Some(path.display().to_string()),
                    ..LoadErrorDetails::default()
                }),
            },
            ConfigLoadError::Json { path, source } => LoadErrorReport {
                kind: LoadErrorKind::FieldTableParseError,
                message,
                details: Some(LoadErrorDetails {
                    path: Some(path.display().to_string()),
                    line: Some(source.line()),
                    column: Some(source.column()),
                    ..LoadErrorDetails::default()
                }),
            },
            ConfigLoadError::Format { path, .. } => LoadErrorReport {
                kind: LoadErrorKind::FieldTableFormatError,
                message,
                details: Some(LoadErrorDetails {
                    path: Some(path.display().to_string()),
                    ..LoadErrorDetails::default()
                }),
            },
            ConfigLoadError::NoFiles { path } => LoadErrorReport {
                kind: LoadErrorKind::FieldTableNotFound,
                message,
                details: Some(LoadErrorDetails {
                    path: Some(path.display().to_string()),
                    ..LoadErrorDetails::default()
                }),
            },
        }
    }
}

impl From<&StorageError> for LoadErrorReport {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::UnsupportedSchemaVersion(version) => LoadErrorReport {
                kind: LoadErrorKind::SettingsUnsupportedSchemaVersion,
                message: err.to_string(),
                details: Some(LoadErrorDetails {
                    schema_version: Some(*version),
                    ..LoadErrorDetails::default()
                }),
            },
            StorageError::Json(source) => LoadErrorReport {
                kind: LoadErrorKind::SettingsReadError,
                message: err.to_string(),
                details: Some(LoadErrorDetails {
                    line: Some(source.line()),
                    column: Some(source.column()),
                    ..LoadErrorDetails::default()
                }),
            },
            _ => LoadErrorReport {
                kind: LoadErrorKind::SettingsReadError,
                message: err.to_string(),
                details: None,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PollRunErrorKind {
    #[serde(rename = "RunNotFound")]
    RunNotFound,
    #[serde(rename = "StopTimeout")]
    StopTimeout,
    #[serde(rename = "InternalError")]
    InternalError,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollRunError {
    pub kind: PollRunErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl std::fmt::Display for PollRunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.run_id {
            Some(run_id) => write!(f, "{:?}: {} (runId={run_id})", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for PollRunError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::adapters::config_loader::load_field_table_from_str;

    #[test]
    fn parse_errors_carry_line_and_column() {
        let err = load_field_table_from_str("{\n  \"DBS\": [ oops ]\n}", "db.json").unwrap_err();
        let report = LoadErrorReport::from(&err);
        assert_eq!(report.kind, LoadErrorKind::FieldTableParseError);
        let details = report.details.unwrap();
        assert_eq!(details.path.as_deref(), Some("db.json"));
        assert_eq!(details.line, Some(2));

        let json = serde_json::to_string(&LoadErrorReport::from(&err)).unwrap();
        assert!(json.contains("\"kind\":\"FieldTableParseError\""));
    }

    #[test]
    fn unsupported_settings_version_is_reported_with_version() {
        let report = LoadErrorReport::from(&StorageError::UnsupportedSchemaVersion(3));
        assert_eq!(report.kind, LoadErrorKind::SettingsUnsupportedSchemaVersion);
        assert_eq!(report.details.unwrap().schema_version, Some(3));
    }
}
