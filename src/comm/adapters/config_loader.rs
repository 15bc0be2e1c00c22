//! Field table loader for declarative JSON sources.
//!
//! Accepted shapes:
//! - per-block document: `{ "db_number", "data_block_name", "variables": { "<offset>": {...} } }`
//! - a JSON array of per-block documents
//! - consolidated document: `{ "DBS": [ { "Address/Identifier": "DB102.DBD 0", "OFSSET", ... } ] }`
//! - a directory of `*.json` files in any of the shapes above, read in file name order
//!
//! A malformed entry is skipped with a warning; only unreadable files or unrecognised document
//! shapes fail the load.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::comm::core::table::{
    BlockTable, BlockTableBuilder, ConfigValidationError, RawFieldEntry, SkippedEntry,
};

const BLOCK_TOKEN_PATTERN: &str = r"(?i)DB\s*(\d+)";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unrecognised field table format in {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("no field table files found in {path}")]
    NoFiles { path: PathBuf },
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub table: BlockTable,
    pub skipped: Vec<SkippedEntry>,
    pub files: Vec<PathBuf>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "blocks={} fields={} skipped={} files={}",
            self.table.len(),
            self.table.field_count(),
            self.skipped.len(),
            self.files.len()
        )
    }
}

/// Loads a field table from a file or a directory of files.
pub fn load_field_table(path: &Path) -> Result<LoadReport, ConfigLoadError> {
    let files = if path.is_dir() {
        list_json_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let block_token = Regex::new(BLOCK_TOKEN_PATTERN).map_err(|e| ConfigLoadError::Format {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut builder = BlockTableBuilder::new();
    for file in &files {
        let text = std::fs::read_to_string(file).map_err(|source| ConfigLoadError::Io {
            path: file.clone(),
            source,
        })?;
        let document: Document =
            serde_json::from_str(&text).map_err(|source| ConfigLoadError::Json {
                path: file.clone(),
                source,
            })?;
        load_document(document, file, &block_token, &mut builder)?;
    }

    let (table, skipped) = builder.build();
    let report = LoadReport {
        table,
        skipped,
        files,
    };
    log::info!("[config] loaded {} from {}", report.summary(), path.display());
    Ok(report)
}

/// Loads a field table from an in-memory JSON document; `label` attributes skipped entries.
pub fn load_field_table_from_str(text: &str, label: &str) -> Result<LoadReport, ConfigLoadError> {
    let path = PathBuf::from(label);
    let document: Document = serde_json::from_str(text).map_err(|source| ConfigLoadError::Json {
        path: path.clone(),
        source,
    })?;
    let block_token = Regex::new(BLOCK_TOKEN_PATTERN).map_err(|e| ConfigLoadError::Format {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let mut builder = BlockTableBuilder::new();
    load_document(document, &path, &block_token, &mut builder)?;
    let (table, skipped) = builder.build();
    Ok(LoadReport {
        table,
        skipped,
        files: Vec::new(),
    })
}

fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigLoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigLoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if path.is_file() && is_json {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(ConfigLoadError::NoFiles {
            path: dir.to_path_buf(),
        });
    }
    Ok(files)
}

/// Top-level shape of a field table file.
///
/// Objects are read key by key, so a `variables` object that repeats an offset key keeps every
/// occurrence and the builder sees the duplicate.
enum Document {
    Object(BlockDocument),
    Array(Vec<ObjectOr<BlockDocument>>),
    Other,
}

#[derive(Debug, Deserialize)]
struct BlockDocument {
    #[serde(rename = "DBS")]
    dbs: Option<Value>,
    db_number: Option<Value>,
    data_block_name: Option<Value>,
    variables: Option<ObjectOr<VariableEntries>>,
}

/// `variables` entries in document order, duplicate keys included.
#[derive(Debug)]
struct VariableEntries(Vec<(String, Value)>);

/// A JSON object decoded as `T`; any other JSON value is `Other`.
#[derive(Debug)]
enum ObjectOr<T> {
    Object(T),
    Other,
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a field table document")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Document, A::Error> {
                BlockDocument::deserialize(MapAccessDeserializer::new(map)).map(Document::Object)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Document, A::Error> {
                Vec::deserialize(SeqAccessDeserializer::new(seq)).map(Document::Array)
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Document, E> {
                Ok(Document::Other)
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Document, E> {
                Ok(Document::Other)
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Document, E> {
                Ok(Document::Other)
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Document, E> {
                Ok(Document::Other)
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<Document, E> {
                Ok(Document::Other)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Document, E> {
                Ok(Document::Other)
            }
        }

        deserializer.deserialize_any(DocumentVisitor)
    }
}

impl<'de> Deserialize<'de> for VariableEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = VariableEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by offset")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<VariableEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(VariableEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ObjectOr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObjectOrVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for ObjectOrVisitor<T> {
            type Value = ObjectOr<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<ObjectOr<T>, A::Error> {
                T::deserialize(MapAccessDeserializer::new(map)).map(ObjectOr::Object)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ObjectOr<T>, A::Error> {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(ObjectOr::Other)
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }

            fn visit_unit<E: de::Error>(self) -> Result<ObjectOr<T>, E> {
                Ok(ObjectOr::Other)
            }
        }

        deserializer.deserialize_any(ObjectOrVisitor(PhantomData))
    }
}

fn load_document(
    document: Document,
    path: &Path,
    block_token: &Regex,
    builder: &mut BlockTableBuilder,
) -> Result<(), ConfigLoadError> {
    let label = path.display().to_string();
    match document {
        Document::Object(BlockDocument { dbs: Some(dbs), .. }) => {
            let Value::Array(entries) = dbs else {
                return Err(ConfigLoadError::Format {
                    path: path.to_path_buf(),
                    message: "\"DBS\" must be an array".to_string(),
                });
            };
            for (index, entry) in entries.iter().enumerate() {
                load_consolidated_entry(entry, &format!("{label}#DBS[{index}]"), block_token, builder);
            }
            Ok(())
        }
        Document::Object(document) if document.variables.is_some() => {
            load_block_document(document, &label, builder);
            Ok(())
        }
        Document::Array(documents) => {
            for (index, document) in documents.into_iter().enumerate() {
                let source = format!("{label}[{index}]");
                match document {
                    ObjectOr::Object(document) if document.variables.is_some() => {
                        load_block_document(document, &source, builder)
                    }
                    _ => builder.skip_unattributed(
                        source,
                        &ConfigValidationError::MissingAttribute {
                            attribute: "variables",
                        },
                    ),
                }
            }
            Ok(())
        }
        _ => Err(ConfigLoadError::Format {
            path: path.to_path_buf(),
            message: "expected a \"DBS\" document, a block document with \"variables\", or an array of block documents".to_string(),
        }),
    }
}

fn load_block_document(document: BlockDocument, source: &str, builder: &mut BlockTableBuilder) {
    let Some(block_id) = document.db_number.as_ref().and_then(as_u32) else {
        builder.skip_unattributed(
            source,
            &ConfigValidationError::MissingAttribute {
                attribute: "db_number",
            },
        );
        return;
    };
    let block_name = document.data_block_name.as_ref().and_then(as_text);

    let Some(ObjectOr::Object(VariableEntries(variables))) = document.variables else {
        builder.skip_unattributed(
            source,
            &ConfigValidationError::MissingAttribute {
                attribute: "variables",
            },
        );
        return;
    };

    for (offset_key, variable) in variables {
        let attrs = variable.as_object();
        let get = |key: &str| attrs.and_then(|a| a.get(key));
        builder.add(RawFieldEntry {
            block_id,
            block_name: block_name.clone(),
            offset: Some(offset_key.clone()),
            symbol: get("symbol").and_then(as_text),
            description: get("description").and_then(as_text),
            data_type: get("data_type").and_then(as_text),
            unit: get("unit").and_then(as_text),
            byte_offset: get("byte_offset").and_then(as_u32),
            bit_position: get("bit_position").and_then(as_u32),
            length: get("length").and_then(as_u32),
            source: format!("{source}#DB{block_id}/{offset_key}"),
        });
    }
}

fn load_consolidated_entry(
    entry: &Value,
    source: &str,
    block_token: &Regex,
    builder: &mut BlockTableBuilder,
) {
    let Some(attrs) = entry.as_object() else {
        builder.skip_unattributed(
            source,
            &ConfigValidationError::MissingAttribute {
                attribute: "Address/Identifier",
            },
        );
        return;
    };
    let Some(identifier) = first_of(attrs, &["Address/Identifier", "Address"]).and_then(as_text) else {
        builder.skip_unattributed(
            source,
            &ConfigValidationError::MissingAttribute {
                attribute: "Address/Identifier",
            },
        );
        return;
    };
    let block_id = block_token
        .captures(&identifier)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    let Some(block_id) = block_id else {
        builder.skip_unattributed(source, &ConfigValidationError::MissingBlockId { identifier });
        return;
    };

    builder.add(RawFieldEntry {
        block_id,
        block_name: None,
        offset: first_of(attrs, &["OFSSET", "OFFSET", "Offset"]).and_then(as_text),
        symbol: first_of(attrs, &["Tag Name", "Symbol"]).and_then(as_text),
        description: first_of(attrs, &["Description"]).and_then(as_text),
        data_type: first_of(attrs, &["Data Type", "Type"]).and_then(as_text),
        unit: first_of(attrs, &["unit", "Unit"]).and_then(as_text),
        byte_offset: None,
        bit_position: None,
        length: first_of(attrs, &["length", "Length"]).and_then(as_u32),
        source: source.to_string(),
    });
}

fn first_of<'a>(attrs: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| attrs.get(*key))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::comm::core::model::{FieldOffset, SemanticType};

    const PER_BLOCK: &str = r#"{
        "db_number": 102,
        "data_block_name": "Oven line",
        "variables": {
            "0": { "symbol": "TEMP", "description": "Oven temperature", "data_type": "VIRGULE_FLOTTANTE", "unit": "°C" },
            "4": { "symbol": "COUNT", "description": "Parts", "data_type": "DINT", "unit": "" },
            "8": { "symbol": "RUNNING", "description": "Running", "data_type": "BOOLEEN", "byte_offset": 8, "bit_position": 2 },
            "9.1": { "symbol": "FAULT", "description": "Fault", "data_type": "BOOL" },
            "10": { "description": "no symbol", "data_type": "INT" },
            "12": { "symbol": "ID", "description": "Tag id", "data_type": "HEXA", "length": 6 }
        }
    }"#;

    const CONSOLIDATED: &str = r#"{
        "DBS": [
            { "Address/Identifier": "DB102.DBD 0", "OFSSET": "0", "Tag Name": "TEMP", "Description": "Temp", "Data Type": "REAL", "unit": "°C" },
            { "Address/Identifier": "DB102.DBD 0", "OFSSET": 0, "Tag Name": "TEMP_DUP", "Description": "Dup", "Data Type": "REAL", "unit": "°C" },
            { "Address/Identifier": "DB100.DBW 4", "OFSSET": 4, "Tag Name": "SPEED", "Description": "Speed", "Data Type": "DEC", "unit": "rpm" },
            { "Address/Identifier": "M 10.0", "OFSSET": "10", "Tag Name": "MARKER", "Description": "", "Data Type": "BOOL", "unit": "" },
            { "Address/Identifier": "DB100.DBX 6.3", "OFSSET": "6.3", "Tag Name": "DOOR", "Description": "Door open", "Data Type": "BOOLEEN" },
            "not an object"
        ]
    }"#;

    #[test]
    fn per_block_document_is_validated_entry_by_entry() {
        let report = load_field_table_from_str(PER_BLOCK, "db102.json").unwrap();
        let block = report.table.get(102).unwrap();

        assert_eq!(block.display_name, "Oven line");
        assert_eq!(block.len(), 5);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("symbol"));
        assert!(report.skipped[0].source.ends_with("#DB102/10"));

        let temp = &block.fields[&FieldOffset::byte(0)];
        assert_eq!(temp.semantic_type, SemanticType::Float32);
        assert_eq!(temp.unit.as_deref(), Some("°C"));
        assert_eq!(block.fields[&FieldOffset::byte(4)].unit, None);
        assert_eq!(block.fields[&FieldOffset::bit(8, 2)].name, "RUNNING");
        assert_eq!(block.fields[&FieldOffset::bit(9, 1)].name, "FAULT");
        assert_eq!(block.fields[&FieldOffset::byte(12)].length, Some(6));
    }

    #[test]
    fn repeated_offset_key_in_variables_keeps_the_first_entry() {
        let text = r#"{
            "db_number": 102,
            "variables": {
                "0": { "symbol": "TEMP", "data_type": "REAL" },
                "4": { "symbol": "COUNT", "data_type": "DINT" },
                "0": { "symbol": "TEMP_DUP", "data_type": "DINT" }
            }
        }"#;

        let report = load_field_table_from_str(text, "db102.json").unwrap();
        let block = report.table.get(102).unwrap();
        let names: Vec<&str> = block.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["TEMP", "COUNT"]);
        assert_eq!(block.fields[&FieldOffset::byte(0)].semantic_type, SemanticType::Float32);

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].block_id, Some(102));
        assert!(report.skipped[0].reason.contains("duplicate offset 0 in block 102"));
        assert!(report.skipped[0].source.ends_with("#DB102/0"));
    }

    #[test]
    fn non_object_variables_are_skipped_not_fatal() {
        let report = load_field_table_from_str(
            r#"[ { "db_number": 3, "variables": [1, 2] }, { "db_number": 4, "variables": { "0": { "symbol": "A", "data_type": "INT" } } } ]"#,
            "blocks.json",
        )
        .unwrap();
        assert_eq!(report.table.block_ids(), vec![4]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].source, "blocks.json[0]");
    }

    #[test]
    fn consolidated_document_groups_by_block_token() {
        let report = load_field_table_from_str(CONSOLIDATED, "all.json").unwrap();

        assert_eq!(report.table.block_ids(), vec![100, 102]);
        let db102 = report.table.get(102).unwrap();
        assert_eq!(db102.len(), 1);
        assert_eq!(db102.fields[&FieldOffset::byte(0)].name, "TEMP");
        assert_eq!(db102.display_name, "DB102");

        let db100 = report.table.get(100).unwrap();
        assert_eq!(db100.fields[&FieldOffset::byte(4)].semantic_type, SemanticType::UInt16);
        assert_eq!(db100.fields[&FieldOffset::bit(6, 3)].name, "DOOR");

        let reasons: Vec<&str> = report.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert_eq!(report.skipped.len(), 3, "{reasons:?}");
        assert!(reasons[0].contains("duplicate offset 0 in block 102"));
        assert!(reasons[1].contains("no block id"));
        assert_eq!(report.skipped[2].source, "all.json#DBS[5]");
    }

    #[test]
    fn unrecognised_documents_fail_the_load() {
        assert!(matches!(
            load_field_table_from_str(r#"{ "blocks": [] }"#, "x.json"),
            Err(ConfigLoadError::Format { .. })
        ));
        assert!(matches!(
            load_field_table_from_str("{ not json", "x.json"),
            Err(ConfigLoadError::Json { .. })
        ));
    }

    #[test]
    fn array_and_directory_sources_merge_into_one_table() {
        let dir = std::env::temp_dir().join(format!("plc-block-mapper-tables-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a_db102.json"), PER_BLOCK).unwrap();
        std::fs::write(
            dir.join("b_more.json"),
            r#"[
                { "db_number": "5", "variables": { "0": { "symbol": "X", "data_type": "INT" } } },
                { "variables": {} },
                42
            ]"#,
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let report = load_field_table(&dir).unwrap();
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.table.block_ids(), vec![5, 102]);
        assert_eq!(report.skipped.len(), 3);

        let empty = dir.join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert!(matches!(
            load_field_table(&empty),
            Err(ConfigLoadError::NoFiles { .. })
        ));
        assert!(matches!(
            load_field_table(&dir.join("missing.json")),
            Err(ConfigLoadError::Io { .. })
        ));

        let _ = std::fs::remove_dir_all(dir);
    }
}
