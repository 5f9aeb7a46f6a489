//! Typed action variants and their JSON codec.
//!
//! Each line of a `_delta_log`-style commit file is a JSON object with exactly one top-level
//! field naming the action variant (`add`, `remove`, `metaData`, `protocol`, `txn`,
//! `commitInfo`). We deserialize by hand rather than deriving an externally-tagged enum so that
//! unrecognized discriminators are ignored instead of rejected (forward compatibility, per the
//! design notes).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeltaResult, Error};
use crate::schema::StructType;

pub mod format;
#[cfg(test)]
mod tests;

pub use format::Format;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Add {
    pub path: String,
    #[serde(rename = "partitionValues")]
    pub partition_values: HashMap<String, String>,
    pub size: i64,
    #[serde(rename = "modificationTime")]
    pub modification_time: i64,
    #[serde(rename = "dataChange")]
    pub data_change: bool,
    /// Opaque JSON subdocument; only the file-index parses this, and only lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

impl Add {
    /// Lazily parse `stats` into the skipping-relevant shape. Returns `None` if absent or
    /// unparseable -- a missing/bad stat means "cannot prove", i.e. retain the file.
    pub fn parsed_stats(&self) -> Option<FileStats> {
        let raw = self.stats.as_ref()?;
        serde_json::from_str(raw).ok()
    }
}

/// The parsed shape of `Add.stats`: per-file row count and per-column min/max/null-count.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileStats {
    #[serde(rename = "numRecords", default)]
    pub num_records: i64,
    #[serde(rename = "minValues", default)]
    pub min_values: HashMap<String, Value>,
    #[serde(rename = "maxValues", default)]
    pub max_values: HashMap<String, Value>,
    #[serde(rename = "nullCount", default)]
    pub null_count: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Remove {
    pub path: String,
    #[serde(rename = "deletionTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    #[serde(rename = "dataChange")]
    pub data_change: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: Format,
    #[serde(rename = "schemaString")]
    pub schema_string: String,
    #[serde(rename = "partitionColumns")]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl Metadata {
    pub fn schema(&self) -> DeltaResult<StructType> {
        serde_json::from_str(&self.schema_string)
            .map_err(|e| Error::generic(format!("invalid schemaString: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(rename = "minReaderVersion")]
    pub min_reader_version: i32,
    #[serde(rename = "minWriterVersion")]
    pub min_writer_version: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTransaction {
    #[serde(rename = "appId")]
    pub app_id: String,
    pub version: i64,
    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(
        rename = "operationParameters",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub operation_parameters: HashMap<String, String>,
    #[serde(rename = "readVersion", default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<i64>,
    #[serde(rename = "isolationLevel", default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<String>,
    #[serde(rename = "isBlindAppend", default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    #[serde(
        rename = "operationMetrics",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub operation_metrics: HashMap<String, String>,
}

/// Sum of all action variants. `Unknown` absorbs any top-level discriminator this crate doesn't
/// recognize so that replay can skip it rather than fail (§4.2 forward compatibility).
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Add(Add),
    Remove(Remove),
    Metadata(Metadata),
    Protocol(Protocol),
    Txn(SetTransaction),
    CommitInfo(CommitInfo),
    Unknown,
}

impl Action {
    pub fn parse_line(line: &str) -> DeltaResult<Action> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Action::Unknown);
        }
        let value: Value = serde_json::from_str(line)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::corrupt_log("log line is not a JSON object"));
        };
        macro_rules! try_variant {
            ($key:literal, $variant:ident) => {
                if let Some(v) = obj.get($key) {
                    return Ok(Action::$variant(serde_json::from_value(v.clone())?));
                }
            };
        }
        try_variant!("add", Add);
        try_variant!("remove", Remove);
        try_variant!("metaData", Metadata);
        try_variant!("protocol", Protocol);
        try_variant!("txn", Txn);
        try_variant!("commitInfo", CommitInfo);
        Ok(Action::Unknown)
    }

    pub fn to_log_line(&self) -> DeltaResult<String> {
        let value = match self {
            Action::Add(a) => serde_json::json!({ "add": a }),
            Action::Remove(r) => serde_json::json!({ "remove": r }),
            Action::Metadata(m) => serde_json::json!({ "metaData": m }),
            Action::Protocol(p) => serde_json::json!({ "protocol": p }),
            Action::Txn(t) => serde_json::json!({ "txn": t }),
            Action::CommitInfo(c) => serde_json::json!({ "commitInfo": c }),
            Action::Unknown => return Err(Error::generic("cannot serialize an Unknown action")),
        };
        Ok(value.to_string())
    }
}

impl From<Add> for Action {
    fn from(a: Add) -> Self {
        Action::Add(a)
    }
}
impl From<Remove> for Action {
    fn from(r: Remove) -> Self {
        Action::Remove(r)
    }
}
impl From<Metadata> for Action {
    fn from(m: Metadata) -> Self {
        Action::Metadata(m)
    }
}
impl From<Protocol> for Action {
    fn from(p: Protocol) -> Self {
        Action::Protocol(p)
    }
}
impl From<SetTransaction> for Action {
    fn from(t: SetTransaction) -> Self {
        Action::Txn(t)
    }
}
impl From<CommitInfo> for Action {
    fn from(c: CommitInfo) -> Self {
        Action::CommitInfo(c)
    }
}
