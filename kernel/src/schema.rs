//! A narrow schema model: just enough to track partition columns, validate nested update
//! paths, and decide type-widening compatibility. The crate never needs a columnar type system
//! richer than this -- the `QueryRuntime` collaborator owns actual data typing.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeltaResult, Error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    String,
    Boolean,
    Binary,
    Date,
    Timestamp,
    Struct(Box<StructType>),
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Struct(s) => write!(f, "struct<{} fields>", s.fields.len()),
            other => write!(f, "{other:?}"),
        }
    }
}

impl DataType {
    /// numeric widening: byte -> short -> int -> long -> float -> double, plus any -> string
    /// as allowed for schema widening.
    pub fn can_widen_to(&self, target: &DataType) -> bool {
        use DataType::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Byte, Short)
                | (Byte, Integer)
                | (Byte, Long)
                | (Short, Integer)
                | (Short, Long)
                | (Integer, Long)
                | (Float, Double)
                | (Byte, String)
                | (Short, String)
                | (Integer, String)
                | (Long, String)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn column_names(&self) -> HashSet<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Resolve a dotted struct path (`"a.b.c"`) to its field, erroring if any intermediate
    /// segment is not itself a struct (only struct paths may be traversed).
    pub fn resolve_path(&self, path: &str) -> DeltaResult<&StructField> {
        let mut segments = path.split('.');
        let first = segments.next().ok_or_else(|| Error::InvalidColumnName(path.to_string()))?;
        let mut field = self
            .field(first)
            .ok_or_else(|| Error::InvalidColumnName(path.to_string()))?;
        for seg in segments {
            let DataType::Struct(inner) = &field.data_type else {
                return Err(Error::generic(format!(
                    "cannot traverse into non-struct field while resolving `{path}`"
                )));
            };
            field = inner
                .field(seg)
                .ok_or_else(|| Error::InvalidColumnName(path.to_string()))?;
        }
        Ok(field)
    }

    /// Append new nullable fields for schema evolution. Existing fields are
    /// left untouched; this never narrows or removes.
    pub fn widen_with(&self, extra: &[StructField]) -> StructType {
        let existing = self.column_names();
        let mut fields = self.fields.clone();
        for f in extra {
            if !existing.contains(f.name.as_str()) {
                fields.push(StructField::new(f.name.clone(), f.data_type.clone(), true));
            }
        }
        StructType::new(fields)
    }
}

/// Read-compatibility check: `new` may add nullable fields and widen types
/// relative to `old`; it may not remove, rename, or narrow.
pub fn is_read_compatible(old: &StructType, new: &StructType) -> bool {
    for old_field in &old.fields {
        let Some(new_field) = new.field(&old_field.name) else {
            return false; // field removed/renamed
        };
        if !old_field.data_type.can_widen_to(&new_field.data_type) {
            return false; // narrowed or incompatible retype
        }
        if old_field.nullable && !new_field.nullable {
            return false; // tightened nullability
        }
    }
    true
}

/// Validate that `Metadata.partition_columns` is a subset of
/// the schema's top-level field names.
pub fn validate_partition_columns(schema: &StructType, partition_columns: &[String]) -> DeltaResult<()> {
    let names = schema.column_names();
    for pc in partition_columns {
        if !names.contains(pc.as_str()) {
            return Err(Error::InvalidColumnName(format!(
                "partition column `{pc}` is not present in the schema"
            )));
        }
    }
    Ok(())
}
