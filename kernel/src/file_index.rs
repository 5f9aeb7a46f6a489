//! Data skipping: narrow a snapshot's file set down to the files a predicate
//! could possibly match, using partition values directly and per-file stats conservatively.
//! Disabling skipping must never change the logical result -- every function here is
//! a monotonic filter over the unfiltered set, never a source of truth.

use std::collections::HashSet;

use crate::actions::Add;
use crate::error::{DeltaResult, Error};
use crate::expressions::{provably_false_against_stats, Expr, Row};
use crate::schema::StructType;

/// Evaluate partition predicates against `AddFile.partition_values` and, when stats skipping is
/// enabled, prune further using per-file statistics. Conservative: never discards a file unless
/// a predicate is proven false for every row it could contain.
pub fn filter_files<'a>(
    files: impl IntoIterator<Item = &'a Add>,
    predicates: &[Expr],
    partition_columns: &HashSet<String>,
    stats_skipping_enabled: bool,
) -> Vec<&'a Add> {
    let (partition_preds, data_preds): (Vec<&Expr>, Vec<&Expr>) = predicates
        .iter()
        .partition(|p| p.references_only(partition_columns));

    files
        .into_iter()
        .filter(|file| {
            let partition_row: Row = file
                .partition_values
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let partitions_match = partition_preds.iter().all(|p| {
                matches!(p.evaluate(&partition_row), Ok(serde_json::Value::Bool(true)))
            });
            if !partitions_match {
                return false;
            }
            if !stats_skipping_enabled {
                return true;
            }
            let Some(stats) = file.parsed_stats() else {
                return true;
            };
            !data_preds.iter().any(|p| provably_false_against_stats(p, &stats))
        })
        .collect()
}

/// A scan must cover the whole table; scanning an arbitrary subdirectory of a partitioned table
/// is not a valid operation. `requested_root` and `table_root` are both normalized
/// (trailing slashes stripped) before comparison.
pub fn validate_scan_root(table_root: &str, requested_root: &str) -> DeltaResult<()> {
    let normalize = |s: &str| s.trim_end_matches('/').to_string();
    if normalize(table_root) != normalize(requested_root) {
        return Err(Error::PartialTableScan);
    }
    Ok(())
}

pub fn partition_column_set(schema_partition_columns: &[String]) -> HashSet<String> {
    schema_partition_columns.iter().cloned().collect()
}

/// Invariant I3: every `AddFile.partition_values` key set must equal the table's partition
/// columns, and partition columns must be a subset of the schema's top-level field names.
pub fn validate_add_partitions(add: &Add, schema: &StructType, partition_columns: &[String]) -> DeltaResult<()> {
    let expected: HashSet<&str> = partition_columns.iter().map(String::as_str).collect();
    let actual: HashSet<&str> = add.partition_values.keys().map(String::as_str).collect();
    if expected != actual {
        return Err(Error::generic(format!(
            "AddFile {} partition keys {:?} do not match table partition columns {:?}",
            add.path, actual, expected
        )));
    }
    let schema_columns = schema.column_names();
    for col in partition_columns {
        if !schema_columns.contains(col.as_str()) {
            return Err(Error::InvalidColumnName(col.clone()));
        }
    }
    Ok(())
}
