//! UPDATE and DELETE: partition/predicate-based file rewrite.
//!
//! Both operations share the same shape: narrow candidate files with C7, then either drop whole
//! files (DELETE with no predicate, or a predicate covering only partition columns) or rewrite
//! each touched file row-by-row through the `QueryRuntime`.

use std::collections::HashMap;

use crate::actions::Remove;
use crate::error::DeltaResult;
use crate::expressions::Expr;
use crate::query_runtime::QueryRuntime;
use crate::transaction::OptimisticTransaction;

#[derive(Debug, Clone, Default)]
pub struct DmlMetrics {
    pub files_removed: u64,
    pub files_added: u64,
    pub rows_deleted: u64,
    pub rows_updated: u64,
}

impl DmlMetrics {
    fn as_operation_metrics(&self, verb: &str) -> HashMap<String, String> {
        [
            (format!("num{verb}FilesRemoved"), self.files_removed.to_string()),
            (format!("num{verb}FilesAdded"), self.files_added.to_string()),
            (format!("num{verb}RowsDeleted"), self.rows_deleted.to_string()),
            (format!("num{verb}RowsUpdated"), self.rows_updated.to_string()),
        ]
        .into_iter()
        .collect()
    }
}

/// DELETE. `predicate = None` deletes every current file (pure tombstoning, no rewrite).
pub fn delete<R: QueryRuntime>(
    txn: &mut OptimisticTransaction<'_>,
    runtime: &R,
    table_path: &str,
    predicate: Option<&Expr>,
) -> DeltaResult<DmlMetrics> {
    let mut metrics = DmlMetrics::default();
    let candidates = match predicate {
        Some(p) => txn.filter_files(std::slice::from_ref(p)),
        None => txn.filter_files(&[]),
    };

    let partition_columns: std::collections::HashSet<String> =
        txn.snapshot().metadata().partition_columns.iter().cloned().collect();
    let is_partition_only = predicate.map(|p| p.references_only(&partition_columns)).unwrap_or(true);

    for file in candidates {
        let Some(predicate) = predicate.filter(|_| !is_partition_only) else {
            // No predicate, or it only narrowed partitions: the whole file is logically
            // deleted, no row-level read is needed.
            metrics.files_removed += 1;
            txn.stage_remove(Remove {
                path: file.path.clone(),
                deletion_timestamp: None,
                data_change: true,
            });
            continue;
        };

        let rows = runtime.scan(std::slice::from_ref(&file), &[], &[])?;
        let mut kept = Vec::new();
        let mut any_deleted = false;
        for row in rows {
            let row = row?;
            if matches!(predicate.evaluate(&row)?, serde_json::Value::Bool(true)) {
                any_deleted = true;
                metrics.rows_deleted += 1;
            } else {
                kept.push(row);
            }
        }
        if !any_deleted {
            continue; // file provably unaffected, left untouched
        }
        metrics.files_removed += 1;
        txn.stage_remove(Remove {
            path: file.path.clone(),
            deletion_timestamp: None,
            data_change: true,
        });
        if !kept.is_empty() {
            let new_files = runtime.write(Box::new(kept.into_iter().map(Ok)), &[], table_path)?;
            metrics.files_added += new_files.len() as u64;
            for f in new_files {
                txn.stage_add(f);
            }
        }
    }

    for (k, v) in metrics.as_operation_metrics("Target") {
        txn.set_operation_metric(k, v);
    }
    Ok(metrics)
}

/// UPDATE. Every candidate file is rewritten with `assignments` applied to matching rows;
/// non-matching rows are carried forward verbatim.
pub fn update<R: QueryRuntime>(
    txn: &mut OptimisticTransaction<'_>,
    runtime: &R,
    table_path: &str,
    predicate: Option<&Expr>,
    assignments: &HashMap<String, Expr>,
) -> DeltaResult<DmlMetrics> {
    let mut metrics = DmlMetrics::default();
    let candidates = match predicate {
        Some(p) => txn.filter_files(std::slice::from_ref(p)),
        None => txn.filter_files(&[]),
    };

    for file in candidates {
        let rows = runtime.scan(std::slice::from_ref(&file), &[], &[])?;
        let mut rewritten = Vec::new();
        let mut any_updated = false;
        for row in rows {
            let mut row = row?;
            let matches = match predicate {
                Some(p) => matches!(p.evaluate(&row)?, serde_json::Value::Bool(true)),
                None => true,
            };
            if matches {
                any_updated = true;
                metrics.rows_updated += 1;
                for (col, expr) in assignments {
                    let value = expr.evaluate(&row)?;
                    row.insert(col.clone(), value);
                }
            }
            rewritten.push(row);
        }
        if !any_updated {
            continue;
        }
        metrics.files_removed += 1;
        txn.stage_remove(Remove {
            path: file.path.clone(),
            deletion_timestamp: None,
            data_change: true,
        });
        let new_files = runtime.write(Box::new(rewritten.into_iter().map(Ok)), &[], table_path)?;
        metrics.files_added += new_files.len() as u64;
        for f in new_files {
            txn.stage_add(f);
        }
    }

    for (k, v) in metrics.as_operation_metrics("Target") {
        txn.set_operation_metric(k, v);
    }
    Ok(metrics)
}
