//! The `QueryRuntime` capability: the sole seam between this crate and an actual
//! columnar execution engine. The core never parses data files; it scans, joins, and writes
//! through this trait and otherwise only tracks paths, sizes, stats, and partition values.

use crate::actions::Add;
use crate::error::DeltaResult;
use crate::expressions::{Expr, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    RightOuter,
    FullOuter,
    LeftAnti,
}

/// Implemented by the execution engine. All methods are synchronous from the core's point of
/// view; a real implementation is free to run a distributed job underneath and block until it
/// completes (the data-processing layer is a bulk-synchronous computation observed as
/// a plain function by the log layer).
pub trait QueryRuntime {
    /// Read rows out of `files`, projected to `projection` (empty means all columns) and
    /// filtered by `predicates` (conjunction).
    fn scan(
        &self,
        files: &[Add],
        projection: &[String],
        predicates: &[Expr],
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<Row>>>>;

    /// Join two row streams on `condition`. The joined row carries both sides' columns; an
    /// absent side's columns are entirely missing from the row (used by the merge engine to
    /// detect "source_present"/"target_present" via `Row::contains_key` on a sentinel column).
    fn join(
        &self,
        left: Box<dyn Iterator<Item = DeltaResult<Row>>>,
        right: Box<dyn Iterator<Item = DeltaResult<Row>>>,
        condition: &Expr,
        kind: JoinKind,
    ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<Row>>>>;

    /// Materialize `rows` into one or more new data files under `table_path`, partitioned by
    /// `partition_cols`. Returns the `AddFile` actions describing what was written; file sizing
    /// is entirely the runtime's decision.
    fn write(&self, rows: Box<dyn Iterator<Item = DeltaResult<Row>>>, partition_cols: &[String], table_path: &str) -> DeltaResult<Vec<Add>>;
}

/// A minimal in-process `QueryRuntime` backed by an in-memory row store, keyed by file path.
/// Exists purely to exercise the transaction/merge/dml/streaming logic in tests without a real
/// columnar engine.
pub mod memory {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    pub struct MemoryRuntime {
        files: RefCell<HashMap<String, Vec<Row>>>,
    }

    impl MemoryRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed the runtime with rows for a file path that will be referenced by an `AddFile`
        /// the test constructs directly.
        pub fn seed(&self, path: &str, rows: Vec<Row>) {
            self.files.borrow_mut().insert(path.to_string(), rows);
        }

        pub fn rows_for(&self, path: &str) -> Vec<Row> {
            self.files.borrow().get(path).cloned().unwrap_or_default()
        }
    }

    impl QueryRuntime for MemoryRuntime {
        fn scan(
            &self,
            files: &[Add],
            projection: &[String],
            predicates: &[Expr],
        ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<Row>>>> {
            let mut out = Vec::new();
            for file in files {
                for row in self.rows_for(&file.path) {
                    let keep = predicates.iter().all(|p| {
                        matches!(p.evaluate(&row), Ok(serde_json::Value::Bool(true)))
                    });
                    if !keep {
                        continue;
                    }
                    if projection.is_empty() {
                        out.push(Ok(row));
                    } else {
                        let projected: Row = projection
                            .iter()
                            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                            .collect();
                        out.push(Ok(projected));
                    }
                }
            }
            Ok(Box::new(out.into_iter()))
        }

        fn join(
            &self,
            left: Box<dyn Iterator<Item = DeltaResult<Row>>>,
            right: Box<dyn Iterator<Item = DeltaResult<Row>>>,
            condition: &Expr,
            kind: JoinKind,
        ) -> DeltaResult<Box<dyn Iterator<Item = DeltaResult<Row>>>> {
            let left: Vec<Row> = left.collect::<DeltaResult<_>>()?;
            let right: Vec<Row> = right.collect::<DeltaResult<_>>()?;
            let mut out = Vec::new();

            let mut right_matched = vec![false; right.len()];
            for l in &left {
                let mut matched = false;
                for (ri, r) in right.iter().enumerate() {
                    let combined = merge_rows(l, r);
                    if matches!(condition.evaluate(&combined), Ok(serde_json::Value::Bool(true))) {
                        matched = true;
                        right_matched[ri] = true;
                        if kind != JoinKind::LeftAnti {
                            out.push(Ok(combined));
                        }
                    }
                }
                if !matched {
                    match kind {
                        JoinKind::LeftAnti => out.push(Ok(l.clone())),
                        JoinKind::FullOuter => out.push(Ok(l.clone())),
                        JoinKind::Inner | JoinKind::RightOuter => {}
                    }
                }
            }
            if matches!(kind, JoinKind::RightOuter | JoinKind::FullOuter) {
                for (ri, matched) in right_matched.iter().enumerate() {
                    if !matched {
                        out.push(Ok(right[ri].clone()));
                    }
                }
            }
            Ok(Box::new(out.into_iter()))
        }

        fn write(&self, rows: Box<dyn Iterator<Item = DeltaResult<Row>>>, _partition_cols: &[String], _table_path: &str) -> DeltaResult<Vec<Add>> {
            let rows: Vec<Row> = rows.collect::<DeltaResult<_>>()?;
            if rows.is_empty() {
                return Ok(vec![]);
            }
            let path = format!("part-{}.parquet", Uuid::new_v4());
            let size = rows.len() as i64 * 64;
            self.files.borrow_mut().insert(path.clone(), rows);
            Ok(vec![Add {
                path,
                partition_values: HashMap::new(),
                size,
                modification_time: 0,
                data_change: true,
                stats: None,
                tags: None,
            }])
        }
    }

    fn merge_rows(left: &Row, right: &Row) -> Row {
        let mut combined = left.clone();
        for (k, v) in right {
            combined.insert(k.clone(), v.clone());
        }
        combined
    }
}
