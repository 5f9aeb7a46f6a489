//! A narrow expression language for predicates and value maps (spec design notes §9).
//!
//! Real engines bring their own SQL dialect; the core only needs enough of an `Expr` to split
//! conjunctions, report the columns it touches, and evaluate against a row or a per-file stats
//! summary. Anything richer belongs to the `QueryRuntime` collaborator, not here.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;

use crate::actions::FileStats;
use crate::error::{DeltaResult, Error};

/// A single row, keyed by column name. Nested struct fields are addressed with dotted paths
/// flattened into the same map by whoever produces the row (the `QueryRuntime`).
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    /// `<=>`: null-safe equality, where `null <=> null` is `true`.
    NullSafeEq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    /// Evaluate against a concrete row. SQL three-valued-logic: any comparison against a missing
    /// or JSON-null operand yields `null` (represented as `Value::Null`), not `false`.
    pub fn evaluate(&self, row: &Row) -> DeltaResult<Value> {
        match self {
            Expr::Column(name) => Ok(lookup(row, name).cloned().unwrap_or(Value::Null)),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Not(inner) => match inner.evaluate(row)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::NonDeterministicCondition(format!(
                    "NOT applied to non-boolean value {other}"
                ))),
            },
            Expr::And(l, r) => bool_and(l.evaluate(row)?, r.evaluate(row)?),
            Expr::Or(l, r) => bool_or(l.evaluate(row)?, r.evaluate(row)?),
            Expr::Eq(l, r) => Ok(three_valued_eq(&l.evaluate(row)?, &r.evaluate(row)?)),
            Expr::NullSafeEq(l, r) => {
                let (lv, rv) = (l.evaluate(row)?, r.evaluate(row)?);
                Ok(Value::Bool(lv == rv))
            }
            Expr::Lt(l, r) => compare(l, r, row, |o| o == std::cmp::Ordering::Less),
            Expr::Lte(l, r) => compare(l, r, row, |o| o != std::cmp::Ordering::Greater),
            Expr::Gt(l, r) => compare(l, r, row, |o| o == std::cmp::Ordering::Greater),
            Expr::Gte(l, r) => compare(l, r, row, |o| o != std::cmp::Ordering::Less),
            Expr::Add(l, r) => arith(l.evaluate(row)?, r.evaluate(row)?, |a, b| a + b),
            Expr::Sub(l, r) => arith(l.evaluate(row)?, r.evaluate(row)?, |a, b| a - b),
        }
    }

    /// Collect every column name this expression reads.
    pub fn column_refs(&self, out: &mut HashSet<String>) {
        match self {
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::Literal(_) => {}
            Expr::Not(inner) => inner.column_refs(out),
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Eq(l, r)
            | Expr::NullSafeEq(l, r)
            | Expr::Lt(l, r)
            | Expr::Lte(l, r)
            | Expr::Gt(l, r)
            | Expr::Gte(l, r)
            | Expr::Add(l, r)
            | Expr::Sub(l, r) => {
                l.column_refs(out);
                r.column_refs(out);
            }
        }
    }

    /// True iff every column this expression reads is in `columns`.
    pub fn references_only(&self, columns: &HashSet<String>) -> bool {
        let mut refs = HashSet::new();
        self.column_refs(&mut refs);
        refs.iter().all(|c| columns.contains(c))
    }

    /// Split a top-level conjunction (`a AND b AND c`) into its conjuncts. A non-`And` node is a
    /// single-element split of itself.
    pub fn split_conjunction(&self) -> Vec<&Expr> {
        match self {
            Expr::And(l, r) => {
                let mut parts = l.split_conjunction();
                parts.extend(r.split_conjunction());
                parts
            }
            other => vec![other],
        }
    }
}

fn lookup<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(name) {
        return Some(v);
    }
    // Dotted struct-path lookup: "addr.city" against a nested JSON object value.
    let mut parts = name.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next()?;
    row.get(head)?.get(rest)
}

fn bool_and(l: Value, r: Value) -> DeltaResult<Value> {
    Ok(match (as_bool_opt(&l)?, as_bool_opt(&r)?) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    })
}

fn bool_or(l: Value, r: Value) -> DeltaResult<Value> {
    Ok(match (as_bool_opt(&l)?, as_bool_opt(&r)?) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    })
}

fn as_bool_opt(v: &Value) -> DeltaResult<Option<bool>> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(Error::NonDeterministicCondition(format!(
            "expected boolean, found {other}"
        ))),
    }
}

fn three_valued_eq(l: &Value, r: &Value) -> Value {
    if l.is_null() || r.is_null() {
        Value::Null
    } else {
        Value::Bool(l == r)
    }
}

fn compare(l: &Expr, r: &Expr, row: &Row, op: impl Fn(std::cmp::Ordering) -> bool) -> DeltaResult<Value> {
    let (lv, rv) = (l.evaluate(row)?, r.evaluate(row)?);
    if lv.is_null() || rv.is_null() {
        return Ok(Value::Null);
    }
    let ordering = numeric_cmp(&lv, &rv)?;
    Ok(Value::Bool(op(ordering)))
}

fn numeric_cmp(l: &Value, r: &Value) -> DeltaResult<std::cmp::Ordering> {
    let (lf, rf) = (as_f64(l)?, as_f64(r)?);
    lf.partial_cmp(&rf)
        .ok_or_else(|| Error::NonDeterministicCondition("incomparable values".into()))
}

fn as_f64(v: &Value) -> DeltaResult<f64> {
    v.as_f64()
        .ok_or_else(|| Error::NonDeterministicCondition(format!("expected numeric value, found {v}")))
}

fn arith(l: Value, r: Value, op: impl Fn(f64, f64) -> f64) -> DeltaResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let result = op(as_f64(&l)?, as_f64(&r)?);
    Ok(serde_json::json!(result))
}

/// Range-based pruning against per-file statistics. Returns `true` only when the
/// predicate can be proven false for every row in the file; any inconclusive shape (missing
/// stat, unsupported expression) conservatively returns `false` (retain).
pub fn provably_false_against_stats(expr: &Expr, stats: &FileStats) -> bool {
    match expr {
        Expr::And(l, r) => provably_false_against_stats(l, stats) || provably_false_against_stats(r, stats),
        Expr::Eq(l, r) => eq_provably_false(l, r, stats) || eq_provably_false(r, l, stats),
        Expr::Gt(col, lit) => max_provably_false(col, lit, stats, |max, v| max <= v),
        Expr::Gte(col, lit) => max_provably_false(col, lit, stats, |max, v| max < v),
        Expr::Lt(col, lit) => min_provably_false(col, lit, stats, |min, v| min >= v),
        Expr::Lte(col, lit) => min_provably_false(col, lit, stats, |min, v| min > v),
        _ => false,
    }
}

fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(name) => Some(name),
        _ => None,
    }
}

fn literal_f64(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Literal(v) => v.as_f64(),
        _ => None,
    }
}

fn eq_provably_false(col_side: &Expr, lit_side: &Expr, stats: &FileStats) -> bool {
    let (Some(col), Some(lit)) = (column_name(col_side), literal_f64(lit_side)) else {
        return false;
    };
    let (Some(min), Some(max)) = (
        stats.min_values.get(col).and_then(Value::as_f64),
        stats.max_values.get(col).and_then(Value::as_f64),
    ) else {
        return false;
    };
    lit < min || lit > max
}

fn max_provably_false(col_side: &Expr, lit_side: &Expr, stats: &FileStats, pred: impl Fn(f64, f64) -> bool) -> bool {
    let (Some(col), Some(lit)) = (column_name(col_side), literal_f64(lit_side)) else {
        return false;
    };
    let Some(max) = stats.max_values.get(col).and_then(Value::as_f64) else {
        return false;
    };
    pred(max, lit)
}

fn min_provably_false(col_side: &Expr, lit_side: &Expr, stats: &FileStats, pred: impl Fn(f64, f64) -> bool) -> bool {
    let (Some(col), Some(lit)) = (column_name(col_side), literal_f64(lit_side)) else {
        return false;
    };
    let Some(min) = stats.min_values.get(col).and_then(Value::as_f64) else {
        return false;
    };
    pred(min, lit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn eq_is_three_valued() {
        let r = row(&[("k", Value::Null)]);
        let expr = Expr::Eq(Box::new(Expr::column("k")), Box::new(Expr::literal(1)));
        assert_eq!(expr.evaluate(&r).unwrap(), Value::Null);
    }

    #[test]
    fn null_safe_eq_treats_null_equal_to_null() {
        let r = row(&[("k", Value::Null)]);
        let expr = Expr::NullSafeEq(Box::new(Expr::column("k")), Box::new(Expr::literal(Value::Null)));
        assert_eq!(expr.evaluate(&r).unwrap(), Value::Bool(true));
    }

    #[test]
    fn split_conjunction_flattens_and_chain() {
        let expr = Expr::And(
            Box::new(Expr::Eq(Box::new(Expr::column("a")), Box::new(Expr::literal(1)))),
            Box::new(Expr::Eq(Box::new(Expr::column("b")), Box::new(Expr::literal(2)))),
        );
        assert_eq!(expr.split_conjunction().len(), 2);
    }

    #[test]
    fn references_only_checks_column_closure() {
        let expr = Expr::Eq(Box::new(Expr::column("t.k")), Box::new(Expr::literal(1)));
        let mut allowed = HashSet::new();
        allowed.insert("t.k".to_string());
        assert!(expr.references_only(&allowed));
        allowed.clear();
        assert!(!expr.references_only(&allowed));
    }

    #[test]
    fn stats_pruning_proves_out_of_range_equality_false() {
        let stats = FileStats {
            num_records: 10,
            min_values: [("k".to_string(), serde_json::json!(0))].into_iter().collect(),
            max_values: [("k".to_string(), serde_json::json!(5))].into_iter().collect(),
            null_count: Default::default(),
        };
        let expr = Expr::Eq(Box::new(Expr::column("k")), Box::new(Expr::literal(100)));
        assert!(provably_false_against_stats(&expr, &stats));
    }

    #[test]
    fn stats_pruning_retains_when_stat_missing() {
        let stats = FileStats::default();
        let expr = Expr::Eq(Box::new(Expr::column("k")), Box::new(Expr::literal(100)));
        assert!(!provably_false_against_stats(&expr, &stats));
    }
}
