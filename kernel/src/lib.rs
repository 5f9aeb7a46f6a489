//! Core of a transactional table-format library: an ordered log of JSON actions that describes,
//! for each version, which immutable data files belong to a table, plus optimistic transactions
//! and a MERGE engine layered on top.
//!
//! The crate never reads or writes the underlying columnar files itself. Every operation that
//! needs to touch row data goes through the [`query_runtime::QueryRuntime`] collaborator trait;
//! this crate only tracks file paths, sizes, partition values, and statistics.
//!
//! ```text
//! actions        -> typed log records and their JSON codec
//! log_store      -> atomic append/read/list of versioned log files
//! snapshot       -> replay an action stream into table state
//! checkpoint     -> periodic compacted state + `_last_checkpoint`
//! protocol       -> reader/writer version gate
//! transaction    -> optimistic commit engine with conflict detection and retry
//! file_index     -> partition pruning and stats-based data skipping
//! merge          -> MERGE (two-phase upsert)
//! dml            -> UPDATE / DELETE
//! streaming      -> incremental offset-based source
//! ```

pub mod actions;
pub mod checkpoint;
pub mod config;
pub mod dml;
pub mod error;
pub mod expressions;
pub mod file_index;
pub mod log_store;
pub mod merge;
pub mod path;
pub mod protocol;
pub mod schema;
pub mod snapshot;
pub mod streaming;
pub mod table_features;
pub mod transaction;
pub mod query_runtime;

pub use error::{DeltaResult, Error};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use transaction::OptimisticTransaction;

/// Table versions are non-negative and monotonically increasing; they never wrap
/// in any table this crate will see in practice, so a plain `u64` is used rather than a checked
/// newtype.
pub type Version = u64;
