//! The crate's single error type, threaded through every public `Result`.

use crate::Version;

/// A [`std::result::Result`] that has the crate [`Error`] as the error variant.
pub type DeltaResult<T, E = Error> = std::result::Result<T, E>;

/// Why an optimistic commit could not be applied, classified per the conflict rules of
/// the transaction engine. Each variant names the winning commit's version so callers can
/// inspect its `CommitInfo` for provenance.
#[derive(thiserror::Error, Debug)]
pub enum ConflictKind {
    #[error("concurrent transaction {0} changed the table's metadata")]
    MetadataChanged(Version),
    #[error("concurrent transaction {0} changed the table's protocol")]
    ProtocolChanged(Version),
    #[error("concurrent transaction {0} removed a file we read")]
    ConcurrentDeleteRead(Version),
    #[error("concurrent transaction {0} removed a file we also removed")]
    ConcurrentDeleteDelete(Version),
    #[error("concurrent transaction {0} added files matching our read predicates")]
    ConcurrentAppend(Version),
    #[error("concurrent transaction {0} committed a conflicting SetTransaction for the same app_id")]
    ConcurrentTransaction(Version),
}

/// The crate's error taxonomy, grouped as: Protocol, Concurrency, Schema,
/// DML, IO, Config.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // --- Protocol ---
    #[error("table requires reader version {required}, but only {supported} is supported")]
    UnsupportedReaderVersion { required: i32, supported: i32 },
    #[error("table requires writer version {required}, but only {supported} is supported")]
    UnsupportedWriterVersion { required: i32, supported: i32 },
    #[error("protocol downgrade rejected: existing reader/writer ({old_reader}, {old_writer}), attempted ({new_reader}, {new_writer})")]
    ProtocolDowngradeRejected {
        old_reader: i32,
        old_writer: i32,
        new_reader: i32,
        new_writer: i32,
    },

    // --- Concurrency ---
    #[error("commit conflict: {0}")]
    Conflict(#[from] ConflictKind),
    #[error("exceeded maximum commit retry attempts ({attempts})")]
    MaxRetryExceeded { attempts: u32 },

    // --- Schema ---
    #[error("streamed schema changed incompatibly: {0}")]
    SchemaChanged(String),
    #[error("schema change is not read-compatible: {0}")]
    IncompatibleSchema(String),
    #[error("invalid column name: {0}")]
    InvalidColumnName(String),
    #[error("nested field path `{0}` is not allowed in an INSERT value map")]
    NestedFieldInInsert(String),
    #[error("conflicting assignments to `{0}`")]
    ConflictingAssignments(String),

    // --- DML ---
    #[error("target row matched more than one source row and the effect is ambiguous")]
    MultipleSourceMatch,
    #[error("condition is not deterministic: {0}")]
    NonDeterministicCondition(String),
    #[error("subqueries are not supported in this expression position")]
    SubqueryNotSupported,
    #[error("partial table scans are not supported; the table must be scanned at its root")]
    PartialTableScan,
    #[error("predicate `{0}` references non-partition columns where only partition columns are allowed")]
    NonPartitionPredicate(String),

    // --- IO ---
    #[error("log file already exists at version {0}")]
    FileAlreadyExists(Version),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("corrupt log: {0}")]
    CorruptLog(String),
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    // --- Config ---
    #[error("unknown table property: {0}")]
    UnknownTableProperty(String),
    #[error("invalid value for table property `{key}`: {value}")]
    InvalidPropertyValue { key: String, value: String },

    // --- catch-all ---
    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn corrupt_log(msg: impl ToString) -> Self {
        Self::CorruptLog(msg.to_string())
    }

    /// True for the one error kind the transaction engine retries internally ("Recovered
    /// inside the transaction").
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::FileAlreadyExists(_))
    }
}
