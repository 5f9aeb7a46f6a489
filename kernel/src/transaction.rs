//! The optimistic transaction / commit engine.
//!
//! ```text
//! Idle ──start()──▶ Reading ──record reads──▶ Preparing ──commit()──▶ Committed
//!                       │                                │
//!                       └────── abort() ─────┐           └── conflict ──▶ Retry (bounded)
//!                                             ▼
//!                                          Aborted
//! ```
//! The states above are tracked only for observability (`tracing` spans); the actual control
//! flow is the method sequence `start` → `filter_files`* → `stage_*`* → `commit`.

use std::collections::HashSet;

use crate::actions::{Action, Add, CommitInfo, Metadata, Protocol, Remove, SetTransaction};
use crate::checkpoint::CheckpointManager;
use crate::config::TableConfig;
use crate::error::{ConflictKind, DeltaResult, Error};
use crate::expressions::Expr;
use crate::file_index;
use crate::log_store::LogStore;
use crate::protocol;
use crate::schema;
use crate::snapshot::{Snapshot, SnapshotBuilder, TableState};
use crate::Version;

pub const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Debug, Default)]
struct ReadSet {
    predicates: Vec<Expr>,
    files: HashSet<String>,
}

/// Isolation level reported in `CommitInfo`: a transaction that only adds files and
/// never reads the existing file set is `SnapshotIsolation`; anything that reads or removes is
/// `Serializable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    SnapshotIsolation,
}

impl IsolationLevel {
    fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "Serializable",
            IsolationLevel::SnapshotIsolation => "SnapshotIsolation",
        }
    }
}

pub struct OptimisticTransaction<'a> {
    log_store: &'a LogStore,
    read_version: Version,
    base_metadata: Metadata,
    base_protocol: Protocol,
    config: TableConfig,
    read_set: ReadSet,
    staged_adds: Vec<Add>,
    staged_removes: Vec<Remove>,
    staged_metadata: Option<Metadata>,
    staged_protocol: Option<Protocol>,
    staged_txn: Option<SetTransaction>,
    operation: String,
    operation_parameters: std::collections::HashMap<String, String>,
    operation_metrics: std::collections::HashMap<String, String>,
    max_retries: u32,
    snapshot: Snapshot,
}

impl<'a> OptimisticTransaction<'a> {
    /// `start`: capture `read_version = snapshot.version`.
    pub fn start(log_store: &'a LogStore, operation: impl Into<String>) -> DeltaResult<Self> {
        let snapshot = SnapshotBuilder::new(log_store).build()?;
        protocol::check_can_read(snapshot.protocol())?;
        let config = TableConfig::parse(&snapshot.metadata().configuration)?;
        Ok(Self {
            log_store,
            read_version: snapshot.version(),
            base_metadata: snapshot.metadata().clone(),
            base_protocol: snapshot.protocol().clone(),
            config,
            read_set: ReadSet::default(),
            staged_adds: Vec::new(),
            staged_removes: Vec::new(),
            staged_metadata: None,
            staged_protocol: None,
            staged_txn: None,
            operation: operation.into(),
            operation_parameters: std::collections::HashMap::new(),
            operation_metrics: std::collections::HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            snapshot,
        })
    }

    pub fn read_version(&self) -> Version {
        self.read_version
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn set_operation_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.operation_parameters.insert(key.into(), value.into());
    }

    pub fn set_operation_metric(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.operation_metrics.insert(key.into(), value.into());
    }

    /// `filter_files`: data-skip the current snapshot's files against `predicates`, recording
    /// both the predicates and the surviving paths in the read-set for conflict detection.
    pub fn filter_files(&mut self, predicates: &[Expr]) -> Vec<Add> {
        let partition_cols = file_index::partition_column_set(&self.base_metadata.partition_columns);
        let files: Vec<Add> = self.snapshot.files().cloned().collect();
        let matched = file_index::filter_files(
            files.iter(),
            predicates,
            &partition_cols,
            self.config.stats_skipping,
        );
        self.read_set.predicates.extend(predicates.iter().cloned());
        self.read_set.files.extend(matched.iter().map(|a| a.path.clone()));
        matched.into_iter().cloned().collect()
    }

    pub fn stage_add(&mut self, add: Add) {
        self.staged_adds.push(add);
    }

    pub fn stage_remove(&mut self, remove: Remove) {
        self.staged_removes.push(remove);
    }

    pub fn stage_metadata(&mut self, metadata: Metadata) {
        self.staged_metadata = Some(metadata);
    }

    pub fn stage_protocol(&mut self, protocol: Protocol) {
        self.staged_protocol = Some(protocol);
    }

    pub fn stage_set_transaction(&mut self, txn: SetTransaction) {
        self.staged_txn = Some(txn);
    }

    fn is_blind_append(&self) -> bool {
        self.read_set.files.is_empty() && self.staged_removes.is_empty()
    }

    fn isolation_level(&self) -> IsolationLevel {
        if self.is_blind_append() {
            IsolationLevel::SnapshotIsolation
        } else {
            IsolationLevel::Serializable
        }
    }

    fn build_actions(&self) -> DeltaResult<Vec<Action>> {
        let mut actions = Vec::new();
        if let Some(metadata) = &self.staged_metadata {
            actions.push(Action::Metadata(metadata.clone()));
        }
        if let Some(protocol) = &self.staged_protocol {
            protocol::check_not_downgrade(&self.base_protocol, protocol)?;
            actions.push(Action::Protocol(protocol.clone()));
        }
        if self.config.append_only && !self.staged_removes.is_empty() {
            return Err(Error::generic("delta.appendOnly is set; RemoveFile is not permitted"));
        }
        for remove in &self.staged_removes {
            actions.push(Action::Remove(remove.clone()));
        }
        for add in &self.staged_adds {
            actions.push(Action::Add(add.clone()));
        }
        if let Some(txn) = &self.staged_txn {
            actions.push(Action::Txn(txn.clone()));
        }
        Ok(actions)
    }

    /// `commit`: validate, attempt the atomic write, resolve conflicts, retry (bounded).
    pub fn commit(mut self) -> DeltaResult<Version> {
        if let Some(new_metadata) = &self.staged_metadata {
            let new_schema = new_metadata.schema()?;
            let old_schema = self.base_metadata.schema()?;
            if !schema::is_read_compatible(&old_schema, &new_schema) {
                return Err(Error::IncompatibleSchema(
                    "new schema is not read-compatible with the current schema".into(),
                ));
            }
        }
        if let Some(protocol) = &self.staged_protocol {
            protocol::check_can_write(protocol)?;
        } else {
            protocol::check_can_write(&self.base_protocol)?;
        }

        let mut attempts = 0;
        loop {
            let actions = self.build_actions()?;
            let commit_info = self.build_commit_info();
            let mut lines: Vec<String> = Vec::with_capacity(actions.len() + 1);
            for action in &actions {
                lines.push(action.to_log_line()?);
            }
            lines.push(Action::CommitInfo(commit_info).to_log_line()?);

            let target_version = self.read_version + 1;
            match self.log_store.write(target_version, &lines) {
                Ok(()) => {
                    self.maybe_checkpoint(target_version)?;
                    return Ok(target_version);
                }
                Err(e) if e.is_version_conflict() => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(Error::MaxRetryExceeded { attempts });
                    }
                    let new_latest = self
                        .log_store
                        .latest_version()?
                        .ok_or_else(|| Error::corrupt_log("expected at least one commit after AlreadyExists"))?;
                    self.check_conflicts(self.read_version, new_latest)?;
                    tracing::debug!(
                        old_read_version = self.read_version,
                        new_read_version = new_latest,
                        "rebasing after lost commit race"
                    );
                    self.read_version = new_latest;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_commit_info(&self) -> CommitInfo {
        CommitInfo {
            timestamp: None,
            operation: Some(self.operation.clone()),
            operation_parameters: self.operation_parameters.clone(),
            read_version: Some(self.read_version as i64),
            isolation_level: Some(self.isolation_level().as_str().to_string()),
            is_blind_append: Some(self.is_blind_append()),
            operation_metrics: self.operation_metrics.clone(),
        }
    }

    fn maybe_checkpoint(&self, version: Version) -> DeltaResult<()> {
        let manager = CheckpointManager::new(self.log_store, self.config.checkpoint_interval);
        if !manager.should_checkpoint(version) {
            return Ok(());
        }
        let state = SnapshotBuilder::new(self.log_store).with_version(version).build()?.into_state();
        manager.maybe_checkpoint(&state);
        Ok(())
    }

    /// Walk every winning commit in `(read_version, new_latest]` and apply the conflict rules
    /// Returns `Err` on the first classified conflict found.
    fn check_conflicts(&self, from: Version, to: Version) -> DeltaResult<()> {
        for version in (from + 1)..=to {
            let lines = self.log_store.read(version)?;
            let winning: Vec<Action> = lines
                .iter()
                .map(|l| Action::parse_line(l))
                .collect::<DeltaResult<_>>()?;
            self.check_conflicts_in(&winning, version)?;
        }
        Ok(())
    }

    fn check_conflicts_in(&self, winning: &[Action], winning_version: Version) -> DeltaResult<()> {
        let has_metadata = winning.iter().any(|a| matches!(a, Action::Metadata(_)));
        if has_metadata && (!self.read_set.files.is_empty() || self.has_pending_writes()) {
            return Err(ConflictKind::MetadataChanged(winning_version).into());
        }
        let has_protocol = winning.iter().any(|a| matches!(a, Action::Protocol(_)));
        if has_protocol {
            return Err(ConflictKind::ProtocolChanged(winning_version).into());
        }

        let winning_removed_paths: HashSet<&str> = winning
            .iter()
            .filter_map(|a| match a {
                Action::Remove(r) => Some(r.path.as_str()),
                _ => None,
            })
            .collect();
        for path in &winning_removed_paths {
            if self.read_set.files.contains(*path) {
                return Err(ConflictKind::ConcurrentDeleteRead(winning_version).into());
            }
            if self.staged_removes.iter().any(|r| r.path == *path) {
                return Err(ConflictKind::ConcurrentDeleteDelete(winning_version).into());
            }
        }

        if !self.is_blind_append() {
            let winning_adds: Vec<Add> = winning
                .iter()
                .filter_map(|a| match a {
                    Action::Add(add) => Some(add.clone()),
                    _ => None,
                })
                .collect();
            if !winning_adds.is_empty() && !self.read_set.predicates.is_empty() {
                let partition_cols = file_index::partition_column_set(&self.base_metadata.partition_columns);
                let matched = file_index::filter_files(
                    winning_adds.iter(),
                    &self.read_set.predicates,
                    &partition_cols,
                    self.config.stats_skipping,
                );
                if !matched.is_empty() {
                    return Err(ConflictKind::ConcurrentAppend(winning_version).into());
                }
            }
        }

        if let Some(ours) = &self.staged_txn {
            let duplicate = winning.iter().any(|a| matches!(a, Action::Txn(t) if t.app_id == ours.app_id));
            if duplicate {
                return Err(ConflictKind::ConcurrentTransaction(winning_version).into());
            }
        }

        Ok(())
    }

    fn has_pending_writes(&self) -> bool {
        !self.staged_adds.is_empty() || !self.staged_removes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Format;
    use std::collections::HashMap;

    fn bootstrap(log_store: &LogStore, partition_columns: Vec<String>) {
        let metadata = Metadata {
            id: "t".into(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: r#"{"fields":[{"name":"k","data_type":"integer","nullable":true},{"name":"v","data_type":"integer","nullable":true}]}"#.into(),
            partition_columns,
            configuration: HashMap::new(),
            created_time: None,
        };
        let protocol = Protocol {
            min_reader_version: 1,
            min_writer_version: 2,
        };
        log_store
            .write(
                0,
                &[
                    Action::Metadata(metadata).to_log_line().unwrap(),
                    Action::Protocol(protocol).to_log_line().unwrap(),
                ],
            )
            .unwrap();
    }

    fn add(path: &str, partitions: &[(&str, &str)]) -> Add {
        Add {
            path: path.into(),
            partition_values: partitions.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            size: 10,
            modification_time: 0,
            data_change: true,
            stats: None,
            tags: None,
        }
    }

    #[test]
    fn blind_append_commits_without_conflict() {
        let (_store, log_store) = crate::log_store::in_memory();
        bootstrap(&log_store, vec![]);

        let mut txn = OptimisticTransaction::start(&log_store, "WRITE").unwrap();
        txn.stage_add(add("a.parquet", &[]));
        let version = txn.commit().unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn concurrent_append_conflicts_with_read_predicate() {
        let (_store, log_store) = crate::log_store::in_memory();
        bootstrap(&log_store, vec!["k".to_string()]);
        log_store
            .write(1, &[Action::Add(add("p1.parquet", &[("k", "1")])).to_log_line().unwrap()])
            .unwrap();

        let mut txn = OptimisticTransaction::start(&log_store, "MERGE").unwrap();
        let pred = Expr::Eq(Box::new(Expr::column("k")), Box::new(Expr::literal("1")));
        let _ = txn.filter_files(std::slice::from_ref(&pred));
        txn.stage_remove(Remove {
            path: "p1.parquet".into(),
            deletion_timestamp: Some(1),
            data_change: true,
        });

        // Simulate a concurrent writer winning version 2 with an add matching our predicate.
        log_store
            .write(2, &[Action::Add(add("p1-late.parquet", &[("k", "1")])).to_log_line().unwrap()])
            .unwrap();

        let result = txn.commit();
        assert!(matches!(result, Err(Error::Conflict(ConflictKind::ConcurrentAppend(2)))));
    }

    #[test]
    fn append_only_config_rejects_remove() {
        let (_store, log_store) = crate::log_store::in_memory();
        let metadata = Metadata {
            id: "t".into(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: r#"{"fields":[]}"#.into(),
            partition_columns: vec![],
            configuration: [("delta.appendOnly".to_string(), "true".to_string())].into_iter().collect(),
            created_time: None,
        };
        log_store
            .write(
                0,
                &[
                    Action::Metadata(metadata).to_log_line().unwrap(),
                    Action::Protocol(Protocol {
                        min_reader_version: 1,
                        min_writer_version: 2,
                    })
                    .to_log_line()
                    .unwrap(),
                ],
            )
            .unwrap();

        let mut txn = OptimisticTransaction::start(&log_store, "DELETE").unwrap();
        txn.stage_remove(Remove {
            path: "a.parquet".into(),
            deletion_timestamp: Some(1),
            data_change: true,
        });
        assert!(txn.commit().is_err());
    }
}
