//! Checkpoint manager: periodic compacted state snapshots plus the
//! `_last_checkpoint` pointer. Checkpoint writes are advisory -- a failure is logged and
//! retried later; their absence never affects correctness, only replay cost.

use serde::{Deserialize, Serialize};

use crate::actions::{Metadata, Protocol, SetTransaction};
use crate::error::DeltaResult;
use crate::log_store::LogStore;
use crate::snapshot::TableState;
use crate::Version;

pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;

/// The serialized form of a checkpoint: a compacted snapshot of files, metadata, protocol, and
/// app transactions. We persist this as JSON rather than the columnar format real
/// Delta checkpoints use -- the core never owns a Parquet writer, only the `QueryRuntime` does,
/// and this structure is purely a replay shortcut, not a user-visible data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub version: Version,
    pub metadata: Metadata,
    pub protocol: Protocol,
    pub files: Vec<crate::actions::Add>,
    pub app_transactions: Vec<SetTransaction>,
}

impl CheckpointData {
    pub fn from_state(state: &TableState) -> Self {
        Self {
            version: state.version,
            metadata: state.metadata.clone(),
            protocol: state.protocol.clone(),
            files: state.files.values().cloned().collect(),
            app_transactions: state.app_transactions.values().cloned().collect(),
        }
    }
}

/// `_last_checkpoint` pointer contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCheckpointHint {
    pub version: Version,
    pub size: u64,
}

pub struct CheckpointManager<'a> {
    log_store: &'a LogStore,
    interval: u64,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(log_store: &'a LogStore, interval: u64) -> Self {
        Self { log_store, interval }
    }

    pub fn should_checkpoint(&self, version: Version) -> bool {
        self.interval > 0 && version > 0 && version % self.interval == 0
    }

    /// Best-effort checkpoint write. Failures are logged, never propagated -- a missed
    /// checkpoint only costs replay time on the next snapshot load.
    pub fn maybe_checkpoint(&self, state: &TableState) {
        if !self.should_checkpoint(state.version) {
            return;
        }
        if let Err(e) = self.write_checkpoint(state) {
            tracing::warn!(version = state.version, error = %e, "checkpoint write failed; will retry later");
        }
    }

    pub fn write_checkpoint(&self, state: &TableState) -> DeltaResult<()> {
        let data = CheckpointData::from_state(state);
        let bytes = serde_json::to_vec(&data)?;
        let size = bytes.len() as u64;
        self.log_store.write_checkpoint(state.version, bytes)?;
        let hint = LastCheckpointHint {
            version: state.version,
            size,
        };
        self.log_store
            .write_last_checkpoint(serde_json::to_vec(&hint)?)?;
        tracing::info!(version = state.version, "wrote checkpoint");
        Ok(())
    }

    /// Find the newest checkpoint actually present on storage at or below `at_or_below`. This
    /// never trusts `_last_checkpoint` blindly: a stale or half-written hint just means we fall
    /// back to a listing-based search.
    pub fn find_usable_checkpoint(&self, at_or_below: Option<Version>) -> DeltaResult<Option<CheckpointData>> {
        if let Some(hint_bytes) = self.log_store.read_last_checkpoint()? {
            if let Ok(hint) = serde_json::from_slice::<LastCheckpointHint>(&hint_bytes) {
                let in_range = at_or_below.map(|v| hint.version <= v).unwrap_or(true);
                if in_range && self.log_store.checkpoint_exists(hint.version) {
                    return Ok(Some(self.load(hint.version)?));
                }
            }
        }
        let mut candidates = self.log_store.all_checkpoint_versions()?;
        if let Some(cap) = at_or_below {
            candidates.retain(|v| *v <= cap);
        }
        match candidates.into_iter().max() {
            Some(version) => Ok(Some(self.load(version)?)),
            None => Ok(None),
        }
    }

    fn load(&self, version: Version) -> DeltaResult<CheckpointData> {
        let bytes = self.log_store.read_checkpoint(version)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Format;
    use std::collections::HashMap;

    fn sample_state(version: Version) -> TableState {
        let mut state = TableState::new(
            Metadata {
                id: "t".into(),
                name: None,
                description: None,
                format: Format::default(),
                schema_string: r#"{"fields":[]}"#.into(),
                partition_columns: vec![],
                configuration: HashMap::new(),
                created_time: None,
            },
            Protocol {
                min_reader_version: 1,
                min_writer_version: 2,
            },
        );
        state.version = version;
        state
    }

    #[test]
    fn checkpoint_interval_respected() {
        let (_store, log_store) = crate::log_store::in_memory();
        let mgr = CheckpointManager::new(&log_store, 10);
        assert!(!mgr.should_checkpoint(5));
        assert!(mgr.should_checkpoint(10));
        assert!(!mgr.should_checkpoint(15));
        assert!(mgr.should_checkpoint(20));
    }

    #[test]
    fn write_and_find_checkpoint_roundtrip() {
        let (_store, log_store) = crate::log_store::in_memory();
        let mgr = CheckpointManager::new(&log_store, 10);
        let state = sample_state(10);
        mgr.write_checkpoint(&state).unwrap();

        let found = mgr.find_usable_checkpoint(None).unwrap().unwrap();
        assert_eq!(found.version, 10);
    }

    #[test]
    fn stale_last_checkpoint_hint_falls_back_to_listing() {
        let (_store, log_store) = crate::log_store::in_memory();
        let mgr = CheckpointManager::new(&log_store, 10);
        mgr.write_checkpoint(&sample_state(10)).unwrap();
        // Corrupt the hint to point at a version with no checkpoint file.
        let bad_hint = LastCheckpointHint { version: 20, size: 0 };
        log_store
            .write_last_checkpoint(serde_json::to_vec(&bad_hint).unwrap())
            .unwrap();

        let found = mgr.find_usable_checkpoint(None).unwrap().unwrap();
        assert_eq!(found.version, 10);
    }
}
