//! The incremental streaming source: a logically infinite sequence
//! of `AddFile`s with stable ordering `(version, index)`, consumed in bounded micro-batches.

use crate::actions::{Action, Add};
use crate::error::{DeltaResult, Error};
use crate::log_store::LogStore;
use crate::schema::{self, StructType};
use crate::snapshot::Snapshot;
use crate::Version;

/// `index = -1` is the sentinel meaning "before the first AddFile of this version".
pub const BEFORE_FIRST_INDEX: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamOffset {
    pub table_id: String,
    pub reservoir_version: Version,
    pub index: i64,
    pub is_starting_version: bool,
}

impl StreamOffset {
    pub fn start_of(table_id: impl Into<String>, version: Version) -> Self {
        Self {
            table_id: table_id.into(),
            reservoir_version: version,
            index: BEFORE_FIRST_INDEX,
            is_starting_version: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AdmissionControl {
    MaxFiles(u64),
    MaxBytes(u64),
    Composite { max_files: u64, max_bytes: u64 },
    Unlimited,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        AdmissionControl::MaxFiles(1000)
    }
}

impl AdmissionControl {
    fn admits(&self, files_so_far: u64, bytes_so_far: i64) -> bool {
        match self {
            AdmissionControl::MaxFiles(n) => files_so_far < *n,
            AdmissionControl::MaxBytes(b) => (bytes_so_far as u64) < *b,
            AdmissionControl::Composite { max_files, max_bytes } => {
                files_so_far < *max_files && (bytes_so_far as u64) < *max_bytes
            }
            AdmissionControl::Unlimited => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub ignore_changes: bool,
    pub ignore_deletes: bool,
}

/// Where a stream should begin. `None` (no variant picked) means "backfill the current
/// snapshot", which is handled separately by `StreamingSource::start`.
#[derive(Debug, Clone, Copy)]
pub enum StartingPosition {
    Version(Version),
    Latest,
    Timestamp(i64),
}

/// One micro-batch worth of newly-visible files, plus the offset to resume from.
#[derive(Debug, Clone)]
pub struct Batch {
    pub files: Vec<Add>,
    pub end_offset: StreamOffset,
}

pub struct StreamingSource<'a> {
    log_store: &'a LogStore,
    table_id: String,
    admission: AdmissionControl,
    options: StreamOptions,
    starting_schema: StructType,
}

impl<'a> StreamingSource<'a> {
    pub fn new(log_store: &'a LogStore, table_id: impl Into<String>, starting_schema: StructType) -> Self {
        Self {
            log_store,
            table_id: table_id.into(),
            admission: AdmissionControl::default(),
            options: StreamOptions::default(),
            starting_schema,
        }
    }

    pub fn with_admission_control(mut self, admission: AdmissionControl) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve where this stream should begin. With a `position`, that's a direct offset:
    /// `Latest` and `Timestamp` only ever admit future commits, `Version` starts replaying at
    /// that version. With no `position`, the stream instead backfills `snapshot`'s live file set
    /// as one or more synthetic batches (windowed by admission control exactly like `next_batch`
    /// windows commit replay), then continues tailing from the version right after the snapshot.
    pub fn start(
        &self,
        position: Option<StartingPosition>,
        snapshot: &Snapshot,
    ) -> DeltaResult<(Vec<Batch>, StreamOffset)> {
        match position {
            None => {
                let batches = self.backfill_initial_snapshot(snapshot)?;
                let end_offset = batches
                    .last()
                    .map(|b| b.end_offset.clone())
                    .unwrap_or_else(|| StreamOffset::start_of(self.table_id.clone(), snapshot.version() + 1));
                Ok((batches, end_offset))
            }
            Some(StartingPosition::Version(v)) => Ok((vec![], StreamOffset::start_of(self.table_id.clone(), v))),
            Some(StartingPosition::Latest) => {
                let latest = self.log_store.latest_version()?.unwrap_or(0);
                Ok((vec![], self.offset_after(latest)))
            }
            Some(StartingPosition::Timestamp(ts)) => {
                let latest = self.log_store.latest_version()?.unwrap_or(0);
                for version in 0..=latest {
                    if let Some(commit_ts) = self.commit_timestamp(version)? {
                        if commit_ts >= ts {
                            return Ok((vec![], StreamOffset::start_of(self.table_id.clone(), version)));
                        }
                    }
                }
                // No commit at or after `ts` exists yet: start at the next future commit.
                Ok((vec![], self.offset_after(latest)))
            }
        }
    }

    fn offset_after(&self, version: Version) -> StreamOffset {
        StreamOffset {
            table_id: self.table_id.clone(),
            reservoir_version: version + 1,
            index: BEFORE_FIRST_INDEX,
            is_starting_version: false,
        }
    }

    /// `CommitInfo.timestamp` for `version`, or `None` if that commit carries no `CommitInfo` (or
    /// no timestamp on it).
    fn commit_timestamp(&self, version: Version) -> DeltaResult<Option<i64>> {
        let lines = self.log_store.read(version)?;
        for line in &lines {
            if let Action::CommitInfo(info) = Action::parse_line(line)? {
                return Ok(info.timestamp);
            }
        }
        Ok(None)
    }

    /// Present `snapshot`'s current file set as a sequence of synthetic batches, chunked by the
    /// same admission control `next_batch` uses. Files are ordered by path for a stable,
    /// deterministic split across batches. The final batch's offset bumps past the snapshot's
    /// version exactly like an end-of-version bump, so a subsequent `next_batch` call only sees
    /// commits after the backfilled snapshot.
    fn backfill_initial_snapshot(&self, snapshot: &Snapshot) -> DeltaResult<Vec<Batch>> {
        let mut files: Vec<Add> = snapshot.files().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let version = snapshot.version();

        let mut batches = Vec::new();
        let mut remaining = files.into_iter().peekable();
        let mut emitted = 0u64;
        while remaining.peek().is_some() {
            let mut batch_files = Vec::new();
            let mut bytes = 0i64;
            while let Some(next) = remaining.peek() {
                if !batch_files.is_empty() && !self.admission.admits(batch_files.len() as u64, bytes) {
                    break;
                }
                let add = next.clone();
                remaining.next();
                bytes += add.size;
                batch_files.push(add);
                if !self.admission.admits(batch_files.len() as u64, bytes) {
                    break;
                }
            }
            emitted += batch_files.len() as u64;
            let end_offset = if remaining.peek().is_none() {
                self.offset_after(version)
            } else {
                StreamOffset {
                    table_id: self.table_id.clone(),
                    reservoir_version: version,
                    index: emitted as i64 - 1,
                    is_starting_version: true,
                }
            };
            batches.push(Batch { files: batch_files, end_offset });
        }
        Ok(batches)
    }

    /// Produce the next micro-batch starting just after `offset`, honoring admission control
    /// and per-version hygiene. Returns `None` if no new files are available yet.
    pub fn next_batch(&mut self, offset: StreamOffset) -> DeltaResult<Option<Batch>> {
        if offset.table_id != self.table_id {
            return Err(Error::generic(format!(
                "offset is for table {} but this stream is reading table {}",
                offset.table_id, self.table_id
            )));
        }

        let mut files = Vec::new();
        let mut bytes = 0i64;
        let mut current = offset;

        let latest = self.log_store.latest_version()?;
        let Some(latest) = latest else { return Ok(None) };
        if current.reservoir_version > latest {
            return Ok(None);
        }

        'versions: for version in current.reservoir_version..=latest {
            let lines = self.log_store.read(version)?;
            let actions: Vec<Action> = lines.iter().map(|l| Action::parse_line(l)).collect::<DeltaResult<_>>()?;

            self.apply_hygiene(&actions, version)?;

            let start_index = if version == current.reservoir_version { current.index } else { BEFORE_FIRST_INDEX };
            let mut index = BEFORE_FIRST_INDEX;
            let mut last_index_in_version = BEFORE_FIRST_INDEX;
            for action in &actions {
                let Action::Add(add) = action else { continue };
                if !add.data_change {
                    continue;
                }
                index += 1;
                last_index_in_version = index;
                if index <= start_index {
                    continue;
                }
                if !self.admission.admits(files.len() as u64, bytes) {
                    current = StreamOffset {
                        table_id: self.table_id.clone(),
                        reservoir_version: version,
                        index: index - 1,
                        is_starting_version: false,
                    };
                    break 'versions;
                }
                files.push(add.clone());
                bytes += add.size;
            }
            // End-of-version bump: we consumed every AddFile in this version.
            current = self.offset_after(version);
            let _ = last_index_in_version;
        }

        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch {
            files,
            end_offset: current,
        }))
    }

    fn apply_hygiene(&self, actions: &[Action], version: Version) -> DeltaResult<()> {
        let has_data_changing_add = actions.iter().any(|a| matches!(a, Action::Add(add) if add.data_change));
        let has_data_changing_remove = actions.iter().any(|a| matches!(a, Action::Remove(r) if r.data_change));

        if has_data_changing_remove {
            if has_data_changing_add && !self.options.ignore_changes {
                return Err(Error::generic(format!(
                    "version {version} both adds and removes data; set ignore_changes to stream through updates"
                )));
            }
            if !has_data_changing_add && !self.options.ignore_deletes {
                return Err(Error::generic(format!(
                    "version {version} deletes data; set ignore_deletes to stream through deletes"
                )));
            }
        }

        for action in actions {
            if let Action::Metadata(m) = action {
                let new_schema = m.schema()?;
                if !schema::is_read_compatible(&self.starting_schema, &new_schema) {
                    return Err(Error::SchemaChanged(format!(
                        "schema at version {version} is not read-compatible with the stream's starting schema"
                    )));
                }
            }
            if let Action::Protocol(p) = action {
                crate::protocol::check_can_read(p)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Format, Metadata, Protocol};
    use crate::snapshot::SnapshotBuilder;
    use std::collections::HashMap;

    const TABLE_ID: &str = "t";

    fn add(path: &str) -> Add {
        Add {
            path: path.into(),
            partition_values: HashMap::new(),
            size: 10,
            modification_time: 0,
            data_change: true,
            stats: None,
            tags: None,
        }
    }

    fn bootstrap(log_store: &LogStore) -> StructType {
        let schema = StructType::new([crate::schema::StructField::new(
            "k",
            crate::schema::DataType::Integer,
            true,
        )]);
        let metadata = Metadata {
            id: TABLE_ID.into(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: serde_json::to_string(&schema).unwrap(),
            partition_columns: vec![],
            configuration: HashMap::new(),
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
        schema
    }

    #[test]
    fn admission_control_splits_a_version_across_batches() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store
            .write(
                1,
                &[
                    Action::Add(add("f0")).to_log_line().unwrap(),
                    Action::Add(add("f1")).to_log_line().unwrap(),
                    Action::Add(add("f2")).to_log_line().unwrap(),
                ],
            )
            .unwrap();

        let mut source =
            StreamingSource::new(&log_store, TABLE_ID, schema).with_admission_control(AdmissionControl::MaxFiles(2));
        let offset = StreamOffset::start_of(TABLE_ID, 1);
        let batch1 = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(batch1.files.len(), 2);
        assert_eq!(batch1.end_offset.reservoir_version, 1);
        assert_eq!(batch1.end_offset.index, 1);

        let batch2 = source.next_batch(batch1.end_offset).unwrap().unwrap();
        assert_eq!(batch2.files.len(), 1);
        assert_eq!(batch2.end_offset.reservoir_version, 2);
        assert_eq!(batch2.end_offset.index, BEFORE_FIRST_INDEX);
    }

    #[test]
    fn end_of_version_bump_skips_rereading_same_version() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store.write(1, &[Action::Add(add("f0")).to_log_line().unwrap()]).unwrap();

        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let batch = source.next_batch(StreamOffset::start_of(TABLE_ID, 1)).unwrap().unwrap();
        assert_eq!(batch.end_offset.reservoir_version, 2);

        let next = source.next_batch(batch.end_offset).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn non_data_changing_add_is_skipped() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        let mut compaction = add("compacted");
        compaction.data_change = false;
        log_store.write(1, &[Action::Add(compaction).to_log_line().unwrap()]).unwrap();

        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let batch = source.next_batch(StreamOffset::start_of(TABLE_ID, 1)).unwrap();
        assert!(batch.is_none());
    }

    #[test]
    fn an_offset_for_a_different_table_is_rejected() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let foreign_offset = StreamOffset::start_of("other-table", 0);
        assert!(source.next_batch(foreign_offset).is_err());
    }

    /// Scenario: snapshot at the stream's start has 5 AddFiles spanning 2 versions;
    /// `maxFilesPerTrigger=2`. With no starting position, the stream must backfill the live
    /// snapshot file set as `[f0,f1], [f2,f3], [f4]`, bumping to `(2,-1,false)` after the last
    /// backfill batch, then pick up a later commit's files from that offset.
    #[test]
    fn backfills_the_initial_snapshot_then_tails_new_commits() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store
            .write(
                1,
                &[
                    Action::Add(add("f0")).to_log_line().unwrap(),
                    Action::Add(add("f1")).to_log_line().unwrap(),
                    Action::Add(add("f2")).to_log_line().unwrap(),
                    Action::Add(add("f3")).to_log_line().unwrap(),
                    Action::Add(add("f4")).to_log_line().unwrap(),
                ],
            )
            .unwrap();

        let snapshot = SnapshotBuilder::new(&log_store).build().unwrap();
        assert_eq!(snapshot.num_files(), 5);

        let mut source =
            StreamingSource::new(&log_store, TABLE_ID, schema).with_admission_control(AdmissionControl::MaxFiles(2));
        let (batches, offset) = source.start(None, &snapshot).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].files.len(), 2);
        assert_eq!(batches[1].files.len(), 2);
        assert_eq!(batches[2].files.len(), 1);
        assert!(batches[0].end_offset.is_starting_version);
        assert_eq!(offset.reservoir_version, 2);
        assert_eq!(offset.index, BEFORE_FIRST_INDEX);
        assert!(!offset.is_starting_version);

        log_store
            .write(
                2,
                &[
                    Action::Add(add("g0")).to_log_line().unwrap(),
                    Action::Add(add("g1")).to_log_line().unwrap(),
                    Action::Add(add("g2")).to_log_line().unwrap(),
                ],
            )
            .unwrap();
        let next = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(next.files.len(), 2);
        assert_eq!(next.files[0].path, "g0");
        assert_eq!(next.files[1].path, "g1");
    }

    #[test]
    fn starting_version_skips_straight_to_that_version() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store.write(1, &[Action::Add(add("f0")).to_log_line().unwrap()]).unwrap();
        log_store.write(2, &[Action::Add(add("f1")).to_log_line().unwrap()]).unwrap();

        let snapshot = SnapshotBuilder::new(&log_store).build().unwrap();
        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let (batches, offset) = source.start(Some(StartingPosition::Version(2)), &snapshot).unwrap();
        assert!(batches.is_empty());
        let batch = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(batch.files.len(), 1);
        assert_eq!(batch.files[0].path, "f1");
    }

    #[test]
    fn starting_latest_only_admits_future_commits() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store.write(1, &[Action::Add(add("f0")).to_log_line().unwrap()]).unwrap();

        let snapshot = SnapshotBuilder::new(&log_store).build().unwrap();
        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let (batches, offset) = source.start(Some(StartingPosition::Latest), &snapshot).unwrap();
        assert!(batches.is_empty());
        assert!(source.next_batch(offset.clone()).unwrap().is_none());

        log_store.write(2, &[Action::Add(add("f1")).to_log_line().unwrap()]).unwrap();
        let batch = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(batch.files[0].path, "f1");
    }

    #[test]
    fn starting_timestamp_resolves_to_earliest_commit_at_or_after_it() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store
            .write(
                1,
                &[
                    Action::Add(add("f0")).to_log_line().unwrap(),
                    Action::CommitInfo(crate::actions::CommitInfo {
                        timestamp: Some(100),
                        ..Default::default()
                    })
                    .to_log_line()
                    .unwrap(),
                ],
            )
            .unwrap();
        log_store
            .write(
                2,
                &[
                    Action::Add(add("f1")).to_log_line().unwrap(),
                    Action::CommitInfo(crate::actions::CommitInfo {
                        timestamp: Some(200),
                        ..Default::default()
                    })
                    .to_log_line()
                    .unwrap(),
                ],
            )
            .unwrap();

        let snapshot = SnapshotBuilder::new(&log_store).build().unwrap();
        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let (batches, offset) = source.start(Some(StartingPosition::Timestamp(150)), &snapshot).unwrap();
        assert!(batches.is_empty());
        assert_eq!(offset.reservoir_version, 2);
        let batch = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(batch.files[0].path, "f1");
    }

    #[test]
    fn starting_timestamp_past_every_commit_waits_for_the_next_one() {
        let (_store, log_store) = crate::log_store::in_memory();
        let schema = bootstrap(&log_store);
        log_store
            .write(
                1,
                &[
                    Action::Add(add("f0")).to_log_line().unwrap(),
                    Action::CommitInfo(crate::actions::CommitInfo {
                        timestamp: Some(100),
                        ..Default::default()
                    })
                    .to_log_line()
                    .unwrap(),
                ],
            )
            .unwrap();

        let snapshot = SnapshotBuilder::new(&log_store).build().unwrap();
        let mut source = StreamingSource::new(&log_store, TABLE_ID, schema);
        let (batches, offset) = source.start(Some(StartingPosition::Timestamp(500)), &snapshot).unwrap();
        assert!(batches.is_empty());
        assert!(source.next_batch(offset.clone()).unwrap().is_none());

        log_store.write(2, &[Action::Add(add("f1")).to_log_line().unwrap()]).unwrap();
        let batch = source.next_batch(offset).unwrap().unwrap();
        assert_eq!(batch.files[0].path, "f1");
    }
}
