//! Log filenames: `_delta_log/<20-digit-zero-padded-version>.json` for deltas,
//! `_delta_log/<20-digit>.checkpoint.parquet` for checkpoints, and `_delta_log/_last_checkpoint`
//! as a plain-JSON pointer.

use crate::error::{DeltaResult, Error};
use crate::Version;

pub const LOG_DIR: &str = "_delta_log";
pub const LAST_CHECKPOINT_NAME: &str = "_last_checkpoint";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    Commit,
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath {
    pub version: Version,
    pub kind: LogFileKind,
    pub filename: String,
}

pub fn commit_filename(version: Version) -> String {
    format!("{version:020}.json")
}

pub fn checkpoint_filename(version: Version) -> String {
    format!("{version:020}.checkpoint.parquet")
}

impl ParsedLogPath {
    pub fn parse(filename: &str) -> Option<ParsedLogPath> {
        if filename == LAST_CHECKPOINT_NAME {
            return None;
        }
        let (version_str, rest) = filename.split_once('.')?;
        let version: Version = version_str.parse().ok()?;
        let kind = if rest == "json" {
            LogFileKind::Commit
        } else if rest.starts_with("checkpoint") {
            LogFileKind::Checkpoint
        } else {
            return None;
        };
        Some(ParsedLogPath {
            version,
            kind,
            filename: filename.to_string(),
        })
    }

    pub fn is_commit(&self) -> bool {
        self.kind == LogFileKind::Commit
    }
}

/// Validate that a version sequence (already sorted ascending) is dense --
/// returning `Error::CorruptLog` naming the first gap found.
pub fn assert_contiguous(versions: &[Version]) -> DeltaResult<()> {
    for pair in versions.windows(2) {
        if pair[1] != pair[0] + 1 {
            return Err(Error::corrupt_log(format!(
                "gap in log version sequence between {} and {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}
