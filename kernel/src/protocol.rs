//! Protocol gate: reject reads/writes against a table whose protocol requires
//! capabilities this crate doesn't implement, and reject log entries that would downgrade a
//! table's protocol.

use crate::actions::Protocol;
use crate::error::{DeltaResult, Error};
use crate::table_features::{ReaderFeature, WriterFeature};

pub const SUPPORTED_READER_VERSION: i32 = 1;
pub const SUPPORTED_WRITER_VERSION: i32 = 3;

/// Verify this crate can safely read a table at the given protocol. Feature-gated protocol
/// versions (>= 3 for readers under the real Delta spec) are out of scope here since
/// The currently known feature set has no reader-feature table entries that raise the floor; the
/// check is purely the plain version-number gate plus a no-unimplemented-required-features
/// check for defense in depth.
pub fn check_can_read(protocol: &Protocol) -> DeltaResult<()> {
    if protocol.min_reader_version > SUPPORTED_READER_VERSION {
        return Err(Error::UnsupportedReaderVersion {
            required: protocol.min_reader_version,
            supported: SUPPORTED_READER_VERSION,
        });
    }
    Ok(())
}

pub fn check_can_write(protocol: &Protocol) -> DeltaResult<()> {
    if protocol.min_writer_version > SUPPORTED_WRITER_VERSION {
        return Err(Error::UnsupportedWriterVersion {
            required: protocol.min_writer_version,
            supported: SUPPORTED_WRITER_VERSION,
        });
    }
    Ok(())
}

/// Reject a new `Protocol` action that would lower either version number relative to the
/// table's current protocol (protocol versions are monotone non-decreasing).
pub fn check_not_downgrade(old: &Protocol, new: &Protocol) -> DeltaResult<()> {
    if new.min_reader_version < old.min_reader_version || new.min_writer_version < old.min_writer_version {
        return Err(Error::ProtocolDowngradeRejected {
            old_reader: old.min_reader_version,
            old_writer: old.min_writer_version,
            new_reader: new.min_reader_version,
            new_writer: new.min_writer_version,
        });
    }
    Ok(())
}

/// The minimum protocol version required to support a set of named features, by taking the max
/// over each feature's floor and the table's current version (feature-to-version
/// mapping). Unknown/unimplemented features don't raise the floor on their own -- they are only
/// rejected outright when required for an operation this crate performs.
pub fn required_protocol_for_writer_features(current: &Protocol, features: &[WriterFeature]) -> Protocol {
    let mut writer_version = current.min_writer_version;
    for feature in features {
        let floor = match feature {
            WriterFeature::AppendOnly | WriterFeature::ColumnInvariants => 2,
            WriterFeature::CheckConstraints => 3,
            WriterFeature::Unknown(_) => writer_version,
        };
        writer_version = writer_version.max(floor);
    }
    Protocol {
        min_reader_version: current.min_reader_version,
        min_writer_version: writer_version,
    }
}

pub fn require_implemented_reader_features(features: &[ReaderFeature]) -> DeltaResult<()> {
    for feature in features {
        if !feature.is_implemented() {
            return Err(Error::generic(format!(
                "reader feature '{feature}' is required but not implemented"
            )));
        }
    }
    Ok(())
}
