//! Named reader/writer features layered on top of the plain protocol version numbers.
//!
//! Real Delta tables carry an open-ended feature set; this crate recognizes a small, closed set
//! relevant to the operations it implements and represents everything else as `Unknown` so that
//! a table using an unrecognized feature is neither silently miscompiled nor unconditionally
//! rejected as long as it isn't required for reading/writing.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReaderFeature {
    ColumnInvariants,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriterFeature {
    ColumnInvariants,
    AppendOnly,
    CheckConstraints,
    Unknown(String),
}

impl fmt::Display for ReaderFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderFeature::ColumnInvariants => write!(f, "columnInvariants"),
            ReaderFeature::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl fmt::Display for WriterFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterFeature::ColumnInvariants => write!(f, "columnInvariants"),
            WriterFeature::AppendOnly => write!(f, "appendOnly"),
            WriterFeature::CheckConstraints => write!(f, "checkConstraints"),
            WriterFeature::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for ReaderFeature {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "columnInvariants" => ReaderFeature::ColumnInvariants,
            other => ReaderFeature::Unknown(other.to_string()),
        })
    }
}

impl FromStr for WriterFeature {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "columnInvariants" => WriterFeature::ColumnInvariants,
            "appendOnly" => WriterFeature::AppendOnly,
            "checkConstraints" => WriterFeature::CheckConstraints,
            other => WriterFeature::Unknown(other.to_string()),
        })
    }
}

impl ReaderFeature {
    /// Whether this crate actually knows how to honor the feature, as opposed to merely
    /// recognizing its name.
    pub fn is_implemented(&self) -> bool {
        matches!(self, ReaderFeature::ColumnInvariants)
    }
}

impl WriterFeature {
    pub fn is_implemented(&self) -> bool {
        matches!(
            self,
            WriterFeature::ColumnInvariants | WriterFeature::AppendOnly | WriterFeature::CheckConstraints
        )
    }
}
