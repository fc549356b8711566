//! Record headers
//!
//! Every record starts with a [`FormatHeader`]: an `i64` format id that names
//! the record type and an `i32` schema revision. Readers reject both unknown
//! ids and unknown revisions.

use std::fmt;

/// Format id and schema revision that open a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatHeader {
    /// Identifies the record type
    pub format_id: i64,
    /// Schema revision of the record type
    pub revision: i32,
}

impl FormatHeader {
    /// Create a header
    #[inline]
    #[must_use]
    pub const fn new(format_id: i64, revision: i32) -> Self {
        Self {
            format_id,
            revision,
        }
    }
}

impl fmt::Display for FormatHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/r{}", self.format_id, self.revision)
    }
}
