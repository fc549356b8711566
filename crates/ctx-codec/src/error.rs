//! Codec error types

/// Errors raised while writing or reading a record
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input ended before a field could be read
    #[error("unexpected end of record: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the field
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// String field was not valid UTF-8
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Boolean field held something other than 0 or 1
    #[error("invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    /// Section marker did not equal the expected literal
    #[error("marker mismatch: expected '{expected}', found '{actual}'")]
    MarkerMismatch {
        /// Marker the reader expected
        expected: String,
        /// Marker found in the input
        actual: String,
    },

    /// Record carries a format id this reader does not recognise
    #[error("unsupported record format {actual:#x} (expected {expected:#x})")]
    UnsupportedFormat {
        /// Format id this reader understands
        expected: i64,
        /// Format id found in the record
        actual: i64,
    },

    /// Record carries a schema revision this reader does not recognise
    #[error("unsupported revision {actual} for format {format:#x} (expected {expected})")]
    UnsupportedRevision {
        /// Format id of the record
        format: i64,
        /// Revision this reader understands
        expected: i32,
        /// Revision found in the record
        actual: i32,
    },

    /// Length does not fit the on-wire length prefix
    #[error("length {0} exceeds the u32 length prefix")]
    LengthOverflow(usize),

    /// Enumerated field held an unknown discriminant
    #[error("unknown {field} code {code}")]
    UnknownCode {
        /// Field being decoded
        field: &'static str,
        /// Code found in the input
        code: u8,
    },

    /// JSON-encoded field failed to encode or decode
    #[error("json field: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Whether this error stems from a format or revision the reader does not know
    #[inline]
    #[must_use]
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. } | Self::UnsupportedRevision { .. }
        )
    }
}
