//! Record reader
//!
//! Mirror of [`RecordWriter`](crate::RecordWriter). Fields must be read in
//! exactly the order they were written.

use bytes::{Buf, Bytes};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CodecError;
use crate::header::FormatHeader;

/// Consumes fields from a record buffer
#[derive(Debug, Clone)]
pub struct RecordReader {
    buf: Bytes,
}

impl RecordReader {
    /// Create a reader over `buf`
    #[inline]
    #[must_use]
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Create a reader over a copy of `data`
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Bytes left unread
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether the whole record has been consumed
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    /// Read a header without validating it
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] on truncated input
    pub fn read_header(&mut self) -> Result<FormatHeader, CodecError> {
        let format_id = self.read_i64()?;
        let revision = self.read_i32()?;
        Ok(FormatHeader::new(format_id, revision))
    }

    /// Read a header and require it to equal `expected`
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedFormat`] or
    /// [`CodecError::UnsupportedRevision`] on mismatch
    pub fn expect_header(&mut self, expected: &FormatHeader) -> Result<(), CodecError> {
        let found = self.read_header()?;
        if found.format_id != expected.format_id {
            return Err(CodecError::UnsupportedFormat {
                expected: expected.format_id,
                actual: found.format_id,
            });
        }
        if found.revision != expected.revision {
            return Err(CodecError::UnsupportedRevision {
                format: found.format_id,
                expected: expected.revision,
                actual: found.revision,
            });
        }
        Ok(())
    }

    /// Read a signed 64-bit integer
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] on truncated input
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read a signed 32-bit integer
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] on truncated input
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a single byte
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] on truncated input
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a boolean byte
    ///
    /// # Errors
    /// Returns [`CodecError::InvalidBool`] for bytes other than 0 and 1
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    /// Read a collection length
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] on truncated input
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32() as usize)
    }

    /// Read a length-prefixed byte blob without copying
    ///
    /// # Errors
    /// Returns [`CodecError::UnexpectedEof`] if the blob is truncated
    pub fn read_bytes(&mut self) -> Result<Bytes, CodecError> {
        let len = self.read_len()?;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read an optional byte blob
    ///
    /// # Errors
    /// Returns an error on truncated or malformed input
    pub fn read_opt_bytes(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.read_bool()? {
            self.read_bytes().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a length-prefixed UTF-8 string
    ///
    /// # Errors
    /// Returns [`CodecError::InvalidUtf8`] for malformed text
    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let raw = self.read_bytes()?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// Read an optional string
    ///
    /// # Errors
    /// Returns an error on truncated or malformed input
    pub fn read_opt_str(&mut self) -> Result<Option<String>, CodecError> {
        if self.read_bool()? {
            self.read_str().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a section marker and require it to equal `expected`
    ///
    /// # Errors
    /// Returns [`CodecError::MarkerMismatch`] if another marker is found
    pub fn expect_marker(&mut self, expected: &str) -> Result<(), CodecError> {
        let actual = self.read_str()?;
        if actual != expected {
            return Err(CodecError::MarkerMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Read a length-prefixed JSON value
    ///
    /// # Errors
    /// Returns [`CodecError::Json`] if the payload does not decode as `T`
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let raw = self.read_bytes()?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Read a property map written by
    /// [`RecordWriter::write_properties`](crate::RecordWriter::write_properties)
    ///
    /// # Errors
    /// Returns an error on truncated input or undecodable values
    pub fn read_properties(&mut self) -> Result<IndexMap<String, Value>, CodecError> {
        let count = self.read_len()?;
        let mut properties = IndexMap::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.read_str()?;
            let value: Value = self.read_json()?;
            properties.insert(key, value);
        }
        Ok(properties)
    }
}
