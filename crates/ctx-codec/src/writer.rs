//! Record writer
//!
//! All integers are big-endian. Strings and byte blobs carry a `u32` length
//! prefix, optional fields a presence byte.

use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::header::FormatHeader;

/// Appends fields to a growing record buffer
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: BytesMut,
}

impl RecordWriter {
    /// Create an empty writer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Bytes written so far
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freeze the buffer into an immutable record
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Write the format id and revision
    pub fn write_header(&mut self, header: &FormatHeader) {
        self.buf.put_i64(header.format_id);
        self.buf.put_i32(header.revision);
    }

    /// Write a signed 64-bit integer
    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Write a signed 32-bit integer
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Write a single byte
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write a boolean as one byte
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write a collection length
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] if `len` does not fit in a `u32`
    pub fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
        self.buf.put_u32(len);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] for strings over 4 GiB
    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_bytes(value.as_bytes())
    }

    /// Write an optional string
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] for strings over 4 GiB
    pub fn write_opt_str(&mut self, value: Option<&str>) -> Result<(), CodecError> {
        self.write_bool(value.is_some());
        match value {
            Some(v) => self.write_str(v),
            None => Ok(()),
        }
    }

    /// Write a length-prefixed byte blob
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] for blobs over 4 GiB
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), CodecError> {
        self.write_len(value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    /// Write an optional byte blob
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] for blobs over 4 GiB
    pub fn write_opt_bytes(&mut self, value: Option<&[u8]>) -> Result<(), CodecError> {
        self.write_bool(value.is_some());
        match value {
            Some(v) => self.write_bytes(v),
            None => Ok(()),
        }
    }

    /// Write a section marker
    ///
    /// Markers are plain strings; readers validate them with
    /// [`RecordReader::expect_marker`](crate::RecordReader::expect_marker).
    ///
    /// # Errors
    /// Returns [`CodecError::LengthOverflow`] for markers over 4 GiB
    #[inline]
    pub fn write_marker(&mut self, marker: &str) -> Result<(), CodecError> {
        self.write_str(marker)
    }

    /// Write any serde value as length-prefixed JSON
    ///
    /// # Errors
    /// Returns [`CodecError::Json`] if the value cannot be encoded
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        let encoded = serde_json::to_vec(value)?;
        self.write_bytes(&encoded)
    }

    /// Write a property map: count, then key and JSON value per entry
    ///
    /// # Errors
    /// Returns an error if a value cannot be encoded as JSON
    pub fn write_properties(&mut self, properties: &IndexMap<String, Value>) -> Result<(), CodecError> {
        self.write_len(properties.len())?;
        for (key, value) in properties {
            self.write_str(key)?;
            self.write_json(value)?;
        }
        Ok(())
    }
}
