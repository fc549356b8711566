//! Self-describing record trait

use bytes::Bytes;

use crate::error::CodecError;
use crate::header::FormatHeader;
use crate::reader::RecordReader;
use crate::writer::RecordWriter;

/// A value with its own versioned wire form
///
/// Implementors write their body in a fixed field order; [`encode`] and
/// [`decode`] wrap the body with the type's [`FormatHeader`].
///
/// [`encode`]: WireRecord::encode
/// [`decode`]: WireRecord::decode
pub trait WireRecord: Sized {
    /// Header identifying this record type and revision
    const HEADER: FormatHeader;

    /// Write the fields after the header
    ///
    /// # Errors
    /// Returns an error if a field cannot be encoded
    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError>;

    /// Read the fields after the header
    ///
    /// # Errors
    /// Returns an error if the input is truncated or malformed
    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError>;

    /// Write header and body
    ///
    /// # Errors
    /// Returns an error if a field cannot be encoded
    fn encode(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_header(&Self::HEADER);
        self.encode_body(writer)
    }

    /// Read and validate the header, then the body
    ///
    /// # Errors
    /// Returns a version error for unknown headers, or a decode error
    fn decode(reader: &mut RecordReader) -> Result<Self, CodecError> {
        reader.expect_header(&Self::HEADER)?;
        Self::decode_body(reader)
    }

    /// Encode into a standalone buffer
    ///
    /// # Errors
    /// Returns an error if a field cannot be encoded
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut writer = RecordWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.finish())
    }

    /// Decode from a standalone buffer
    ///
    /// # Errors
    /// Returns a version error for unknown headers, or a decode error
    fn from_bytes(bytes: Bytes) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(bytes);
        Self::decode(&mut reader)
    }
}

/// Write a length-prefixed list of records
///
/// # Errors
/// Returns an error if any element fails to encode
pub fn write_list<T: WireRecord>(writer: &mut RecordWriter, items: &[T]) -> Result<(), CodecError> {
    writer.write_len(items.len())?;
    for item in items {
        item.encode(writer)?;
    }
    Ok(())
}

/// Read a list written by [`write_list`]
///
/// # Errors
/// Returns an error if any element fails to decode
pub fn read_list<T: WireRecord>(reader: &mut RecordReader) -> Result<Vec<T>, CodecError> {
    let count = reader.read_len()?;
    let mut items = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        items.push(T::decode(reader)?);
    }
    Ok(items)
}

/// Write an optional nested record behind a presence byte
///
/// # Errors
/// Returns an error if the record fails to encode
pub fn write_opt<T: WireRecord>(writer: &mut RecordWriter, item: Option<&T>) -> Result<(), CodecError> {
    writer.write_bool(item.is_some());
    match item {
        Some(item) => item.encode(writer),
        None => Ok(()),
    }
}

/// Read an optional nested record written by [`write_opt`]
///
/// # Errors
/// Returns an error if the record fails to decode
pub fn read_opt<T: WireRecord>(reader: &mut RecordReader) -> Result<Option<T>, CodecError> {
    if reader.read_bool()? {
        T::decode(reader).map(Some)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        label: String,
    }

    impl WireRecord for Point {
        const HEADER: FormatHeader = FormatHeader::new(0x1001, 1);

        fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
            writer.write_i32(self.x);
            writer.write_marker("label")?;
            writer.write_str(&self.label)
        }

        fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
            let x = reader.read_i32()?;
            reader.expect_marker("label")?;
            let label = reader.read_str()?;
            Ok(Self { x, label })
        }
    }

    #[test]
    fn test_record_round_trip() {
        let point = Point {
            x: -7,
            label: "origin".into(),
        };
        let bytes = point.to_bytes().unwrap();
        assert_eq!(Point::from_bytes(bytes).unwrap(), point);
    }

    #[test]
    fn test_list_and_optional_nesting() {
        let mut writer = RecordWriter::new();
        let points = vec![
            Point { x: 1, label: "a".into() },
            Point { x: 2, label: "b".into() },
        ];
        write_list(&mut writer, &points).unwrap();
        write_opt::<Point>(&mut writer, None).unwrap();
        write_opt(&mut writer, Some(&points[0])).unwrap();

        let mut reader = RecordReader::new(writer.finish());
        let decoded: Vec<Point> = read_list(&mut reader).unwrap();
        assert_eq!(decoded, points);
        assert!(read_opt::<Point>(&mut reader).unwrap().is_none());
        assert_eq!(read_opt::<Point>(&mut reader).unwrap(), Some(Point { x: 1, label: "a".into() }));
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_revision_mismatch_is_version_error() {
        let mut writer = RecordWriter::new();
        writer.write_header(&FormatHeader::new(0x1001, 2));
        writer.write_i32(0);

        let err = Point::from_bytes(writer.finish()).unwrap_err();
        assert!(err.is_version_error());
        assert!(matches!(
            err,
            CodecError::UnsupportedRevision { expected: 1, actual: 2, .. }
        ));
    }
}
