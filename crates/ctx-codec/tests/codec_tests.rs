use ctx_codec::{CodecError, FormatHeader, RecordReader, RecordWriter};
use indexmap::IndexMap;
use proptest::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[test]
fn test_marker_mismatch_reports_both_literals() {
    let mut writer = RecordWriter::new();
    writer.write_marker("properties").unwrap();

    let mut reader = RecordReader::new(writer.finish());
    let err = reader.expect_marker("parent").unwrap_err();
    match err {
        CodecError::MarkerMismatch { expected, actual } => {
            assert_eq!(expected, "parent");
            assert_eq!(actual, "properties");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_format_rejected_before_body() {
    let mut writer = RecordWriter::new();
    writer.write_header(&FormatHeader::new(0xdead, 1));
    writer.write_str("body").unwrap();

    let mut reader = RecordReader::new(writer.finish());
    let err = reader.expect_header(&FormatHeader::new(0xbeef, 1)).unwrap_err();
    assert!(err.is_version_error());
    assert!(matches!(err, CodecError::UnsupportedFormat { expected: 0xbeef, actual: 0xdead }));
}

#[test]
fn test_truncated_string_is_eof() {
    let mut writer = RecordWriter::new();
    writer.write_str("truncated payload").unwrap();
    let full = writer.finish();

    let mut reader = RecordReader::from_slice(&full[..full.len() - 3]);
    assert!(matches!(reader.read_str(), Err(CodecError::UnexpectedEof { .. })));
}

#[test]
fn test_invalid_bool_byte() {
    let mut reader = RecordReader::from_slice(&[7]);
    assert!(matches!(reader.read_bool(), Err(CodecError::InvalidBool(7))));
}

#[test]
fn test_property_map_keeps_order_and_nested_values() {
    let mut props = IndexMap::new();
    props.insert("zeta".to_string(), json!(1));
    props.insert("alpha".to_string(), json!({"nested": [1, 2, 3]}));
    props.insert("mid".to_string(), Value::Null);

    let mut writer = RecordWriter::new();
    writer.write_properties(&props).unwrap();

    let decoded = RecordReader::new(writer.finish()).read_properties().unwrap();
    let keys: Vec<_> = decoded.keys().cloned().collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    assert_eq!(decoded["alpha"], json!({"nested": [1, 2, 3]}));
}

proptest! {
    #[test]
    fn prop_optional_fields_survive(
        a in proptest::option::of(".{0,32}"),
        n in any::<i64>(),
        b in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    ) {
        let mut writer = RecordWriter::new();
        writer.write_opt_str(a.as_deref()).unwrap();
        writer.write_i64(n);
        writer.write_opt_bytes(b.as_deref()).unwrap();

        let mut reader = RecordReader::new(writer.finish());
        prop_assert_eq!(reader.read_opt_str().unwrap(), a);
        prop_assert_eq!(reader.read_i64().unwrap(), n);
        prop_assert_eq!(reader.read_opt_bytes().unwrap().map(|b| b.to_vec()), b);
        prop_assert!(reader.is_exhausted());
    }

    #[test]
    fn prop_any_prefix_fails_cleanly(cut in 0usize..40) {
        let mut writer = RecordWriter::new();
        writer.write_header(&FormatHeader::new(42, 3));
        writer.write_marker("properties").unwrap();
        writer.write_str("value").unwrap();
        let full = writer.finish();
        let cut = cut.min(full.len().saturating_sub(1));

        let mut reader = RecordReader::from_slice(&full[..cut]);
        let outcome = reader
            .expect_header(&FormatHeader::new(42, 3))
            .and_then(|()| reader.expect_marker("properties"))
            .and_then(|()| reader.read_str());
        prop_assert!(outcome.is_err());
    }
}
