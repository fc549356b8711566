//! Context record codec
//!
//! Length-prefixed, big-endian record encoding used to persist context
//! snapshots.
//!
//! # Layout
//!
//! ```text
//! [format_id:i64][revision:i32][scalars...]["properties"][map]["<section>"][...]
//! ```
//!
//! - **Headers** identify the record type and schema revision; readers reject
//!   both unknown ids and unknown revisions.
//! - **Markers** are string literals between sections, validated on read.
//! - **Property maps** store each value as JSON.
//!
//! # Example
//!
//! ```rust
//! use ctx_codec::{FormatHeader, RecordReader, RecordWriter};
//!
//! let header = FormatHeader::new(0x7001, 1);
//! let mut writer = RecordWriter::new();
//! writer.write_header(&header);
//! writer.write_marker("name").unwrap();
//! writer.write_str("echo").unwrap();
//!
//! let mut reader = RecordReader::new(writer.finish());
//! reader.expect_header(&header).unwrap();
//! reader.expect_marker("name").unwrap();
//! assert_eq!(reader.read_str().unwrap(), "echo");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod header;
pub mod reader;
pub mod record;
pub mod writer;

// Re-exports
pub use error::CodecError;
pub use header::FormatHeader;
pub use reader::RecordReader;
pub use record::{read_list, read_opt, write_list, write_opt, WireRecord};
pub use writer::RecordWriter;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
