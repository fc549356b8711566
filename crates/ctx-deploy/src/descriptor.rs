//! Lightweight references to deployment metadata

use std::fmt;

use ctx_codec::{CodecError, FormatHeader, RecordReader, RecordWriter, WireRecord};
use serde::{Deserialize, Serialize};

/// Names a piece of deployment metadata without copying it
///
/// `kind` is the implementation kind, `name` the logical name and `extra` an
/// optional disambiguator (endpoint name for services, element name for
/// messages).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaDescriptor {
    /// Implementation kind
    pub kind: String,
    /// Logical name
    pub name: String,
    /// Disambiguating name
    pub extra: Option<String>,
}

impl MetaDescriptor {
    /// Create a descriptor without an extra name
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            extra: None,
        }
    }

    /// With optional extra name
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, extra: Option<String>) -> Self {
        self.extra = extra;
        self
    }
}

impl fmt::Display for MetaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.extra {
            Some(extra) => write!(f, "{}:{} [{extra}]", self.kind, self.name),
            None => write!(f, "{}:{}", self.kind, self.name),
        }
    }
}

impl WireRecord for MetaDescriptor {
    const HEADER: FormatHeader = FormatHeader::new(0x4d44_0000_0000_0001, 1);

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(&self.kind)?;
        writer.write_str(&self.name)?;
        writer.write_opt_str(self.extra.as_deref())
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        Ok(Self {
            kind: reader.read_str()?,
            name: reader.read_str()?,
            extra: reader.read_opt_str()?,
        })
    }
}
