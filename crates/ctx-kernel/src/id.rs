//! Node identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable arena address of a context node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The configuration root
    pub const ROOT: NodeId = NodeId(0);

    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Level of a node in the context tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Process-wide root
    Configuration,
    /// Service group context
    ServiceGroup,
    /// Service context
    Service,
    /// Operation context
    Operation,
    /// Message context
    Message,
}

impl NodeKind {
    /// Prefix of log correlation ids
    #[must_use]
    pub fn log_prefix(self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationContext",
            Self::ServiceGroup => "ServiceGroupContext",
            Self::Service => "ServiceContext",
            Self::Operation => "OperationContext",
            Self::Message => "MessageContext",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_prefix())
    }
}
