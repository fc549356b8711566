//! Message addressing options

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Endpoint address with reference parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReference {
    /// Address URI
    pub address: String,
    /// Reference parameters echoed back to the endpoint
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub reference_parameters: IndexMap<String, String>,
}

impl EndpointReference {
    /// Reference to `address`
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reference_parameters: IndexMap::new(),
        }
    }

    /// With a reference parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.reference_parameters.insert(name.into(), value.into());
        self
    }
}

/// Relationship to an earlier message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatesTo {
    /// Related message id
    pub message_id: String,
    /// Relationship type, reply when absent
    pub relationship: Option<String>,
}

/// Addressing and exchange options of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Destination
    pub to: Option<EndpointReference>,
    /// Sender
    pub from: Option<EndpointReference>,
    /// Where replies go
    pub reply_to: Option<EndpointReference>,
    /// Where faults go
    pub fault_to: Option<EndpointReference>,
    /// Earlier messages this one relates to
    pub relates_to: Vec<RelatesTo>,
    /// Message id
    pub message_id: Option<String>,
    /// Action URI
    pub action: Option<String>,
    /// Response wait time
    pub timeout_ms: u64,
    /// Expect the response on a separate channel
    pub use_separate_listener: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            reply_to: None,
            fault_to: None,
            relates_to: Vec::new(),
            message_id: None,
            action: None,
            timeout_ms: 30_000,
            use_separate_listener: false,
        }
    }
}

impl Options {
    /// With destination
    #[inline]
    #[must_use]
    pub fn with_to(mut self, to: EndpointReference) -> Self {
        self.to = Some(to);
        self
    }

    /// With reply destination
    #[inline]
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: EndpointReference) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// With message id
    #[inline]
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// With action
    #[inline]
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Add a relationship
    #[must_use]
    pub fn with_relates_to(mut self, message_id: impl Into<String>, relationship: Option<String>) -> Self {
        self.relates_to.push(RelatesTo {
            message_id: message_id.into(),
            relationship,
        });
        self
    }
}
