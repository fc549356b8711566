//! Deployment descriptions
//!
//! Immutable metadata for deployed service groups, services, operations,
//! messages and transports. Contexts link to these; they are never copied
//! into snapshots, only described by [`MetaDescriptor`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::MetaDescriptor;
use crate::qname::QualifiedName;

/// Message label of the inbound message
pub const LABEL_IN: &str = "In";
/// Message label of the outbound message
pub const LABEL_OUT: &str = "Out";
/// Message label of a fault
pub const LABEL_FAULT: &str = "Fault";

/// Lifetime scope of a service's contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// One group context per service group for the whole engine
    Application,
    /// Group contexts keyed by a session id, evicted when idle
    SoapSession,
    /// A fresh group context per request
    #[default]
    Request,
}

/// Message exchange pattern of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mep {
    /// One inbound message
    InOnly,
    /// One inbound message, fault allowed
    RobustInOnly,
    /// Request then response
    InOut,
    /// One outbound message
    OutOnly,
    /// One outbound message, fault allowed
    RobustOutOnly,
    /// Outbound request then inbound response
    OutIn,
}

impl Mep {
    /// Labels that must all be filled for the exchange to complete, in arrival order
    #[must_use]
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Self::InOnly | Self::RobustInOnly => &[LABEL_IN],
            Self::InOut => &[LABEL_IN, LABEL_OUT],
            Self::OutOnly | Self::RobustOutOnly => &[LABEL_OUT],
            Self::OutIn => &[LABEL_OUT, LABEL_IN],
        }
    }

    /// Whether a restored operation context should be re-registered under its key
    ///
    /// Out-only exchanges always are; client-initiated exchanges while they
    /// still wait for their response.
    #[must_use]
    pub fn reregisters_on_restore(self, complete: bool) -> bool {
        match self {
            Self::OutOnly => true,
            Self::OutIn => !complete,
            Self::InOnly | Self::RobustInOnly | Self::InOut | Self::RobustOutOnly => false,
        }
    }
}

/// Execution flow a message travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    /// Inbound
    #[default]
    In,
    /// Outbound
    Out,
    /// Inbound fault
    InFault,
    /// Outbound fault
    OutFault,
}

impl Flow {
    /// All flows
    pub const ALL: [Flow; 4] = [Flow::In, Flow::Out, Flow::InFault, Flow::OutFault];

    /// Wire code
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::In => 0,
            Self::Out => 1,
            Self::InFault => 2,
            Self::OutFault => 3,
        }
    }

    /// Flow for a wire code
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|flow| flow.code() == code)
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InFault => "in-fault",
            Self::OutFault => "out-fault",
        };
        f.write_str(name)
    }
}

/// A message slot of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescription {
    /// Label within the operation ("In", "Out")
    pub label: String,
    /// Message name
    pub name: String,
    /// Payload element name
    pub element_name: Option<String>,
}

impl MessageDescription {
    /// Create a message description
    #[must_use]
    pub fn new(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            element_name: None,
        }
    }

    /// With payload element name
    #[inline]
    #[must_use]
    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element_name = Some(element.into());
        self
    }

    /// Descriptor naming this message
    #[must_use]
    pub fn descriptor(&self) -> MetaDescriptor {
        MetaDescriptor::new(MESSAGE_KIND, self.name.clone()).with_extra(self.element_name.clone())
    }
}

/// Kind tag of message descriptions
pub const MESSAGE_KIND: &str = "message";
/// Default kind tag of operation descriptions
pub const OPERATION_KIND: &str = "operation";
/// Default kind tag of service descriptions
pub const SERVICE_KIND: &str = "service";
/// Default kind tag of service group descriptions
pub const SERVICE_GROUP_KIND: &str = "service-group";

/// A deployed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescription {
    /// Implementation kind
    pub kind: String,
    /// Qualified operation name
    pub name: QualifiedName,
    /// Exchange pattern
    pub mep: Mep,
    /// Message slots
    pub messages: Vec<Arc<MessageDescription>>,
}

impl OperationDescription {
    /// Create an operation with default message slots for `mep`
    #[must_use]
    pub fn new(name: QualifiedName, mep: Mep) -> Self {
        let messages = mep
            .labels()
            .iter()
            .map(|label| Arc::new(MessageDescription::new(*label, format!("{}{label}", name.local))))
            .collect();
        Self {
            kind: OPERATION_KIND.to_string(),
            name,
            mep,
            messages,
        }
    }

    /// With implementation kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Replace or add the message at `message.label`
    #[must_use]
    pub fn with_message(mut self, message: MessageDescription) -> Self {
        self.messages.retain(|m| m.label != message.label);
        self.messages.push(Arc::new(message));
        self
    }

    /// Message slot by label
    #[must_use]
    pub fn message(&self, label: &str) -> Option<&Arc<MessageDescription>> {
        self.messages.iter().find(|m| m.label == label)
    }

    /// Descriptor naming this operation
    #[must_use]
    pub fn descriptor(&self) -> MetaDescriptor {
        MetaDescriptor::new(self.kind.clone(), self.name.to_string())
    }
}

/// A deployed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    /// Implementation kind
    pub kind: String,
    /// Service name
    pub name: String,
    /// Owning service group name
    pub group: String,
    /// Context scope
    pub scope: Scope,
    /// Endpoint qualified service name
    pub endpoint_service: Option<QualifiedName>,
    /// Endpoint port
    pub endpoint_port: Option<String>,
    /// Operations
    pub operations: Vec<Arc<OperationDescription>>,
}

impl ServiceDescription {
    /// Create a request-scoped service in `group`
    #[must_use]
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            kind: SERVICE_KIND.to_string(),
            name: name.into(),
            group: group.into(),
            scope: Scope::default(),
            endpoint_service: None,
            endpoint_port: None,
            operations: Vec::new(),
        }
    }

    /// With implementation kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// With scope
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// With endpoint service name and port
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, service: QualifiedName, port: impl Into<String>) -> Self {
        self.endpoint_service = Some(service);
        self.endpoint_port = Some(port.into());
        self
    }

    /// Add an operation
    #[must_use]
    pub fn with_operation(mut self, operation: OperationDescription) -> Self {
        self.operations.push(Arc::new(operation));
        self
    }

    /// Endpoint disambiguation name: `"<service qname> <port>"`
    ///
    /// `None` unless both the endpoint service and port are known.
    #[must_use]
    pub fn extra_name(&self) -> Option<String> {
        match (&self.endpoint_service, &self.endpoint_port) {
            (Some(service), Some(port)) => Some(format!("{service} {port}")),
            _ => None,
        }
    }

    /// Operation by local or qualified name
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Arc<OperationDescription>> {
        let wanted = QualifiedName::parse(name);
        self.operations
            .iter()
            .find(|op| op.name.matches_recorded(&wanted))
    }

    /// Descriptor naming this service
    #[must_use]
    pub fn descriptor(&self) -> MetaDescriptor {
        MetaDescriptor::new(self.kind.clone(), self.name.clone()).with_extra(self.extra_name())
    }
}

/// A deployed service group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGroupDescription {
    /// Implementation kind
    pub kind: String,
    /// Group name
    pub name: String,
    /// Member service names
    pub services: Vec<String>,
}

impl ServiceGroupDescription {
    /// Create an empty group
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: SERVICE_GROUP_KIND.to_string(),
            name: name.into(),
            services: Vec::new(),
        }
    }

    /// Whether `service` belongs to this group
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }

    /// Descriptor naming this group
    #[must_use]
    pub fn descriptor(&self) -> MetaDescriptor {
        MetaDescriptor::new(self.kind.clone(), self.name.clone())
    }
}

/// A transport, looked up by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescription {
    /// Transport name ("http", "jms")
    pub name: String,
}

impl TransportDescription {
    /// Create a transport
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mep_reregistration_rule() {
        assert!(Mep::OutOnly.reregisters_on_restore(true));
        assert!(Mep::OutIn.reregisters_on_restore(false));
        assert!(!Mep::OutIn.reregisters_on_restore(true));
        assert!(!Mep::InOut.reregisters_on_restore(false));
        assert!(!Mep::RobustOutOnly.reregisters_on_restore(false));
        assert!(!Mep::InOnly.reregisters_on_restore(false));
    }

    #[test]
    fn test_extra_name_needs_both_parts() {
        let plain = ServiceDescription::new("Echo", "echo-group");
        assert!(plain.extra_name().is_none());

        let bound = plain.with_endpoint(QualifiedName::new("urn:echo", "EchoService"), "EchoPort");
        assert_eq!(bound.extra_name().as_deref(), Some("{urn:echo}EchoService EchoPort"));
    }

    #[test]
    fn test_default_messages_follow_mep() {
        let op = OperationDescription::new(QualifiedName::local("ping"), Mep::OutIn);
        let labels: Vec<_> = op.messages.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec![LABEL_OUT, LABEL_IN]);
        assert_eq!(op.message(LABEL_IN).map(|m| m.name.as_str()), Some("pingIn"));
    }
}
