//! Error types for the context tree and snapshots
//!
//! Two families:
//! - [`ContextError`] for operations on the live tree
//! - [`SnapshotError`] for capture, restore and reconciliation

use ctx_codec::CodecError;
use ctx_deploy::{HandlerError, HandlerKind, RegistryError};

use crate::id::{NodeId, NodeKind};

/// Live tree errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Node id is not in the arena
    #[error("context node {0} not found")]
    NodeNotFound(NodeId),

    /// Node exists but is of another level
    #[error("context node {node} is a {actual}, expected {expected}")]
    KindMismatch {
        /// Offending node
        node: NodeId,
        /// Level the caller asked for
        expected: NodeKind,
        /// Level of the node
        actual: NodeKind,
    },

    /// Service group name is not deployed
    #[error("unknown service group '{0}'")]
    UnknownServiceGroup(String),

    /// Service name is not deployed
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Service is not a member of the group
    #[error("service '{service}' is not part of service group '{group}'")]
    InvalidServiceInGroup {
        /// Requested service
        service: String,
        /// Group it was requested from
        group: String,
    },

    /// Service has no such operation
    #[error("service '{service}' has no operation '{operation}'")]
    UnknownOperation {
        /// Service name
        service: String,
        /// Requested operation
        operation: String,
    },

    /// No session-scoped group context under this id
    #[error("no session-scoped service group context with id '{0}'")]
    UnknownServiceGroupContext(String),

    /// Operation already received all its messages
    #[error("operation context {0} is already complete")]
    OperationComplete(NodeId),

    /// Message label already holds another message
    #[error("label '{label}' of operation context {operation} is already filled")]
    LabelTaken {
        /// Operation context
        operation: NodeId,
        /// Filled label
        label: String,
    },

    /// Message has neither a service context nor a service description
    #[error("message context {0} has no service to route to")]
    NoServiceForMessage(NodeId),

    /// Deployment registry failure
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
}

impl ContextError {
    /// Whether the error names a missing node
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeNotFound(_))
    }
}

/// Snapshot errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Record could not be decoded; aborts the whole restore
    #[error("record rejected: {0}")]
    Codec(#[from] CodecError),

    /// Saved handler data has no owner in the reconciled chain
    #[error("message {message_id}: saved data of handler {kind}/{name} has no owner in the execution chain")]
    Attribution {
        /// Message being restored
        message_id: String,
        /// Recorded handler kind
        kind: HandlerKind,
        /// Recorded handler name
        name: String,
    },

    /// A handler failed to save or restore its data
    #[error("message {message_id}: {source}")]
    Handler {
        /// Message being saved or restored
        message_id: String,
        /// Handler failure
        source: HandlerError,
    },

    /// A descriptor needed to build a context is not deployed
    #[error("{what} '{name}' cannot be resolved against the live deployment")]
    Unresolved {
        /// What was being resolved
        what: &'static str,
        /// Recorded name
        name: String,
    },

    /// Restored links contradict each other
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    /// A live node was requested before reconciliation
    #[error("snapshot has not been reconciled yet")]
    NotReconciled,

    /// Live tree operation failed
    #[error("context: {0}")]
    Context(#[from] ContextError),
}

impl SnapshotError {
    /// Map a handler failure, singling out unattributed data
    #[must_use]
    pub fn from_handler(error: HandlerError, message_id: &str) -> Self {
        match error {
            HandlerError::Unattributed { kind, name } => Self::Attribution {
                message_id: message_id.to_string(),
                kind,
                name,
            },
            source => Self::Handler {
                message_id: message_id.to_string(),
                source,
            },
        }
    }

    /// Unrecoverable: bad record or internal inconsistency
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::StructuralMismatch(_))
    }

    /// Failure confined to one message's restoration
    #[inline]
    #[must_use]
    pub fn is_message_scoped(&self) -> bool {
        matches!(self, Self::Attribution { .. } | Self::Handler { .. })
    }
}
