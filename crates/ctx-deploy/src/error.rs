//! Error types for the deployment registry and handlers

use crate::chain::HandlerKind;

/// Registry construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two groups share a name
    #[error("duplicate service group: {0}")]
    DuplicateServiceGroup(String),

    /// Two services share a name
    #[error("duplicate service: {0}")]
    DuplicateService(String),

    /// A service names a group that was never declared
    #[error("service '{service}' references unknown group '{group}'")]
    UnknownServiceGroup {
        /// Service name
        service: String,
        /// Missing group name
        group: String,
    },
}

/// Handler self-managed data errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The handler failed to produce or consume its data
    #[error("handler '{handler}' failed: {reason}")]
    Failed {
        /// Handler name
        handler: String,
        /// Failure description
        reason: String,
    },

    /// No handler in the chain owns a saved blob
    #[error("no handler {kind}/{name} in the execution chain owns saved data")]
    Unattributed {
        /// Recorded handler kind
        kind: HandlerKind,
        /// Recorded handler name
        name: String,
    },
}

impl HandlerError {
    /// Failure raised by `handler`
    #[must_use]
    pub fn failed(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Whether saved data could not be attributed to a live handler
    #[inline]
    #[must_use]
    pub fn is_unattributed(&self) -> bool {
        matches!(self, Self::Unattributed { .. })
    }
}
