//! Replication differences

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One pending property change awaiting a replication flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDifference {
    /// Property key
    pub key: String,
    /// New value, `None` when the key was removed
    pub value: Option<Value>,
    /// Whether the change is a removal
    pub removed: bool,
}

impl PropertyDifference {
    /// Difference for a write
    #[inline]
    #[must_use]
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            removed: false,
        }
    }

    /// Difference for a removal
    #[inline]
    #[must_use]
    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            removed: true,
        }
    }
}

/// Answers whether property changes should be tracked for replication
///
/// Consulted at most once per bag, on its first mutation.
pub trait ReplicationProbe: Send + Sync + std::fmt::Debug {
    /// Whether a replication agent with a state manager is present
    fn replication_active(&self) -> bool;
}
