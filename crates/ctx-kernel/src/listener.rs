//! Collaborator hooks
//!
//! The root calls out to these when contexts come and go and when property
//! differences are flushed. None of them may call back into the root while
//! being notified.

use std::fmt;
use std::sync::Arc;

use ctx_deploy::ServiceDescription;
use ctx_props::{PropertyDifference, ReplicationProbe};
use parking_lot::RwLock;

use crate::id::{NodeId, NodeKind};

/// Observer of context creation and removal
pub trait ContextListener: Send + Sync {
    /// A context was added to the tree
    fn context_created(&self, _node: NodeId, _kind: NodeKind) {}

    /// A context was removed from the tree
    fn context_removed(&self, _node: NodeId, _kind: NodeKind) {}
}

/// Releases service implementation objects when their context goes away
pub trait DependencyManager: Send + Sync {
    /// Called once per service context of an evicted or cleaned up group
    fn destroy_service_object(&self, service_context: NodeId, service: &ServiceDescription);
}

/// State replication agent
pub trait ClusteringAgent: Send + Sync {
    /// Whether a state manager is configured
    fn has_state_manager(&self) -> bool;

    /// Ship the pending differences of one context
    fn replicate(&self, node: NodeId, kind: NodeKind, differences: &[PropertyDifference]);
}

/// Holder of the optional clustering agent, shared with every property bag
#[derive(Default)]
pub(crate) struct ClusteringSlot {
    agent: RwLock<Option<Arc<dyn ClusteringAgent>>>,
}

impl ClusteringSlot {
    pub(crate) fn set(&self, agent: Option<Arc<dyn ClusteringAgent>>) {
        *self.agent.write() = agent;
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn ClusteringAgent>> {
        self.agent.read().clone()
    }
}

impl fmt::Debug for ClusteringSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteringSlot")
            .field("attached", &self.agent.read().is_some())
            .finish()
    }
}

impl ReplicationProbe for ClusteringSlot {
    fn replication_active(&self) -> bool {
        self.agent
            .read()
            .as_ref()
            .is_some_and(|agent| agent.has_state_manager())
    }
}
