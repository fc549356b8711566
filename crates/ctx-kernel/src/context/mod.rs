//! The configuration root and its context arena
//!
//! [`ConfigurationContext`] owns every context node of an engine instance in
//! a concurrent arena, plus the lookup tables the engine needs:
//!
//! - correlation key -> operation context
//! - group context id -> session-scoped service group context
//! - group name -> application-scoped service group context
//!
//! Node locks are never held while another node is locked or while a
//! collaborator hook runs.

mod eviction;
mod group;
mod message;
mod operation;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ctx_deploy::DeploymentRegistry;
use ctx_props::{lookup, MergePolicy, PropertyBag, PropertyMap, ReplicationProbe};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, TIMEOUT_PROPERTY};
use crate::error::ContextError;
use crate::id::{NodeId, NodeKind};
use crate::listener::{ClusteringAgent, ClusteringSlot, ContextListener, DependencyManager};
use crate::node::{MessageBody, NodeBody, NodeEntry, OperationBody, ServiceBody, ServiceGroupBody};

/// Process-wide root of the context tree
pub struct ConfigurationContext {
    registry: Arc<DeploymentRegistry>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    arena: DashMap<NodeId, Arc<NodeEntry>>,
    next_id: AtomicU64,
    operations: DashMap<String, NodeId>,
    soap_session_groups: DashMap<String, NodeId>,
    application_groups: DashMap<String, NodeId>,
    listeners: RwLock<Vec<Arc<dyn ContextListener>>>,
    dependency_manager: RwLock<Option<Arc<dyn DependencyManager>>>,
    clustering: Arc<ClusteringSlot>,
}

impl fmt::Debug for ConfigurationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationContext")
            .field("nodes", &self.arena.len())
            .field("operations", &self.operations.len())
            .field("soap_session_groups", &self.soap_session_groups.len())
            .field("application_groups", &self.application_groups.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn new_log_id(kind: NodeKind) -> String {
    format!("{}@{}", kind.log_prefix(), Uuid::new_v4())
}

impl ConfigurationContext {
    /// Create a root over `registry` with default configuration
    #[must_use]
    pub fn new(registry: Arc<DeploymentRegistry>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let clustering = Arc::new(ClusteringSlot::default());
        let probe: Arc<dyn ReplicationProbe> = clustering.clone();
        let root = NodeEntry::new(
            NodeId::ROOT,
            NodeBody::Configuration,
            None,
            PropertyBag::with_probe(probe),
            new_log_id(NodeKind::Configuration),
            clock.now_millis(),
        );
        let arena = DashMap::new();
        arena.insert(NodeId::ROOT, Arc::new(root));

        tracing::info!(
            services = registry.services().count(),
            "configuration context created"
        );

        Self {
            registry,
            config: EngineConfig::default(),
            clock,
            arena,
            next_id: AtomicU64::new(1),
            operations: DashMap::new(),
            soap_session_groups: DashMap::new(),
            application_groups: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            dependency_manager: RwLock::new(None),
            clustering,
        }
    }

    /// With configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        self.clock = clock;
        if let Some(root) = self.arena.get(&NodeId::ROOT) {
            root.touch(now);
        }
        self
    }

    /// Deployment this root resolves against
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current clock reading
    #[inline]
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Register a creation/removal observer
    pub fn add_listener(&self, listener: Arc<dyn ContextListener>) {
        self.listeners.write().push(listener);
    }

    /// Install the service object destroyer
    pub fn set_dependency_manager(&self, manager: Arc<dyn DependencyManager>) {
        *self.dependency_manager.write() = Some(manager);
    }

    /// Install or clear the clustering agent
    ///
    /// Each property bag decides whether to track differences on its first
    /// mutation, so the agent should be installed before contexts are used.
    pub fn set_clustering_agent(&self, agent: Option<Arc<dyn ClusteringAgent>>) {
        self.clustering.set(agent);
    }

    /// Number of live nodes, the root included
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Whether `id` is in the arena
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains_key(&id)
    }

    /// Arena entry for `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn node(&self, id: NodeId) -> Result<Arc<NodeEntry>, ContextError> {
        self.arena
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ContextError::NodeNotFound(id))
    }

    /// Level of `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn kind(&self, id: NodeId) -> Result<NodeKind, ContextError> {
        Ok(self.node(id)?.kind())
    }

    pub(crate) fn node_of(&self, id: NodeId, expected: NodeKind) -> Result<Arc<NodeEntry>, ContextError> {
        let entry = self.node(id)?;
        if entry.kind() != expected {
            return Err(ContextError::KindMismatch {
                node: id,
                expected,
                actual: entry.kind(),
            });
        }
        Ok(entry)
    }

    pub(crate) fn allocate(
        &self,
        body: NodeBody,
        parent: Option<NodeId>,
        properties: PropertyMap,
        log_id: Option<String>,
    ) -> Arc<NodeEntry> {
        let id = NodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = body.kind();
        let probe: Arc<dyn ReplicationProbe> = self.clustering.clone();
        let entry = Arc::new(NodeEntry::new(
            id,
            body,
            parent,
            PropertyBag::with_probe(probe).with_values(properties),
            log_id.unwrap_or_else(|| new_log_id(kind)),
            self.now_millis(),
        ));
        self.arena.insert(id, Arc::clone(&entry));
        entry
    }

    pub(crate) fn discard_node(&self, id: NodeId) {
        if let Some((_, node)) = self.arena.remove(&id) {
            self.notify_removed(id, node.kind());
        }
    }

    pub(crate) fn notify_created(&self, id: NodeId, kind: NodeKind) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.context_created(id, kind);
        }
    }

    pub(crate) fn notify_removed(&self, id: NodeId, kind: NodeKind) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.context_removed(id, kind);
        }
    }

    pub(crate) fn read_body<T>(
        &self,
        id: NodeId,
        expected: NodeKind,
        f: impl FnOnce(&NodeBody) -> Option<T>,
    ) -> Result<T, ContextError> {
        let entry = self.node(id)?;
        let body = entry.body();
        let actual = body.kind();
        f(&body).ok_or(ContextError::KindMismatch {
            node: id,
            expected,
            actual,
        })
    }

    pub(crate) fn write_body<T>(
        &self,
        id: NodeId,
        expected: NodeKind,
        f: impl FnOnce(&mut NodeBody) -> Option<T>,
    ) -> Result<T, ContextError> {
        let entry = self.node(id)?;
        let mut body = entry.body_mut();
        let actual = body.kind();
        f(&mut body).ok_or(ContextError::KindMismatch {
            node: id,
            expected,
            actual,
        })
    }

    /// Read a service group context's payload
    ///
    /// `f` must not call back into this root.
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not a service group context
    pub fn with_service_group<T>(&self, id: NodeId, f: impl FnOnce(&ServiceGroupBody) -> T) -> Result<T, ContextError> {
        self.read_body(id, NodeKind::ServiceGroup, |body| match body {
            NodeBody::ServiceGroup(group) => Some(f(group)),
            _ => None,
        })
    }

    /// Read a service context's payload
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not a service context
    pub fn with_service<T>(&self, id: NodeId, f: impl FnOnce(&ServiceBody) -> T) -> Result<T, ContextError> {
        self.read_body(id, NodeKind::Service, |body| match body {
            NodeBody::Service(service) => Some(f(service)),
            _ => None,
        })
    }

    /// Update a service context's payload
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not a service context
    pub fn with_service_mut<T>(&self, id: NodeId, f: impl FnOnce(&mut ServiceBody) -> T) -> Result<T, ContextError> {
        self.write_body(id, NodeKind::Service, |body| match body {
            NodeBody::Service(service) => Some(f(service)),
            _ => None,
        })
    }

    /// Read an operation context's payload
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not an operation context
    pub fn with_operation<T>(&self, id: NodeId, f: impl FnOnce(&OperationBody) -> T) -> Result<T, ContextError> {
        self.read_body(id, NodeKind::Operation, |body| match body {
            NodeBody::Operation(operation) => Some(f(operation)),
            _ => None,
        })
    }

    pub(crate) fn with_operation_mut<T>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut OperationBody) -> T,
    ) -> Result<T, ContextError> {
        self.write_body(id, NodeKind::Operation, |body| match body {
            NodeBody::Operation(operation) => Some(f(operation)),
            _ => None,
        })
    }

    /// Read a message context's payload
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not a message context
    pub fn with_message<T>(&self, id: NodeId, f: impl FnOnce(&MessageBody) -> T) -> Result<T, ContextError> {
        self.read_body(id, NodeKind::Message, |body| match body {
            NodeBody::Message(message) => Some(f(message)),
            _ => None,
        })
    }

    /// Update a message context's payload
    ///
    /// Structural links should be changed through
    /// [`set_operation_context`](Self::set_operation_context) and friends.
    ///
    /// # Errors
    /// Returns an error if `id` is missing or not a message context
    pub fn with_message_mut<T>(&self, id: NodeId, f: impl FnOnce(&mut MessageBody) -> T) -> Result<T, ContextError> {
        self.write_body(id, NodeKind::Message, |body| match body {
            NodeBody::Message(message) => Some(f(message)),
            _ => None,
        })
    }

    /// Structural owner of `id`; `None` for the root
    ///
    /// A message's owner is its operation context, else its service
    /// context, else its group context, else the root.
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, ContextError> {
        let entry = self.node(id)?;
        let body = entry.body();
        Ok(match &*body {
            NodeBody::Configuration => None,
            NodeBody::Message(message) => Some(message.owner().unwrap_or(NodeId::ROOT)),
            _ => entry.parent(),
        })
    }

    /// Owners of `id` from nearest to the root
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] if `id` or a recorded owner is gone
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, ContextError> {
        let mut chain = Vec::new();
        let mut current = self.parent(id)?;
        while let Some(next) = current {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = self.parent(next)?;
        }
        Ok(chain)
    }

    fn chain_entries(&self, id: NodeId) -> Result<Vec<Arc<NodeEntry>>, ContextError> {
        let mut entries = vec![self.node(id)?];
        for ancestor in self.ancestors(id)? {
            entries.push(self.node(ancestor)?);
        }
        Ok(entries)
    }

    /// Bump the last-touched time of `id` and every ancestor
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn touch(&self, id: NodeId) -> Result<(), ContextError> {
        let now = self.now_millis();
        for entry in self.chain_entries(id)? {
            entry.touch(now);
        }
        Ok(())
    }

    /// Property bag of `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn properties(&self, id: NodeId) -> Result<Arc<PropertyBag>, ContextError> {
        Ok(Arc::clone(self.node(id)?.properties()))
    }

    /// Value of `key` on `id`, falling back through its ancestors
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn property(&self, id: NodeId, key: &str) -> Result<Option<Value>, ContextError> {
        let entries = self.chain_entries(id)?;
        Ok(lookup(entries.iter().map(|entry| entry.properties().as_ref()), key))
    }

    /// Value of `key` on `id` only
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn local_property(&self, id: NodeId, key: &str) -> Result<Option<Value>, ContextError> {
        Ok(self.node(id)?.properties().get_local(key))
    }

    /// Set `key` on `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn set_property(&self, id: NodeId, key: impl Into<String>, value: Value) -> Result<Option<Value>, ContextError> {
        Ok(self.node(id)?.properties().set(key, value))
    }

    /// Remove `key` from `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn remove_property(&self, id: NodeId, key: &str) -> Result<Option<Value>, ContextError> {
        Ok(self.node(id)?.properties().remove(key))
    }

    /// Replace or merge the local properties of `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn set_properties(&self, id: NodeId, values: PropertyMap) -> Result<(), ContextError> {
        self.node(id)?.properties().set_all(values);
        Ok(())
    }

    /// Merge `incoming` into the local properties of `id`
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn merge_properties(&self, id: NodeId, incoming: &PropertyMap, policy: MergePolicy) -> Result<usize, ContextError> {
        Ok(self.node(id)?.properties().merge(incoming, policy))
    }

    /// Hand pending property differences of `id` to the clustering agent
    ///
    /// Returns how many differences were flushed. Without an agent the
    /// differences are discarded.
    ///
    /// # Errors
    /// Returns [`ContextError::NodeNotFound`] for unknown ids
    pub fn flush_property_differences(&self, id: NodeId) -> Result<usize, ContextError> {
        let entry = self.node(id)?;
        let differences = entry.properties().take_differences();
        if differences.is_empty() {
            return Ok(0);
        }
        match self.clustering.get() {
            Some(agent) => agent.replicate(id, entry.kind(), &differences),
            None => tracing::debug!(node = %id, "no clustering agent, dropping differences"),
        }
        Ok(differences.len())
    }

    /// Idle timeout of session-scoped groups
    ///
    /// The root property [`TIMEOUT_PROPERTY`] overrides the configured value.
    #[must_use]
    pub fn service_group_timeout_ms(&self) -> u64 {
        self.local_property(NodeId::ROOT, TIMEOUT_PROPERTY)
            .ok()
            .flatten()
            .and_then(|value| value.as_u64())
            .unwrap_or(self.config.service_group_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_deploy::{Mep, OperationDescription, QualifiedName, ServiceDescription};
    use serde_json::json;

    fn root() -> ConfigurationContext {
        let registry = DeploymentRegistry::builder()
            .service_group("g")
            .service(
                ServiceDescription::new("S", "g")
                    .with_operation(OperationDescription::new(QualifiedName::local("op"), Mep::InOut)),
            )
            .build()
            .unwrap();
        ConfigurationContext::new(Arc::new(registry))
    }

    #[test]
    fn test_property_falls_back_to_root() {
        let root = root();
        let group = root.create_service_group_context("g").unwrap();
        let service = root.service_context(group, "S").unwrap();
        root.set_property(NodeId::ROOT, "K", json!("root")).unwrap();

        assert_eq!(root.property(service, "K").unwrap(), Some(json!("root")));
        assert!(root.local_property(service, "K").unwrap().is_none());
    }

    #[test]
    fn test_kind_mismatch_reported() {
        let root = root();
        let group = root.create_service_group_context("g").unwrap();
        let err = root.with_service(group, |_| ()).unwrap_err();
        assert!(matches!(
            err,
            ContextError::KindMismatch {
                expected: NodeKind::Service,
                actual: NodeKind::ServiceGroup,
                ..
            }
        ));
    }

    #[test]
    fn test_timeout_property_overrides_config() {
        let root = root();
        assert_eq!(root.service_group_timeout_ms(), 30_000);
        root.set_property(NodeId::ROOT, TIMEOUT_PROPERTY, json!(1_000)).unwrap();
        assert_eq!(root.service_group_timeout_ms(), 1_000);
    }
}
