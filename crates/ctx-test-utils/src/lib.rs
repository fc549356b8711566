//! Testing utilities for the context persistence workspace
//!
//! Shared deployments, recording collaborators and handlers with
//! self-managed data.

#![allow(missing_docs)]

use std::sync::Arc;

use bytes::Bytes;
use ctx_deploy::{
    ChainNode, DeploymentRegistry, Flow, Handler, HandlerError, HandlerKind, Mep, OperationDescription, Phase,
    QualifiedName, Scope, SelfManagedData, SelfManagedSlots, ServiceDescription,
};
use ctx_kernel::{
    ClusteringAgent, ConfigurationContext, ContextListener, DependencyManager, EngineConfig, NodeId, NodeKind,
    Options,
};
use ctx_props::PropertyDifference;
use parking_lot::Mutex;

pub const ECHO_GROUP: &str = "echo";
pub const OTHER_GROUP: &str = "other";
/// Session-scoped service
pub const ECHO_SERVICE: &str = "Echo";
/// Application-scoped service
pub const SHARED_SERVICE: &str = "Shared";
/// Request-scoped service
pub const PER_REQUEST_SERVICE: &str = "PerRequest";
/// Service deployed in [`OTHER_GROUP`]
pub const STRANGER_SERVICE: &str = "Stranger";
pub const NAMESPACE: &str = "urn:test:echo";

/// Handler storing a counter for the message as self-managed data
#[derive(Debug)]
pub struct CounterHandler {
    kind: HandlerKind,
    name: String,
    fail_restore: bool,
}

impl CounterHandler {
    pub const KIND: &'static str = "counter";
    const SLOT: &'static str = "count";
    const TRANSIENT: &'static str = "rebuilt";

    pub fn new(name: &str) -> Self {
        Self {
            kind: HandlerKind::new(Self::KIND),
            name: name.to_string(),
            fail_restore: false,
        }
    }

    /// Handler that rejects every blob it is handed back
    pub fn failing(name: &str) -> Self {
        Self {
            fail_restore: true,
            ..Self::new(name)
        }
    }

    pub fn set_count(slots: &mut SelfManagedSlots, count: u32) {
        slots.set(
            HandlerKind::new(Self::KIND),
            Self::SLOT,
            Bytes::copy_from_slice(&count.to_be_bytes()),
        );
    }

    pub fn count(slots: &SelfManagedSlots) -> Option<u32> {
        let data = slots.get(&HandlerKind::new(Self::KIND), Self::SLOT)?;
        let raw: [u8; 4] = data.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    pub fn rebuilt(slots: &SelfManagedSlots) -> bool {
        slots.get(&HandlerKind::new(Self::KIND), Self::TRANSIENT).is_some()
    }
}

impl Handler for CounterHandler {
    fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn self_managed(&self) -> Option<&dyn SelfManagedData> {
        Some(self)
    }
}

impl SelfManagedData for CounterHandler {
    fn serialize_self_managed(&self, _message_id: &str, slots: &SelfManagedSlots) -> Result<Option<Bytes>, HandlerError> {
        Ok(slots.get(&self.kind, Self::SLOT).cloned())
    }

    fn deserialize_self_managed(
        &self,
        _message_id: &str,
        data: &[u8],
        slots: &mut SelfManagedSlots,
    ) -> Result<(), HandlerError> {
        if self.fail_restore || data.len() != 4 {
            return Err(HandlerError::failed(&self.name, "unusable counter"));
        }
        slots.set(self.kind.clone(), Self::SLOT, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn restore_transient(&self, _message_id: &str, slots: &mut SelfManagedSlots) -> Result<(), HandlerError> {
        slots.set(self.kind.clone(), Self::TRANSIENT, Bytes::from_static(b"1"));
        Ok(())
    }
}

/// Handler without self-managed data
#[derive(Debug)]
pub struct PlainHandler {
    kind: HandlerKind,
    name: String,
}

impl PlainHandler {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: HandlerKind::new(kind),
            name: name.to_string(),
        }
    }
}

impl Handler for PlainHandler {
    fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn op(local: &str, mep: Mep) -> OperationDescription {
    OperationDescription::new(QualifiedName::new(NAMESPACE, local), mep)
}

/// Deployment with one service per scope plus a service in another group
///
/// `inbound` becomes the single phase of [`Flow::In`].
pub fn registry_with_phase(inbound: Phase) -> DeploymentRegistry {
    DeploymentRegistry::builder()
        .service_group(ECHO_GROUP)
        .service_group(OTHER_GROUP)
        .service(
            ServiceDescription::new(ECHO_SERVICE, ECHO_GROUP)
                .with_scope(Scope::SoapSession)
                .with_operation(op("ping", Mep::InOut))
                .with_operation(op("fire", Mep::OutOnly))
                .with_operation(op("ask", Mep::OutIn))
                .with_operation(op("submit", Mep::RobustInOnly))
                .with_operation(op("alert", Mep::RobustOutOnly)),
        )
        .service(
            ServiceDescription::new(SHARED_SERVICE, ECHO_GROUP)
                .with_scope(Scope::Application)
                .with_operation(op("log", Mep::InOnly)),
        )
        .service(
            ServiceDescription::new(PER_REQUEST_SERVICE, ECHO_GROUP)
                .with_scope(Scope::Request)
                .with_operation(op("call", Mep::InOut)),
        )
        .service(ServiceDescription::new(STRANGER_SERVICE, OTHER_GROUP).with_operation(op("wave", Mep::InOnly)))
        .transport_in("http")
        .transport_out("http")
        .phase(Flow::In, inbound)
        .phase(Flow::Out, Phase::new("MessageOut").with_handler(Arc::new(PlainHandler::new("addressing", "AddressingOut"))))
        .build()
        .unwrap()
}

/// Standard deployment: a dispatch phase with one counter handler
pub fn test_registry() -> DeploymentRegistry {
    registry_with_phase(
        Phase::new("Dispatch")
            .with_handler(Arc::new(PlainHandler::new("addressing", "AddressingIn")))
            .with_handler(Arc::new(CounterHandler::new("Counter"))),
    )
}

pub fn test_root() -> ConfigurationContext {
    ConfigurationContext::new(Arc::new(test_registry()))
}

pub fn test_root_with(config: EngineConfig) -> ConfigurationContext {
    test_root().with_config(config)
}

/// Inbound chain of `root`'s deployment
pub fn inbound_chain(root: &ConfigurationContext) -> Vec<ChainNode> {
    root.registry().flow(Flow::In).phases().to_vec()
}

/// Message bound to `service`, carrying `message_id` and the inbound chain
pub fn message_for(root: &ConfigurationContext, service: &str, message_id: &str) -> NodeId {
    let description = root.registry().service(service).cloned();
    let chain = inbound_chain(root);
    let message = root.create_message_context(Flow::In);
    root.with_message_mut(message, |body| {
        body.service = description;
        body.options = Options::default().with_message_id(message_id);
        body.execution_chain = chain;
        body.transport_in = root.registry().transport_in("http").cloned();
    })
    .unwrap();
    message
}

/// Nodes of one routed exchange
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    pub message: NodeId,
    pub service: NodeId,
    pub operation: NodeId,
}

/// Route a new message to `service` and attach it to a new `operation`
pub fn exchange(root: &ConfigurationContext, service: &str, operation: &str, message_id: &str) -> Exchange {
    let message = message_for(root, service, message_id);
    let service = root.fill_service_and_group_context(message).unwrap();
    let operation = root.create_operation_context(service, operation).unwrap();
    root.add_message_context(operation, message).unwrap();
    Exchange {
        message,
        service,
        operation,
    }
}

/// Listener remembering every notification
#[derive(Debug, Default)]
pub struct RecordingListener {
    created: Mutex<Vec<(NodeId, NodeKind)>>,
    removed: Mutex<Vec<(NodeId, NodeKind)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self, kind: NodeKind) -> usize {
        self.created.lock().iter().filter(|(_, k)| *k == kind).count()
    }

    pub fn removed(&self, kind: NodeKind) -> usize {
        self.removed.lock().iter().filter(|(_, k)| *k == kind).count()
    }

    pub fn removed_nodes(&self) -> Vec<NodeId> {
        self.removed.lock().iter().map(|(node, _)| *node).collect()
    }
}

impl ContextListener for RecordingListener {
    fn context_created(&self, node: NodeId, kind: NodeKind) {
        self.created.lock().push((node, kind));
    }

    fn context_removed(&self, node: NodeId, kind: NodeKind) {
        self.removed.lock().push((node, kind));
    }
}

/// Dependency manager remembering destroyed service objects
#[derive(Debug, Default)]
pub struct RecordingDependencyManager {
    destroyed: Mutex<Vec<(NodeId, String)>>,
}

impl RecordingDependencyManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn destroyed(&self) -> Vec<(NodeId, String)> {
        self.destroyed.lock().clone()
    }
}

impl DependencyManager for RecordingDependencyManager {
    fn destroy_service_object(&self, service_context: NodeId, service: &ServiceDescription) {
        self.destroyed.lock().push((service_context, service.name.clone()));
    }
}

/// Clustering agent remembering shipped differences
#[derive(Debug, Default)]
pub struct RecordingClustering {
    state_manager: bool,
    shipped: Mutex<Vec<(NodeId, NodeKind, Vec<PropertyDifference>)>>,
}

impl RecordingClustering {
    pub fn new(state_manager: bool) -> Arc<Self> {
        Arc::new(Self {
            state_manager,
            shipped: Mutex::default(),
        })
    }

    pub fn shipped(&self) -> Vec<(NodeId, NodeKind, Vec<PropertyDifference>)> {
        self.shipped.lock().clone()
    }
}

impl ClusteringAgent for RecordingClustering {
    fn has_state_manager(&self) -> bool {
        self.state_manager
    }

    fn replicate(&self, node: NodeId, kind: NodeKind, differences: &[PropertyDifference]) {
        self.shipped.lock().push((node, kind, differences.to_vec()));
    }
}
