//! Context nodes
//!
//! Every level of the tree is a [`NodeEntry`] in the root's arena. The
//! entry carries what all levels share (parent id, property bag, last-touched
//! time); the level-specific payload is a [`NodeBody`] variant. Parent and
//! child links are [`NodeId`]s, never references.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ctx_deploy::{
    ChainNode, Flow, MessageDescription, OperationDescription, SelfManagedSlots, ServiceDescription,
    ServiceGroupDescription, TransportDescription,
};
use ctx_props::PropertyBag;
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::id::{NodeId, NodeKind};
use crate::options::{EndpointReference, Options};
use crate::snapshot::records::MessageSlotRef;

/// Arena slot of one context
#[derive(Debug)]
pub struct NodeEntry {
    id: NodeId,
    kind: NodeKind,
    log_id: String,
    parent: RwLock<Option<NodeId>>,
    properties: Arc<PropertyBag>,
    last_touched: AtomicI64,
    body: RwLock<NodeBody>,
}

impl NodeEntry {
    pub(crate) fn new(
        id: NodeId,
        body: NodeBody,
        parent: Option<NodeId>,
        properties: PropertyBag,
        log_id: String,
        now: i64,
    ) -> Self {
        Self {
            id,
            kind: body.kind(),
            log_id,
            parent: RwLock::new(parent),
            properties: Arc::new(properties),
            last_touched: AtomicI64::new(now),
            body: RwLock::new(body),
        }
    }

    /// Arena id
    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Tree level
    #[inline]
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Log correlation id
    #[inline]
    #[must_use]
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    /// Owner id as stored on the entry
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        *self.parent.read()
    }

    pub(crate) fn set_parent(&self, parent: Option<NodeId>) {
        *self.parent.write() = parent;
    }

    /// Local properties
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &Arc<PropertyBag> {
        &self.properties
    }

    /// Last touch, in clock milliseconds
    #[must_use]
    pub fn last_touched(&self) -> i64 {
        self.last_touched.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, now: i64) {
        self.last_touched.store(now, Ordering::Release);
    }

    /// Shared access to the payload
    pub fn body(&self) -> RwLockReadGuard<'_, NodeBody> {
        self.body.read()
    }

    pub(crate) fn body_mut(&self) -> RwLockWriteGuard<'_, NodeBody> {
        self.body.write()
    }
}

/// Level-specific payload
#[derive(Debug)]
pub enum NodeBody {
    /// Process-wide root
    Configuration,
    /// Service group context
    ServiceGroup(ServiceGroupBody),
    /// Service context
    Service(ServiceBody),
    /// Operation context
    Operation(OperationBody),
    /// Message context
    Message(Box<MessageBody>),
}

impl NodeBody {
    /// Level of this payload
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Configuration => NodeKind::Configuration,
            Self::ServiceGroup(_) => NodeKind::ServiceGroup,
            Self::Service(_) => NodeKind::Service,
            Self::Operation(_) => NodeKind::Operation,
            Self::Message(_) => NodeKind::Message,
        }
    }
}

/// Service group context payload
#[derive(Debug, Clone)]
pub struct ServiceGroupBody {
    /// Group context id, the natural key
    pub id: String,
    /// Deployed group
    pub description: Arc<ServiceGroupDescription>,
    /// Service name -> service context
    pub services: IndexMap<String, NodeId>,
}

/// Service context payload
#[derive(Debug, Clone)]
pub struct ServiceBody {
    /// Deployed service
    pub description: Arc<ServiceDescription>,
    /// Operation contexts created through this service
    pub operations: Vec<NodeId>,
    /// Most recently created operation context, when caching is on
    pub last_operation: Option<NodeId>,
    /// Endpoint the service sends to
    pub target_epr: Option<EndpointReference>,
    /// Endpoint the service is reached at
    pub my_epr: Option<EndpointReference>,
}

impl ServiceBody {
    pub(crate) fn new(description: Arc<ServiceDescription>) -> Self {
        Self {
            description,
            operations: Vec::new(),
            last_operation: None,
            target_epr: None,
            my_epr: None,
        }
    }
}

/// Operation context payload
#[derive(Debug, Clone)]
pub struct OperationBody {
    /// Deployed operation
    pub description: Arc<OperationDescription>,
    /// Message label -> message context
    pub messages: IndexMap<String, NodeId>,
    /// Set once every label of the exchange is filled; never cleared
    pub complete: bool,
    /// Correlation key while registered
    pub key: Option<String>,
    /// Isolated message slots waiting for their message to be restored
    pub pending_slots: Vec<MessageSlotRef>,
}

impl OperationBody {
    pub(crate) fn new(description: Arc<OperationDescription>) -> Self {
        Self {
            description,
            messages: IndexMap::new(),
            complete: false,
            key: None,
            pending_slots: Vec::new(),
        }
    }

    /// Whether every label of the exchange pattern is filled
    #[must_use]
    pub fn all_labels_filled(&self) -> bool {
        self.description
            .mep
            .labels()
            .iter()
            .all(|label| self.messages.contains_key(*label))
    }
}

/// Processing flags of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    /// A fault is being processed
    pub processing_fault: bool,
    /// Handler execution is suspended
    pub paused: bool,
    /// The message has been written to the wire
    pub output_written: bool,
    /// Processing must continue on another thread
    pub new_thread_required: bool,
    /// SOAP 1.1 rather than 1.2
    pub soap11: bool,
    /// REST style exchange
    pub rest: bool,
    /// MTOM optimised attachments
    pub mtom: bool,
    /// SOAP with attachments
    pub swa: bool,
    /// The response was written
    pub response_written: bool,
    /// Message lives on the server side
    pub server_side: bool,
}

/// Message context payload
#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    /// Flow the message travels through
    pub flow: Flow,
    /// Processing flags
    pub flags: MessageFlags,
    /// Addressing options
    pub options: Options,
    /// Opaque envelope bytes
    pub envelope: Option<Bytes>,
    /// Content id -> attachment
    pub attachments: IndexMap<String, Bytes>,
    /// Handlers and phases to run
    pub execution_chain: Vec<ChainNode>,
    /// Cursor into the execution chain
    pub current_handler_index: i32,
    /// Cursor into the current phase
    pub current_phase_index: i32,
    /// Phases already run, in execution order
    pub executed_phases: Vec<ChainNode>,
    /// Handler-owned per-message blobs
    pub self_managed: SelfManagedSlots,
    /// Owning operation context
    pub operation_context: Option<NodeId>,
    /// Service context
    pub service_context: Option<NodeId>,
    /// Service group context
    pub service_group_context: Option<NodeId>,
    /// Session-scoped group context id to route to
    pub service_group_context_id: Option<String>,
    /// Deployed service
    pub service: Option<Arc<ServiceDescription>>,
    /// Deployed operation
    pub operation: Option<Arc<OperationDescription>>,
    /// Deployed message slot
    pub message: Option<Arc<MessageDescription>>,
    /// Deployed service group
    pub service_group: Option<Arc<ServiceGroupDescription>>,
    /// Inbound transport
    pub transport_in: Option<Arc<TransportDescription>>,
    /// Outbound transport
    pub transport_out: Option<Arc<TransportDescription>>,
}

impl MessageBody {
    /// Empty message on `flow`
    #[must_use]
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            current_handler_index: -1,
            current_phase_index: 0,
            ..Self::default()
        }
    }

    /// Message id, if assigned
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.options.message_id.as_deref()
    }

    /// Record a phase as executed
    pub fn push_executed_phase(&mut self, phase: ChainNode) {
        self.executed_phases.push(phase);
    }

    /// Executed phases, most recent first, for rollback
    pub fn executed_phases_for_rollback(&self) -> impl Iterator<Item = &ChainNode> {
        self.executed_phases.iter().rev()
    }

    /// Closest structural owner: operation, else service, else group
    #[must_use]
    pub fn owner(&self) -> Option<NodeId> {
        self.operation_context
            .or(self.service_context)
            .or(self.service_group_context)
    }
}
