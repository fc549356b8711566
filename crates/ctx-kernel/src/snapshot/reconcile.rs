//! Reconciling restored records with a live tree
//!
//! A decoded record only names deployment metadata and owners. Reconciling
//! resolves those names against the live registry, prefers live contexts
//! that already carry the same natural key, and promotes the rest into the
//! tree. Restored local properties are merged into live twins according to
//! a [`MergePolicy`].
//!
//! Descriptor misses for message-level metadata are soft: the field stays
//! unset and a warning is logged. Handler data that has no owner in the
//! resolved chain fails the message before anything is added to the tree.

use std::sync::Arc;

use bytes::Bytes;
use ctx_codec::WireRecord;
use ctx_deploy::{
    restore_self_managed, ChainNode, DeploymentRegistry, MetaDescriptor, OperationDescription, QualifiedName,
    SelfManagedSlots,
};
use ctx_props::MergePolicy;

use crate::context::ConfigurationContext;
use crate::error::SnapshotError;
use crate::id::{NodeId, NodeKind};
use crate::node::{MessageBody, OperationBody, ServiceBody};
use crate::snapshot::records::{ContextLink, MessageRecord, OperationRecord, ServiceGroupRecord, ServiceRecord};

/// Records that can be attached to a live tree
pub trait Reconcile: WireRecord {
    /// Attach the record to `root`, returning the live node that stands for it
    ///
    /// # Errors
    /// Returns an error if required metadata cannot be resolved, handler
    /// data has no owner, or restored links contradict each other
    fn reconcile_into(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError>;
}

/// Whether a restored record has been attached yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Decoded, not attached
    Pending,
    /// Attached as this node
    Reconciled(NodeId),
}

/// A decoded record awaiting reconciliation
#[derive(Debug, Clone)]
pub struct Restored<R> {
    record: R,
    state: ReconcileState,
}

/// Restored service group context
pub type RestoredServiceGroup = Restored<ServiceGroupRecord>;
/// Restored service context
pub type RestoredService = Restored<ServiceRecord>;
/// Restored operation context
pub type RestoredOperation = Restored<OperationRecord>;
/// Restored message context
pub type RestoredMessage = Restored<MessageRecord>;

impl<R: Reconcile> Restored<R> {
    /// Decode a record
    ///
    /// # Errors
    /// Returns [`SnapshotError::Codec`] for unknown formats or malformed input
    pub fn read(bytes: Bytes) -> Result<Self, SnapshotError> {
        Ok(Self::from_record(R::from_bytes(bytes)?))
    }

    /// Wrap an already decoded record
    #[must_use]
    pub fn from_record(record: R) -> Self {
        Self {
            record,
            state: ReconcileState::Pending,
        }
    }

    /// The decoded record
    #[inline]
    #[must_use]
    pub fn record(&self) -> &R {
        &self.record
    }

    /// Take the decoded record
    #[must_use]
    pub fn into_record(self) -> R {
        self.record
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ReconcileState {
        self.state
    }

    /// Whether [`reconcile`](Self::reconcile) still has to run
    #[inline]
    #[must_use]
    pub fn needs_reconcile(&self) -> bool {
        self.state == ReconcileState::Pending
    }

    /// Live node standing for this record
    ///
    /// # Errors
    /// Returns [`SnapshotError::NotReconciled`] before reconciliation
    pub fn node(&self) -> Result<NodeId, SnapshotError> {
        match self.state {
            ReconcileState::Reconciled(node) => Ok(node),
            ReconcileState::Pending => {
                tracing::warn!("live node requested from a restored record before reconciliation");
                Err(SnapshotError::NotReconciled)
            }
        }
    }

    /// Reconcile with the root's configured merge policy
    ///
    /// # Errors
    /// See [`Reconcile::reconcile_into`]
    pub fn reconcile(&mut self, root: &ConfigurationContext) -> Result<NodeId, SnapshotError> {
        self.reconcile_with(root, root.config().merge_policy)
    }

    /// Reconcile with an explicit merge policy
    ///
    /// Once reconciled, further calls return the same node and change
    /// nothing.
    ///
    /// # Errors
    /// See [`Reconcile::reconcile_into`]
    pub fn reconcile_with(&mut self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        if let ReconcileState::Reconciled(node) = self.state {
            return Ok(node);
        }
        let node = self.record.reconcile_into(root, policy)?;
        self.state = ReconcileState::Reconciled(node);
        Ok(node)
    }
}

/// Decode and reconcile a message record in one step
///
/// # Errors
/// Returns a decode error or any reconciliation failure
pub fn restore_message(root: &ConfigurationContext, bytes: Bytes) -> Result<NodeId, SnapshotError> {
    RestoredMessage::read(bytes)?.reconcile(root)
}

fn unresolved(what: &'static str, name: &str) -> SnapshotError {
    SnapshotError::Unresolved {
        what,
        name: name.to_string(),
    }
}

impl Reconcile for ServiceGroupRecord {
    fn reconcile_into(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        if let Some(live) = root.service_group_context(&self.id) {
            let merged = root.merge_properties(live, &self.properties, policy)?;
            tracing::debug!(id = self.id, node = %live, merged, "restored group merged into live context");
            return Ok(live);
        }

        let description = root
            .registry()
            .find_service_group(&self.group)
            .ok_or_else(|| unresolved("service group", &self.group.name))?;
        let promoted = root.promote_service_group(
            self.id.clone(),
            description,
            self.properties.clone(),
            self.log_id.clone(),
            self.last_touched,
        );
        let winner = root.register_session_group_if_absent(&self.id, promoted);
        if winner != promoted {
            root.discard_node(promoted);
            root.merge_properties(winner, &self.properties, policy)?;
        }
        root.touch(winner)?;
        tracing::debug!(id = self.id, node = %winner, "restored group promoted");
        Ok(winner)
    }
}

impl ServiceRecord {
    fn reconcile_under(
        &self,
        root: &ConfigurationContext,
        group: NodeId,
        policy: MergePolicy,
    ) -> Result<NodeId, SnapshotError> {
        let description = root
            .registry()
            .find_service(&self.service)
            .ok_or_else(|| unresolved("service", &self.service.name))?;
        if let Some(live) = root.find_service_context(group, &description.name)? {
            root.merge_properties(live, &self.properties, policy)?;
            return Ok(live);
        }
        let body = ServiceBody {
            target_epr: self.target_epr.clone(),
            my_epr: self.my_epr.clone(),
            ..ServiceBody::new(description)
        };
        let (live, promoted) = root.promote_service_context(group, body, self.properties.clone(), self.log_id.clone())?;
        if promoted {
            tracing::debug!(service = self.service.name, node = %live, "restored service promoted");
        } else {
            root.merge_properties(live, &self.properties, policy)?;
        }
        Ok(live)
    }

    fn group_id(&self) -> &str {
        self.parent.as_ref().map_or(self.group_context_id.as_str(), |group| group.id.as_str())
    }

    fn same_context(&self, other: &Self) -> bool {
        self.group_id() == other.group_id() && self.service == other.service
    }

    fn live_twin(&self, root: &ConfigurationContext) -> Option<NodeId> {
        let group = root.service_group_context(&self.group_context_id)?;
        let description = root.registry().find_service(&self.service)?;
        root.find_service_context(group, &description.name).ok().flatten()
    }
}

impl Reconcile for ServiceRecord {
    fn reconcile_into(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        let group = match &self.parent {
            Some(parent) => parent.reconcile_into(root, policy)?,
            None => root
                .service_group_context(&self.group_context_id)
                .ok_or_else(|| unresolved("service group context", &self.group_context_id))?,
        };
        self.reconcile_under(root, group, policy)
    }
}

impl OperationRecord {
    fn resolve_service(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        if let Some(parent) = &self.parent {
            if parent.live_twin(root).is_some() {
                return parent.reconcile_into(root, policy);
            }
        }

        let local = QualifiedName::parse(&self.operation.name).local;
        if let Some(twin) = root.find_operation_context(&local, &self.service_name, &self.group_name) {
            let service = root.operation_service(twin)?;
            if let Some(parent) = &self.parent {
                root.merge_properties(service, &parent.properties, policy)?;
                if let (Some(group_record), Some(group)) = (&parent.parent, root.node(service)?.parent()) {
                    root.merge_properties(group, &group_record.properties, policy)?;
                }
            }
            tracing::debug!(operation = local, twin = %twin, "restored operation adopts owner of live twin");
            return Ok(service);
        }

        match &self.parent {
            Some(parent) => parent.reconcile_into(root, policy),
            None => Err(unresolved("service context", &self.service_name)),
        }
    }

    fn resolve_description(&self, registry: &DeploymentRegistry) -> Result<Arc<OperationDescription>, SnapshotError> {
        self.parent
            .as_ref()
            .and_then(|parent| registry.find_service(&parent.service))
            .and_then(|owner| DeploymentRegistry::find_operation_in(&owner, &self.operation))
            .or_else(|| registry.find_operation(&self.operation))
            .ok_or_else(|| unresolved("operation", &self.operation.name))
    }

    fn check_labels(&self) -> Result<(), SnapshotError> {
        let labels = self
            .messages
            .iter()
            .map(|embedded| embedded.label.as_str())
            .chain(self.isolated.iter().map(|slot| slot.label.as_str()));
        let mut seen = std::collections::HashSet::new();
        for label in labels {
            if !seen.insert(label) {
                return Err(SnapshotError::StructuralMismatch(format!(
                    "operation record holds label {label} twice"
                )));
            }
        }
        Ok(())
    }
}

impl Reconcile for OperationRecord {
    fn reconcile_into(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        // record-level checks run before anything is promoted
        self.check_labels()?;
        let description = self.resolve_description(root.registry())?;
        let mep = description.mep;
        let service = self.resolve_service(root, policy)?;

        let body = OperationBody {
            complete: self.complete,
            pending_slots: self.isolated.clone(),
            ..OperationBody::new(description)
        };
        let operation = root.promote_operation_context(service, body, self.properties.clone(), self.log_id.clone())?;

        for embedded in &self.messages {
            let links = Links {
                operation: Some(operation),
                service: Some(service),
                group: root.node(service)?.parent(),
            };
            let body = message_body(root, &embedded.record, links, SelfManagedSlots::new());
            let message = root.promote_message_context(body, embedded.record.properties.clone(), embedded.record.log_id.clone());
            root.add_message_context_with_label(operation, &embedded.label, message)?;
        }

        if let Some(key) = &self.key {
            if mep.reregisters_on_restore(self.complete) {
                root.register_operation_context(key, operation, true)?;
                tracing::debug!(key, node = %operation, "restored operation re-registered");
            }
        }
        Ok(operation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Links {
    operation: Option<NodeId>,
    service: Option<NodeId>,
    group: Option<NodeId>,
}

fn resolve_chain(registry: &DeploymentRegistry, record: &MessageRecord) -> (Vec<ChainNode>, Vec<ChainNode>) {
    let index = registry.flow(record.flow).index();
    (index.resolve(&record.execution_chain), index.resolve(&record.executed_phases))
}

fn soft<T>(found: Option<T>, what: &str, wanted: Option<&MetaDescriptor>) -> Option<T> {
    if found.is_none() {
        if let Some(wanted) = wanted {
            tracing::warn!(what, recorded = %wanted, "restored message refers to metadata that is not deployed");
        }
    }
    found
}

fn message_body(root: &ConfigurationContext, record: &MessageRecord, links: Links, slots: SelfManagedSlots) -> MessageBody {
    let registry = root.registry();
    let (execution_chain, executed_phases) = resolve_chain(registry, record);

    let service = links
        .service
        .and_then(|service| root.with_service(service, |body| Arc::clone(&body.description)).ok())
        .or_else(|| {
            let found = record.service.as_ref().and_then(|wanted| registry.find_service(wanted));
            soft(found, "service", record.service.as_ref())
        });

    let operation = links
        .operation
        .and_then(|operation| root.operation_description(operation).ok())
        .or_else(|| {
            let wanted = record.operation.as_ref()?;
            let found = service
                .as_ref()
                .and_then(|service| DeploymentRegistry::find_operation_in(service, wanted))
                .or_else(|| registry.find_operation(wanted));
            soft(found, "operation", Some(wanted))
        });

    let message = record.message.as_ref().and_then(|wanted| {
        let found = operation
            .as_ref()
            .and_then(|operation| DeploymentRegistry::find_message(operation, wanted));
        soft(found, "message", Some(wanted))
    });

    let service_group = links
        .group
        .and_then(|group| root.with_service_group(group, |body| Arc::clone(&body.description)).ok())
        .or_else(|| {
            let found = record.service_group.as_ref().and_then(|wanted| registry.find_service_group(wanted));
            soft(found, "service group", record.service_group.as_ref())
        });

    let transport_in = record.transport_in.as_deref().and_then(|name| {
        let found = registry.transport_in(name).cloned();
        if found.is_none() {
            tracing::warn!(transport = name, "inbound transport is not deployed");
        }
        found
    });
    let transport_out = record.transport_out.as_deref().and_then(|name| {
        let found = registry.transport_out(name).cloned();
        if found.is_none() {
            tracing::warn!(transport = name, "outbound transport is not deployed");
        }
        found
    });

    MessageBody {
        flow: record.flow,
        flags: record.flags,
        options: record.options.clone(),
        envelope: record.envelope.clone(),
        attachments: record.attachments.clone(),
        execution_chain,
        current_handler_index: record.current_handler_index,
        current_phase_index: record.current_phase_index,
        executed_phases,
        self_managed: slots,
        operation_context: links.operation,
        service_context: links.service,
        service_group_context: links.group,
        service_group_context_id: record.service_group_context_id.clone(),
        service,
        operation,
        message,
        service_group,
        transport_in,
        transport_out,
    }
}

/// Owner records a message record reconciles on its own
///
/// `None` means the owner is reached through the operation (or service)
/// context, or is absent.
#[derive(Debug, Clone, Copy)]
struct LinkPlan<'a> {
    service: Option<&'a ServiceRecord>,
    group: Option<&'a ServiceGroupRecord>,
}

impl MessageRecord {
    /// Check the owner links against each other without touching the tree
    fn plan_links(&self) -> Result<LinkPlan<'_>, SnapshotError> {
        let operation_owner = self.operation_context.as_deref().map(|operation| operation.parent.as_ref());

        let service = match (&self.service_context, operation_owner) {
            (ContextLink::Parent, None) => {
                return Err(SnapshotError::StructuralMismatch(
                    "service context marked as parent without an operation context".into(),
                ))
            }
            (ContextLink::Parent | ContextLink::Absent, _) => None,
            (ContextLink::Embedded(record), Some(owner)) => {
                if !owner.is_some_and(|owner| owner.same_context(record)) {
                    return Err(SnapshotError::StructuralMismatch(format!(
                        "service context {} is not the owner of the restored operation context",
                        record.service
                    )));
                }
                None
            }
            (ContextLink::Embedded(record), None) => Some(record),
        };

        // service record the group has to belong to, if any service is linked
        let has_service = operation_owner.is_some() || service.is_some();
        let known_service = service.or(operation_owner.flatten());

        let group = match &self.service_group_context {
            ContextLink::Parent if !has_service => {
                return Err(SnapshotError::StructuralMismatch(
                    "group context marked as parent without a service context".into(),
                ))
            }
            ContextLink::Parent | ContextLink::Absent => None,
            ContextLink::Embedded(record) if has_service => {
                if !known_service.is_some_and(|owner| owner.group_id() == record.id) {
                    return Err(SnapshotError::StructuralMismatch(format!(
                        "group context {} is not the owner of the restored service context",
                        record.id
                    )));
                }
                None
            }
            ContextLink::Embedded(record) => Some(record),
        };

        Ok(LinkPlan { service, group })
    }

    fn resolve_links(
        &self,
        root: &ConfigurationContext,
        plan: LinkPlan<'_>,
        policy: MergePolicy,
    ) -> Result<Links, SnapshotError> {
        let operation = match &self.operation_context {
            Some(record) => Some(record.reconcile_into(root, policy)?),
            None => None,
        };
        let service = match (operation, plan.service) {
            (Some(operation), _) => Some(root.operation_service(operation)?),
            (None, Some(record)) => Some(record.reconcile_into(root, policy)?),
            (None, None) => None,
        };
        let group = match (service, plan.group) {
            (Some(service), _) => root.node_of(service, NodeKind::Service)?.parent(),
            (None, Some(record)) => Some(record.reconcile_into(root, policy)?),
            (None, None) => None,
        };

        Ok(Links {
            operation,
            service,
            group,
        })
    }
}

impl Reconcile for MessageRecord {
    fn reconcile_into(&self, root: &ConfigurationContext, policy: MergePolicy) -> Result<NodeId, SnapshotError> {
        let message_id = self.message_id().unwrap_or_default();

        // links and handler data are checked before the tree is touched
        let plan = self.plan_links()?;
        let (execution_chain, _) = resolve_chain(root.registry(), self);
        let mut slots = SelfManagedSlots::new();
        restore_self_managed(&execution_chain, message_id, &self.self_managed, &mut slots)
            .map_err(|err| SnapshotError::from_handler(err, message_id))?;

        let links = self.resolve_links(root, plan, policy)?;
        let body = message_body(root, self, links, slots);
        let message = root.promote_message_context(body, self.properties.clone(), self.log_id.clone());

        if let Some(operation) = links.operation {
            if !root.restore_message_context(operation, message)? {
                tracing::debug!(message_id, operation = %operation, "restored message has no slot in its operation context");
            }
        }
        tracing::debug!(message_id, node = %message, "message reconciled");
        Ok(message)
    }
}
