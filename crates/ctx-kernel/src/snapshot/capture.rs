//! Capturing live contexts into records
//!
//! Capture reads the live tree and never changes its structure. A message
//! saved together with its operation context is isolated: the operation
//! record carries a [`MessageSlotRef`] for it, and the operation's other
//! messages are embedded as slim copies.

use bytes::Bytes;
use ctx_codec::WireRecord;
use ctx_deploy::collect_self_managed;
use uuid::Uuid;

use crate::context::ConfigurationContext;
use crate::error::SnapshotError;
use crate::id::{NodeId, NodeKind};
use crate::node::MessageBody;
use crate::snapshot::records::{
    ContextLink, EmbeddedMessage, MessageRecord, MessageSlotRef, OperationRecord, ServiceGroupRecord, ServiceRecord,
};

/// Capture a service group context
///
/// # Errors
/// Returns an error if `group` is missing or not a service group context
pub fn capture_service_group(root: &ConfigurationContext, group: NodeId) -> Result<ServiceGroupRecord, SnapshotError> {
    let entry = root.node(group)?;
    let (id, descriptor) = root.with_service_group(group, |body| (body.id.clone(), body.description.descriptor()))?;
    Ok(ServiceGroupRecord {
        log_id: entry.log_id().to_string(),
        id,
        last_touched: entry.last_touched(),
        properties: entry.properties().snapshot(),
        group: descriptor,
    })
}

/// Capture a service context with its group context
///
/// # Errors
/// Returns an error if `service` is missing or not a service context
pub fn capture_service(root: &ConfigurationContext, service: NodeId) -> Result<ServiceRecord, SnapshotError> {
    let entry = root.node(service)?;
    let (descriptor, target_epr, my_epr) = root.with_service(service, |body| {
        (body.description.descriptor(), body.target_epr.clone(), body.my_epr.clone())
    })?;
    let parent = match entry.parent() {
        Some(group) => Some(capture_service_group(root, group)?),
        None => None,
    };
    Ok(ServiceRecord {
        log_id: entry.log_id().to_string(),
        group_context_id: parent.as_ref().map(|group| group.id.clone()).unwrap_or_default(),
        target_epr,
        my_epr,
        properties: entry.properties().snapshot(),
        service: descriptor,
        parent,
    })
}

/// Capture an operation context with its owners and every message
///
/// # Errors
/// Returns an error if `operation` or one of its owners is missing
pub fn capture_operation(root: &ConfigurationContext, operation: NodeId) -> Result<OperationRecord, SnapshotError> {
    capture_operation_isolating(root, operation, None)
}

/// Capture an operation context, leaving `isolated` out as a slot
///
/// # Errors
/// Returns an error if `operation` or one of its owners is missing
pub fn capture_operation_isolating(
    root: &ConfigurationContext,
    operation: NodeId,
    isolated: Option<NodeId>,
) -> Result<OperationRecord, SnapshotError> {
    let isolated = match isolated {
        Some(message) => {
            let message_id = root.with_message(message, |body| body.message_id().unwrap_or_default().to_string())?;
            Some((message, message_id))
        }
        None => None,
    };
    capture_operation_with_slot(root, operation, isolated)
}

fn capture_operation_with_slot(
    root: &ConfigurationContext,
    operation: NodeId,
    isolated: Option<(NodeId, String)>,
) -> Result<OperationRecord, SnapshotError> {
    let entry = root.node_of(operation, NodeKind::Operation)?;
    let (key, complete, descriptor, held, pending) = root.with_operation(operation, |body| {
        (
            body.key.clone(),
            body.complete,
            body.description.descriptor(),
            body.messages.iter().map(|(label, id)| (label.clone(), *id)).collect::<Vec<_>>(),
            body.pending_slots.clone(),
        )
    })?;

    let (service_name, group_name, parent) = match entry.parent() {
        Some(service) => {
            let names = root.with_service(service, |body| (body.description.name.clone(), body.description.group.clone()))?;
            (names.0, names.1, Some(capture_service(root, service)?))
        }
        None => (String::new(), String::new(), None),
    };

    let mut messages = Vec::new();
    let mut slots = pending;
    for (label, message) in held {
        if let Some((_, message_id)) = isolated.as_ref().filter(|(node, _)| *node == message) {
            slots.push(MessageSlotRef::new(message_id.clone(), label));
            continue;
        }
        let (_, mut record) = message_fields(root, message)?;
        record.envelope = None;
        messages.push(EmbeddedMessage { label, record });
    }

    Ok(OperationRecord {
        log_id: entry.log_id().to_string(),
        key,
        complete,
        service_name,
        group_name,
        properties: entry.properties().snapshot(),
        operation: descriptor,
        parent,
        messages,
        isolated: slots,
    })
}

fn message_fields(root: &ConfigurationContext, message: NodeId) -> Result<(MessageBody, MessageRecord), SnapshotError> {
    let entry = root.node_of(message, NodeKind::Message)?;
    let body = root.with_message(message, Clone::clone)?;
    let record = MessageRecord {
        log_id: entry.log_id().to_string(),
        flow: body.flow,
        flags: body.flags,
        options: body.options.clone(),
        envelope: body.envelope.clone(),
        attachments: body.attachments.clone(),
        execution_chain: ctx_deploy::describe(&body.execution_chain),
        current_handler_index: body.current_handler_index,
        current_phase_index: body.current_phase_index,
        executed_phases: ctx_deploy::describe(&body.executed_phases),
        service: body.service.as_ref().map(|service| service.descriptor()),
        operation: body.operation.as_ref().map(|operation| operation.descriptor()),
        message: body.message.as_ref().map(|slot| slot.descriptor()),
        service_group: body.service_group.as_ref().map(|group| group.descriptor()),
        transport_in: body.transport_in.as_ref().map(|transport| transport.name.clone()),
        transport_out: body.transport_out.as_ref().map(|transport| transport.name.clone()),
        service_group_context_id: body.service_group_context_id.clone(),
        properties: entry.properties().snapshot(),
        operation_context: None,
        service_context: ContextLink::Absent,
        service_group_context: ContextLink::Absent,
        self_managed: Vec::new(),
    };
    Ok((body, record))
}

fn collect_handler_data(body: &MessageBody, record: &mut MessageRecord) -> Result<(), SnapshotError> {
    let message_id = body.message_id().unwrap_or_default();
    record.self_managed = collect_self_managed(&body.execution_chain, message_id, &body.self_managed)
        .map_err(|err| SnapshotError::from_handler(err, message_id))?;
    Ok(())
}

/// Copy of a message's own data without its owners
///
/// Handler data is collected; operation, service and group links are
/// dropped.
///
/// # Errors
/// Returns an error if `message` is missing or a handler fails to save
pub fn extract_copy(root: &ConfigurationContext, message: NodeId) -> Result<MessageRecord, SnapshotError> {
    let (body, mut record) = message_fields(root, message)?;
    collect_handler_data(&body, &mut record)?;
    Ok(record)
}

/// Capture a message with everything it is linked to
///
/// Each owner is written once: the operation context is embedded in full
/// and the service and group contexts reached through it are marked as
/// parents. A message saved with its operation context but without a
/// message id gets a generated one in the record; the live message keeps
/// none.
///
/// # Errors
/// Returns an error if a linked node is missing or a handler fails to save
pub fn capture_message(root: &ConfigurationContext, message: NodeId) -> Result<MessageRecord, SnapshotError> {
    let (body, mut record) = message_fields(root, message)?;
    collect_handler_data(&body, &mut record)?;

    let operation_service = match body.operation_context {
        Some(operation) => {
            // the isolated slot is matched by message id on restore
            let message_id = record
                .options
                .message_id
                .get_or_insert_with(|| format!("urn:uuid:{}", Uuid::new_v4()))
                .clone();
            let captured = capture_operation_with_slot(root, operation, Some((message, message_id)))?;
            record.operation_context = Some(Box::new(captured));
            root.node(operation)?.parent()
        }
        None => None,
    };

    let reachable_group = match body.service_context {
        Some(service) if Some(service) == operation_service => {
            record.service_context = ContextLink::Parent;
            root.node(service)?.parent()
        }
        Some(service) => {
            let captured = capture_service(root, service)?;
            record.service_context = ContextLink::Embedded(captured);
            root.node(service)?.parent()
        }
        None => None,
    };

    record.service_group_context = match body.service_group_context {
        Some(group) if Some(group) == reachable_group => ContextLink::Parent,
        Some(group) => ContextLink::Embedded(capture_service_group(root, group)?),
        None => ContextLink::Absent,
    };

    tracing::debug!(
        node = %message,
        message_id = ?record.message_id(),
        handlers = record.self_managed.len(),
        "message captured"
    );
    Ok(record)
}

/// Encode a message with everything it is linked to
///
/// # Errors
/// Returns an error if capture or encoding fails
pub fn write_message(root: &ConfigurationContext, message: NodeId) -> Result<Bytes, SnapshotError> {
    Ok(capture_message(root, message)?.to_bytes()?)
}

/// Encode an operation context with its owners and messages
///
/// # Errors
/// Returns an error if capture or encoding fails
pub fn write_operation(root: &ConfigurationContext, operation: NodeId) -> Result<Bytes, SnapshotError> {
    Ok(capture_operation(root, operation)?.to_bytes()?)
}

/// Encode a service context with its group context
///
/// # Errors
/// Returns an error if capture or encoding fails
pub fn write_service(root: &ConfigurationContext, service: NodeId) -> Result<Bytes, SnapshotError> {
    Ok(capture_service(root, service)?.to_bytes()?)
}

/// Encode a service group context
///
/// # Errors
/// Returns an error if capture or encoding fails
pub fn write_service_group(root: &ConfigurationContext, group: NodeId) -> Result<Bytes, SnapshotError> {
    Ok(capture_service_group(root, group)?.to_bytes()?)
}
