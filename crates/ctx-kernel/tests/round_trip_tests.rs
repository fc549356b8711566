//! Save on one engine, restore on another

use bytes::{Bytes, BytesMut};
use ctx_kernel::prelude::*;
use ctx_kernel::snapshot::{
    capture_message, extract_copy, write_operation, write_service, write_service_group, ContextLink,
};
use ctx_kernel::{RestoredService, RestoredServiceGroup};
use ctx_test_utils::{exchange, message_for, test_root, CounterHandler, ECHO_SERVICE};
use pretty_assertions::assert_eq;
use serde_json::json;

struct Saved {
    source: ConfigurationContext,
    group: NodeId,
    exchange: ctx_test_utils::Exchange,
    reply: NodeId,
}

fn saved_ping() -> Saved {
    let source = test_root();
    let ex = exchange(&source, ECHO_SERVICE, "ping", "urn:msg:request");
    let group = source.parent(ex.service).unwrap().unwrap();

    source.set_property(group, "tenant", json!("acme")).unwrap();
    source.set_property(ex.service, "calls", json!(3)).unwrap();
    source.set_property(ex.operation, "attempt", json!(1)).unwrap();
    source.set_property(ex.message, "trace", json!({"span": "a1"})).unwrap();
    source
        .with_message_mut(ex.message, |body| {
            body.envelope = Some(Bytes::from_static(b"<request/>"));
            body.current_handler_index = 1;
            CounterHandler::set_count(&mut body.self_managed, 7);
        })
        .unwrap();

    let reply = message_for(&source, ECHO_SERVICE, "urn:msg:reply");
    source
        .with_message_mut(reply, |body| body.envelope = Some(Bytes::from_static(b"<reply/>")))
        .unwrap();
    source.add_message_context(ex.operation, reply).unwrap();

    Saved {
        source,
        group,
        exchange: ex,
        reply,
    }
}

#[test]
fn test_message_round_trip_rebuilds_the_tree() {
    let saved = saved_ping();
    let bytes = write_message(&saved.source, saved.exchange.message).unwrap();

    let target = test_root();
    let restored = restore_message(&target, bytes).unwrap();
    assert_eq!(target.kind(restored).unwrap(), NodeKind::Message);

    let operation = target
        .with_message(restored, |body| body.operation_context)
        .unwrap()
        .unwrap();
    assert_eq!(target.operation_description(operation).unwrap().name.local, "ping");
    assert!(target.is_complete(operation).unwrap());
    assert_eq!(target.message_context(operation, "In").unwrap(), Some(restored));

    let service = target.operation_service(operation).unwrap();
    assert_eq!(target.service_name(service).unwrap(), ECHO_SERVICE);
    let group = target.parent(service).unwrap().unwrap();
    assert_eq!(
        target.service_group_id(group).unwrap(),
        saved.source.service_group_id(saved.group).unwrap()
    );
    assert_eq!(target.parent(group).unwrap(), Some(NodeId::ROOT));

    let links = target
        .with_message(restored, |body| (body.service_context, body.service_group_context))
        .unwrap();
    assert_eq!(links, (Some(service), Some(group)));
}

#[test]
fn test_local_properties_survive_at_every_level() {
    let saved = saved_ping();
    let bytes = write_message(&saved.source, saved.exchange.message).unwrap();

    let target = test_root();
    let restored = restore_message(&target, bytes).unwrap();
    let operation = target.with_message(restored, |body| body.operation_context).unwrap().unwrap();
    let service = target.operation_service(operation).unwrap();
    let group = target.parent(service).unwrap().unwrap();

    assert_eq!(target.local_property(group, "tenant").unwrap(), Some(json!("acme")));
    assert_eq!(target.local_property(service, "calls").unwrap(), Some(json!(3)));
    assert_eq!(target.local_property(operation, "attempt").unwrap(), Some(json!(1)));
    assert_eq!(target.local_property(restored, "trace").unwrap(), Some(json!({"span": "a1"})));

    // inherited, not copied
    assert_eq!(target.local_property(restored, "tenant").unwrap(), None);
    assert_eq!(target.property(restored, "tenant").unwrap(), Some(json!("acme")));
}

#[test]
fn test_message_data_and_handler_state_survive() {
    let saved = saved_ping();
    let bytes = write_message(&saved.source, saved.exchange.message).unwrap();

    let target = test_root();
    let restored = restore_message(&target, bytes).unwrap();

    let (envelope, cursor, chain_len, message_id, count, rebuilt, transport) = target
        .with_message(restored, |body| {
            (
                body.envelope.clone(),
                body.current_handler_index,
                body.execution_chain.len(),
                body.message_id().map(str::to_string),
                CounterHandler::count(&body.self_managed),
                CounterHandler::rebuilt(&body.self_managed),
                body.transport_in.as_ref().map(|t| t.name.clone()),
            )
        })
        .unwrap();
    assert_eq!(envelope, Some(Bytes::from_static(b"<request/>")));
    assert_eq!(cursor, 1);
    assert_eq!(chain_len, 1);
    assert_eq!(message_id.as_deref(), Some("urn:msg:request"));
    assert_eq!(count, Some(7));
    assert!(rebuilt);
    assert_eq!(transport.as_deref(), Some("http"));

    let log_id = saved.source.node(saved.exchange.message).unwrap().log_id().to_string();
    assert_eq!(target.node(restored).unwrap().log_id(), log_id);
}

#[test]
fn test_sibling_messages_come_back_as_slim_copies() {
    let saved = saved_ping();
    let record = capture_message(&saved.source, saved.exchange.message).unwrap();
    let operation = record.operation_context.as_ref().unwrap();
    assert_eq!(operation.isolated.len(), 1);
    assert_eq!(operation.isolated[0].label, "In");
    assert_eq!(operation.messages.len(), 1);
    assert_eq!(operation.messages[0].label, "Out");
    assert!(operation.messages[0].record.envelope.is_none());
    assert!(operation.messages[0].record.self_managed.is_empty());

    let target = test_root();
    let restored = restore_message(&target, write_message(&saved.source, saved.exchange.message).unwrap()).unwrap();
    let op = target.with_message(restored, |body| body.operation_context).unwrap().unwrap();
    let reply = target.message_context(op, "Out").unwrap().unwrap();
    let (envelope, message_id, owner) = target
        .with_message(reply, |body| {
            (body.envelope.clone(), body.message_id().map(str::to_string), body.operation_context)
        })
        .unwrap();
    assert_eq!(envelope, None);
    assert_eq!(message_id.as_deref(), Some("urn:msg:reply"));
    assert_eq!(owner, Some(op));
}

#[test]
fn test_saving_leaves_the_live_tree_alone() {
    let saved = saved_ping();
    let before_nodes = saved.source.node_count();
    let before_messages = saved.source.message_contexts(saved.exchange.operation).unwrap();

    write_message(&saved.source, saved.exchange.message).unwrap();
    write_message(&saved.source, saved.reply).unwrap();
    write_operation(&saved.source, saved.exchange.operation).unwrap();

    assert_eq!(saved.source.node_count(), before_nodes);
    assert_eq!(saved.source.message_contexts(saved.exchange.operation).unwrap(), before_messages);
    let envelope = saved.source.with_message(saved.reply, |body| body.envelope.clone()).unwrap();
    assert_eq!(envelope, Some(Bytes::from_static(b"<reply/>")));
}

#[test]
fn test_message_without_id_gets_one_in_the_record_only() {
    let source = test_root();
    let ex = exchange(&source, ECHO_SERVICE, "ping", "urn:msg:unnamed");
    source.with_message_mut(ex.message, |body| body.options.message_id = None).unwrap();

    let record = capture_message(&source, ex.message).unwrap();
    let generated = record.message_id().unwrap().to_string();
    assert!(generated.starts_with("urn:uuid:"));
    let slots = &record.operation_context.as_ref().unwrap().isolated;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].message_id, generated);
    assert_eq!(source.with_message(ex.message, |body| body.options.message_id.clone()).unwrap(), None);

    let target = test_root();
    let restored = restore_message(&target, write_message(&source, ex.message).unwrap()).unwrap();
    let operation = target.with_message(restored, |body| body.operation_context).unwrap().unwrap();
    assert_eq!(target.message_context(operation, "In").unwrap(), Some(restored));
}

#[test]
fn test_reconcile_is_idempotent() {
    let saved = saved_ping();
    let bytes = write_message(&saved.source, saved.exchange.message).unwrap();
    let target = test_root();

    let mut restored = RestoredMessage::read(bytes).unwrap();
    assert!(restored.needs_reconcile());
    assert!(matches!(restored.node(), Err(SnapshotError::NotReconciled)));
    assert_eq!(restored.record().message_id(), Some("urn:msg:request"));

    let first = restored.reconcile(&target).unwrap();
    let nodes = target.node_count();
    let second = restored.reconcile(&target).unwrap();

    assert_eq!(first, second);
    assert_eq!(target.node_count(), nodes);
    assert!(!restored.needs_reconcile());
    assert_eq!(restored.node().unwrap(), first);
}

#[test]
fn test_damaged_records_are_fatal() {
    let saved = saved_ping();
    let bytes = write_message(&saved.source, saved.exchange.message).unwrap();
    let target = test_root();

    let mut flipped = BytesMut::from(&bytes[..]);
    flipped[0] ^= 0x5a;
    let err = restore_message(&target, flipped.freeze()).unwrap_err();
    assert!(err.is_fatal());

    let mut revision = BytesMut::from(&bytes[..]);
    revision[11] = revision[11].wrapping_add(1);
    let err = restore_message(&target, revision.freeze()).unwrap_err();
    assert!(err.is_fatal());

    let err = restore_message(&target, bytes.slice(..bytes.len() / 2)).unwrap_err();
    assert!(err.is_fatal());

    let service = write_service(&saved.source, saved.exchange.service).unwrap();
    let err = restore_message(&target, service).unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(target.node_count(), 1);
}

#[test]
fn test_group_and_service_records_restore_on_their_own() {
    let saved = saved_ping();
    let group_id = saved.source.service_group_id(saved.group).unwrap();

    let target = test_root();
    let mut group = RestoredServiceGroup::read(write_service_group(&saved.source, saved.group).unwrap()).unwrap();
    let group_node = group.reconcile(&target).unwrap();
    assert_eq!(target.service_group_context(&group_id), Some(group_node));
    assert_eq!(target.local_property(group_node, "tenant").unwrap(), Some(json!("acme")));

    let other = test_root();
    let mut service = RestoredService::read(write_service(&saved.source, saved.exchange.service).unwrap()).unwrap();
    let service_node = service.reconcile(&other).unwrap();
    assert_eq!(other.service_name(service_node).unwrap(), ECHO_SERVICE);
    let parent = other.parent(service_node).unwrap().unwrap();
    assert_eq!(other.service_group_id(parent).unwrap(), group_id);
    assert_eq!(other.find_service_context(parent, ECHO_SERVICE).unwrap(), Some(service_node));
}

#[test]
fn test_operation_record_carries_every_message() {
    let saved = saved_ping();
    let target = test_root();

    let mut restored = RestoredOperation::read(write_operation(&saved.source, saved.exchange.operation).unwrap()).unwrap();
    let operation = restored.reconcile(&target).unwrap();

    let labels: Vec<String> = target
        .message_contexts(operation)
        .unwrap()
        .into_iter()
        .map(|(label, _)| label)
        .collect();
    assert_eq!(labels, vec!["In".to_string(), "Out".to_string()]);
    assert!(target.is_complete(operation).unwrap());
    for (_, message) in target.message_contexts(operation).unwrap() {
        assert_eq!(target.with_message(message, |body| body.envelope.clone()).unwrap(), None);
    }
}

#[test]
fn test_extract_copy_drops_owners() {
    let saved = saved_ping();
    let copy = extract_copy(&saved.source, saved.exchange.message).unwrap();

    assert!(copy.operation_context.is_none());
    assert!(matches!(copy.service_context, ContextLink::Absent));
    assert!(matches!(copy.service_group_context, ContextLink::Absent));
    assert_eq!(copy.envelope, Some(Bytes::from_static(b"<request/>")));
    assert_eq!(copy.self_managed.len(), 1);
    assert_eq!(copy.properties.get("trace"), Some(&json!({"span": "a1"})));
}

#[test]
fn test_message_without_operation_embeds_its_service() {
    let source = test_root();
    let message = message_for(&source, ECHO_SERVICE, "urn:msg:lonely");
    source.fill_service_and_group_context(message).unwrap();

    let record = capture_message(&source, message).unwrap();
    assert!(record.operation_context.is_none());
    assert!(record.service_context.embedded().is_some());
    assert!(record.service_group_context.is_parent());

    let target = test_root();
    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let (service, group) = target
        .with_message(restored, |body| (body.service_context, body.service_group_context))
        .unwrap();
    let service = service.unwrap();
    assert_eq!(target.parent(service).unwrap(), group);
    assert_eq!(target.service_name(service).unwrap(), ECHO_SERVICE);
}
