//! Handler data saved with a message

use std::sync::Arc;

use ctx_deploy::Phase;
use ctx_kernel::prelude::*;
use ctx_test_utils::{exchange, registry_with_phase, test_root, CounterHandler, PlainHandler, ECHO_SERVICE};

fn counted_message(count: Option<u32>) -> (ConfigurationContext, NodeId) {
    let source = test_root();
    let ex = exchange(&source, ECHO_SERVICE, "ping", "urn:msg:counted");
    if let Some(count) = count {
        source
            .with_message_mut(ex.message, |body| CounterHandler::set_count(&mut body.self_managed, count))
            .unwrap();
    }
    (source, ex.message)
}

fn root_with_dispatch(phase: Phase) -> ConfigurationContext {
    ConfigurationContext::new(Arc::new(registry_with_phase(phase)))
}

#[test]
fn test_missing_owner_fails_only_that_message() {
    let (source, message) = counted_message(Some(3));
    let bytes = write_message(&source, message).unwrap();
    let target = root_with_dispatch(
        Phase::new("Dispatch").with_handler(Arc::new(PlainHandler::new("addressing", "AddressingIn"))),
    );

    let mut restored = RestoredMessage::read(bytes).unwrap();
    let err = restored.reconcile(&target).unwrap_err();

    match &err {
        SnapshotError::Attribution { message_id, kind, name } => {
            assert_eq!(message_id, "urn:msg:counted");
            assert_eq!(kind.as_str(), CounterHandler::KIND);
            assert_eq!(name, "Counter");
        }
        other => panic!("expected attribution error, got {other:?}"),
    }
    assert!(err.is_message_scoped());
    assert!(!err.is_fatal());

    // nothing was promoted and the blob is still there
    assert_eq!(target.node_count(), 1);
    assert!(restored.needs_reconcile());
    assert_eq!(restored.record().self_managed.len(), 1);
}

#[test]
fn test_renamed_handler_is_not_an_owner() {
    let (source, message) = counted_message(Some(3));
    let target = root_with_dispatch(Phase::new("Dispatch").with_handler(Arc::new(CounterHandler::new("Tally"))));

    let err = restore_message(&target, write_message(&source, message).unwrap()).unwrap_err();
    assert!(matches!(err, SnapshotError::Attribution { .. }));
}

#[test]
fn test_owner_rejecting_its_blob_is_a_handler_error() {
    let (source, message) = counted_message(Some(3));
    let target = root_with_dispatch(Phase::new("Dispatch").with_handler(Arc::new(CounterHandler::failing("Counter"))));

    let err = restore_message(&target, write_message(&source, message).unwrap()).unwrap_err();
    assert!(matches!(err, SnapshotError::Handler { .. }));
    assert!(err.is_message_scoped());
    assert_eq!(target.node_count(), 1);
}

#[test]
fn test_owner_found_inside_nested_phase() {
    let (source, message) = counted_message(Some(9));
    let nested = Phase::new("Dispatch").with_phase(Phase::new("Security").with_handler(Arc::new(CounterHandler::new("Counter"))));
    let target = root_with_dispatch(nested);

    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let (count, rebuilt) = target
        .with_message(restored, |body| {
            (CounterHandler::count(&body.self_managed), CounterHandler::rebuilt(&body.self_managed))
        })
        .unwrap();
    assert_eq!(count, Some(9));
    assert!(rebuilt);
}

#[test]
fn test_handlers_without_data_save_nothing() {
    let (source, message) = counted_message(None);
    let record = ctx_kernel::snapshot::capture_message(&source, message).unwrap();
    assert!(record.self_managed.is_empty());

    let target = test_root();
    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let rebuilt = target
        .with_message(restored, |body| CounterHandler::rebuilt(&body.self_managed))
        .unwrap();
    assert!(!rebuilt);
}
