//! Correlation keys: registration, races and re-registration on restore

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use ctx_kernel::prelude::*;
use ctx_test_utils::{exchange, message_for, test_root, ECHO_SERVICE, SHARED_SERVICE};
use pretty_assertions::assert_eq;

#[test]
fn test_second_registration_needs_override() {
    let root = test_root();
    let first = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    let second = exchange(&root, ECHO_SERVICE, "ask", "urn:b");

    assert!(root.register_operation_context("key", first.operation, false).unwrap());
    assert!(!root.register_operation_context("key", second.operation, false).unwrap());
    assert_eq!(root.operation_context("key"), Some(first.operation));

    assert!(root.register_operation_context("key", second.operation, true).unwrap());
    assert_eq!(root.operation_context("key"), Some(second.operation));

    // same operation again is not a conflict
    assert!(root.register_operation_context("key", second.operation, false).unwrap());
}

#[test]
fn test_empty_key_is_never_registered() {
    let root = test_root();
    let ex = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    assert!(!root.register_operation_context("", ex.operation, true).unwrap());
    assert!(!root.is_any_operation_context_registered());
}

#[test]
fn test_registering_a_non_operation_fails() {
    let root = test_root();
    let ex = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    let err = root.register_operation_context("key", ex.message, false).unwrap_err();
    assert!(matches!(err, ContextError::KindMismatch { .. }));
}

#[test]
fn test_concurrent_registration_has_one_winner() {
    let root = test_root();
    let operations: Vec<NodeId> = (0..8)
        .map(|i| exchange(&root, ECHO_SERVICE, "ask", &format!("urn:race:{i}")).operation)
        .collect();
    let winners = AtomicUsize::new(0);

    thread::scope(|scope| {
        for operation in &operations {
            let root = &root;
            let winners = &winners;
            scope.spawn(move || {
                if root.register_operation_context("contested", *operation, false).unwrap() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    let registered = root.operation_context("contested").unwrap();
    assert!(operations.contains(&registered));
    let keyed: Vec<NodeId> = operations
        .iter()
        .copied()
        .filter(|op| root.with_operation(*op, |body| body.key.is_some()).unwrap())
        .collect();
    assert_eq!(keyed, vec![registered]);
}

#[test]
fn test_cleanup_only_removes_own_registration() {
    let root = test_root();
    let first = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    let second = exchange(&root, ECHO_SERVICE, "ask", "urn:b");

    root.register_operation_context("key", first.operation, false).unwrap();
    root.register_operation_context("key", second.operation, true).unwrap();

    // first still remembers the key but no longer owns it
    assert!(!root.cleanup_operation_context(first.operation).unwrap());
    assert_eq!(root.operation_context("key"), Some(second.operation));

    assert!(root.cleanup_operation_context(second.operation).unwrap());
    assert_eq!(root.operation_context("key"), None);
}

#[test]
fn test_unregister_returns_the_operation() {
    let root = test_root();
    let ex = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    root.register_operation_context("key", ex.operation, false).unwrap();

    assert_eq!(root.unregister_operation_context("key"), Some(ex.operation));
    assert_eq!(root.unregister_operation_context("key"), None);
    assert!(root.with_operation(ex.operation, |body| body.key.is_none()).unwrap());
}

#[test]
fn test_find_operation_context_by_names() {
    let root = test_root();
    let ex = exchange(&root, ECHO_SERVICE, "ask", "urn:a");
    root.register_operation_context("key", ex.operation, false).unwrap();

    assert_eq!(root.find_operation_context("ask", ECHO_SERVICE, "echo"), Some(ex.operation));
    assert_eq!(root.find_operation_context("ping", ECHO_SERVICE, "echo"), None);
    assert_eq!(root.find_operation_context("ask", ECHO_SERVICE, "other"), None);
}

fn saved_and_registered(operation: &str, key: &str) -> (ConfigurationContext, NodeId) {
    let source = test_root();
    let ex = exchange(&source, ECHO_SERVICE, operation, key);
    source.register_operation_context(key, ex.operation, false).unwrap();
    (source, ex.message)
}

fn restored_operation(target: &ConfigurationContext, restored: NodeId) -> NodeId {
    target.with_message(restored, |body| body.operation_context).unwrap().unwrap()
}

#[test]
fn test_out_only_operation_is_registered_again() {
    let (source, message) = saved_and_registered("fire", "urn:fire");
    let target = test_root();

    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let operation = restored_operation(&target, restored);
    assert!(target.is_complete(operation).unwrap());
    assert_eq!(target.operation_context("urn:fire"), Some(operation));
}

#[test]
fn test_waiting_out_in_operation_is_registered_again() {
    let (source, message) = saved_and_registered("ask", "urn:ask");
    let target = test_root();

    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let operation = restored_operation(&target, restored);
    assert!(!target.is_complete(operation).unwrap());
    assert_eq!(target.operation_context("urn:ask"), Some(operation));
}

#[test]
fn test_in_out_operation_is_not_registered_again() {
    let (source, message) = saved_and_registered("ping", "urn:ping");
    let target = test_root();

    restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    assert_eq!(target.operation_context("urn:ping"), None);
}

#[test]
fn test_restore_overrides_a_stale_registration() {
    let (source, message) = saved_and_registered("fire", "urn:fire");
    let target = test_root();
    let stale = exchange(&target, ECHO_SERVICE, "fire", "urn:other");
    target.register_operation_context("urn:fire", stale.operation, false).unwrap();

    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let operation = restored_operation(&target, restored);
    assert_ne!(operation, stale.operation);
    assert_eq!(target.operation_context("urn:fire"), Some(operation));
}

#[test]
fn test_waiting_robust_out_only_operation_is_not_registered_again() {
    let source = test_root();
    let message = message_for(&source, ECHO_SERVICE, "urn:alert");
    source
        .with_message_mut(message, |body| body.flags.processing_fault = true)
        .unwrap();
    let service = source.fill_service_and_group_context(message).unwrap();
    let operation = source.create_operation_context(service, "alert").unwrap();
    assert_eq!(source.add_message_context(operation, message).unwrap(), "Fault");
    assert!(!source.is_complete(operation).unwrap());
    source.register_operation_context("urn:alert", operation, false).unwrap();

    let target = test_root();
    let restored = restore_message(&target, write_message(&source, message).unwrap()).unwrap();
    let operation = restored_operation(&target, restored);
    assert!(!target.is_complete(operation).unwrap());
    assert_eq!(target.operation_context("urn:alert"), None);
}

#[test]
fn test_in_only_operation_is_not_registered_again() {
    let source = test_root();
    let ex = exchange(&source, SHARED_SERVICE, "log", "urn:log");
    source.register_operation_context("urn:log", ex.operation, false).unwrap();

    let target = test_root();
    restore_message(&target, write_message(&source, ex.message).unwrap()).unwrap();
    assert_eq!(target.operation_context("urn:log"), None);
    assert!(!target.is_any_operation_context_registered());
}
