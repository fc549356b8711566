use std::hint::black_box;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use ctx_kernel::harness::{demo_registry, StampHandler};
use ctx_kernel::prelude::*;
use serde_json::json;

fn engine() -> ConfigurationContext {
    ConfigurationContext::new(Arc::new(demo_registry().expect("demo registry")))
}

fn saved_transfer(root: &ConfigurationContext, index: usize) -> NodeId {
    let account = root.registry().service("Account").cloned();
    let chain = root.registry().flow(Flow::In).phases().to_vec();
    let message = root.create_message_context(Flow::In);
    root.with_message_mut(message, |body| {
        body.service = account;
        body.options = Options::default().with_message_id(format!("urn:bench:{index}"));
        body.envelope = Some(Bytes::from_static(b"<env><body>transfer</body></env>"));
        body.execution_chain = chain;
        StampHandler::new("bench").stamp(&mut body.self_managed, "bench");
    })
    .expect("fill message");
    let service = root.fill_service_and_group_context(message).expect("route message");
    let operation = root.create_operation_context(service, "transfer").expect("operation");
    root.add_message_context(operation, message).expect("add message");
    for i in 0..16 {
        root.set_property(message, format!("key-{i}"), json!(i)).expect("property");
    }
    message
}

fn bench_write_message(c: &mut Criterion) {
    let root = engine();
    let message = saved_transfer(&root, 0);

    c.bench_function("snapshot/write_message", |b| {
        b.iter(|| {
            let bytes = write_message(&root, black_box(message)).expect("write");
            black_box(bytes.len());
        });
    });
}

fn bench_restore_message(c: &mut Criterion) {
    let source = engine();
    let bytes = write_message(&source, saved_transfer(&source, 0)).expect("write");
    let target = engine();

    c.bench_function("snapshot/restore_message", |b| {
        b.iter(|| {
            let node = restore_message(&target, black_box(bytes.clone())).expect("restore");
            black_box(node);
        });
    });
}

fn bench_decode_only(c: &mut Criterion) {
    let source = engine();
    let bytes = write_message(&source, saved_transfer(&source, 0)).expect("write");

    c.bench_function("snapshot/decode_message", |b| {
        b.iter(|| {
            let restored = RestoredMessage::read(black_box(bytes.clone())).expect("decode");
            black_box(restored.needs_reconcile());
        });
    });
}

criterion_group!(benches, bench_write_message, bench_restore_message, bench_decode_only);
criterion_main!(benches);
