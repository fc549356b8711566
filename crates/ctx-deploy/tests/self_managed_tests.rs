use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ctx_deploy::{
    collect_self_managed, restore_self_managed, ChainNode, Flow, Handler, HandlerError, HandlerKind,
    DeploymentRegistry, Phase, SelfManagedData, SelfManagedSlots,
};
use pretty_assertions::assert_eq;

#[derive(Debug)]
struct Counter {
    kind: HandlerKind,
    name: String,
    restored: AtomicUsize,
}

impl Counter {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: HandlerKind::new("counter"),
            name: name.to_string(),
            restored: AtomicUsize::new(0),
        })
    }
}

impl Handler for Counter {
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

impl SelfManagedData for Counter {
    fn serialize_self_managed(
        &self,
        _message_id: &str,
        slots: &SelfManagedSlots,
    ) -> Result<Option<Bytes>, HandlerError> {
        Ok(slots.get(&self.kind, &self.name).cloned())
    }

    fn deserialize_self_managed(
        &self,
        _message_id: &str,
        data: &[u8],
        slots: &mut SelfManagedSlots,
    ) -> Result<(), HandlerError> {
        slots.set(self.kind.clone(), self.name.clone(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn restore_transient(&self, _message_id: &str, _slots: &mut SelfManagedSlots) -> Result<(), HandlerError> {
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn chain_with(handlers: &[Arc<Counter>]) -> Vec<ChainNode> {
    let phase = handlers.iter().fold(Phase::new("Stateful"), |phase, h| {
        phase.with_handler(Arc::clone(h) as Arc<dyn Handler>)
    });
    vec![ChainNode::Phase(Arc::new(phase))]
}

#[test]
fn test_only_handlers_with_data_are_saved() {
    let busy = Counter::new("busy");
    let idle = Counter::new("idle");
    let chain = chain_with(&[Arc::clone(&busy), Arc::clone(&idle)]);

    let mut slots = SelfManagedSlots::new();
    slots.set(busy.kind.clone(), "busy", Bytes::from_static(b"7"));

    let entries = collect_self_managed(&chain, "urn:uuid:1", &slots).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "busy");
    assert_eq!(entries[0].data, Bytes::from_static(b"7"));
}

#[test]
fn test_restore_hands_data_back_and_rebuilds_transients() {
    let saved_by = Counter::new("busy");
    let mut slots = SelfManagedSlots::new();
    slots.set(saved_by.kind.clone(), "busy", Bytes::from_static(b"42"));
    let entries = collect_self_managed(&chain_with(&[saved_by]), "m", &slots).unwrap();

    let live = Counter::new("busy");
    let mut restored = SelfManagedSlots::new();
    restore_self_managed(&chain_with(&[Arc::clone(&live)]), "m", &entries, &mut restored).unwrap();

    assert_eq!(restored, slots);
    assert_eq!(live.restored.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_owner_is_unattributed() {
    let saved_by = Counter::new("gone");
    let mut slots = SelfManagedSlots::new();
    slots.set(saved_by.kind.clone(), "gone", Bytes::from_static(b"x"));
    let entries = collect_self_managed(&chain_with(&[saved_by]), "m", &slots).unwrap();

    let mut restored = SelfManagedSlots::new();
    let err = restore_self_managed(&chain_with(&[Counter::new("other")]), "m", &entries, &mut restored)
        .unwrap_err();
    assert!(err.is_unattributed());
    assert!(restored.is_empty());
}

#[test]
fn test_registry_flow_index_resolves_described_chain() {
    let handler = Counter::new("busy");
    let registry = DeploymentRegistry::builder()
        .phase(
            Flow::In,
            Phase::new("Stateful").with_handler(Arc::clone(&handler) as Arc<dyn Handler>),
        )
        .build()
        .unwrap();

    let live = registry.flow(Flow::In).phases();
    let descriptors = ctx_deploy::describe(live);
    let resolved = registry.flow(Flow::In).index().resolve(&descriptors);
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].same_instance(&live[0]));
    assert!(registry.flow(Flow::Out).index().resolve(&descriptors).is_empty());
}
