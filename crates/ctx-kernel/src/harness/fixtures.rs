//! Demo deployment used by the simulator and benchmarks

use std::sync::Arc;

use bytes::Bytes;
use ctx_deploy::{
    DeploymentRegistry, Flow, Handler, HandlerError, HandlerKind, Mep, MessageDescription, OperationDescription,
    Phase, QualifiedName, RegistryError, Scope, SelfManagedData, SelfManagedSlots, ServiceDescription,
};

/// Deployed group of the demo
pub const DEMO_GROUP: &str = "bank";
/// Session-scoped demo service
pub const ACCOUNT_SERVICE: &str = "Account";
/// Application-scoped demo service
pub const AUDIT_SERVICE: &str = "Audit";
/// Namespace of the demo operations
pub const DEMO_NAMESPACE: &str = "urn:demo:bank";
/// Transport in both directions
pub const DEMO_TRANSPORT: &str = "http";

const STAMP_SLOT: &str = "stamp";
const TRANSIENT_SLOT: &str = "stamp.checked";

/// Handler that keeps a per-message stamp as self-managed data
#[derive(Debug)]
pub struct StampHandler {
    kind: HandlerKind,
    name: String,
}

impl StampHandler {
    /// Kind shared by every stamp handler
    pub const KIND: &'static str = "stamp";

    /// Stamp handler called `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: HandlerKind::new(Self::KIND),
            name: name.into(),
        }
    }

    /// Record `stamp` for the message owning `slots`
    pub fn stamp(&self, slots: &mut SelfManagedSlots, stamp: &str) {
        slots.set(self.kind.clone(), STAMP_SLOT, Bytes::copy_from_slice(stamp.as_bytes()));
    }

    /// Stamp previously recorded in `slots`
    #[must_use]
    pub fn stamp_of(slots: &SelfManagedSlots) -> Option<String> {
        let kind = HandlerKind::new(Self::KIND);
        slots
            .get(&kind, STAMP_SLOT)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Whether transient state was rebuilt after a restore
    #[must_use]
    pub fn transient_restored(slots: &SelfManagedSlots) -> bool {
        slots.get(&HandlerKind::new(Self::KIND), TRANSIENT_SLOT).is_some()
    }
}

impl Handler for StampHandler {
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

impl SelfManagedData for StampHandler {
    fn serialize_self_managed(&self, _message_id: &str, slots: &SelfManagedSlots) -> Result<Option<Bytes>, HandlerError> {
        Ok(slots.get(&self.kind, STAMP_SLOT).cloned())
    }

    fn deserialize_self_managed(
        &self,
        _message_id: &str,
        data: &[u8],
        slots: &mut SelfManagedSlots,
    ) -> Result<(), HandlerError> {
        if data.is_empty() {
            return Err(HandlerError::failed(&self.name, "empty stamp"));
        }
        slots.set(self.kind.clone(), STAMP_SLOT, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn restore_transient(&self, _message_id: &str, slots: &mut SelfManagedSlots) -> Result<(), HandlerError> {
        slots.set(self.kind.clone(), TRANSIENT_SLOT, Bytes::from_static(b"1"));
        Ok(())
    }
}

/// Handler without per-message state
#[derive(Debug)]
pub struct PassThroughHandler {
    kind: HandlerKind,
    name: String,
}

impl PassThroughHandler {
    /// Handler of `kind` called `name`
    #[must_use]
    pub fn new(kind: &str, name: impl Into<String>) -> Self {
        Self {
            kind: HandlerKind::new(kind),
            name: name.into(),
        }
    }
}

impl Handler for PassThroughHandler {
    fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn operation(local: &str, mep: Mep) -> OperationDescription {
    OperationDescription::new(QualifiedName::new(DEMO_NAMESPACE, local), mep)
}

/// Build the demo deployment
///
/// Each call creates fresh handler instances, as a second engine would.
///
/// # Errors
/// Returns an error only if the demo metadata is inconsistent
pub fn demo_registry() -> Result<DeploymentRegistry, RegistryError> {
    let account = ServiceDescription::new(ACCOUNT_SERVICE, DEMO_GROUP)
        .with_scope(Scope::SoapSession)
        .with_endpoint(QualifiedName::new(DEMO_NAMESPACE, "AccountService"), "AccountPort")
        .with_operation(
            operation("transfer", Mep::InOut)
                .with_message(MessageDescription::new("In", "transferRequest").with_element("TransferRequest"))
                .with_message(MessageDescription::new("Out", "transferResponse").with_element("TransferResponse")),
        )
        .with_operation(operation("notify", Mep::OutOnly))
        .with_operation(operation("query", Mep::OutIn));
    let audit = ServiceDescription::new(AUDIT_SERVICE, DEMO_GROUP)
        .with_scope(Scope::Application)
        .with_operation(operation("record", Mep::InOnly));

    let inbound = Phase::new("Dispatch")
        .with_handler(Arc::new(PassThroughHandler::new("addressing", "AddressingIn")))
        .with_handler(Arc::new(StampHandler::new("StampIn")));
    let outbound = Phase::new("MessageOut")
        .with_handler(Arc::new(PassThroughHandler::new("addressing", "AddressingOut")))
        .with_handler(Arc::new(StampHandler::new("StampOut")));

    DeploymentRegistry::builder()
        .service_group(DEMO_GROUP)
        .service(account)
        .service(audit)
        .transport_in(DEMO_TRANSPORT)
        .transport_out(DEMO_TRANSPORT)
        .phase(Flow::In, inbound)
        .phase(Flow::Out, outbound)
        .build()
}
