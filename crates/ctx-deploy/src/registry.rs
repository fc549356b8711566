//! Deployment registry
//!
//! Provides [`DeploymentRegistry`], the read-only catalogue of deployed
//! groups, services, transports and per-flow handler chains, plus the
//! descriptor matching used when a snapshot is restored into it.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::chain::{ChainNode, Handler, HandlerIndex, Phase};
use crate::descriptor::MetaDescriptor;
use crate::error::RegistryError;
use crate::model::{
    Flow, MessageDescription, OperationDescription, ServiceDescription, ServiceGroupDescription,
    TransportDescription, LABEL_IN, LABEL_OUT,
};
use crate::qname::QualifiedName;

/// Phases of one flow plus their lookup index
#[derive(Debug, Default)]
pub struct FlowChain {
    phases: Vec<ChainNode>,
    index: HandlerIndex,
}

impl FlowChain {
    fn new(phases: Vec<ChainNode>) -> Self {
        let index = HandlerIndex::build(&phases);
        Self { phases, index }
    }

    /// Top-level chain nodes in execution order
    #[inline]
    #[must_use]
    pub fn phases(&self) -> &[ChainNode] {
        &self.phases
    }

    /// Index over every node of the flow
    #[inline]
    #[must_use]
    pub fn index(&self) -> &HandlerIndex {
        &self.index
    }
}

/// How a live service matched a recorded descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceMatch {
    None,
    Name,
    ServicePort,
}

/// Read-only deployment catalogue
#[derive(Debug)]
pub struct DeploymentRegistry {
    groups: IndexMap<String, Arc<ServiceGroupDescription>>,
    services: IndexMap<String, Arc<ServiceDescription>>,
    transports_in: IndexMap<String, Arc<TransportDescription>>,
    transports_out: IndexMap<String, Arc<TransportDescription>>,
    flows: [FlowChain; 4],
    /// Live service name -> name it was recorded under, learned by `find_service`
    externalized: DashMap<String, String>,
}

impl DeploymentRegistry {
    /// Start building a registry
    #[inline]
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Group by name
    #[must_use]
    pub fn service_group(&self, name: &str) -> Option<&Arc<ServiceGroupDescription>> {
        self.groups.get(name)
    }

    /// Service by name
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceDescription>> {
        self.services.get(name)
    }

    /// All services in deployment order
    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceDescription>> {
        self.services.values()
    }

    /// All groups in deployment order
    pub fn service_groups(&self) -> impl Iterator<Item = &Arc<ServiceGroupDescription>> {
        self.groups.values()
    }

    /// Inbound transport by name
    #[must_use]
    pub fn transport_in(&self, name: &str) -> Option<&Arc<TransportDescription>> {
        self.transports_in.get(name)
    }

    /// Outbound transport by name
    #[must_use]
    pub fn transport_out(&self, name: &str) -> Option<&Arc<TransportDescription>> {
        self.transports_out.get(name)
    }

    /// Chain of `flow`
    #[must_use]
    pub fn flow(&self, flow: Flow) -> &FlowChain {
        &self.flows[usize::from(flow.code())]
    }

    fn check_service(service: &ServiceDescription, wanted: &MetaDescriptor) -> ServiceMatch {
        if service.kind != wanted.kind {
            return ServiceMatch::None;
        }
        let live_extra = service.extra_name();
        match (&wanted.extra, &live_extra) {
            (Some(recorded), Some(live)) if recorded == live => {
                if service.name == wanted.name {
                    ServiceMatch::Name
                } else {
                    ServiceMatch::ServicePort
                }
            }
            (Some(_), Some(_)) => ServiceMatch::None,
            _ if service.name == wanted.name => ServiceMatch::Name,
            _ => ServiceMatch::None,
        }
    }

    /// Find the live service for a recorded descriptor
    ///
    /// A service whose name matches wins outright. Otherwise the first
    /// service with the same endpoint name and port is used, so a renamed
    /// service on the same endpoint still resolves.
    pub fn find_service(&self, wanted: &MetaDescriptor) -> Option<Arc<ServiceDescription>> {
        let mut found: Option<&Arc<ServiceDescription>> = None;
        for service in self.services.values() {
            match Self::check_service(service, wanted) {
                ServiceMatch::Name => {
                    found = Some(service);
                    break;
                }
                ServiceMatch::ServicePort => {
                    if found.is_none() {
                        found = Some(service);
                    }
                }
                ServiceMatch::None => {}
            }
        }

        let service = found?;
        self.externalized
            .insert(service.name.clone(), wanted.name.clone());
        tracing::debug!(recorded = %wanted, live = %service.name, "resolved service");
        Some(Arc::clone(service))
    }

    /// Find the live group for a recorded descriptor
    ///
    /// Matches on kind and name, or on a member service previously resolved
    /// from a descriptor carrying that name.
    pub fn find_service_group(&self, wanted: &MetaDescriptor) -> Option<Arc<ServiceGroupDescription>> {
        self.groups
            .values()
            .filter(|group| group.kind == wanted.kind)
            .find(|group| {
                group.name == wanted.name
                    || group.services.iter().any(|member| {
                        self.externalized
                            .get(member)
                            .is_some_and(|recorded| *recorded == wanted.name)
                    })
            })
            .cloned()
    }

    /// Find an operation of `service` for a recorded descriptor
    ///
    /// A recorded name without a namespace matches on the local part.
    #[must_use]
    pub fn find_operation_in(
        service: &ServiceDescription,
        wanted: &MetaDescriptor,
    ) -> Option<Arc<OperationDescription>> {
        let recorded = QualifiedName::parse(&wanted.name);
        service
            .operations
            .iter()
            .find(|op| op.kind == wanted.kind && op.name.matches_recorded(&recorded))
            .cloned()
    }

    /// Find an operation in any service for a recorded descriptor
    #[must_use]
    pub fn find_operation(&self, wanted: &MetaDescriptor) -> Option<Arc<OperationDescription>> {
        let recorded = QualifiedName::parse(&wanted.name);
        self.services
            .values()
            .flat_map(|service| service.operations.iter())
            .find(|op| op.kind == wanted.kind && op.name == recorded)
            .cloned()
    }

    /// Find a message slot of `operation` for a recorded descriptor
    ///
    /// The outbound slot is checked before the inbound one.
    #[must_use]
    pub fn find_message(
        operation: &OperationDescription,
        wanted: &MetaDescriptor,
    ) -> Option<Arc<MessageDescription>> {
        [LABEL_OUT, LABEL_IN]
            .into_iter()
            .filter_map(|label| operation.message(label))
            .find(|message| message.name == wanted.name && message.element_name == wanted.extra)
            .cloned()
    }
}

/// Builder for [`DeploymentRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    groups: Vec<ServiceGroupDescription>,
    services: Vec<ServiceDescription>,
    transports_in: Vec<String>,
    transports_out: Vec<String>,
    flows: [Vec<ChainNode>; 4],
}

impl RegistryBuilder {
    /// Declare a service group
    #[must_use]
    pub fn service_group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(ServiceGroupDescription::new(name));
        self
    }

    /// Declare a service group with a custom kind
    #[must_use]
    pub fn service_group_of_kind(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut group = ServiceGroupDescription::new(name);
        group.kind = kind.into();
        self.groups.push(group);
        self
    }

    /// Deploy a service into its declared group
    #[must_use]
    pub fn service(mut self, service: ServiceDescription) -> Self {
        self.services.push(service);
        self
    }

    /// Register an inbound transport
    #[must_use]
    pub fn transport_in(mut self, name: impl Into<String>) -> Self {
        self.transports_in.push(name.into());
        self
    }

    /// Register an outbound transport
    #[must_use]
    pub fn transport_out(mut self, name: impl Into<String>) -> Self {
        self.transports_out.push(name.into());
        self
    }

    /// Append a phase to `flow`
    #[must_use]
    pub fn phase(mut self, flow: Flow, phase: Phase) -> Self {
        self.flows[usize::from(flow.code())].push(ChainNode::Phase(Arc::new(phase)));
        self
    }

    /// Append a bare handler to `flow`
    #[must_use]
    pub fn handler(mut self, flow: Flow, handler: Arc<dyn Handler>) -> Self {
        self.flows[usize::from(flow.code())].push(ChainNode::Handler(handler));
        self
    }

    /// Validate and freeze the registry
    ///
    /// # Errors
    /// Returns an error for duplicate names or services in undeclared groups
    pub fn build(self) -> Result<DeploymentRegistry, RegistryError> {
        let mut groups: IndexMap<String, ServiceGroupDescription> = IndexMap::new();
        for group in self.groups {
            if groups.contains_key(&group.name) {
                return Err(RegistryError::DuplicateServiceGroup(group.name));
            }
            groups.insert(group.name.clone(), group);
        }

        let mut services = IndexMap::new();
        for service in self.services {
            if services.contains_key(&service.name) {
                return Err(RegistryError::DuplicateService(service.name));
            }
            let Some(group) = groups.get_mut(&service.group) else {
                return Err(RegistryError::UnknownServiceGroup {
                    service: service.name,
                    group: service.group,
                });
            };
            group.services.push(service.name.clone());
            services.insert(service.name.clone(), Arc::new(service));
        }

        let transports = |names: Vec<String>| {
            names
                .into_iter()
                .map(|name| (name.clone(), Arc::new(TransportDescription::new(name))))
                .collect::<IndexMap<_, _>>()
        };

        Ok(DeploymentRegistry {
            groups: groups
                .into_iter()
                .map(|(name, group)| (name, Arc::new(group)))
                .collect(),
            services,
            transports_in: transports(self.transports_in),
            transports_out: transports(self.transports_out),
            flows: self.flows.map(FlowChain::new),
            externalized: DashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mep, SERVICE_KIND};

    fn registry() -> DeploymentRegistry {
        DeploymentRegistry::builder()
            .service_group("billing")
            .service(
                ServiceDescription::new("Invoices", "billing")
                    .with_endpoint(QualifiedName::new("urn:billing", "InvoiceService"), "SoapPort")
                    .with_operation(OperationDescription::new(
                        QualifiedName::new("urn:billing", "submit"),
                        Mep::InOut,
                    )),
            )
            .service(ServiceDescription::new("Ledger", "billing"))
            .transport_in("http")
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_group_rejected() {
        let err = DeploymentRegistry::builder()
            .service(ServiceDescription::new("Orphan", "nowhere"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownServiceGroup {
                service: "Orphan".into(),
                group: "nowhere".into()
            }
        );
    }

    #[test]
    fn test_find_service_by_name() {
        let registry = registry();
        let found = registry
            .find_service(&MetaDescriptor::new(SERVICE_KIND, "Ledger"))
            .unwrap();
        assert_eq!(found.name, "Ledger");
    }

    #[test]
    fn test_find_renamed_service_by_endpoint() {
        let registry = registry();
        let recorded = MetaDescriptor::new(SERVICE_KIND, "InvoicesV1")
            .with_extra(Some("{urn:billing}InvoiceService SoapPort".into()));
        let found = registry.find_service(&recorded).unwrap();
        assert_eq!(found.name, "Invoices");

        let group = registry
            .find_service_group(&MetaDescriptor::new("service-group", "InvoicesV1"))
            .unwrap();
        assert_eq!(group.name, "billing");
    }

    #[test]
    fn test_mismatched_endpoint_does_not_match() {
        let registry = registry();
        let recorded = MetaDescriptor::new(SERVICE_KIND, "Invoices")
            .with_extra(Some("{urn:billing}InvoiceService OtherPort".into()));
        assert!(registry.find_service(&recorded).is_none());
    }

    #[test]
    fn test_find_operation_ignores_missing_namespace() {
        let registry = registry();
        let service = registry.service("Invoices").unwrap();
        let bare = MetaDescriptor::new("operation", "submit");
        assert!(DeploymentRegistry::find_operation_in(service, &bare).is_some());
        assert!(registry.find_operation(&bare).is_none());

        let qualified = MetaDescriptor::new("operation", "{urn:billing}submit");
        assert!(registry.find_operation(&qualified).is_some());
    }

    #[test]
    fn test_find_message_prefers_out() {
        let op = OperationDescription::new(QualifiedName::local("echo"), Mep::InOut);
        let out = op.message(LABEL_OUT).unwrap().descriptor();
        let found = DeploymentRegistry::find_message(&op, &out).unwrap();
        assert_eq!(found.label, LABEL_OUT);
    }

    #[test]
    fn test_transports_by_name() {
        let registry = registry();
        assert!(registry.transport_in("http").is_some());
        assert!(registry.transport_out("http").is_none());
    }
}
