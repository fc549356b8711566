//! Operation contexts and correlation

use std::sync::Arc;

use ctx_deploy::{OperationDescription, LABEL_FAULT};
use ctx_props::PropertyMap;
use dashmap::mapref::entry::Entry;

use super::ConfigurationContext;
use crate::error::ContextError;
use crate::id::{NodeId, NodeKind};
use crate::node::{NodeBody, OperationBody};
use crate::snapshot::records::MessageSlotRef;

impl ConfigurationContext {
    /// Deployed service name of a service context
    ///
    /// # Errors
    /// Returns an error if `service` is missing or not a service context
    pub fn service_name(&self, service: NodeId) -> Result<String, ContextError> {
        self.with_service(service, |body| body.description.name.clone())
    }

    /// Deployed group name of a service context
    ///
    /// # Errors
    /// Returns an error if `service` is missing or not a service context
    pub fn service_group_name(&self, service: NodeId) -> Result<String, ContextError> {
        self.with_service(service, |body| body.description.group.clone())
    }

    /// Create an operation context for `operation` of a service context
    ///
    /// # Errors
    /// Returns [`ContextError::UnknownOperation`] if the service has no such
    /// operation
    pub fn create_operation_context(&self, service: NodeId, operation: &str) -> Result<NodeId, ContextError> {
        let description = self.with_service(service, |body| {
            body.description
                .operation(operation)
                .cloned()
                .ok_or_else(|| ContextError::UnknownOperation {
                    service: body.description.name.clone(),
                    operation: operation.to_string(),
                })
        })??;
        let entry = self.allocate(
            NodeBody::Operation(OperationBody::new(description)),
            Some(service),
            PropertyMap::new(),
            None,
        );
        let id = entry.id();
        let cache = self.config.cache_last_operation_context;
        self.with_service_mut(service, |body| {
            body.operations.push(id);
            if cache {
                body.last_operation = Some(id);
            }
        })?;
        tracing::debug!(node = %id, operation, service = %service, "operation context created");
        self.notify_created(id, NodeKind::Operation);
        Ok(id)
    }

    /// Operation contexts created through a service context
    ///
    /// # Errors
    /// Returns an error if `service` is missing or not a service context
    pub fn operation_contexts(&self, service: NodeId) -> Result<Vec<NodeId>, ContextError> {
        self.with_service(service, |body| body.operations.clone())
    }

    /// Most recently created operation context, when caching is enabled
    ///
    /// # Errors
    /// Returns an error if `service` is missing or not a service context
    pub fn last_operation_context(&self, service: NodeId) -> Result<Option<NodeId>, ContextError> {
        self.with_service(service, |body| body.last_operation)
    }

    pub(crate) fn promote_operation_context(
        &self,
        service: NodeId,
        body: OperationBody,
        properties: PropertyMap,
        log_id: String,
    ) -> Result<NodeId, ContextError> {
        let entry = self.allocate(NodeBody::Operation(body), Some(service), properties, Some(log_id));
        let id = entry.id();
        self.with_service_mut(service, |body| body.operations.push(id))?;
        self.notify_created(id, NodeKind::Operation);
        Ok(id)
    }

    /// Qualified operation name
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn operation_name(&self, operation: NodeId) -> Result<String, ContextError> {
        self.with_operation(operation, |body| body.description.name.to_string())
    }

    /// Deployed operation of an operation context
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn operation_description(&self, operation: NodeId) -> Result<Arc<OperationDescription>, ContextError> {
        self.with_operation(operation, |body| Arc::clone(&body.description))
    }

    /// Service context owning `operation`
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or detached
    pub fn operation_service(&self, operation: NodeId) -> Result<NodeId, ContextError> {
        self.node_of(operation, NodeKind::Operation)?
            .parent()
            .ok_or(ContextError::NodeNotFound(operation))
    }

    /// Whether every message of the exchange has arrived
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn is_complete(&self, operation: NodeId) -> Result<bool, ContextError> {
        self.with_operation(operation, |body| body.complete)
    }

    /// Add a message to an operation context in exchange order
    ///
    /// A message processing a fault goes to the fault label. Otherwise the
    /// first empty label of the exchange pattern is filled, and the
    /// operation completes once every label is. Returns the label used.
    ///
    /// # Errors
    /// Returns [`ContextError::OperationComplete`] if the operation is
    /// already complete
    pub fn add_message_context(&self, operation: NodeId, message: NodeId) -> Result<String, ContextError> {
        let faulting = self.with_message(message, |body| body.flags.processing_fault)?;
        let label = self
            .with_operation_mut(operation, |body| {
                if faulting {
                    body.messages.insert(LABEL_FAULT.to_string(), message);
                    return Ok(LABEL_FAULT.to_string());
                }
                if body.complete {
                    return Err(ContextError::OperationComplete(operation));
                }
                let free = body
                    .description
                    .mep
                    .labels()
                    .iter()
                    .find(|label| !body.messages.contains_key(**label))
                    .map(|label| (*label).to_string())
                    .ok_or(ContextError::OperationComplete(operation))?;
                body.messages.insert(free.clone(), message);
                if body.all_labels_filled() {
                    body.complete = true;
                }
                Ok(free)
            })??;
        self.link_message_to_operation(message, operation)?;
        self.touch(operation)?;
        Ok(label)
    }

    /// Put a message under an explicit label
    ///
    /// # Errors
    /// Returns [`ContextError::LabelTaken`] if another message holds `label`
    pub fn add_message_context_with_label(
        &self,
        operation: NodeId,
        label: &str,
        message: NodeId,
    ) -> Result<(), ContextError> {
        self.with_operation_mut(operation, |body| match body.messages.get(label) {
            Some(existing) if *existing != message => Err(ContextError::LabelTaken {
                operation,
                label: label.to_string(),
            }),
            _ => {
                body.messages.insert(label.to_string(), message);
                if body.all_labels_filled() {
                    body.complete = true;
                }
                Ok(())
            }
        })??;
        self.link_message_to_operation(message, operation)
    }

    pub(crate) fn link_message_to_operation(&self, message: NodeId, operation: NodeId) -> Result<(), ContextError> {
        let description = self.operation_description(operation)?;
        let service = self.operation_service(operation)?;
        let service_description = self.with_service(service, |body| Arc::clone(&body.description))?;
        let group = self.node_of(service, NodeKind::Service)?.parent();
        let group_description = match group {
            Some(group) => Some(self.with_service_group(group, |body| Arc::clone(&body.description))?),
            None => None,
        };
        self.with_message_mut(message, |body| {
            body.operation_context = Some(operation);
            body.service_context = Some(service);
            body.service_group_context = group;
            body.operation = Some(description);
            body.service = Some(service_description);
            if group_description.is_some() {
                body.service_group = group_description;
            }
        })
    }

    /// Message under `label`
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn message_context(&self, operation: NodeId, label: &str) -> Result<Option<NodeId>, ContextError> {
        self.with_operation(operation, |body| body.messages.get(label).copied())
    }

    /// Label -> message pairs in insertion order
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn message_contexts(&self, operation: NodeId) -> Result<Vec<(String, NodeId)>, ContextError> {
        self.with_operation(operation, |body| {
            body.messages
                .iter()
                .map(|(label, id)| (label.clone(), *id))
                .collect()
        })
    }

    /// Drop the message under `label`
    ///
    /// An operation that loses a message is no longer complete.
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn remove_message_context(&self, operation: NodeId, label: &str) -> Result<Option<NodeId>, ContextError> {
        let removed = self.with_operation_mut(operation, |body| {
            let removed = body.messages.shift_remove(label);
            if removed.is_some() {
                body.complete = false;
            }
            removed
        })?;
        self.touch(operation)?;
        Ok(removed)
    }

    /// Register `operation` under a correlation key
    ///
    /// Returns `false` without registering when `key` is empty, or when the
    /// key is taken and `override_existing` is off.
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn register_operation_context(
        &self,
        key: &str,
        operation: NodeId,
        override_existing: bool,
    ) -> Result<bool, ContextError> {
        self.node_of(operation, NodeKind::Operation)?;
        if key.is_empty() {
            return Ok(false);
        }

        let registered = match self.operations.entry(key.to_string()) {
            Entry::Occupied(mut taken) => {
                if *taken.get() == operation {
                    true
                } else if override_existing {
                    taken.insert(operation);
                    true
                } else {
                    tracing::warn!(key, existing = %taken.get(), rejected = %operation, "correlation key already registered");
                    false
                }
            }
            Entry::Vacant(free) => {
                free.insert(operation);
                true
            }
        };

        if registered {
            self.with_operation_mut(operation, |body| body.key = Some(key.to_string()))?;
        }
        Ok(registered)
    }

    /// Remove the registration under `key`
    #[must_use]
    pub fn unregister_operation_context(&self, key: &str) -> Option<NodeId> {
        let (_, operation) = self.operations.remove(key)?;
        if let Err(err) = self.with_operation_mut(operation, |body| body.key = None) {
            tracing::debug!(key, error = %err, "unregistered operation context already gone");
        }
        self.notify_removed(operation, NodeKind::Operation);
        Some(operation)
    }

    /// Operation context registered under `key`
    #[must_use]
    pub fn operation_context(&self, key: &str) -> Option<NodeId> {
        self.operations.get(key).map(|entry| *entry.value())
    }

    /// Whether any operation context is registered
    #[must_use]
    pub fn is_any_operation_context_registered(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Registered operation context matching operation, service and group names
    ///
    /// `operation` matches the local part of the operation name.
    #[must_use]
    pub fn find_operation_context(&self, operation: &str, service: &str, group: &str) -> Option<NodeId> {
        let candidates: Vec<NodeId> = self.operations.iter().map(|entry| *entry.value()).collect();
        candidates.into_iter().find(|candidate| {
            let Ok(op_name) = self.with_operation(*candidate, |body| body.description.name.local.clone()) else {
                return false;
            };
            if op_name != operation {
                return false;
            }
            let Ok(owner) = self.operation_service(*candidate) else {
                return false;
            };
            self.with_service(owner, |body| body.description.name == service && body.description.group == group)
                .unwrap_or(false)
        })
    }

    /// Unregister `operation` if it is still the one under its key
    ///
    /// # Errors
    /// Returns an error if `operation` is missing or not an operation context
    pub fn cleanup_operation_context(&self, operation: NodeId) -> Result<bool, ContextError> {
        let Some(key) = self.with_operation(operation, |body| body.key.clone())? else {
            return Ok(false);
        };
        let removed = self.operations.remove_if(&key, |_, registered| *registered == operation).is_some();
        if removed {
            self.with_operation_mut(operation, |body| body.key = None)?;
            self.notify_removed(operation, NodeKind::Operation);
        }
        Ok(removed)
    }

    /// Take a reconciled message back into its operation context
    ///
    /// A pending slot with the message's id places it under the slot's
    /// label. Failing that, a message already held with the same id is
    /// replaced in place. Returns whether the message was placed.
    ///
    /// # Errors
    /// Returns an error if either node is missing or of the wrong level
    pub fn restore_message_context(&self, operation: NodeId, message: NodeId) -> Result<bool, ContextError> {
        let Some(message_id) = self.with_message(message, |body| body.message_id().map(str::to_string))? else {
            return Ok(false);
        };
        let held: Vec<(String, NodeId)> = self.message_contexts(operation)?;
        let mut replaced = None;
        for (label, candidate) in held {
            if candidate == message {
                continue;
            }
            let same = self
                .with_message(candidate, |body| body.message_id() == Some(message_id.as_str()))
                .unwrap_or(false);
            if same {
                replaced = Some((label, candidate));
                break;
            }
        }

        let placement = self.with_operation_mut(operation, |body| {
            if let Some(position) = body.pending_slots.iter().position(|slot| slot.message_id == message_id) {
                let slot: MessageSlotRef = body.pending_slots.remove(position);
                body.messages.insert(slot.label, message);
                return Some(None);
            }
            if let Some((label, old)) = &replaced {
                body.messages.insert(label.clone(), message);
                return Some(Some(*old));
            }
            None
        })?;

        let Some(displaced) = placement else {
            return Ok(false);
        };
        if let Some(old) = displaced {
            self.discard_node(old);
        }
        self.link_message_to_operation(message, operation)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ctx_deploy::{DeploymentRegistry, Flow, Mep, OperationDescription, QualifiedName, ServiceDescription};

    use super::*;

    fn root() -> ConfigurationContext {
        let registry = DeploymentRegistry::builder()
            .service_group("g")
            .service(
                ServiceDescription::new("S", "g")
                    .with_operation(OperationDescription::new(QualifiedName::local("echo"), Mep::InOut))
                    .with_operation(OperationDescription::new(QualifiedName::local("notify"), Mep::InOnly)),
            )
            .build()
            .unwrap();
        ConfigurationContext::new(Arc::new(registry))
    }

    fn service(root: &ConfigurationContext) -> NodeId {
        let group = root.create_service_group_context("g").unwrap();
        root.service_context(group, "S").unwrap()
    }

    #[test]
    fn test_messages_fill_labels_in_order() {
        let root = root();
        let op = root.create_operation_context(service(&root), "echo").unwrap();
        let request = root.create_message_context(Flow::In);
        let response = root.create_message_context(Flow::Out);

        assert_eq!(root.add_message_context(op, request).unwrap(), "In");
        assert!(!root.is_complete(op).unwrap());
        assert_eq!(root.add_message_context(op, response).unwrap(), "Out");
        assert!(root.is_complete(op).unwrap());

        let extra = root.create_message_context(Flow::In);
        assert!(matches!(
            root.add_message_context(op, extra),
            Err(ContextError::OperationComplete(_))
        ));
    }

    #[test]
    fn test_removal_reopens_the_operation() {
        let root = root();
        let op = root.create_operation_context(service(&root), "echo").unwrap();
        let request = root.create_message_context(Flow::In);
        let response = root.create_message_context(Flow::Out);
        root.add_message_context(op, request).unwrap();
        root.add_message_context(op, response).unwrap();
        assert!(root.is_complete(op).unwrap());

        assert_eq!(root.remove_message_context(op, "Out").unwrap(), Some(response));
        assert!(!root.is_complete(op).unwrap());

        let replacement = root.create_message_context(Flow::Out);
        assert_eq!(root.add_message_context(op, replacement).unwrap(), "Out");
        assert!(root.is_complete(op).unwrap());
    }

    #[test]
    fn test_removing_an_empty_label_keeps_completion() {
        let root = root();
        let op = root.create_operation_context(service(&root), "notify").unwrap();
        let message = root.create_message_context(Flow::In);
        root.add_message_context(op, message).unwrap();

        assert_eq!(root.remove_message_context(op, "Out").unwrap(), None);
        assert!(root.is_complete(op).unwrap());
    }

    #[test]
    fn test_registration_respects_override() {
        let root = root();
        let svc = service(&root);
        let first = root.create_operation_context(svc, "echo").unwrap();
        let second = root.create_operation_context(svc, "echo").unwrap();

        assert!(root.register_operation_context("k", first, false).unwrap());
        assert!(!root.register_operation_context("k", second, false).unwrap());
        assert_eq!(root.operation_context("k"), Some(first));
        assert!(root.register_operation_context("k", second, true).unwrap());
        assert_eq!(root.operation_context("k"), Some(second));
        assert!(!root.register_operation_context("", first, true).unwrap());
    }

    #[test]
    fn test_find_by_names() {
        let root = root();
        let op = root.create_operation_context(service(&root), "echo").unwrap();
        root.register_operation_context("k", op, false).unwrap();

        assert_eq!(root.find_operation_context("echo", "S", "g"), Some(op));
        assert_eq!(root.find_operation_context("echo", "S", "other"), None);
    }

    #[test]
    fn test_cleanup_unregisters_only_own_key() {
        let root = root();
        let svc = service(&root);
        let first = root.create_operation_context(svc, "echo").unwrap();
        let second = root.create_operation_context(svc, "echo").unwrap();
        root.register_operation_context("k", first, false).unwrap();
        root.register_operation_context("k", second, true).unwrap();

        assert!(!root.cleanup_operation_context(first).unwrap());
        assert_eq!(root.operation_context("k"), Some(second));
        assert!(root.cleanup_operation_context(second).unwrap());
        assert!(!root.is_any_operation_context_registered());
    }
}
