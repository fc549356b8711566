//! Message contexts and scope routing

use std::sync::Arc;

use ctx_deploy::{Flow, Scope};
use ctx_props::PropertyMap;
use uuid::Uuid;

use super::ConfigurationContext;
use crate::error::ContextError;
use crate::id::{NodeId, NodeKind};
use crate::node::{MessageBody, NodeBody};

impl ConfigurationContext {
    /// Create a detached message context on `flow`
    #[must_use]
    pub fn create_message_context(&self, flow: Flow) -> NodeId {
        let entry = self.allocate(
            NodeBody::Message(Box::new(MessageBody::new(flow))),
            None,
            PropertyMap::new(),
            None,
        );
        self.notify_created(entry.id(), NodeKind::Message);
        entry.id()
    }

    pub(crate) fn promote_message_context(&self, body: MessageBody, properties: PropertyMap, log_id: String) -> NodeId {
        let entry = self.allocate(NodeBody::Message(Box::new(body)), None, properties, Some(log_id));
        self.notify_created(entry.id(), NodeKind::Message);
        entry.id()
    }

    /// Message id of `message`, assigning a `urn:uuid:` one if absent
    ///
    /// # Errors
    /// Returns an error if `message` is missing or not a message context
    pub fn ensure_message_id(&self, message: NodeId) -> Result<String, ContextError> {
        self.with_message_mut(message, |body| {
            body.options
                .message_id
                .get_or_insert_with(|| format!("urn:uuid:{}", Uuid::new_v4()))
                .clone()
        })
    }

    /// Link `message` to an operation context, its service and its group
    ///
    /// The message is not added to the operation's message map.
    ///
    /// # Errors
    /// Returns an error if either node is missing or of the wrong level
    pub fn set_operation_context(&self, message: NodeId, operation: NodeId) -> Result<(), ContextError> {
        self.link_message_to_operation(message, operation)
    }

    /// Link `message` to a service context and its group
    ///
    /// # Errors
    /// Returns an error if either node is missing or of the wrong level
    pub fn set_service_context(&self, message: NodeId, service: NodeId) -> Result<(), ContextError> {
        let description = self.with_service(service, |body| Arc::clone(&body.description))?;
        let group = self.node_of(service, NodeKind::Service)?.parent();
        let group_description = match group {
            Some(group) => Some(self.with_service_group(group, |body| Arc::clone(&body.description))?),
            None => None,
        };
        self.with_message_mut(message, |body| {
            body.service_context = Some(service);
            body.service = Some(description);
            if group.is_some() {
                body.service_group_context = group;
                body.service_group = group_description;
            }
        })
    }

    /// Link `message` to a service group context
    ///
    /// # Errors
    /// Returns an error if either node is missing or of the wrong level
    pub fn set_service_group_context(&self, message: NodeId, group: NodeId) -> Result<(), ContextError> {
        let (id, description) = self.with_service_group(group, |body| (body.id.clone(), Arc::clone(&body.description)))?;
        self.with_message_mut(message, |body| {
            body.service_group_context = Some(group);
            body.service_group_context_id = Some(id);
            body.service_group = Some(description);
        })
    }

    /// Resolve the service and group contexts of `message` from its service
    ///
    /// Contexts already linked are kept. Otherwise the group context is
    /// chosen by the service's scope:
    /// - application: the engine-wide group context, created on first use
    /// - session: the context under the message's group context id, or a
    ///   new one registered under a fresh id
    /// - request: a new group context
    ///
    /// # Errors
    /// Returns [`ContextError::NoServiceForMessage`] if the message names no
    /// service, or [`ContextError::UnknownServiceGroupContext`] if a session
    /// id is given but not registered
    pub fn fill_service_and_group_context(&self, message: NodeId) -> Result<NodeId, ContextError> {
        let (linked, service, session_id) = self.with_message(message, |body| {
            (body.service_context, body.service.clone(), body.service_group_context_id.clone())
        })?;
        if let Some(existing) = linked {
            self.set_service_context(message, existing)?;
            return Ok(existing);
        }
        let service = service.ok_or(ContextError::NoServiceForMessage(message))?;

        let group = match service.scope {
            Scope::Application => match self.application_service_group_context(&service.group) {
                Some(group) => group,
                None => {
                    let created = self.create_service_group_context(&service.group)?;
                    self.add_service_group_to_application_scope(created)?;
                    self.application_service_group_context(&service.group).unwrap_or(created)
                }
            },
            Scope::SoapSession => {
                self.cleanup_service_group_contexts();
                match session_id {
                    Some(id) => self.service_group_context_from_soap_session(&id)?,
                    None => {
                        let created = self.create_service_group_context(&service.group)?;
                        let id = self.service_group_id(created)?;
                        let winner = self.register_session_group_if_absent(&id, created);
                        self.touch(winner)?;
                        winner
                    }
                }
            }
            Scope::Request => self.create_service_group_context(&service.group)?,
        };

        let service_context = self.service_context(group, &service.name)?;
        self.set_service_group_context(message, group)?;
        self.set_service_context(message, service_context)?;
        tracing::debug!(message = %message, group = %group, scope = ?service.scope, "message routed");
        Ok(service_context)
    }

    /// Remove a message context from the arena
    ///
    /// The message is also dropped from its operation's message map.
    ///
    /// # Errors
    /// Returns an error if `message` is missing or not a message context
    pub fn release_message_context(&self, message: NodeId) -> Result<(), ContextError> {
        let operation = self.with_message(message, |body| body.operation_context)?;
        if let Some(operation) = operation {
            let removed = self.with_operation_mut(operation, |body| {
                body.messages.retain(|_, held| *held != message);
            });
            if let Err(err) = removed {
                tracing::debug!(message = %message, error = %err, "owning operation already gone");
            }
        }
        self.discard_node(message);
        Ok(())
    }
}
