//! Service group and service contexts

use std::sync::Arc;

use ctx_deploy::ServiceGroupDescription;
use ctx_props::PropertyMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexMap;
use uuid::Uuid;

use super::ConfigurationContext;
use crate::error::ContextError;
use crate::id::{NodeId, NodeKind};
use crate::node::{NodeBody, ServiceBody, ServiceGroupBody};

impl ConfigurationContext {
    /// Create a service group context for the deployed group `group`
    ///
    /// The context gets a fresh `urn:uuid:` id and is not registered in any
    /// scope table.
    ///
    /// # Errors
    /// Returns [`ContextError::UnknownServiceGroup`] if `group` is not deployed
    pub fn create_service_group_context(&self, group: &str) -> Result<NodeId, ContextError> {
        self.create_service_group_context_with_id(group, format!("urn:uuid:{}", Uuid::new_v4()))
    }

    /// Create a service group context with a caller-chosen id
    ///
    /// # Errors
    /// Returns [`ContextError::UnknownServiceGroup`] if `group` is not deployed
    pub fn create_service_group_context_with_id(
        &self,
        group: &str,
        id: impl Into<String>,
    ) -> Result<NodeId, ContextError> {
        let description = self
            .registry
            .service_group(group)
            .cloned()
            .ok_or_else(|| ContextError::UnknownServiceGroup(group.to_string()))?;
        let body = ServiceGroupBody {
            id: id.into(),
            description,
            services: IndexMap::new(),
        };
        let entry = self.allocate(NodeBody::ServiceGroup(body), Some(NodeId::ROOT), PropertyMap::new(), None);
        tracing::debug!(node = %entry.id(), group, log_id = entry.log_id(), "service group context created");
        self.notify_created(entry.id(), NodeKind::ServiceGroup);
        Ok(entry.id())
    }

    pub(crate) fn promote_service_group(
        &self,
        id: String,
        description: Arc<ServiceGroupDescription>,
        properties: PropertyMap,
        log_id: String,
        last_touched: i64,
    ) -> NodeId {
        let body = ServiceGroupBody {
            id,
            description,
            services: IndexMap::new(),
        };
        let entry = self.allocate(NodeBody::ServiceGroup(body), Some(NodeId::ROOT), properties, Some(log_id));
        entry.touch(last_touched);
        self.notify_created(entry.id(), NodeKind::ServiceGroup);
        entry.id()
    }

    /// Group context id of `group`
    ///
    /// # Errors
    /// Returns an error if `group` is missing or not a service group context
    pub fn service_group_id(&self, group: NodeId) -> Result<String, ContextError> {
        self.with_service_group(group, |body| body.id.clone())
    }

    /// Register `group` in the session table under its id
    ///
    /// Touches the group and sweeps idle session groups afterwards. An
    /// existing entry under the same id is replaced.
    ///
    /// # Errors
    /// Returns an error if `group` is missing or not a service group context
    pub fn add_service_group_to_soap_session(&self, group: NodeId) -> Result<(), ContextError> {
        let id = self.service_group_id(group)?;
        let entry = self.node(group)?;
        entry.set_parent(Some(NodeId::ROOT));
        entry.touch(self.now_millis());
        if let Some(previous) = self.soap_session_groups.insert(id.clone(), group) {
            if previous != group {
                tracing::debug!(id, %previous, replacement = %group, "session group replaced");
            }
        }
        self.cleanup_service_group_contexts();
        Ok(())
    }

    /// Register `group` in the application table under its group name
    ///
    /// # Errors
    /// Returns an error if `group` is missing or not a service group context
    pub fn add_service_group_to_application_scope(&self, group: NodeId) -> Result<(), ContextError> {
        let name = self.with_service_group(group, |body| body.description.name.clone())?;
        self.node(group)?.set_parent(Some(NodeId::ROOT));
        self.application_groups.insert(name, group);
        Ok(())
    }

    /// Group context registered under `id` in either scope table
    ///
    /// The session table is checked first. A hit is touched.
    #[must_use]
    pub fn service_group_context(&self, id: &str) -> Option<NodeId> {
        let found = self.soap_session_groups.get(id).map(|entry| *entry.value()).or_else(|| {
            self.application_groups
                .iter()
                .find(|entry| self.service_group_id(*entry.value()).is_ok_and(|candidate| candidate == id))
                .map(|entry| *entry.value())
        })?;
        if let Err(err) = self.touch(found) {
            tracing::warn!(id, error = %err, "registered group context vanished");
            return None;
        }
        Some(found)
    }

    /// Session-scoped group context under `id`
    ///
    /// # Errors
    /// Returns [`ContextError::UnknownServiceGroupContext`] if none is registered
    pub fn service_group_context_from_soap_session(&self, id: &str) -> Result<NodeId, ContextError> {
        let group = self
            .soap_session_groups
            .get(id)
            .map(|entry| *entry.value())
            .ok_or_else(|| ContextError::UnknownServiceGroupContext(id.to_string()))?;
        self.touch(group)?;
        Ok(group)
    }

    /// Application-scoped group context for the deployed group `name`
    #[must_use]
    pub fn application_service_group_context(&self, name: &str) -> Option<NodeId> {
        self.application_groups.get(name).map(|entry| *entry.value())
    }

    /// Ids of all registered session-scoped group contexts
    #[must_use]
    pub fn service_group_context_ids(&self) -> Vec<String> {
        self.soap_session_groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Service context for `service` under `group`, created on first use
    ///
    /// # Errors
    /// Returns [`ContextError::InvalidServiceInGroup`] if the deployed group
    /// does not contain `service`
    pub fn service_context(&self, group: NodeId, service: &str) -> Result<NodeId, ContextError> {
        let (existing, description) = self.with_service_group(group, |body| {
            (body.services.get(service).copied(), Arc::clone(&body.description))
        })?;
        if let Some(found) = existing {
            return Ok(found);
        }

        if !description.contains(service) {
            return Err(ContextError::InvalidServiceInGroup {
                service: service.to_string(),
                group: description.name.clone(),
            });
        }
        let service_description = self
            .registry
            .service(service)
            .cloned()
            .ok_or_else(|| ContextError::UnknownService(service.to_string()))?;

        let created = self.allocate(
            NodeBody::Service(ServiceBody::new(service_description)),
            Some(group),
            PropertyMap::new(),
            None,
        );
        let winner = self.write_body(group, NodeKind::ServiceGroup, |body| match body {
            NodeBody::ServiceGroup(body) => Some(*body.services.entry(service.to_string()).or_insert(created.id())),
            _ => None,
        })?;

        if winner == created.id() {
            tracing::debug!(node = %winner, service, group = %group, "service context created");
            self.notify_created(winner, NodeKind::Service);
        } else {
            self.arena.remove(&created.id());
        }
        Ok(winner)
    }

    /// Existing service context for `service` under `group`
    ///
    /// # Errors
    /// Returns an error if `group` is missing or not a service group context
    pub fn find_service_context(&self, group: NodeId, service: &str) -> Result<Option<NodeId>, ContextError> {
        self.with_service_group(group, |body| body.services.get(service).copied())
    }

    /// Service contexts of `group` in insertion order
    ///
    /// # Errors
    /// Returns an error if `group` is missing or not a service group context
    pub fn service_contexts(&self, group: NodeId) -> Result<Vec<NodeId>, ContextError> {
        self.with_service_group(group, |body| body.services.values().copied().collect())
    }

    /// Attach an existing service context to `group`, replacing any other
    /// context for the same service
    ///
    /// # Errors
    /// Returns an error if either node is missing or of the wrong level
    pub fn add_service_context(&self, group: NodeId, service: NodeId) -> Result<(), ContextError> {
        let name = self.with_service(service, |body| body.description.name.clone())?;
        self.write_body(group, NodeKind::ServiceGroup, |body| match body {
            NodeBody::ServiceGroup(body) => {
                body.services.insert(name, service);
                Some(())
            }
            _ => None,
        })?;
        self.node(service)?.set_parent(Some(group));
        Ok(())
    }

    /// Insert a restored service context unless `group` already holds one
    /// for the same service
    ///
    /// Returns the live node and whether it is the promoted one.
    pub(crate) fn promote_service_context(
        &self,
        group: NodeId,
        body: ServiceBody,
        properties: PropertyMap,
        log_id: String,
    ) -> Result<(NodeId, bool), ContextError> {
        let name = body.description.name.clone();
        let entry = self.allocate(NodeBody::Service(body), Some(group), properties, Some(log_id));
        let id = entry.id();
        let winner = self.write_body(group, NodeKind::ServiceGroup, |body| match body {
            NodeBody::ServiceGroup(body) => Some(*body.services.entry(name).or_insert(id)),
            _ => None,
        });
        let winner = match winner {
            Ok(winner) => winner,
            Err(err) => {
                self.arena.remove(&id);
                return Err(err);
            }
        };

        if winner == id {
            self.notify_created(id, NodeKind::Service);
            Ok((id, true))
        } else {
            self.arena.remove(&id);
            Ok((winner, false))
        }
    }

    pub(crate) fn register_session_group_if_absent(&self, id: &str, group: NodeId) -> NodeId {
        match self.soap_session_groups.entry(id.to_string()) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                slot.insert(group);
                group
            }
        }
    }
}
