//! Idle eviction and teardown

use std::sync::Arc;

use super::ConfigurationContext;
use crate::id::{NodeId, NodeKind};
use crate::node::NodeBody;

impl ConfigurationContext {
    /// Evict session-scoped groups idle longer than the timeout
    ///
    /// Returns the ids of the evicted groups.
    pub fn cleanup_service_group_contexts(&self) -> Vec<String> {
        let now = self.now_millis();
        let timeout = i64::try_from(self.service_group_timeout_ms()).unwrap_or(i64::MAX);
        let idle: Vec<(String, NodeId)> = self
            .soap_session_groups
            .iter()
            .filter(|entry| {
                self.node(*entry.value())
                    .map_or(true, |node| now.saturating_sub(node.last_touched()) > timeout)
            })
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let mut evicted = Vec::new();
        for (id, group) in idle {
            let removed = self.soap_session_groups.remove_if(&id, |_, current| {
                *current == group
                    && self
                        .node(group)
                        .map_or(true, |node| now.saturating_sub(node.last_touched()) > timeout)
            });
            if removed.is_some() {
                tracing::info!(id, node = %group, timeout_ms = timeout, "evicting idle service group context");
                self.remove_subtree(group);
                evicted.push(id);
            }
        }
        evicted
    }

    /// Remove the group context registered under `id` in either table
    ///
    /// Returns whether a group was removed.
    pub fn remove_service_group_context(&self, id: &str) -> bool {
        if let Some((_, group)) = self.soap_session_groups.remove(id) {
            self.remove_subtree(group);
            return true;
        }
        let application = self
            .application_groups
            .iter()
            .find(|entry| self.service_group_id(*entry.value()).is_ok_and(|candidate| candidate == id))
            .map(|entry| entry.key().clone());
        let Some(name) = application else {
            return false;
        };
        match self.application_groups.remove(&name) {
            Some((_, group)) => {
                self.remove_subtree(group);
                true
            }
            None => false,
        }
    }

    /// Remove every registered context of the deployed group `name`
    ///
    /// Returns how many group contexts were removed.
    pub fn remove_service_groups_for(&self, name: &str) -> usize {
        let mut removed = Vec::new();
        if let Some((_, group)) = self.application_groups.remove(name) {
            removed.push(group);
        }
        let sessions: Vec<String> = self
            .soap_session_groups
            .iter()
            .filter(|entry| {
                self.with_service_group(*entry.value(), |body| body.description.name == name)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in sessions {
            if let Some((_, group)) = self.soap_session_groups.remove(&id) {
                removed.push(group);
            }
        }
        for group in &removed {
            self.remove_subtree(*group);
        }
        removed.len()
    }

    /// Remove every registered group context from both scope tables
    pub fn cleanup_contexts(&self) {
        let application: Vec<String> = self.application_groups.iter().map(|entry| entry.key().clone()).collect();
        for name in application {
            if let Some((_, group)) = self.application_groups.remove(&name) {
                self.remove_subtree(group);
            }
        }
        let sessions: Vec<String> = self.soap_session_groups.iter().map(|entry| entry.key().clone()).collect();
        for id in sessions {
            if let Some((_, group)) = self.soap_session_groups.remove(&id) {
                self.remove_subtree(group);
            }
        }
    }

    /// Tear down every context below the root
    pub fn terminate(&self) {
        self.cleanup_contexts();
        let remaining: Vec<NodeId> = self.operations.iter().map(|entry| *entry.value()).collect();
        self.operations.clear();
        for operation in remaining {
            self.remove_operation_subtree(operation);
        }
        let strays: Vec<NodeId> = self
            .arena
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| *id != NodeId::ROOT)
            .collect();
        for id in strays {
            if let Some((_, node)) = self.arena.remove(&id) {
                self.notify_removed(id, node.kind());
            }
        }
        tracing::info!("configuration context terminated");
    }

    fn remove_subtree(&self, group: NodeId) {
        let services = self
            .with_service_group(group, |body| body.services.values().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        let manager = self.dependency_manager.read().clone();

        for service in services {
            let detail = self.with_service(service, |body| (Arc::clone(&body.description), body.operations.clone()));
            let Ok((description, operations)) = detail else {
                continue;
            };
            if let Some(manager) = &manager {
                manager.destroy_service_object(service, &description);
            }
            for operation in operations {
                self.remove_operation_subtree(operation);
            }
            self.remove_node(service);
        }
        self.detach_messages_of(group);
        self.remove_node(group);
    }

    /// Messages routed to `group` but never added to an operation outlive it
    /// with their owner links cleared
    fn detach_messages_of(&self, group: NodeId) {
        let messages: Vec<NodeId> = self
            .arena
            .iter()
            .filter(|entry| entry.value().kind() == NodeKind::Message)
            .map(|entry| *entry.key())
            .collect();
        for message in messages {
            let detached = self.with_message_mut(message, |body| {
                if body.service_group_context != Some(group) {
                    return false;
                }
                body.operation_context = None;
                body.service_context = None;
                body.service_group_context = None;
                true
            });
            if matches!(detached, Ok(true)) {
                tracing::debug!(node = %message, group = %group, "message detached from evicted group");
            }
        }
    }

    fn remove_operation_subtree(&self, operation: NodeId) {
        let Ok((key, messages)) = self.with_operation(operation, |body| {
            (body.key.clone(), body.messages.values().copied().collect::<Vec<_>>())
        }) else {
            return;
        };
        if let Some(key) = key {
            self.operations.remove_if(&key, |_, registered| *registered == operation);
        }
        for message in messages {
            self.remove_node(message);
        }
        self.remove_node(operation);
    }

    fn remove_node(&self, id: NodeId) {
        let Some((_, node)) = self.arena.remove(&id) else {
            return;
        };
        if let NodeBody::Message(message) = &*node.body() {
            tracing::trace!(node = %id, message_id = ?message.message_id(), "message context removed");
        }
        let kind = node.kind();
        if kind == NodeKind::ServiceGroup {
            tracing::debug!(node = %id, log_id = node.log_id(), "service group context removed");
        }
        self.notify_removed(id, kind);
    }
}
