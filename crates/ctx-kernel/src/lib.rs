//! Context Kernel (ctx-kernel)
//!
//! The runtime context tree of a message engine, and the machinery to save a
//! slice of it and bring it back on another engine.
//!
//! ```text
//! ConfigurationContext (root)
//!   └─ ServiceGroupContext
//!        └─ ServiceContext
//!             └─ OperationContext
//!                  └─ MessageContext
//! ```
//!
//! Contexts live in an arena owned by [`ConfigurationContext`] and refer to
//! each other by [`NodeId`]. A snapshot captures one context together with
//! the ancestors it needs. Restoring happens in two steps: decoding yields a
//! [`Restored`] record, and reconciling it against a live root either reuses
//! the contexts already there or promotes the decoded ones.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ctx_kernel::harness::demo_registry;
//! use ctx_kernel::prelude::*;
//!
//! let source = ConfigurationContext::new(Arc::new(demo_registry().unwrap()));
//! let message = source.create_message_context(Flow::In);
//! let account = source.registry().service("Account").cloned();
//! source.with_message_mut(message, |body| body.service = account).unwrap();
//! let service = source.fill_service_and_group_context(message).unwrap();
//! let operation = source.create_operation_context(service, "transfer").unwrap();
//! source.add_message_context(operation, message).unwrap();
//!
//! let bytes = write_message(&source, message).unwrap();
//!
//! let target = ConfigurationContext::new(Arc::new(demo_registry().unwrap()));
//! let restored = restore_message(&target, bytes).unwrap();
//! assert_eq!(target.kind(restored).unwrap(), NodeKind::Message);
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod harness;
pub mod id;
pub mod listener;
pub mod logging;
pub mod node;
pub mod options;
pub mod snapshot;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, TIMEOUT_PROPERTY};
pub use context::ConfigurationContext;
pub use error::{ContextError, SnapshotError};
pub use id::{NodeId, NodeKind};
pub use listener::{ClusteringAgent, ContextListener, DependencyManager};
pub use node::{
    MessageBody, MessageFlags, NodeBody, NodeEntry, OperationBody, ServiceBody, ServiceGroupBody,
};
pub use options::{EndpointReference, Options, RelatesTo};
pub use snapshot::{
    restore_message, write_message, write_operation, write_service, write_service_group, Reconcile,
    ReconcileState, Restored, RestoredMessage, RestoredOperation, RestoredService, RestoredServiceGroup,
};

/// Common imports
pub mod prelude {
    pub use crate::context::ConfigurationContext;
    pub use crate::error::{ContextError, SnapshotError};
    pub use crate::id::{NodeId, NodeKind};
    pub use crate::options::{EndpointReference, Options};
    pub use crate::snapshot::{
        restore_message, write_message, Reconcile, Restored, RestoredMessage, RestoredOperation,
    };
    pub use crate::EngineConfig;
    pub use ctx_deploy::{Flow, Mep, Scope};
    pub use ctx_props::MergePolicy;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
