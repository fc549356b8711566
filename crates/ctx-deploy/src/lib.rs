//! Deployment Registry
//!
//! Immutable deployment metadata consumed by the context tree.
//!
//! # Overview
//!
//! - **DeploymentRegistry**: services, groups, transports and per-flow chains
//! - **ChainNode**: closed handler/phase enumeration with flatten, describe
//!   and indexed resolution
//! - **SelfManagedData**: handler capability for per-message opaque state
//! - **MetaDescriptor**: the lightweight form deployment metadata takes in a
//!   snapshot
//!
//! # Example
//!
//! ```rust
//! use ctx_deploy::prelude::*;
//!
//! let registry = DeploymentRegistry::builder()
//!     .service_group("echo")
//!     .service(
//!         ServiceDescription::new("Echo", "echo")
//!             .with_operation(OperationDescription::new(QualifiedName::local("ping"), Mep::InOut)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let echo = registry.service("Echo").unwrap();
//! assert!(registry.find_service(&echo.descriptor()).is_some());
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod qname;
pub mod registry;
pub mod self_managed;

// Re-exports
pub use chain::{
    describe, find_handler, flatten_chain, flatten_handlers, ChainDescriptor, ChainNode, Handler,
    HandlerIndex, HandlerKey, HandlerKind, Phase,
};
pub use descriptor::MetaDescriptor;
pub use error::{HandlerError, RegistryError};
pub use model::{
    Flow, Mep, MessageDescription, OperationDescription, Scope, ServiceDescription,
    ServiceGroupDescription, TransportDescription, LABEL_FAULT, LABEL_IN, LABEL_OUT,
};
pub use qname::QualifiedName;
pub use registry::{DeploymentRegistry, FlowChain, RegistryBuilder};
pub use self_managed::{
    collect_self_managed, restore_self_managed, SelfManagedData, SelfManagedEntry, SelfManagedSlots,
    SlotKey,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for deployment metadata
    pub use crate::{
        ChainDescriptor, ChainNode, DeploymentRegistry, Flow, Handler, HandlerKind, Mep,
        MetaDescriptor, OperationDescription, Phase, QualifiedName, Scope, SelfManagedData,
        SelfManagedSlots, ServiceDescription,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
