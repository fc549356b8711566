//! Context Property Bags
//!
//! Per-node property storage for the context tree.
//!
//! # Overview
//!
//! - **PropertyBag**: local map behind a lock, with optional difference
//!   tracking for replication
//! - **lookup**: leaf-to-root resolution over a chain of bags
//! - **MergePolicy**: how restored properties combine with live ones
//!
//! # Example
//!
//! ```rust
//! use ctx_props::{lookup, PropertyBag};
//! use serde_json::json;
//!
//! let root = PropertyBag::new();
//! let leaf = PropertyBag::new();
//! root.set("timeout", json!(30));
//!
//! assert_eq!(lookup([&leaf, &root], "timeout"), Some(json!(30)));
//! assert!(leaf.get_local("timeout").is_none());
//! ```

#![warn(missing_docs)]

pub mod bag;
pub mod difference;

// Re-exports
pub use bag::{lookup, MergePolicy, PropertyBag, PropertyMap, COPY_PROPERTIES};
pub use difference::{PropertyDifference, ReplicationProbe};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
