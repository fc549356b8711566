//! Snapshot and restore of context subtrees
//!
//! - [`capture`]: live contexts to records and bytes
//! - [`records`]: record layouts and their wire form
//! - [`reconcile`]: decoded records back into a live tree

pub mod capture;
pub mod reconcile;
pub mod records;

pub use capture::{
    capture_message, capture_operation, capture_operation_isolating, capture_service, capture_service_group,
    extract_copy, write_message, write_operation, write_service, write_service_group,
};
pub use reconcile::{
    restore_message, Reconcile, ReconcileState, Restored, RestoredMessage, RestoredOperation, RestoredService,
    RestoredServiceGroup,
};
pub use records::{
    ContextLink, EmbeddedMessage, MessageRecord, MessageSlotRef, OperationRecord, RecordSummary, ServiceGroupRecord,
    ServiceRecord,
};
