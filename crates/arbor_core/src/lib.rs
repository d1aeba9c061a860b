//! Core engine for a live, hierarchical node collection.
//! This crate is the single source of truth for tree, permission, and
//! view invariants; presentation layers are thin consumers.

pub mod fuzzy;
pub mod logging;
pub mod model;
pub mod navigator;
pub mod permission;
pub mod reference;
pub mod service;
pub mod store;
pub mod view;

pub use fuzzy::{fuzzy_match, FuzzyHit};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    appearance_for, validate_payload, Appearance, Node, NodeId, NodeKind, Payload, ValidationIssue,
    VisibilityPolicy,
};
pub use navigator::{
    NavigatorConfig, NavigatorError, SelectOutcome, TraversalDirection, TreeNavigator,
};
pub use permission::{
    effective_child_permissions, effective_own_permissions, PermissionKind, PermissionMap,
    PermissionScope,
};
pub use reference::{detect_cycle, resolve, ReferenceResolution};
pub use service::{CommandError, TreeCommandService};
pub use store::{MemoryStore, NodeStore, StoreError, StoreResult};
pub use view::{RowSubscription, TreeRowKey, TreeRowState, TreeViewEngine, ViewError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
