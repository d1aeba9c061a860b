//! Domain model for the node hierarchy.
//!
//! Nodes carry position and identity; payloads carry the kind-specific data
//! attached 1:1 to each node.

pub mod node;
pub mod payload;

pub use node::{Node, NodeId, NodeKind};
pub use payload::{
    appearance_for, validate_payload, Appearance, Payload, ValidationIssue, VisibilityPolicy,
};
