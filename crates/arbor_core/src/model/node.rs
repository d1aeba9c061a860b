//! Node domain model.
//!
//! # Responsibility
//! - Define the positioned hierarchy entry shared by every payload kind.
//! - Keep sibling ordering semantics in one place.
//!
//! # Invariants
//! - `id` is stable and never reused for another node.
//! - `parent_id` is `None` only for the single root node and is set once at
//!   creation; it never points to a descendant.
//! - Sibling sequence is `order` ascending, ties broken by `id`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Stable identifier for every node and its payload.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type NodeId = i64;

/// Closed set of node kinds.
///
/// A node's kind is immutable after creation and decides which [`super::Payload`]
/// variant is legal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Container that holds child nodes and permission settings.
    Directory,
    /// Launchable application entry.
    Application,
    /// Pointer to another node in the same tree.
    Reference,
    /// Web link entry.
    Website,
    /// Geographic coordinate entry.
    Location,
    /// Free-form text entry.
    Note,
    /// Toggleable checkbox entry.
    Checkbox,
    /// Timed reminder entry.
    Reminder,
    /// System setting shortcut entry.
    Setting,
    /// Local file entry.
    File,
}

impl NodeKind {
    /// Returns whether nodes of this kind can be listed as a parent of
    /// further rows (directly or through one-hop resolution).
    pub fn can_have_children(self) -> bool {
        matches!(self, Self::Directory | Self::Reference)
    }
}

/// Positioned entry in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable global id used for linking and payload pairing.
    pub id: NodeId,
    /// Parent node id. `None` only for the root node.
    pub parent_id: Option<NodeId>,
    /// Immutable kind; changing kind requires delete and recreate.
    pub kind: NodeKind,
    /// Stable child order key within one parent.
    pub order: i64,
    /// User-facing label.
    pub label: String,
}

impl Node {
    /// Compares two siblings by the canonical `(order, id)` sequence.
    pub fn sibling_cmp(&self, other: &Node) -> Ordering {
        self.order.cmp(&other.order).then(self.id.cmp(&other.id))
    }
}

/// Sorts a child list into the canonical `(order, id)` sequence in place.
pub fn sort_siblings(children: &mut [Node]) {
    children.sort_by(Node::sibling_cmp);
}
