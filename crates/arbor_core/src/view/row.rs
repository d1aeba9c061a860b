//! Materialized view row types.

use crate::model::{Appearance, Node, Payload};
use crate::permission::PermissionMap;

/// Identity of one view row.
///
/// A node may legitimately appear more than once in a flattened view when
/// it is reachable through several references, so row identity is the
/// `(node_id, depth)` pair, never the node id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeRowKey {
    pub node_id: crate::model::NodeId,
    /// Depth below the subscribed root; `-1` marks the invisible synthetic
    /// root, which is never emitted as a row.
    pub depth: i32,
}

/// One materialized, visible line of the flattened view.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRowState {
    pub key: TreeRowKey,
    /// The underlying node as stored.
    pub node: Node,
    /// The underlying node's own payload.
    pub payload: Payload,
    /// One-hop resolved display pair; `None` for a broken reference, which
    /// renders with the underlying node's own appearance.
    pub resolved: Option<(Node, Payload)>,
    /// Effective permissions for this row, narrowed from the root down.
    pub permissions: PermissionMap,
    /// Resolved display facts.
    pub appearance: Appearance,
    /// Collapse state; `None` for rows that do not display a directory.
    pub expanded: Option<bool>,
}

impl TreeRowState {
    /// Returns the node and payload a consumer should render.
    pub fn display(&self) -> (&Node, &Payload) {
        match &self.resolved {
            Some((node, payload)) => (node, payload),
            None => (&self.node, &self.payload),
        }
    }
}
