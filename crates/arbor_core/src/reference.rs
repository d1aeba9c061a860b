//! Reference resolution and edit-time cycle detection.
//!
//! # Responsibility
//! - Resolve a node one hop through its reference payload.
//! - Validate candidate reference targets against reference-induced cycles.
//!
//! # Invariants
//! - Resolution is one-hop: a reference's target is itself, never
//!   re-resolved transitively.
//! - A missing or dangling target is a first-class `target = None` state,
//!   not an error.
//! - `detect_cycle` terminates even when an existing cycle is present
//!   elsewhere in the tree.

use crate::model::{Node, NodeId, Payload};
use crate::store::{NodeStore, StoreError, StoreResult};
use std::collections::HashSet;

/// One-hop resolution of a node through its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceResolution {
    /// The node as stored, with its own payload.
    pub underlying: (Node, Payload),
    /// The concrete node to display. Equal to `underlying` for
    /// non-references; `None` for a broken reference.
    pub target: Option<(Node, Payload)>,
}

impl ReferenceResolution {
    /// Returns the node and payload a consumer should render.
    ///
    /// Falls back to the underlying pair when the reference is broken.
    pub fn display(&self) -> &(Node, Payload) {
        self.target.as_ref().unwrap_or(&self.underlying)
    }
}

/// Resolves one node through its reference payload, one hop.
///
/// # Errors
/// Returns [`StoreError::MissingPayload`] when the node itself has no
/// payload and [`StoreError::KindMismatch`] when the stored payload variant
/// disagrees with the node's kind. A dangling `target_id` is not an error.
pub async fn resolve<S: NodeStore + ?Sized>(
    store: &S,
    node: &Node,
) -> StoreResult<ReferenceResolution> {
    let payload = load_checked_payload(store, node).await?;

    let target_id = match payload {
        Payload::Reference { target_id } => target_id,
        _ => {
            let pair = (node.clone(), payload);
            return Ok(ReferenceResolution {
                underlying: pair.clone(),
                target: Some(pair),
            });
        }
    };

    let underlying = (node.clone(), Payload::Reference { target_id });
    let Some(target_id) = target_id else {
        return Ok(ReferenceResolution {
            underlying,
            target: None,
        });
    };

    let Some(target_node) = store.get_node(target_id).await? else {
        return Ok(ReferenceResolution {
            underlying,
            target: None,
        });
    };
    let target_payload = load_checked_payload(store, &target_node).await?;
    Ok(ReferenceResolution {
        underlying,
        target: Some((target_node, target_payload)),
    })
}

/// Checks whether pointing the reference under edit at `candidate_id` would
/// make the edited node its own eventual descendant.
///
/// Walks depth-first from the candidate: references are substituted by
/// their one-hop target, directories contribute all children. Returns
/// `true` as soon as the walk reaches `editing_node_id`. A per-call visited
/// set bounds the walk, so it terminates even over an existing cycle.
///
/// This is a save-blocking validation value computed while a user picks a
/// target, never a runtime traversal fault.
pub async fn detect_cycle<S: NodeStore + ?Sized>(
    store: &S,
    editing_node_id: NodeId,
    candidate_id: NodeId,
) -> StoreResult<bool> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut pending: Vec<NodeId> = vec![candidate_id];

    while let Some(current_id) = pending.pop() {
        if current_id == editing_node_id {
            return Ok(true);
        }
        if !visited.insert(current_id) {
            continue;
        }

        let Some(current) = store.get_node(current_id).await? else {
            // Dangling edge: nothing beyond it to walk.
            continue;
        };
        match store
            .get_payload(current.id)
            .await?
            .ok_or(StoreError::MissingPayload(current.id))?
        {
            Payload::Reference { target_id } => {
                if let Some(target_id) = target_id {
                    pending.push(target_id);
                }
            }
            Payload::Directory { .. } => {
                for child in store.get_children(current.id).await? {
                    pending.push(child.id);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

async fn load_checked_payload<S: NodeStore + ?Sized>(
    store: &S,
    node: &Node,
) -> StoreResult<Payload> {
    let payload = store
        .get_payload(node.id)
        .await?
        .ok_or(StoreError::MissingPayload(node.id))?;
    if payload.kind() != node.kind {
        return Err(StoreError::KindMismatch {
            node_id: node.id,
            node_kind: node.kind,
            payload_kind: payload.kind(),
        });
    }
    Ok(payload)
}
