//! Validated tree mutation commands.
//!
//! # Responsibility
//! - Validate hierarchy invariants above the store before writing.
//! - Keep cyclic-reference rejection a save-blocking result, never a
//!   mid-traversal fault.
//!
//! # Invariants
//! - Items are only created under existing directories.
//! - A node's kind is immutable; changing kind is delete plus recreate.
//! - Reference targets are rejected when they would make the edited node
//!   its own eventual descendant.

use crate::model::{Node, NodeId, NodeKind, Payload};
use crate::reference::detect_cycle;
use crate::store::{NodeStore, StoreError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Errors from tree mutation commands.
///
/// Validation-class variants are surfaced for user correction; `Store`
/// wraps structural failures that cannot be corrected interactively.
#[derive(Debug)]
pub enum CommandError {
    /// Label is blank after trim.
    BlankLabel,
    /// Target node does not exist.
    NodeNotFound(NodeId),
    /// Parent node does not exist.
    ParentNotFound(NodeId),
    /// Parent exists but is not a directory.
    ParentNotDirectory(NodeId),
    /// The node is not a reference but a reference command was issued.
    NotAReference(NodeId),
    /// Saving this reference target would create a cycle. For creations
    /// the node id names the would-be parent.
    CycleRejected {
        node_id: NodeId,
        target_id: NodeId,
    },
    /// Structural store failure.
    Store(StoreError),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankLabel => write!(f, "label must not be blank"),
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent not found: {id}"),
            Self::ParentNotDirectory(id) => write!(f, "parent must be a directory: {id}"),
            Self::NotAReference(id) => write!(f, "node is not a reference: {id}"),
            Self::CycleRejected { node_id, target_id } => write!(
                f,
                "reference target would create a cycle: node {node_id} -> target {target_id}"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Validated write facade over one store.
pub struct TreeCommandService<S: NodeStore> {
    store: Arc<S>,
}

impl<S: NodeStore> TreeCommandService<S> {
    /// Creates the service over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Creates the single tree root.
    ///
    /// The root is always a directory and has no parent.
    pub async fn create_root(&self, label: impl Into<String>) -> Result<Node, CommandError> {
        let label = normalize_label(label.into())?;
        let root = self
            .store
            .insert_node_and_payload(
                Node {
                    id: 0,
                    parent_id: None,
                    kind: NodeKind::Directory,
                    order: 0,
                    label,
                },
                Payload::directory(),
            )
            .await?;
        info!("event=root_created module=commands node_id={}", root.id);
        Ok(root)
    }

    /// Creates one node/payload pair under a directory, appended last.
    ///
    /// The pair is atomic from the caller's perspective; the payload
    /// variant must match `kind`. Reference payloads carrying a target are
    /// cycle-checked before anything is written, so subscribers never
    /// observe a rejected insert.
    pub async fn create_item(
        &self,
        parent_id: NodeId,
        kind: NodeKind,
        label: impl Into<String>,
        payload: Payload,
    ) -> Result<Node, CommandError> {
        let label = normalize_label(label.into())?;
        self.ensure_parent_is_directory(parent_id).await?;

        // The new node would only be reachable through its parent's child
        // list, so a target whose walk reaches the parent would reach the
        // new node too.
        if let Payload::Reference {
            target_id: Some(target_id),
        } = &payload
        {
            if detect_cycle(self.store.as_ref(), parent_id, *target_id).await? {
                return Err(CommandError::CycleRejected {
                    node_id: parent_id,
                    target_id: *target_id,
                });
            }
        }

        let next_order = self
            .store
            .get_children(parent_id)
            .await?
            .last()
            .map(|last| last.order + 1)
            .unwrap_or(0);
        let node = self
            .store
            .insert_node_and_payload(
                Node {
                    id: 0,
                    parent_id: Some(parent_id),
                    kind,
                    order: next_order,
                    label,
                },
                payload,
            )
            .await?;
        info!(
            "event=item_created module=commands node_id={} kind={:?} parent_id={parent_id}",
            node.id, node.kind
        );
        Ok(node)
    }

    /// Renames one node.
    pub async fn rename_item(
        &self,
        id: NodeId,
        label: impl Into<String>,
    ) -> Result<(), CommandError> {
        let label = normalize_label(label.into())?;
        self.ensure_node_exists(id).await?;
        self.store.rename_node(id, label.as_str()).await?;
        Ok(())
    }

    /// Moves one node under a directory at an optional sibling index.
    pub async fn move_item(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        target_index: Option<usize>,
    ) -> Result<(), CommandError> {
        self.ensure_node_exists(id).await?;
        self.ensure_parent_is_directory(new_parent_id).await?;
        if self.is_parent_descendant_of(id, new_parent_id).await? {
            return Err(CommandError::CycleRejected {
                node_id: id,
                target_id: new_parent_id,
            });
        }
        self.store.move_node(id, new_parent_id, target_index).await?;
        Ok(())
    }

    /// Deletes one node, cascading over its descendants.
    pub async fn delete_item(&self, id: NodeId) -> Result<(), CommandError> {
        self.ensure_node_exists(id).await?;
        self.store.delete_node_recursive(id).await?;
        info!("event=item_deleted module=commands node_id={id}");
        Ok(())
    }

    /// Updates one payload in place. The kind stays immutable; the store
    /// rejects a variant change.
    pub async fn update_payload(&self, id: NodeId, payload: Payload) -> Result<(), CommandError> {
        self.ensure_node_exists(id).await?;
        self.store.update_payload(id, payload).await?;
        Ok(())
    }

    /// Points one reference at a new target, or clears it.
    ///
    /// Cycle rejection is a save-blocking validation result computed here,
    /// before anything is written.
    pub async fn set_reference_target(
        &self,
        id: NodeId,
        target_id: Option<NodeId>,
    ) -> Result<(), CommandError> {
        let node = self
            .store
            .get_node(id)
            .await?
            .ok_or(CommandError::NodeNotFound(id))?;
        if node.kind != NodeKind::Reference {
            return Err(CommandError::NotAReference(id));
        }

        if let Some(target_id) = target_id {
            if detect_cycle(self.store.as_ref(), id, target_id).await? {
                return Err(CommandError::CycleRejected {
                    node_id: id,
                    target_id,
                });
            }
        }
        self.store
            .update_payload(id, Payload::Reference { target_id })
            .await?;
        Ok(())
    }

    async fn ensure_node_exists(&self, id: NodeId) -> Result<(), CommandError> {
        self.store
            .get_node(id)
            .await?
            .map(|_| ())
            .ok_or(CommandError::NodeNotFound(id))
    }

    async fn ensure_parent_is_directory(&self, parent_id: NodeId) -> Result<(), CommandError> {
        let parent = self
            .store
            .get_node(parent_id)
            .await?
            .ok_or(CommandError::ParentNotFound(parent_id))?;
        if parent.kind != NodeKind::Directory {
            return Err(CommandError::ParentNotDirectory(parent_id));
        }
        Ok(())
    }

    /// Walks parent links upward from `candidate` looking for `node_id`.
    ///
    /// Parent edges are acyclic by construction; the visited set only
    /// guards against store corruption.
    async fn is_parent_descendant_of(
        &self,
        node_id: NodeId,
        candidate: NodeId,
    ) -> Result<bool, CommandError> {
        let mut visited = std::collections::HashSet::new();
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == node_id {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(true);
            }
            cursor = self
                .store
                .get_node(current)
                .await?
                .ok_or(CommandError::ParentNotFound(current))?
                .parent_id;
        }
        Ok(false)
    }
}

fn normalize_label(value: String) -> Result<String, CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::BlankLabel);
    }
    Ok(trimmed.to_string())
}
