//! Node/payload store contract.
//!
//! # Responsibility
//! - Define the CRUD + change-notification surface the engine consumes.
//! - Keep structural-integrity failures typed and fatal.
//!
//! # Invariants
//! - Child listings are deterministic: `order ASC, id ASC`.
//! - A node and its payload are created as one atomic pair.
//! - Subscriptions always hold the latest complete snapshot; a receiver
//!   never observes a partially applied mutation.

pub mod memory;

use crate::model::{Node, NodeId, NodeKind, Payload};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::watch;

pub use memory::MemoryStore;

/// Result type used by store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Structural-integrity errors from store operations.
///
/// Every variant indicates a broken invariant the engine cannot safely
/// continue past; none of them is ever silently substituted with a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A node expected to exist does not.
    MissingNode(NodeId),
    /// A payload expected to exist does not.
    MissingPayload(NodeId),
    /// A payload's variant does not match its node's kind.
    KindMismatch {
        node_id: NodeId,
        node_kind: NodeKind,
        payload_kind: NodeKind,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNode(id) => write!(f, "node not found: {id}"),
            Self::MissingPayload(id) => write!(f, "payload not found for node: {id}"),
            Self::KindMismatch {
                node_id,
                node_kind,
                payload_kind,
            } => write!(
                f,
                "payload kind {payload_kind:?} does not match node {node_id} kind {node_kind:?}"
            ),
        }
    }
}

impl Error for StoreError {}

/// Store contract consumed by the core.
///
/// Implemented by the excluded persistence layer; [`MemoryStore`] is the
/// in-tree reference implementation used by services and tests.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Loads one node by id.
    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>>;

    /// Lists the children of one node, sorted by `(order, id)`.
    async fn get_children(&self, parent_id: NodeId) -> StoreResult<Vec<Node>>;

    /// Subscribes to the live child list of one node.
    ///
    /// The receiver re-emits on any insert, delete, or reorder under that
    /// parent and always borrows the latest complete list.
    async fn subscribe_children(&self, parent_id: NodeId) -> watch::Receiver<Vec<Node>>;

    /// Loads one payload by node id.
    async fn get_payload(&self, id: NodeId) -> StoreResult<Option<Payload>>;

    /// Subscribes to live payload updates for one node.
    ///
    /// Emits `None` once the node is deleted.
    async fn subscribe_payload(&self, id: NodeId) -> watch::Receiver<Option<Payload>>;

    /// Inserts a node and its payload as one atomic pair.
    ///
    /// A `node.id` of zero asks the store to assign the next free id; the
    /// stored node is returned either way. The payload variant must match
    /// `node.kind`, and `parent_id` must name an existing node when set.
    async fn insert_node_and_payload(&self, node: Node, payload: Payload) -> StoreResult<Node>;

    /// Replaces one payload. The variant must match the node's kind.
    async fn update_payload(&self, id: NodeId, payload: Payload) -> StoreResult<()>;

    /// Renames one node and re-emits its parent's child list.
    async fn rename_node(&self, id: NodeId, label: &str) -> StoreResult<()>;

    /// Moves one node under a new parent at an optional sibling index,
    /// resequencing sibling order densely.
    async fn move_node(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        target_index: Option<usize>,
    ) -> StoreResult<()>;

    /// Deletes one node, its payload, and every descendant.
    async fn delete_node_recursive(&self, id: NodeId) -> StoreResult<()>;
}
