//! In-memory arena store.
//!
//! # Responsibility
//! - Provide the reference [`NodeStore`] implementation used by services
//!   and tests.
//! - Guarantee that every emission is a complete snapshot.
//!
//! # Invariants
//! - The tree is an id-indexed arena; no embedded child pointers exist, so
//!   reference edges can never corrupt ownership.
//! - All mutation and emission for one operation happens under a single
//!   lock acquisition.
//! - Watch senders are created lazily and live for the store lifetime.

use crate::model::node::sort_siblings;
use crate::model::{Node, NodeId, Payload};
use crate::store::{NodeStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct Arena {
    nodes: HashMap<NodeId, Node>,
    payloads: HashMap<NodeId, Payload>,
    children_tx: HashMap<NodeId, watch::Sender<Vec<Node>>>,
    payload_tx: HashMap<NodeId, watch::Sender<Option<Payload>>>,
    next_id: NodeId,
}

impl Arena {
    fn children_of(&self, parent_id: NodeId) -> Vec<Node> {
        let mut children: Vec<Node> = self
            .nodes
            .values()
            .filter(|node| node.parent_id == Some(parent_id))
            .cloned()
            .collect();
        sort_siblings(&mut children);
        children
    }

    fn emit_children(&self, parent_id: NodeId) {
        if let Some(tx) = self.children_tx.get(&parent_id) {
            tx.send_replace(self.children_of(parent_id));
        }
    }

    fn emit_payload(&self, id: NodeId) {
        if let Some(tx) = self.payload_tx.get(&id) {
            tx.send_replace(self.payloads.get(&id).cloned());
        }
    }

    fn subtree_ids(&self, root: NodeId) -> Vec<NodeId> {
        let mut result = vec![root];
        let mut cursor = 0;
        while cursor < result.len() {
            let current = result[cursor];
            cursor += 1;
            for node in self.nodes.values() {
                if node.parent_id == Some(current) {
                    result.push(node.id);
                }
            }
        }
        result
    }

    fn resequence(&mut self, parent_id: NodeId) {
        let ordered = self.children_of(parent_id);
        for (index, child) in ordered.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(&child.id) {
                node.order = index as i64;
            }
        }
    }
}

/// Arena-backed store with watch-channel change notification.
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena {
                next_id: 1,
                ..Arena::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Arena> {
        match self.arena.lock() {
            Ok(guard) => guard,
            // A poisoned arena still holds consistent data: every mutation
            // completes fully under the lock before any await point.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_node(&self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.lock().nodes.get(&id).cloned())
    }

    async fn get_children(&self, parent_id: NodeId) -> StoreResult<Vec<Node>> {
        Ok(self.lock().children_of(parent_id))
    }

    async fn subscribe_children(&self, parent_id: NodeId) -> watch::Receiver<Vec<Node>> {
        let mut arena = self.lock();
        let current = arena.children_of(parent_id);
        arena
            .children_tx
            .entry(parent_id)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    async fn get_payload(&self, id: NodeId) -> StoreResult<Option<Payload>> {
        Ok(self.lock().payloads.get(&id).cloned())
    }

    async fn subscribe_payload(&self, id: NodeId) -> watch::Receiver<Option<Payload>> {
        let mut arena = self.lock();
        let current = arena.payloads.get(&id).cloned();
        arena
            .payload_tx
            .entry(id)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    async fn insert_node_and_payload(&self, mut node: Node, payload: Payload) -> StoreResult<Node> {
        if payload.kind() != node.kind {
            return Err(StoreError::KindMismatch {
                node_id: node.id,
                node_kind: node.kind,
                payload_kind: payload.kind(),
            });
        }

        let mut arena = self.lock();
        if let Some(parent_id) = node.parent_id {
            if !arena.nodes.contains_key(&parent_id) {
                return Err(StoreError::MissingNode(parent_id));
            }
        }

        if node.id == 0 {
            node.id = arena.next_id;
        }
        arena.next_id = arena.next_id.max(node.id + 1);

        arena.nodes.insert(node.id, node.clone());
        arena.payloads.insert(node.id, payload);
        arena.emit_payload(node.id);
        if let Some(parent_id) = node.parent_id {
            arena.emit_children(parent_id);
        }
        Ok(node)
    }

    async fn update_payload(&self, id: NodeId, payload: Payload) -> StoreResult<()> {
        let mut arena = self.lock();
        let node = arena.nodes.get(&id).ok_or(StoreError::MissingNode(id))?;
        if payload.kind() != node.kind {
            return Err(StoreError::KindMismatch {
                node_id: id,
                node_kind: node.kind,
                payload_kind: payload.kind(),
            });
        }
        arena.payloads.insert(id, payload);
        arena.emit_payload(id);
        Ok(())
    }

    async fn rename_node(&self, id: NodeId, label: &str) -> StoreResult<()> {
        let mut arena = self.lock();
        let parent_id = {
            let node = arena.nodes.get_mut(&id).ok_or(StoreError::MissingNode(id))?;
            node.label = label.to_string();
            node.parent_id
        };
        if let Some(parent_id) = parent_id {
            arena.emit_children(parent_id);
        }
        Ok(())
    }

    async fn move_node(
        &self,
        id: NodeId,
        new_parent_id: NodeId,
        target_index: Option<usize>,
    ) -> StoreResult<()> {
        let mut arena = self.lock();
        let old_parent_id = arena
            .nodes
            .get(&id)
            .ok_or(StoreError::MissingNode(id))?
            .parent_id;
        if !arena.nodes.contains_key(&new_parent_id) {
            return Err(StoreError::MissingNode(new_parent_id));
        }

        let mut siblings: Vec<NodeId> = arena
            .children_of(new_parent_id)
            .into_iter()
            .map(|node| node.id)
            .filter(|sibling| *sibling != id)
            .collect();
        let index = target_index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(index, id);

        for (order, sibling) in siblings.into_iter().enumerate() {
            if let Some(node) = arena.nodes.get_mut(&sibling) {
                node.order = order as i64;
            }
        }
        if let Some(node) = arena.nodes.get_mut(&id) {
            node.parent_id = Some(new_parent_id);
        }

        if let Some(old_parent_id) = old_parent_id {
            arena.resequence(old_parent_id);
            arena.emit_children(old_parent_id);
        }
        if old_parent_id != Some(new_parent_id) {
            arena.emit_children(new_parent_id);
        }
        Ok(())
    }

    async fn delete_node_recursive(&self, id: NodeId) -> StoreResult<()> {
        let mut arena = self.lock();
        let parent_id = arena
            .nodes
            .get(&id)
            .ok_or(StoreError::MissingNode(id))?
            .parent_id;

        let removed = arena.subtree_ids(id);
        for node_id in &removed {
            arena.nodes.remove(node_id);
            arena.payloads.remove(node_id);
        }
        for node_id in &removed {
            arena.emit_payload(*node_id);
            arena.emit_children(*node_id);
        }
        if let Some(parent_id) = parent_id {
            arena.resequence(parent_id);
            arena.emit_children(parent_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::{Node, NodeKind, Payload};
    use crate::store::{NodeStore, StoreError};

    fn node(parent_id: Option<i64>, kind: NodeKind, order: i64, label: &str) -> Node {
        Node {
            id: 0,
            parent_id,
            kind,
            order,
            label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_kind_variant_mismatch() {
        let store = MemoryStore::new();
        let err = store
            .insert_node_and_payload(
                node(None, NodeKind::Directory, 0, "Root"),
                Payload::Note {
                    body: "not a directory".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_orders_children() {
        let store = MemoryStore::new();
        let root = store
            .insert_node_and_payload(node(None, NodeKind::Directory, 0, "Root"), Payload::directory())
            .await
            .unwrap();
        assert!(root.id > 0);

        let b = store
            .insert_node_and_payload(
                node(Some(root.id), NodeKind::Note, 1, "B"),
                Payload::Note {
                    body: String::new(),
                },
            )
            .await
            .unwrap();
        let a = store
            .insert_node_and_payload(
                node(Some(root.id), NodeKind::Note, 0, "A"),
                Payload::Note {
                    body: String::new(),
                },
            )
            .await
            .unwrap();

        let children = store.get_children(root.id).await.unwrap();
        assert_eq!(children[0].id, a.id);
        assert_eq!(children[1].id, b.id);
    }

    #[tokio::test]
    async fn recursive_delete_cascades_to_descendants() {
        let store = MemoryStore::new();
        let root = store
            .insert_node_and_payload(node(None, NodeKind::Directory, 0, "Root"), Payload::directory())
            .await
            .unwrap();
        let dir = store
            .insert_node_and_payload(
                node(Some(root.id), NodeKind::Directory, 0, "Dir"),
                Payload::directory(),
            )
            .await
            .unwrap();
        let leaf = store
            .insert_node_and_payload(
                node(Some(dir.id), NodeKind::Checkbox, 0, "Leaf"),
                Payload::Checkbox { checked: false },
            )
            .await
            .unwrap();

        store.delete_node_recursive(dir.id).await.unwrap();
        assert!(store.get_node(dir.id).await.unwrap().is_none());
        assert!(store.get_node(leaf.id).await.unwrap().is_none());
        assert!(store.get_payload(leaf.id).await.unwrap().is_none());
        assert!(store.get_children(root.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn children_subscription_reemits_on_insert() {
        let store = MemoryStore::new();
        let root = store
            .insert_node_and_payload(node(None, NodeKind::Directory, 0, "Root"), Payload::directory())
            .await
            .unwrap();

        let mut rx = store.subscribe_children(root.id).await;
        assert!(rx.borrow_and_update().is_empty());

        store
            .insert_node_and_payload(
                node(Some(root.id), NodeKind::Note, 0, "A"),
                Payload::Note {
                    body: String::new(),
                },
            )
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }
}
