//! Reactive tree view engine.
//!
//! # Responsibility
//! - Maintain one shared live row stream per `(node_id, depth)` key.
//! - Recompute affected subtrees incrementally on store changes.
//! - Own ephemeral collapse state and its `Remember` write-back.
//!
//! # Invariants
//! - Keys move Idle -> Live on first subscription and Live -> Torn-down
//!   when their reference count drops to zero; teardown aborts the key's
//!   task, stopping in-flight child-stream construction.
//! - Concurrent subscriptions to one key share one task and one channel.
//! - Children are emitted sorted by `(order, id)`; an unchanged input
//!   never produces a new emission.
//! - Every emission is composed from complete store snapshots; recompute
//!   is latest-wins through watch-channel coalescing.
//! - A parent recompute pushes refreshed node records and inherited
//!   permission sets into its kept child rows.
//! - Collapse write-backs are serialized per payload id.

use crate::model::node::sort_siblings;
use crate::model::payload::appearance_for;
use crate::model::{Node, NodeId, Payload, VisibilityPolicy};
use crate::permission::{
    effective_child_permissions, effective_own_permissions, PermissionMap,
};
use crate::store::{NodeStore, StoreError};
use crate::view::row::{TreeRowKey, TreeRowState};
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{StreamExt, StreamMap};

/// Errors from view subscriptions.
#[derive(Debug)]
pub enum ViewError {
    /// The configured root id does not resolve to an existing node.
    ///
    /// A missing root indicates caller or store corruption, not a
    /// legitimate empty tree, so the subscription fails fast.
    MissingRoot(NodeId),
    /// Structural store failure.
    Store(StoreError),
}

impl Display for ViewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoot(id) => write!(f, "view root not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ViewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingRoot(_) => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for ViewError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

struct SharedRow {
    refcount: usize,
    seed_rx: watch::Receiver<Vec<TreeRowState>>,
    node_tx: watch::Sender<Node>,
    perm_tx: watch::Sender<PermissionMap>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

struct CollapseEntry {
    expanded: bool,
    policy: VisibilityPolicy,
    /// Node id owning the directory payload the state belongs to; for
    /// reference rows this is the resolved target, not the reference.
    payload_node_id: NodeId,
}

struct EngineInner<S: NodeStore + 'static> {
    store: Arc<S>,
    table: Mutex<HashMap<TreeRowKey, SharedRow>>,
    /// Collapse state per observed key. Entries are retained across row
    /// teardown so a toggle survives its parent collapsing and re-expanding;
    /// the map is bounded by the distinct keys observed over the engine's
    /// lifetime.
    collapse: Mutex<HashMap<TreeRowKey, CollapseEntry>>,
    /// Per-payload-id write serialization; the last writer out removes the
    /// entry again.
    write_locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Shared-subscription engine over one store.
pub struct TreeViewEngine<S: NodeStore + 'static> {
    inner: Arc<EngineInner<S>>,
}

impl<S: NodeStore + 'static> TreeViewEngine<S> {
    /// Creates an engine over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                table: Mutex::new(HashMap::new()),
                collapse: Mutex::new(HashMap::new()),
                write_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes to the flattened row list below `root_id`.
    ///
    /// The root itself is a synthetic invisible row at depth `-1`; emitted
    /// rows start with its children at depth `0`. Permissions start from a
    /// fully permissive set and only narrow on the way down.
    ///
    /// # Errors
    /// Fails fast with [`ViewError::MissingRoot`] when `root_id` does not
    /// exist.
    pub async fn subscribe_root(&self, root_id: NodeId) -> Result<RowSubscription<S>, ViewError> {
        let root = self
            .inner
            .store
            .get_node(root_id)
            .await?
            .ok_or(ViewError::MissingRoot(root_id))?;
        let key = TreeRowKey {
            node_id: root_id,
            depth: -1,
        };
        Ok(self.inner.subscribe_row(key, root, PermissionMap::full()))
    }

    /// Toggles the collapse state of one key.
    ///
    /// This is the view half of activating a collapsible row. No-op for
    /// keys that have never been observed. When the directory's policy is
    /// `Remember`, the new value is also written back to the store,
    /// fire-and-forget, serialized per payload id.
    pub fn toggle_collapse(&self, key: TreeRowKey) {
        self.inner.toggle_collapse(key);
    }

    /// Returns the current collapse state of one observed key.
    pub fn is_expanded(&self, key: TreeRowKey) -> Option<bool> {
        lock(&self.inner.collapse).get(&key).map(|entry| entry.expanded)
    }
}

/// Live handle on one key's row stream.
///
/// Dropping the subscription releases the key; the last drop tears the
/// key down and aborts its task.
pub struct RowSubscription<S: NodeStore + 'static> {
    key: TreeRowKey,
    rx: watch::Receiver<Vec<TreeRowState>>,
    inner: Arc<EngineInner<S>>,
}

impl<S: NodeStore + 'static> RowSubscription<S> {
    /// Returns the subscribed key.
    pub fn key(&self) -> TreeRowKey {
        self.key
    }

    /// Returns the latest emitted row list.
    pub fn rows(&self) -> Vec<TreeRowState> {
        self.rx.borrow().clone()
    }

    /// Returns a fresh receiver on the same stream.
    pub fn receiver(&self) -> watch::Receiver<Vec<TreeRowState>> {
        self.rx.clone()
    }

    /// Waits for the next emission.
    ///
    /// Returns `false` when the stream has closed (the key's task failed
    /// or was torn down).
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

impl<S: NodeStore + 'static> Drop for RowSubscription<S> {
    fn drop(&mut self) {
        self.inner.release_row(self.key);
    }
}

impl<S: NodeStore + 'static> EngineInner<S> {
    fn subscribe_row(
        self: &Arc<Self>,
        key: TreeRowKey,
        node: Node,
        inherited: PermissionMap,
    ) -> RowSubscription<S> {
        let mut table = lock(&self.table);
        if let Some(entry) = table.get_mut(&key) {
            entry.refcount += 1;
            entry.node_tx.send_if_modified(|current| {
                if *current == node {
                    false
                } else {
                    *current = node;
                    true
                }
            });
            entry.perm_tx.send_if_modified(|current| {
                if *current == inherited {
                    false
                } else {
                    *current = inherited;
                    true
                }
            });
            return RowSubscription {
                key,
                rx: entry.seed_rx.clone(),
                inner: Arc::clone(self),
            };
        }

        debug!(
            "event=row_live module=view node_id={} depth={}",
            key.node_id, key.depth
        );
        let (row_tx, seed_rx) = watch::channel(Vec::new());
        let (node_tx, node_rx) = watch::channel(node);
        let (perm_tx, perm_rx) = watch::channel(inherited);
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run_row(
            Arc::clone(self),
            key,
            node_rx,
            perm_rx,
            row_tx,
            Arc::clone(&wake),
        ));
        table.insert(
            key,
            SharedRow {
                refcount: 1,
                seed_rx: seed_rx.clone(),
                node_tx,
                perm_tx,
                wake,
                task,
            },
        );
        RowSubscription {
            key,
            rx: seed_rx,
            inner: Arc::clone(self),
        }
    }

    fn release_row(&self, key: TreeRowKey) {
        let mut table = lock(&self.table);
        let torn_down = match table.get_mut(&key) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => false,
        };
        if torn_down {
            if let Some(entry) = table.remove(&key) {
                entry.task.abort();
                debug!(
                    "event=row_torn_down module=view node_id={} depth={}",
                    key.node_id, key.depth
                );
            }
        }
    }

    fn push_node_update(&self, key: TreeRowKey, node: Node) {
        if let Some(entry) = lock(&self.table).get(&key) {
            entry.node_tx.send_if_modified(|current| {
                if *current == node {
                    false
                } else {
                    *current = node;
                    true
                }
            });
        }
    }

    fn push_permission_update(&self, key: TreeRowKey, inherited: PermissionMap) {
        if let Some(entry) = lock(&self.table).get(&key) {
            entry.perm_tx.send_if_modified(|current| {
                if *current == inherited {
                    false
                } else {
                    *current = inherited;
                    true
                }
            });
        }
    }

    /// Returns the collapse state for a key, seeding it from the payload's
    /// visibility policy the first time the key is observed.
    fn observe_collapse(
        &self,
        key: TreeRowKey,
        policy: VisibilityPolicy,
        remembered: bool,
        payload_node_id: NodeId,
    ) -> bool {
        let mut collapse = lock(&self.collapse);
        let entry = collapse.entry(key).or_insert_with(|| CollapseEntry {
            expanded: default_expanded(policy, remembered),
            policy,
            payload_node_id,
        });
        // Policy edits apply to future defaults and write-backs, but never
        // clobber the user's ephemeral toggle.
        entry.policy = policy;
        entry.payload_node_id = payload_node_id;
        entry.expanded
    }

    fn toggle_collapse(self: &Arc<Self>, key: TreeRowKey) {
        let toggled = {
            let mut collapse = lock(&self.collapse);
            match collapse.get_mut(&key) {
                Some(entry) => {
                    entry.expanded = !entry.expanded;
                    Some((entry.policy, entry.payload_node_id))
                }
                None => None,
            }
        };
        let Some((policy, payload_node_id)) = toggled else {
            return;
        };

        if let Some(entry) = lock(&self.table).get(&key) {
            entry.wake.notify_one();
        }
        if policy == VisibilityPolicy::Remember {
            self.spawn_collapse_write_back(key, payload_node_id);
        }
    }

    /// Persists the current collapse value of `key`, serialized per payload
    /// id so two toggles never race on the same flag.
    fn spawn_collapse_write_back(self: &Arc<Self>, key: TreeRowKey, payload_node_id: NodeId) {
        let write_lock = Arc::clone(
            lock(&self.write_locks)
                .entry(payload_node_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let guard = write_lock.lock().await;
            // Read the desired value after acquiring the per-id lock, so an
            // out-of-order acquisition still writes the latest state.
            let desired = lock(&inner.collapse).get(&key).map(|entry| entry.expanded);
            if let Some(desired) = desired {
                Self::write_back(&inner, payload_node_id, desired).await;
            }

            drop(guard);
            let mut locks = lock(&inner.write_locks);
            if let Some(entry) = locks.get(&payload_node_id) {
                // A queued writer holds another clone and keeps the entry
                // alive; otherwise only the map and this task do.
                if Arc::strong_count(entry) == 2 {
                    locks.remove(&payload_node_id);
                }
            }
        });
    }

    async fn write_back(inner: &Arc<Self>, payload_node_id: NodeId, desired: bool) {
        match inner.store.get_payload(payload_node_id).await {
            Ok(Some(Payload::Directory {
                permissions,
                visibility,
                ..
            })) => {
                let updated = Payload::Directory {
                    permissions,
                    visibility,
                    remembered_expanded: desired,
                };
                match inner.store.update_payload(payload_node_id, updated).await {
                    Ok(()) => debug!(
                        "event=collapse_persisted module=view node_id={payload_node_id} expanded={desired}"
                    ),
                    Err(err) => warn!(
                        "event=collapse_write_back_failed module=view node_id={payload_node_id} error={err}"
                    ),
                }
            }
            Ok(_) => warn!(
                "event=collapse_write_back_skipped module=view node_id={payload_node_id} reason=not_directory"
            ),
            Err(err) => warn!(
                "event=collapse_write_back_failed module=view node_id={payload_node_id} error={err}"
            ),
        }
    }
}

fn default_expanded(policy: VisibilityPolicy, remembered: bool) -> bool {
    match policy {
        VisibilityPolicy::Preference => true,
        VisibilityPolicy::Expanded => true,
        VisibilityPolicy::Collapsed => false,
        VisibilityPolicy::Remember => remembered,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Child-subtree subscriptions held by one live row.
struct ChildTracker<S: NodeStore + 'static> {
    parent_id: NodeId,
    rx: watch::Receiver<Vec<Node>>,
    subs: HashMap<TreeRowKey, RowSubscription<S>>,
    streams: StreamMap<TreeRowKey, WatchStream<Vec<TreeRowState>>>,
    nodes: Vec<Node>,
}

impl<S: NodeStore + 'static> ChildTracker<S> {
    async fn new(inner: &Arc<EngineInner<S>>, parent_id: NodeId) -> Self {
        Self {
            parent_id,
            rx: inner.store.subscribe_children(parent_id).await,
            subs: HashMap::new(),
            streams: StreamMap::new(),
            nodes: Vec::new(),
        }
    }

    /// Aligns live child subscriptions with the desired child list.
    ///
    /// Kept children get their node record and inherited permission set
    /// refreshed; removed children are released (tearing their subtree
    /// down); new children go Live. The child streams of unchanged keys are
    /// reused, never rebuilt.
    fn sync(
        &mut self,
        inner: &Arc<EngineInner<S>>,
        depth: i32,
        desired: Vec<Node>,
        inherited: &PermissionMap,
    ) {
        let desired_keys: HashSet<TreeRowKey> = desired
            .iter()
            .map(|node| TreeRowKey {
                node_id: node.id,
                depth,
            })
            .collect();

        let removed: Vec<TreeRowKey> = self
            .subs
            .keys()
            .filter(|key| !desired_keys.contains(key))
            .copied()
            .collect();
        for key in removed {
            self.subs.remove(&key);
            self.streams.remove(&key);
        }

        for node in &desired {
            let key = TreeRowKey {
                node_id: node.id,
                depth,
            };
            if self.subs.contains_key(&key) {
                inner.push_node_update(key, node.clone());
                inner.push_permission_update(key, inherited.clone());
            } else {
                let sub = inner.subscribe_row(key, node.clone(), inherited.clone());
                self.streams.insert(key, WatchStream::new(sub.receiver()));
                self.subs.insert(key, sub);
            }
        }
        self.nodes = desired;
    }
}

async fn run_row<S: NodeStore + 'static>(
    inner: Arc<EngineInner<S>>,
    key: TreeRowKey,
    node_rx: watch::Receiver<Node>,
    perm_rx: watch::Receiver<PermissionMap>,
    row_tx: watch::Sender<Vec<TreeRowState>>,
    wake: Arc<Notify>,
) {
    if let Err(err) = row_loop(&inner, key, node_rx, perm_rx, &row_tx, &wake).await {
        // Dropping the sender closes the stream; parents drop the row.
        error!(
            "event=row_stream_failed module=view node_id={} depth={} error={err}",
            key.node_id, key.depth
        );
    }
}

async fn row_loop<S: NodeStore + 'static>(
    inner: &Arc<EngineInner<S>>,
    key: TreeRowKey,
    mut node_rx: watch::Receiver<Node>,
    mut perm_rx: watch::Receiver<PermissionMap>,
    row_tx: &watch::Sender<Vec<TreeRowState>>,
    wake: &Notify,
) -> Result<(), ViewError> {
    let mut payload_rx = inner.store.subscribe_payload(key.node_id).await;
    let mut target_rx: Option<(NodeId, watch::Receiver<Option<Payload>>)> = None;
    let mut children: Option<ChildTracker<S>> = None;

    loop {
        let node = node_rx.borrow_and_update().clone();
        let inherited = perm_rx.borrow_and_update().clone();
        let payload = payload_rx
            .borrow_and_update()
            .clone()
            .ok_or(StoreError::MissingPayload(key.node_id))?;
        if payload.kind() != node.kind {
            return Err(StoreError::KindMismatch {
                node_id: node.id,
                node_kind: node.kind,
                payload_kind: payload.kind(),
            }
            .into());
        }

        // One-hop resolution against the current payload snapshot. A target
        // that vanished mid-read is rendered as a broken reference rather
        // than failing the stream.
        let resolved: Option<(Node, Payload)> = match &payload {
            Payload::Reference { target_id } => match target_id {
                None => None,
                Some(target_id) => match inner.store.get_node(*target_id).await? {
                    None => None,
                    Some(target_node) => {
                        match inner.store.get_payload(target_node.id).await? {
                            None => None,
                            Some(target_payload) => {
                                if target_payload.kind() != target_node.kind {
                                    return Err(StoreError::KindMismatch {
                                        node_id: target_node.id,
                                        node_kind: target_node.kind,
                                        payload_kind: target_payload.kind(),
                                    }
                                    .into());
                                }
                                Some((target_node, target_payload))
                            }
                        }
                    }
                },
            },
            other => Some((node.clone(), other.clone())),
        };

        // Track the reference target's payload so edits and deletions of
        // the target re-emit this row.
        let watch_target = match &payload {
            Payload::Reference { target_id } => *target_id,
            _ => None,
        };
        match (watch_target, &mut target_rx) {
            (Some(target_id), Some((current, rx))) if *current == target_id => {
                rx.borrow_and_update();
            }
            (Some(target_id), slot) => {
                *slot = Some((target_id, inner.store.subscribe_payload(target_id).await));
            }
            (None, slot) => *slot = None,
        }

        let (display_node_id, display_payload) = match &resolved {
            Some((display_node, display_payload)) => (display_node.id, display_payload),
            None => (node.id, &payload),
        };
        let own_permissions = effective_own_permissions(&inherited, display_payload);
        let appearance = appearance_for(display_payload);

        let expanded = match display_payload {
            Payload::Directory {
                visibility,
                remembered_expanded,
                ..
            } => Some(inner.observe_collapse(key, *visibility, *remembered_expanded, display_node_id)),
            _ => None,
        };
        // The synthetic root is invisible and always expanded.
        let children_visible = key.depth < 0 || expanded.unwrap_or(false);

        let is_container = matches!(display_payload, Payload::Directory { .. });
        if is_container {
            let reuse = matches!(&children, Some(tracker) if tracker.parent_id == display_node_id);
            if !reuse {
                children = Some(ChildTracker::new(inner, display_node_id).await);
            }
        } else {
            children = None;
        }

        if let Some(tracker) = &mut children {
            let desired = if children_visible {
                let mut list = tracker.rx.borrow_and_update().clone();
                sort_siblings(&mut list);
                list
            } else {
                // Collapsed rows tear their child subtrees down; keys no
                // longer present in the emission are released.
                tracker.rx.borrow_and_update();
                Vec::new()
            };
            let child_permissions = effective_child_permissions(&inherited, display_payload);
            tracker.sync(inner, key.depth + 1, desired, &child_permissions);
        }

        let mut rows: Vec<TreeRowState> = Vec::new();
        if key.depth >= 0 {
            rows.push(TreeRowState {
                key,
                node: node.clone(),
                payload: payload.clone(),
                resolved: resolved.clone(),
                permissions: own_permissions,
                appearance,
                expanded,
            });
        }

        // Compose from the latest emission of each child stream. A child
        // that has not produced its first list yet defers this emission so
        // consumers never observe a partially materialized subtree.
        let mut awaiting_child = false;
        if children_visible {
            if let Some(tracker) = &children {
                for child in &tracker.nodes {
                    let child_key = TreeRowKey {
                        node_id: child.id,
                        depth: key.depth + 1,
                    };
                    let Some(sub) = tracker.subs.get(&child_key) else {
                        continue;
                    };
                    let latest = sub.rows();
                    if latest.is_empty() {
                        if sub.is_closed() {
                            // The child stream failed; its subtree is dropped
                            // from the composition rather than wedging it.
                            continue;
                        }
                        awaiting_child = true;
                        break;
                    }
                    rows.extend(latest);
                }
            }
        }
        if !awaiting_child {
            row_tx.send_if_modified(|current| {
                if *current == rows {
                    false
                } else {
                    *current = rows;
                    true
                }
            });
        }

        // Suspend until any input changes. Watch channels coalesce to the
        // latest value, so a burst of store mutations recomputes once per
        // observed snapshot, latest-wins.
        match &mut children {
            Some(tracker) => {
                let ChildTracker { rx, streams, .. } = tracker;
                tokio::select! {
                    changed = node_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    changed = payload_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    changed = perm_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    Some(_) = streams.next() => {}
                    _ = target_changed(&mut target_rx) => {}
                    _ = wake.notified() => {}
                }
            }
            None => {
                tokio::select! {
                    changed = node_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    changed = payload_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    changed = perm_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    _ = target_changed(&mut target_rx) => {}
                    _ = wake.notified() => {}
                }
            }
        }
    }
}

async fn target_changed(slot: &mut Option<(NodeId, watch::Receiver<Option<Payload>>)>) {
    match slot {
        Some((_, rx)) => {
            let _ = rx.changed().await;
        }
        None => std::future::pending().await,
    }
}
