use arbor_core::{
    MemoryStore, Node, NodeKind, NodeStore, Payload, PermissionKind, PermissionMap,
    PermissionScope, RowSubscription, TreeRowKey, TreeRowState, TreeViewEngine, ViewError,
    VisibilityPolicy,
};
use std::sync::Arc;
use std::time::Duration;

async fn insert(
    store: &MemoryStore,
    parent_id: Option<i64>,
    kind: NodeKind,
    order: i64,
    label: &str,
    payload: Payload,
) -> Node {
    store
        .insert_node_and_payload(
            Node {
                id: 0,
                parent_id,
                kind,
                order,
                label: label.to_string(),
            },
            payload,
        )
        .await
        .unwrap()
}

fn note() -> Payload {
    Payload::Note {
        body: String::new(),
    }
}

fn directory_with(visibility: VisibilityPolicy, remembered_expanded: bool) -> Payload {
    Payload::Directory {
        permissions: PermissionMap::full(),
        visibility,
        remembered_expanded,
    }
}

/// Waits until the subscription emits a row list satisfying `predicate`.
async fn wait_for(
    sub: &mut RowSubscription<MemoryStore>,
    predicate: impl Fn(&[TreeRowState]) -> bool,
) -> Vec<TreeRowState> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let rows = sub.rows();
            if predicate(&rows) {
                return rows;
            }
            assert!(sub.changed().await, "row stream closed unexpectedly");
        }
    })
    .await
    .expect("timed out waiting for view emission")
}

#[tokio::test]
async fn missing_root_fails_fast() {
    let store = Arc::new(MemoryStore::new());
    let engine = TreeViewEngine::new(store);
    let err = engine.subscribe_root(404).await.err().expect("must fail");
    assert!(matches!(err, ViewError::MissingRoot(404)));
}

#[tokio::test]
async fn flattened_rows_follow_order_and_depth() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        Payload::directory(),
    )
    .await;
    let later = insert(&store, Some(root.id), NodeKind::Note, 1, "Later", note()).await;
    let inner = insert(&store, Some(dir.id), NodeKind::Checkbox, 0, "Inner", Payload::Checkbox {
        checked: false,
    })
    .await;

    let engine = TreeViewEngine::new(store);
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 3).await;

    let summary: Vec<(i64, i32)> = rows.iter().map(|row| (row.node.id, row.key.depth)).collect();
    assert_eq!(summary, vec![(dir.id, 0), (inner.id, 1), (later.id, 0)]);
}

#[tokio::test]
async fn insert_reemits_in_sibling_order() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let first = insert(&store, Some(root.id), NodeKind::Note, 0, "First", note()).await;
    let third = insert(&store, Some(root.id), NodeKind::Note, 4, "Third", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| rows.len() == 2).await;

    let second = insert(&store, Some(root.id), NodeKind::Note, 2, "Second", note()).await;
    let rows = wait_for(&mut sub, |rows| rows.len() == 3).await;
    let ids: Vec<i64> = rows.iter().map(|row| row.node.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);
}

#[tokio::test]
async fn identical_input_produces_identical_sequence() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    insert(&store, Some(root.id), NodeKind::Note, 0, "A", note()).await;
    insert(&store, Some(root.id), NodeKind::Note, 1, "B", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut first = engine.subscribe_root(root.id).await.unwrap();
    let rows_before = wait_for(&mut first, |rows| rows.len() == 2).await;

    // A second subscription shares the same live computation.
    let second = engine.subscribe_root(root.id).await.unwrap();
    assert_eq!(second.rows(), rows_before);

    // No underlying change: the latest emission is byte-for-byte the same.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.rows(), rows_before);
}

#[tokio::test]
async fn collapse_hides_subtree_rows() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        Payload::directory(),
    )
    .await;
    insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| rows.len() == 2).await;

    let dir_key = TreeRowKey {
        node_id: dir.id,
        depth: 0,
    };
    engine.toggle_collapse(dir_key);
    let rows = wait_for(&mut sub, |rows| rows.len() == 1).await;
    assert_eq!(rows[0].node.id, dir.id);
    assert_eq!(rows[0].expanded, Some(false));

    engine.toggle_collapse(dir_key);
    wait_for(&mut sub, |rows| rows.len() == 2).await;
}

#[tokio::test]
async fn remember_policy_round_trips_collapse_state() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        directory_with(VisibilityPolicy::Remember, true),
    )
    .await;
    insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| rows.len() == 2).await;

    engine.toggle_collapse(TreeRowKey {
        node_id: dir.id,
        depth: 0,
    });
    wait_for(&mut sub, |rows| rows.len() == 1).await;

    // The write-back is fire-and-forget; poll the store for it.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Payload::Directory {
                remembered_expanded: false,
                ..
            }) = store.get_payload(dir.id).await.unwrap()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("collapse state was never persisted");

    // A fresh engine reproduces the persisted collapsed state.
    drop(sub);
    let fresh = TreeViewEngine::new(Arc::clone(&store));
    let mut fresh_sub = fresh.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut fresh_sub, |rows| rows.len() == 1).await;
    assert_eq!(rows[0].expanded, Some(false));
}

#[tokio::test]
async fn fixed_policies_never_persist_toggles() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        directory_with(VisibilityPolicy::Collapsed, true),
    )
    .await;
    insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    // Collapsed policy: only the directory row is visible initially.
    let rows = wait_for(&mut sub, |rows| rows.len() == 1).await;
    assert_eq!(rows[0].expanded, Some(false));

    engine.toggle_collapse(TreeRowKey {
        node_id: dir.id,
        depth: 0,
    });
    wait_for(&mut sub, |rows| rows.len() == 2).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    match store.get_payload(dir.id).await.unwrap() {
        Some(Payload::Directory {
            remembered_expanded,
            ..
        }) => assert!(remembered_expanded, "fixed policy must not write back"),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn broken_reference_renders_underlying_appearance() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let reference = insert(
        &store,
        Some(root.id),
        NodeKind::Reference,
        0,
        "Broken",
        Payload::Reference { target_id: None },
    )
    .await;

    let engine = TreeViewEngine::new(store);
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 1).await;

    assert_eq!(rows[0].node.id, reference.id);
    assert!(rows[0].resolved.is_none());
    assert_eq!(rows[0].appearance.icon, "reference");
    assert_eq!(rows[0].expanded, None);
}

#[tokio::test]
async fn reference_to_directory_shows_target_children() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        Payload::directory(),
    )
    .await;
    let inner = insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;
    let reference = insert(
        &store,
        Some(root.id),
        NodeKind::Reference,
        1,
        "Ref",
        Payload::Reference {
            target_id: Some(dir.id),
        },
    )
    .await;

    let engine = TreeViewEngine::new(store);
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    // dir + inner + ref + inner-through-ref
    let rows = wait_for(&mut sub, |rows| rows.len() == 4).await;

    let ids: Vec<i64> = rows.iter().map(|row| row.node.id).collect();
    assert_eq!(ids, vec![dir.id, inner.id, reference.id, inner.id]);
    // The reference row displays its target.
    let reference_row = &rows[2];
    assert_eq!(reference_row.resolved.as_ref().map(|(n, _)| n.id), Some(dir.id));
    assert_eq!(reference_row.appearance.icon, "directory");
}

#[tokio::test]
async fn target_deletion_breaks_the_reference_live() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let target = insert(&store, Some(root.id), NodeKind::Note, 0, "Target", note()).await;
    let reference = insert(
        &store,
        Some(root.id),
        NodeKind::Reference,
        1,
        "Ref",
        Payload::Reference {
            target_id: Some(target.id),
        },
    )
    .await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| {
        rows.len() == 2 && rows[1].resolved.is_some()
    })
    .await;

    store.delete_node_recursive(target.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| {
        rows.len() == 1 && rows[0].resolved.is_none()
    })
    .await;
    assert_eq!(rows[0].node.id, reference.id);
}

#[tokio::test]
async fn deleting_a_directory_cascades_out_of_the_view() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        Payload::directory(),
    )
    .await;
    insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;
    let keeper = insert(&store, Some(root.id), NodeKind::Note, 1, "Keeper", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| rows.len() == 3).await;

    store.delete_node_recursive(dir.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 1).await;
    assert_eq!(rows[0].node.id, keeper.id);
}

#[tokio::test]
async fn permissions_narrow_going_down() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;

    let mut restricted = PermissionMap::full();
    restricted.revoke(PermissionKind::Delete, PermissionScope::Recursive);
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Restricted",
        Payload::Directory {
            permissions: restricted,
            visibility: VisibilityPolicy::Preference,
            remembered_expanded: true,
        },
    )
    .await;
    let inner = insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;

    let engine = TreeViewEngine::new(store);
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 2).await;

    let dir_row = rows.iter().find(|row| row.node.id == dir.id).unwrap();
    let inner_row = rows.iter().find(|row| row.node.id == inner.id).unwrap();
    assert!(inner_row.permissions.is_subset_of(&dir_row.permissions));
    assert!(!inner_row
        .permissions
        .allows(PermissionKind::Delete, PermissionScope::OwnNode));
    assert!(!inner_row
        .permissions
        .allows(PermissionKind::Delete, PermissionScope::Recursive));
}

#[tokio::test]
async fn permission_edits_reach_live_descendant_rows() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let dir = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Dir",
        Payload::directory(),
    )
    .await;
    let note = insert(&store, Some(dir.id), NodeKind::Note, 0, "Inner", note()).await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 2).await;
    let note_row = rows.iter().find(|row| row.node.id == note.id).unwrap();
    assert!(note_row
        .permissions
        .allows(PermissionKind::Delete, PermissionScope::OwnNode));

    // Revoking the directory's recursive Delete grant must narrow the
    // already-live note row, not just rows subscribed afterwards.
    let mut restricted = PermissionMap::full();
    restricted.revoke(PermissionKind::Delete, PermissionScope::Recursive);
    store
        .update_payload(
            dir.id,
            Payload::Directory {
                permissions: restricted,
                visibility: VisibilityPolicy::Preference,
                remembered_expanded: true,
            },
        )
        .await
        .unwrap();

    let rows = wait_for(&mut sub, |rows| {
        rows.iter().any(|row| {
            row.node.id == note.id
                && !row
                    .permissions
                    .allows(PermissionKind::Delete, PermissionScope::OwnNode)
        })
    })
    .await;
    let note_row = rows.iter().find(|row| row.node.id == note.id).unwrap();
    assert!(!note_row
        .permissions
        .allows(PermissionKind::Delete, PermissionScope::Recursive));
    let dir_row = rows.iter().find(|row| row.node.id == dir.id).unwrap();
    assert!(note_row.permissions.is_subset_of(&dir_row.permissions));
}

#[tokio::test]
async fn nested_toggle_survives_parent_collapse_cycle() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let outer = insert(
        &store,
        Some(root.id),
        NodeKind::Directory,
        0,
        "Outer",
        Payload::directory(),
    )
    .await;
    let inner = insert(
        &store,
        Some(outer.id),
        NodeKind::Directory,
        0,
        "Inner",
        Payload::directory(),
    )
    .await;
    insert(&store, Some(inner.id), NodeKind::Note, 0, "Leaf", note()).await;

    let engine = TreeViewEngine::new(store);
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    wait_for(&mut sub, |rows| rows.len() == 3).await;

    let inner_key = TreeRowKey {
        node_id: inner.id,
        depth: 1,
    };
    engine.toggle_collapse(inner_key);
    wait_for(&mut sub, |rows| rows.len() == 2).await;

    // Collapsing the outer directory tears the inner row down; re-expanding
    // must bring it back still collapsed.
    let outer_key = TreeRowKey {
        node_id: outer.id,
        depth: 0,
    };
    engine.toggle_collapse(outer_key);
    wait_for(&mut sub, |rows| rows.len() == 1).await;
    engine.toggle_collapse(outer_key);
    let rows = wait_for(&mut sub, |rows| rows.len() == 2).await;
    let inner_row = rows.iter().find(|row| row.node.id == inner.id).unwrap();
    assert_eq!(inner_row.expanded, Some(false));
}

#[tokio::test]
async fn checkbox_payload_update_reemits_appearance() {
    let store = Arc::new(MemoryStore::new());
    let root = insert(&store, None, NodeKind::Directory, 0, "Root", Payload::directory()).await;
    let checkbox = insert(
        &store,
        Some(root.id),
        NodeKind::Checkbox,
        0,
        "Todo",
        Payload::Checkbox { checked: false },
    )
    .await;

    let engine = TreeViewEngine::new(Arc::clone(&store));
    let mut sub = engine.subscribe_root(root.id).await.unwrap();
    let rows = wait_for(&mut sub, |rows| rows.len() == 1).await;
    assert!(!rows[0].appearance.strikethrough);

    store
        .update_payload(checkbox.id, Payload::Checkbox { checked: true })
        .await
        .unwrap();
    let rows = wait_for(&mut sub, |rows| {
        rows.len() == 1 && rows[0].appearance.strikethrough
    })
    .await;
    assert_eq!(rows[0].node.id, checkbox.id);
}
