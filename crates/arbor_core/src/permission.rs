//! Directory permission model.
//!
//! # Responsibility
//! - Define the capability set a node exposes for mutation commands.
//! - Compute effective permissions along a depth-first walk of the tree.
//!
//! # Invariants
//! - Permissions only ever narrow going down the tree, never widen.
//! - A directory that lacks a `Recursive` grant for a kind strips both
//!   scopes of that kind from everything beneath it; a deeper directory
//!   cannot re-grant it.
//! - Absent data defaults to "no permission".

use crate::model::Payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Mutation command family gated by directory settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Create a new child item.
    Create,
    /// Delete an item.
    Delete,
    /// Edit an item's label or payload.
    Edit,
    /// Reorder an item among its siblings.
    Move,
    /// Move an item into this subtree from elsewhere.
    MoveIn,
    /// Move an item out of this subtree.
    MoveOut,
}

/// All permission kinds, in declaration order.
pub const ALL_PERMISSION_KINDS: [PermissionKind; 6] = [
    PermissionKind::Create,
    PermissionKind::Delete,
    PermissionKind::Edit,
    PermissionKind::Move,
    PermissionKind::MoveIn,
    PermissionKind::MoveOut,
];

/// Whether a grant applies to the node itself or propagates to descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Applies to the node itself only.
    OwnNode,
    /// Propagates to every descendant.
    Recursive,
}

/// Set of `(kind, scope)` grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMap {
    grants: BTreeSet<(PermissionKind, PermissionScope)>,
}

impl PermissionMap {
    /// Creates an empty map granting nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a map granting every kind at both scopes.
    pub fn full() -> Self {
        let mut grants = BTreeSet::new();
        for kind in ALL_PERMISSION_KINDS {
            grants.insert((kind, PermissionScope::OwnNode));
            grants.insert((kind, PermissionScope::Recursive));
        }
        Self { grants }
    }

    /// Adds one grant.
    pub fn grant(&mut self, kind: PermissionKind, scope: PermissionScope) -> &mut Self {
        self.grants.insert((kind, scope));
        self
    }

    /// Removes one grant.
    pub fn revoke(&mut self, kind: PermissionKind, scope: PermissionScope) -> &mut Self {
        self.grants.remove(&(kind, scope));
        self
    }

    /// Returns whether the exact `(kind, scope)` pair is granted.
    pub fn allows(&self, kind: PermissionKind, scope: PermissionScope) -> bool {
        self.grants.contains(&(kind, scope))
    }

    /// Returns whether every grant in `self` is also present in `other`.
    pub fn is_subset_of(&self, other: &PermissionMap) -> bool {
        self.grants.is_subset(&other.grants)
    }

    /// Keeps only grants present in both maps.
    fn intersect(&self, other: &PermissionMap) -> PermissionMap {
        PermissionMap {
            grants: self.grants.intersection(&other.grants).cloned().collect(),
        }
    }
}

/// Computes the permissions a row itself is subject to.
///
/// Non-directory payloads pass the inherited set through unchanged. A
/// directory keeps only the `(kind, scope)` pairs its own configured
/// permissions also grant.
pub fn effective_own_permissions(inherited: &PermissionMap, payload: &Payload) -> PermissionMap {
    match payload {
        Payload::Directory { permissions, .. } => inherited.intersect(permissions),
        _ => inherited.clone(),
    }
}

/// Computes the permissions a row's children inherit.
///
/// Only `Recursive` grants are consulted: a directory that does not grant
/// `Recursive` for a kind strips both scopes of that kind below it,
/// regardless of what a nested directory claims to grant.
pub fn effective_child_permissions(inherited: &PermissionMap, payload: &Payload) -> PermissionMap {
    let configured = match payload {
        Payload::Directory { permissions, .. } => permissions,
        _ => return inherited.clone(),
    };

    let mut result = inherited.clone();
    for kind in ALL_PERMISSION_KINDS {
        if !configured.allows(kind, PermissionScope::Recursive) {
            result.revoke(kind, PermissionScope::OwnNode);
            result.revoke(kind, PermissionScope::Recursive);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{
        effective_child_permissions, effective_own_permissions, PermissionKind, PermissionMap,
        PermissionScope, ALL_PERMISSION_KINDS,
    };
    use crate::model::{Payload, VisibilityPolicy};

    fn directory(permissions: PermissionMap) -> Payload {
        Payload::Directory {
            permissions,
            visibility: VisibilityPolicy::Preference,
            remembered_expanded: true,
        }
    }

    #[test]
    fn non_directory_payload_passes_permissions_through() {
        let inherited = PermissionMap::full();
        let payload = Payload::Note {
            body: "text".to_string(),
        };
        assert_eq!(effective_own_permissions(&inherited, &payload), inherited);
        assert_eq!(effective_child_permissions(&inherited, &payload), inherited);
    }

    #[test]
    fn own_permissions_intersect_with_configured_grants() {
        let mut configured = PermissionMap::empty();
        configured.grant(PermissionKind::Edit, PermissionScope::OwnNode);

        let own = effective_own_permissions(&PermissionMap::full(), &directory(configured));
        assert!(own.allows(PermissionKind::Edit, PermissionScope::OwnNode));
        assert!(!own.allows(PermissionKind::Edit, PermissionScope::Recursive));
        assert!(!own.allows(PermissionKind::Delete, PermissionScope::OwnNode));
    }

    #[test]
    fn missing_recursive_grant_strips_both_scopes_below() {
        let mut configured = PermissionMap::full();
        configured.revoke(PermissionKind::Delete, PermissionScope::Recursive);

        let child = effective_child_permissions(&PermissionMap::full(), &directory(configured));
        assert!(!child.allows(PermissionKind::Delete, PermissionScope::OwnNode));
        assert!(!child.allows(PermissionKind::Delete, PermissionScope::Recursive));
        assert!(child.allows(PermissionKind::Edit, PermissionScope::OwnNode));
    }

    #[test]
    fn recursive_revocation_cannot_be_regranted_deeper() {
        let mut outer = PermissionMap::full();
        outer.revoke(PermissionKind::Create, PermissionScope::Recursive);

        let below_outer = effective_child_permissions(&PermissionMap::full(), &directory(outer));
        // A nested directory granting everything cannot restore Create.
        let below_inner =
            effective_child_permissions(&below_outer, &directory(PermissionMap::full()));
        assert!(!below_inner.allows(PermissionKind::Create, PermissionScope::OwnNode));
        assert!(!below_inner.allows(PermissionKind::Create, PermissionScope::Recursive));
    }

    #[test]
    fn permissions_never_widen_with_depth() {
        let mut configured = PermissionMap::full();
        configured.revoke(PermissionKind::Move, PermissionScope::Recursive);
        configured.revoke(PermissionKind::Edit, PermissionScope::OwnNode);
        let payload = directory(configured);

        let inherited = PermissionMap::full();
        let own = effective_own_permissions(&inherited, &payload);
        let child = effective_child_permissions(&inherited, &payload);
        assert!(own.is_subset_of(&inherited));
        assert!(child.is_subset_of(&inherited));

        let grandchild = effective_child_permissions(&child, &directory(PermissionMap::full()));
        assert!(grandchild.is_subset_of(&child));
    }

    #[test]
    fn empty_map_defaults_to_no_permission() {
        let empty = PermissionMap::empty();
        for kind in ALL_PERMISSION_KINDS {
            assert!(!empty.allows(kind, PermissionScope::OwnNode));
            assert!(!empty.allows(kind, PermissionScope::Recursive));
        }
    }
}
