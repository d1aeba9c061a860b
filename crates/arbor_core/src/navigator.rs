//! Stack-based tree browser cursor.
//!
//! # Responsibility
//! - Provide single-directory-at-a-time browsing for pickers.
//! - Resolve reference roots one hop before listing children.
//!
//! # Invariants
//! - The stack always holds the path from the initial root outward; the
//!   current root is the last element.
//! - Upward traversal never pops the last element and never escapes the
//!   initial root when containment is configured.

use crate::model::{Node, NodeId, NodeKind, Payload};
use crate::reference::resolve;
use crate::store::{NodeStore, StoreError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Errors from navigator operations.
#[derive(Debug)]
pub enum NavigatorError {
    /// The configured initial root does not exist.
    MissingRoot(NodeId),
    /// Structural store failure.
    Store(StoreError),
}

impl Display for NavigatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoot(id) => write!(f, "navigator root not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for NavigatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingRoot(_) => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for NavigatorError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Navigator behavior configuration, threaded in explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigatorConfig {
    /// Never traverse above the initial root.
    pub contain_to_initial_root: bool,
    /// Selecting a directory descends into it instead of selecting it.
    pub descend_into_directories: bool,
}

/// Last traversal direction, for transition-aware consumers.
///
/// Not behaviorally significant; purely presentation metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalDirection {
    #[default]
    None,
    Upward,
    Inward,
}

/// Outcome of [`TreeNavigator::select_node`].
#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    /// The navigator descended into the node.
    Descended,
    /// The node was selected; the caller decides what selection means.
    Selected(Node),
}

type VisibilityFilter = Box<dyn Fn(&Node) -> bool + Send + Sync>;

/// Stack-based cursor over the hierarchy.
pub struct TreeNavigator<S: NodeStore> {
    store: Arc<S>,
    stack: Vec<Node>,
    initial_root: NodeId,
    config: NavigatorConfig,
    direction: TraversalDirection,
    visibility: Option<VisibilityFilter>,
}

impl<S: NodeStore> TreeNavigator<S> {
    /// Creates a navigator rooted at `root_id`.
    ///
    /// # Errors
    /// Fails fast with [`NavigatorError::MissingRoot`] when the root does
    /// not exist.
    pub async fn new(
        store: Arc<S>,
        root_id: NodeId,
        config: NavigatorConfig,
    ) -> Result<Self, NavigatorError> {
        let root = store
            .get_node(root_id)
            .await?
            .ok_or(NavigatorError::MissingRoot(root_id))?;
        Ok(Self {
            store,
            stack: vec![root],
            initial_root: root_id,
            config,
            direction: TraversalDirection::None,
            visibility: None,
        })
    }

    /// Installs a predicate filtering listed children.
    ///
    /// Used by pickers to hide nodes that must not be offered, e.g. the
    /// node currently being edited from its own reference target picker.
    pub fn set_visibility_filter(
        &mut self,
        filter: impl Fn(&Node) -> bool + Send + Sync + 'static,
    ) {
        self.visibility = Some(Box::new(filter));
    }

    /// Returns the current root (last stack element).
    pub fn current_root(&self) -> &Node {
        // The stack is never empty: construction seeds it and pops stop at one.
        &self.stack[self.stack.len() - 1]
    }

    /// Returns the stack from initial root outward.
    pub fn stack(&self) -> &[Node] {
        &self.stack
    }

    /// Returns the last traversal direction.
    pub fn direction(&self) -> TraversalDirection {
        self.direction
    }

    /// Returns whether upward traversal is currently allowed.
    pub fn can_traverse_upward(&self) -> bool {
        if self.stack.len() <= 1 {
            return false;
        }
        if self.config.contain_to_initial_root && self.current_root().id == self.initial_root {
            return false;
        }
        true
    }

    /// Pushes one node and makes it the current root.
    pub fn traverse_inward(&mut self, node: Node) {
        self.stack.push(node);
        self.direction = TraversalDirection::Inward;
    }

    /// Pops the current root if allowed; no-op otherwise.
    pub fn traverse_upward(&mut self) -> bool {
        if !self.can_traverse_upward() {
            return false;
        }
        self.stack.pop();
        self.direction = TraversalDirection::Upward;
        true
    }

    /// Handles a tap on one listed node.
    ///
    /// Directories descend when the navigator is configured to auto-descend;
    /// everything else is reported back as a selection.
    pub async fn select_node(&mut self, node: Node) -> SelectOutcome {
        if self.config.descend_into_directories && node.kind.can_have_children() {
            self.traverse_inward(node);
            return SelectOutcome::Descended;
        }
        SelectOutcome::Selected(node)
    }

    /// Lists the immediate children of the current root.
    ///
    /// A Reference root lists its one-hop target's children; a broken
    /// reference lists nothing.
    pub async fn current_children(&self) -> Result<Vec<Node>, NavigatorError> {
        let current = self.current_root().clone();
        let list_parent = match current.kind {
            NodeKind::Reference => {
                let resolution = resolve(self.store.as_ref(), &current).await?;
                match resolution.target {
                    Some((target, Payload::Directory { .. })) => Some(target.id),
                    _ => None,
                }
            }
            NodeKind::Directory => Some(current.id),
            _ => None,
        };

        let Some(parent_id) = list_parent else {
            return Ok(Vec::new());
        };
        let mut children = self.store.get_children(parent_id).await?;
        if let Some(filter) = &self.visibility {
            children.retain(|child| filter(child));
        }
        Ok(children)
    }
}
