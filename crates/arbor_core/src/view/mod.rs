//! Live flattened tree view.
//!
//! The engine turns a subscribed root into an ordered, depth-annotated,
//! permission-aware row list that updates incrementally as the underlying
//! store changes.

pub mod engine;
pub mod row;

pub use engine::{RowSubscription, TreeViewEngine, ViewError};
pub use row::{TreeRowKey, TreeRowState};
