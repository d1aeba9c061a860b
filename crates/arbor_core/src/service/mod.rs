//! Use-case services above the store contract.

pub mod commands;

pub use commands::{CommandError, TreeCommandService};
