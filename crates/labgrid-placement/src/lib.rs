//! labgrid-placement: decides which cluster node hosts a table.
//!
//! This crate only makes the placement decision. It never talks to the
//! cluster; the orchestrator feeds it the current set of online nodes and
//! acts on the answer.
//!
//! # Components
//!
//! - **`selector`**: table number → node, stable across calls and restarts

pub mod selector;

pub use selector::{PlacementError, select_node};
