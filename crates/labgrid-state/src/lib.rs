//! labgrid-state: the resource ledger.
//!
//! Backed by [redb](https://docs.rs/redb), records the template registry,
//! the tables that have been deployed, and every resource the orchestrator
//! believes it created on the cluster.
//!
//! # Architecture
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns. Resources
//! are keyed by `{table:010}:{vmid:020}` so all resources of one table sit
//! in a contiguous key range ordered by vmid; a secondary index maps a
//! resource id back to its table for point lookups.
//!
//! Every mutating method is a single write transaction that commits before
//! returning, so each call is one durable checkpoint.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{Stage, StateError, StateResult};
pub use store::StateStore;
pub use types::*;
