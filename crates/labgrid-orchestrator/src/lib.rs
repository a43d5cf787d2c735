//! labgrid-orchestrator: provisions and tears down training-lab tables.
//!
//! A table is one isolated lab: an attacker VM plus up to two target
//! containers on a dedicated VLAN, all placed on a single cluster node.
//! The orchestrator drives every step against the cluster, waits for each
//! asynchronous task to settle, and checkpoints what it created in the
//! ledger so a later teardown knows what to remove.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── ClusterClient (clone, configure, start, stop, delete)
//!   ├── TaskWaiter (poll task status until terminal or max wait)
//!   ├── StateStore (templates, tables, deployed resources)
//!   └── TableLocks (one flow per table number at a time)
//! ```
//!
//! Flows are strictly sequential. Nothing is rolled back on failure: rows
//! written before the failing step stay in the ledger and their resources
//! stay on the cluster.

pub mod deploy;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod teardown;
pub mod waiter;

pub use deploy::{BulkDeployment, DeploymentResult, TableOutcome};
pub use error::{DeployStep, ErrorReport, OrchestratorError, OrchestratorResult, Slot, TeardownStep};
pub use locks::TableLocks;
pub use orchestrator::Orchestrator;
pub use teardown::TeardownResult;
pub use waiter::TaskWaiter;
