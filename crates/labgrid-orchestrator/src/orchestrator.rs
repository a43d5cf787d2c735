//! Orchestrator: owns the collaborators shared by every flow.
//!
//! The deployment and teardown flows themselves live in [`crate::deploy`]
//! and [`crate::teardown`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use labgrid_cluster::ClusterClient;
use labgrid_core::ProvisioningConfig;
use labgrid_state::StateStore;
use tokio::sync::watch;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::TableLocks;
use crate::waiter::TaskWaiter;

pub struct Orchestrator {
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) state: StateStore,
    pub(crate) waiter: TaskWaiter,
    pub(crate) provisioning: ProvisioningConfig,
    pub(crate) locks: TableLocks,
    /// Flips to `true` on shutdown. Flows stop between steps, never while
    /// a cluster task is in flight.
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        state: StateStore,
        waiter: TaskWaiter,
        provisioning: ProvisioningConfig,
    ) -> Self {
        // A dropped sender leaves the receiver readable with its last value.
        let (_tx, shutdown) = watch::channel(false);
        Self {
            cluster,
            state,
            waiter,
            provisioning,
            locks: TableLocks::new(),
            shutdown,
        }
    }

    /// Observe `shutdown` for cancellation.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn ensure_not_cancelled(&self) -> OrchestratorResult<()> {
        if self.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
