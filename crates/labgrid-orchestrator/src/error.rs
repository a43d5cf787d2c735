//! Orchestrator error types.

use std::fmt;
use std::time::Duration;

use labgrid_cluster::ClusterError;
use labgrid_state::{ResourceId, StateError, TableNumber};
use serde::Serialize;
use thiserror::Error;

/// Position of a resource inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Attacker,
    /// 1-based target position.
    Target(u8),
}

impl Slot {
    /// Name given to the clone on the cluster.
    pub fn resource_name(&self, table: TableNumber) -> String {
        match self {
            Slot::Attacker => format!("T{table}-Kali"),
            Slot::Target(k) => format!("T{table}-Target{k}"),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Attacker => f.write_str("attacker"),
            Slot::Target(k) => write!(f, "target {k}"),
        }
    }
}

/// Step of a table deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    SelectNode,
    RegisterTable,
    LoadTemplates,
    AllocateId(Slot),
    Clone(Slot),
    Record(Slot),
    Configure(Slot),
    Start(Slot),
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployStep::SelectNode => f.write_str("node selection"),
            DeployStep::RegisterTable => f.write_str("table registration"),
            DeployStep::LoadTemplates => f.write_str("template lookup"),
            DeployStep::AllocateId(slot) => write!(f, "id allocation ({slot})"),
            DeployStep::Clone(slot) => write!(f, "clone ({slot})"),
            DeployStep::Record(slot) => write!(f, "ledger write ({slot})"),
            DeployStep::Configure(slot) => write!(f, "network configuration ({slot})"),
            DeployStep::Start(slot) => write!(f, "start ({slot})"),
        }
    }
}

/// Step of removing one resource during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Stop,
    Delete,
    Forget,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::Stop => f.write_str("stop"),
            TeardownStep::Delete => f.write_str("delete"),
            TeardownStep::Forget => f.write_str("ledger removal"),
        }
    }
}

/// Errors surfaced by deployment and teardown flows.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no cluster node is online")]
    NoAvailableNodes,

    #[error("task {task} on {node} failed: {exit_status}")]
    ClusterTaskFailed {
        node: String,
        task: String,
        exit_status: String,
    },

    #[error("task {task} on {node} still running after {waited:?}")]
    TaskTimeout {
        node: String,
        task: String,
        waited: Duration,
    },

    #[error("table {0} not found")]
    TableNotFound(TableNumber),

    #[error("table {0} is outside the addressable range")]
    InvalidTable(TableNumber),

    #[error("invalid table range: start {start} is after end {end}")]
    InvalidRange { start: TableNumber, end: TableNumber },

    #[error("provisioning table {table} failed at {step}: {source}")]
    ProvisioningFailed {
        table: TableNumber,
        step: DeployStep,
        source: Box<OrchestratorError>,
    },

    #[error("teardown of table {table} failed at {step} of resource {vmid}: {source}")]
    TeardownFailed {
        table: TableNumber,
        vmid: ResourceId,
        step: TeardownStep,
        source: Box<OrchestratorError>,
    },

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("ledger error: {0}")]
    State(#[from] StateError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NoAvailableNodes => "NoAvailableNodes",
            OrchestratorError::ClusterTaskFailed { .. } => "ClusterTaskFailed",
            OrchestratorError::TaskTimeout { .. } => "TaskTimeout",
            OrchestratorError::TableNotFound(_) => "TableNotFound",
            OrchestratorError::InvalidTable(_) => "InvalidTable",
            OrchestratorError::InvalidRange { .. } => "InvalidRange",
            OrchestratorError::ProvisioningFailed { .. } => "ProvisioningFailed",
            OrchestratorError::TeardownFailed { .. } => "TeardownFailed",
            OrchestratorError::Cancelled => "Cancelled",
            OrchestratorError::Cluster(_) => "Cluster",
            OrchestratorError::State(_) => "Ledger",
        }
    }

    /// The innermost error behind any step wrappers.
    pub fn root_cause(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::ProvisioningFailed { source, .. }
            | OrchestratorError::TeardownFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn provisioning(table: TableNumber, step: DeployStep, cause: impl Into<Self>) -> Self {
        OrchestratorError::ProvisioningFailed {
            table,
            step,
            source: Box::new(cause.into()),
        }
    }

    pub(crate) fn teardown(
        table: TableNumber,
        vmid: ResourceId,
        step: TeardownStep,
        cause: impl Into<Self>,
    ) -> Self {
        OrchestratorError::TeardownFailed {
            table,
            vmid,
            step,
            source: Box::new(cause.into()),
        }
    }
}

/// `{kind, message}` body reported for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&OrchestratorError> for ErrorReport {
    fn from(e: &OrchestratorError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
