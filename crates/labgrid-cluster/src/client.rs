//! The cluster client contract.
//!
//! Every mutating call on the cluster is asynchronous on the cluster side:
//! it returns a [`TaskId`] that has to be polled through
//! [`ClusterClient::task_status`] until it is terminal. `start` is the one
//! exception; callers fire it and move on.

use std::fmt;

use async_trait::async_trait;
use labgrid_core::HostAssignment;
use labgrid_state::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::error::ClusterResult;

/// Identifier of an asynchronous cluster operation (a Proxmox UPID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observed state of an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// Terminal. `exit_status` is the cluster's exit detail, `OK` on success.
    Stopped { exit_status: Option<String> },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped { .. })
    }

    /// The exit detail of a terminal, unsuccessful task.
    ///
    /// A stopped task without an exit status counts as successful.
    pub fn failure(&self) -> Option<&str> {
        match self {
            TaskStatus::Stopped {
                exit_status: Some(status),
            } if status != "OK" => Some(status),
            _ => None,
        }
    }
}

/// Clone a template into a new resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub node: String,
    pub kind: ResourceKind,
    /// Template id on the cluster.
    pub source: ResourceId,
    pub new_id: ResourceId,
    pub name: String,
    pub storage: String,
    pub full: bool,
}

/// Network interface configuration for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub bridge: String,
    pub assignment: HostAssignment,
}

/// Capability exposed by the cluster's management plane.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Names of the nodes currently reporting online.
    async fn online_nodes(&self) -> ClusterResult<Vec<String>>;

    /// Reserve a fresh, cluster-wide unique resource id.
    async fn next_id(&self) -> ClusterResult<ResourceId>;

    async fn clone_template(&self, req: &CloneRequest) -> ClusterResult<TaskId>;

    /// Apply network configuration. Returns a task when the cluster
    /// applies it asynchronously.
    async fn configure_network(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
        net: &NetworkSpec,
    ) -> ClusterResult<Option<TaskId>>;

    async fn start(&self, node: &str, kind: ResourceKind, vmid: ResourceId) -> ClusterResult<()>;

    /// Whether the resource is currently running.
    async fn is_running(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<bool>;

    /// Stop a running resource. The cluster rejects stopping one that is
    /// not running.
    async fn stop(&self, node: &str, kind: ResourceKind, vmid: ResourceId)
    -> ClusterResult<TaskId>;

    async fn delete(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<TaskId>;

    async fn task_status(&self, node: &str, task: &TaskId) -> ClusterResult<TaskStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_is_not_terminal() {
        assert!(!TaskStatus::Running.is_terminal());
        assert_eq!(TaskStatus::Running.failure(), None);
    }

    #[test]
    fn stopped_ok_and_missing_exit_are_success() {
        let ok = TaskStatus::Stopped {
            exit_status: Some("OK".to_string()),
        };
        let bare = TaskStatus::Stopped { exit_status: None };
        assert!(ok.is_terminal());
        assert_eq!(ok.failure(), None);
        assert_eq!(bare.failure(), None);
    }

    #[test]
    fn stopped_with_error_reports_detail() {
        let failed = TaskStatus::Stopped {
            exit_status: Some("clone failed: no space left".to_string()),
        };
        assert_eq!(failed.failure(), Some("clone failed: no space left"));
    }
}
