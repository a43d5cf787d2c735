//! In-memory cluster for tests.
//!
//! Behaves like a small cluster: ids are handed out monotonically, clones
//! create resources, deletes remove them, and every operation returns a
//! task that turns terminal after a configurable number of polls. Faults
//! can be injected per operation (and optionally per node), and every call
//! is logged so tests can assert on what was, or was not, sent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use labgrid_state::{ResourceId, ResourceKind};

use crate::client::{CloneRequest, ClusterClient, NetworkSpec, TaskId, TaskStatus};
use crate::error::{ClusterError, ClusterResult};

/// Operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOp {
    Clone,
    Configure,
    Start,
    Stop,
    Delete,
}

/// One call received by the in-memory cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    OnlineNodes,
    NextId,
    Clone { node: String, source: ResourceId, new_id: ResourceId },
    Configure { node: String, vmid: ResourceId },
    Start { node: String, vmid: ResourceId },
    Status { node: String, vmid: ResourceId },
    Stop { node: String, vmid: ResourceId },
    Delete { node: String, vmid: ResourceId },
    TaskStatus { node: String, task: String },
}

/// A resource living on the in-memory cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResource {
    pub node: String,
    pub kind: ResourceKind,
    pub name: String,
    pub source: ResourceId,
    pub network: Option<NetworkSpec>,
    pub running: bool,
}

#[derive(Debug, Clone)]
struct Fault {
    op: ClusterOp,
    node: Option<String>,
    exit_status: String,
    once: bool,
    /// Matching calls to let through before the fault fires.
    skip: u32,
}

#[derive(Debug)]
struct FakeTask {
    polls_left: u32,
    exit_status: String,
    /// Applied when the task succeeds and turns terminal.
    effect: Option<Effect>,
}

#[derive(Debug)]
enum Effect {
    Create(ResourceId, FakeResource),
    Configure(ResourceId, NetworkSpec),
    Stop(ResourceId),
    Delete(ResourceId),
}

#[derive(Debug)]
struct Inner {
    nodes: Vec<(String, bool)>,
    next_id: ResourceId,
    resources: BTreeMap<ResourceId, FakeResource>,
    tasks: HashMap<String, FakeTask>,
    task_seq: u64,
    pending_polls: u32,
    hang: bool,
    faults: Vec<Fault>,
    calls: Vec<ClusterCall>,
}

/// In-memory [`ClusterClient`].
#[derive(Debug)]
pub struct InMemoryCluster {
    inner: Mutex<Inner>,
}

impl InMemoryCluster {
    /// A cluster whose given nodes are all online. Ids start at 100.
    pub fn new(nodes: &[&str]) -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: nodes.iter().map(|n| (n.to_string(), true)).collect(),
                next_id: 100,
                resources: BTreeMap::new(),
                tasks: HashMap::new(),
                task_seq: 0,
                pending_polls: 0,
                hang: false,
                faults: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tasks report running this many times before turning terminal.
    pub fn with_pending_polls(self, polls: u32) -> Self {
        self.state().pending_polls = polls;
        self
    }

    /// Tasks never turn terminal.
    pub fn hang_tasks(&self) {
        self.state().hang = true;
    }

    pub fn set_online(&self, node: &str, online: bool) {
        let mut inner = self.state();
        match inner.nodes.iter_mut().find(|(n, _)| n == node) {
            Some(entry) => entry.1 = online,
            None => inner.nodes.push((node.to_string(), online)),
        }
    }

    /// Every `op` (on `node`, or anywhere) fails with `exit_status`.
    pub fn fail(&self, op: ClusterOp, node: Option<&str>, exit_status: &str) {
        self.state().faults.push(Fault {
            op,
            node: node.map(str::to_string),
            exit_status: exit_status.to_string(),
            once: false,
            skip: 0,
        });
    }

    /// The next `op` fails with `exit_status`.
    pub fn fail_once(&self, op: ClusterOp, exit_status: &str) {
        self.fail_after(op, 0, exit_status);
    }

    /// Let `skip` calls of `op` succeed, then fail the next one.
    pub fn fail_after(&self, op: ClusterOp, skip: u32, exit_status: &str) {
        self.state().faults.push(Fault {
            op,
            node: None,
            exit_status: exit_status.to_string(),
            once: true,
            skip,
        });
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Resources currently on the cluster.
    pub fn resources(&self) -> BTreeMap<ResourceId, FakeResource> {
        self.state().resources.clone()
    }

    pub fn resource(&self, vmid: ResourceId) -> Option<FakeResource> {
        self.state().resources.get(&vmid).cloned()
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl Inner {
    fn take_fault(&mut self, op: ClusterOp, node: &str) -> Option<String> {
        let idx = self
            .faults
            .iter()
            .position(|f| f.op == op && f.node.as_deref().is_none_or(|n| n == node))?;
        if self.faults[idx].skip > 0 {
            self.faults[idx].skip -= 1;
            return None;
        }
        let fault = self.faults[idx].clone();
        if fault.once {
            self.faults.remove(idx);
        }
        Some(fault.exit_status)
    }

    fn spawn_task(&mut self, node: &str, op: &str, exit_status: String, effect: Option<Effect>) -> TaskId {
        self.task_seq += 1;
        let upid = format!("UPID:{node}:{:08X}:{op}", self.task_seq);
        self.tasks.insert(
            upid.clone(),
            FakeTask {
                polls_left: self.pending_polls,
                exit_status,
                effect,
            },
        );
        TaskId(upid)
    }

    /// Run `op` as a task, failing it if a fault matches.
    fn task_for(&mut self, op: ClusterOp, node: &str, name: &str, effect: Effect) -> TaskId {
        match self.take_fault(op, node) {
            Some(exit) => self.spawn_task(node, name, exit, None),
            None => self.spawn_task(node, name, "OK".to_string(), Some(effect)),
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Create(vmid, resource) => {
                self.resources.insert(vmid, resource);
            }
            Effect::Configure(vmid, net) => {
                if let Some(r) = self.resources.get_mut(&vmid) {
                    r.network = Some(net);
                }
            }
            Effect::Stop(vmid) => {
                if let Some(r) = self.resources.get_mut(&vmid) {
                    r.running = false;
                }
            }
            Effect::Delete(vmid) => {
                self.resources.remove(&vmid);
            }
        }
    }

    fn require(&self, node: &str, vmid: ResourceId) -> ClusterResult<()> {
        match self.resources.get(&vmid) {
            Some(r) if r.node == node => Ok(()),
            _ => Err(ClusterError::Api {
                status: 500,
                message: format!("resource {vmid} does not exist on {node}"),
            }),
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn online_nodes(&self) -> ClusterResult<Vec<String>> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::OnlineNodes);
        Ok(inner
            .nodes
            .iter()
            .filter(|(_, online)| *online)
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn next_id(&self) -> ClusterResult<ResourceId> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::NextId);
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    async fn clone_template(&self, req: &CloneRequest) -> ClusterResult<TaskId> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Clone {
            node: req.node.clone(),
            source: req.source,
            new_id: req.new_id,
        });
        if inner.resources.contains_key(&req.new_id) {
            return Err(ClusterError::Api {
                status: 500,
                message: format!("resource {} already exists", req.new_id),
            });
        }
        let resource = FakeResource {
            node: req.node.clone(),
            kind: req.kind,
            name: req.name.clone(),
            source: req.source,
            network: None,
            running: false,
        };
        Ok(inner.task_for(
            ClusterOp::Clone,
            &req.node,
            "clone",
            Effect::Create(req.new_id, resource),
        ))
    }

    async fn configure_network(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
        net: &NetworkSpec,
    ) -> ClusterResult<Option<TaskId>> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Configure {
            node: node.to_string(),
            vmid,
        });
        inner.require(node, vmid)?;
        match kind {
            // VM config changes run as a task; container config is synchronous.
            ResourceKind::Vm => Ok(Some(inner.task_for(
                ClusterOp::Configure,
                node,
                "qmconfig",
                Effect::Configure(vmid, net.clone()),
            ))),
            ResourceKind::Container => match inner.take_fault(ClusterOp::Configure, node) {
                Some(exit) => Err(ClusterError::Api {
                    status: 500,
                    message: exit,
                }),
                None => {
                    inner.apply(Effect::Configure(vmid, net.clone()));
                    Ok(None)
                }
            },
        }
    }

    async fn start(&self, node: &str, _kind: ResourceKind, vmid: ResourceId) -> ClusterResult<()> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Start {
            node: node.to_string(),
            vmid,
        });
        inner.require(node, vmid)?;
        if let Some(exit) = inner.take_fault(ClusterOp::Start, node) {
            return Err(ClusterError::Api {
                status: 500,
                message: exit,
            });
        }
        if let Some(r) = inner.resources.get_mut(&vmid) {
            r.running = true;
        }
        Ok(())
    }

    async fn is_running(
        &self,
        node: &str,
        _kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<bool> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Status {
            node: node.to_string(),
            vmid,
        });
        inner.require(node, vmid)?;
        Ok(inner.resources.get(&vmid).is_some_and(|r| r.running))
    }

    async fn stop(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<TaskId> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Stop {
            node: node.to_string(),
            vmid,
        });
        inner.require(node, vmid)?;
        if inner.resources.get(&vmid).is_some_and(|r| !r.running) {
            let prefix = match kind {
                ResourceKind::Vm => "VM",
                ResourceKind::Container => "CT",
            };
            return Err(ClusterError::Api {
                status: 500,
                message: format!("{prefix} {vmid} not running"),
            });
        }
        Ok(inner.task_for(ClusterOp::Stop, node, "stop", Effect::Stop(vmid)))
    }

    async fn delete(
        &self,
        node: &str,
        _kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<TaskId> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::Delete {
            node: node.to_string(),
            vmid,
        });
        inner.require(node, vmid)?;
        Ok(inner.task_for(ClusterOp::Delete, node, "destroy", Effect::Delete(vmid)))
    }

    async fn task_status(&self, node: &str, task: &TaskId) -> ClusterResult<TaskStatus> {
        let mut inner = self.state();
        inner.calls.push(ClusterCall::TaskStatus {
            node: node.to_string(),
            task: task.0.clone(),
        });
        if inner.hang {
            return Ok(TaskStatus::Running);
        }
        let Some(entry) = inner.tasks.get_mut(task.as_str()) else {
            return Err(ClusterError::Api {
                status: 404,
                message: format!("no such task {task}"),
            });
        };
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return Ok(TaskStatus::Running);
        }
        let exit_status = entry.exit_status.clone();
        let effect = entry.effect.take();
        if let Some(effect) = effect {
            inner.apply(effect);
        }
        Ok(TaskStatus::Stopped {
            exit_status: Some(exit_status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgrid_core::TableNetwork;

    fn clone_req(node: &str, new_id: ResourceId) -> CloneRequest {
        CloneRequest {
            node: node.to_string(),
            kind: ResourceKind::Container,
            source: 9001,
            new_id,
            name: "T1-Target1".to_string(),
            storage: "Data".to_string(),
            full: true,
        }
    }

    #[tokio::test]
    async fn clone_creates_resource_once_task_completes() {
        let cluster = InMemoryCluster::new(&["proxmox1"]).with_pending_polls(2);
        let id = cluster.next_id().await.unwrap();
        let task = cluster.clone_template(&clone_req("proxmox1", id)).await.unwrap();

        assert_eq!(cluster.task_status("proxmox1", &task).await.unwrap(), TaskStatus::Running);
        assert_eq!(cluster.task_status("proxmox1", &task).await.unwrap(), TaskStatus::Running);
        assert!(cluster.resource(id).is_none());

        let done = cluster.task_status("proxmox1", &task).await.unwrap();
        assert_eq!(done.failure(), None);
        assert_eq!(cluster.resource(id).unwrap().node, "proxmox1");
    }

    #[tokio::test]
    async fn fault_fails_task_without_creating() {
        let cluster = InMemoryCluster::new(&["proxmox1", "proxmox2"]);
        cluster.fail(ClusterOp::Clone, Some("proxmox2"), "no space left");

        let bad = cluster.clone_template(&clone_req("proxmox2", 100)).await.unwrap();
        let status = cluster.task_status("proxmox2", &bad).await.unwrap();
        assert_eq!(status.failure(), Some("no space left"));
        assert!(cluster.resource(100).is_none());

        let good = cluster.clone_template(&clone_req("proxmox1", 101)).await.unwrap();
        cluster.task_status("proxmox1", &good).await.unwrap();
        assert!(cluster.resource(101).is_some());
    }

    #[tokio::test]
    async fn fail_after_skips_earlier_calls() {
        let cluster = InMemoryCluster::new(&["proxmox1"]);
        cluster.fail_after(ClusterOp::Clone, 1, "storage full");

        let first = cluster.clone_template(&clone_req("proxmox1", 100)).await.unwrap();
        let second = cluster.clone_template(&clone_req("proxmox1", 101)).await.unwrap();
        let third = cluster.clone_template(&clone_req("proxmox1", 102)).await.unwrap();

        assert_eq!(cluster.task_status("proxmox1", &first).await.unwrap().failure(), None);
        assert_eq!(
            cluster.task_status("proxmox1", &second).await.unwrap().failure(),
            Some("storage full")
        );
        assert_eq!(cluster.task_status("proxmox1", &third).await.unwrap().failure(), None);
    }

    #[tokio::test]
    async fn container_configure_is_synchronous() {
        let cluster = InMemoryCluster::new(&["proxmox1"]);
        let task = cluster.clone_template(&clone_req("proxmox1", 100)).await.unwrap();
        cluster.task_status("proxmox1", &task).await.unwrap();

        let net = NetworkSpec {
            bridge: "vmbr0".to_string(),
            assignment: TableNetwork::for_table(1).unwrap().target(0),
        };
        let configured = cluster
            .configure_network("proxmox1", ResourceKind::Container, 100, &net)
            .await
            .unwrap();
        assert!(configured.is_none());
        assert_eq!(cluster.resource(100).unwrap().network, Some(net));
    }

    #[tokio::test]
    async fn offline_nodes_are_hidden() {
        let cluster = InMemoryCluster::new(&["proxmox1", "proxmox2"]);
        cluster.set_online("proxmox1", false);
        assert_eq!(cluster.online_nodes().await.unwrap(), ["proxmox2"]);
        assert_eq!(cluster.calls(), [ClusterCall::OnlineNodes]);
    }

    #[tokio::test]
    async fn stopping_a_stopped_resource_is_rejected() {
        let cluster = InMemoryCluster::new(&["proxmox1"]);
        let task = cluster.clone_template(&clone_req("proxmox1", 100)).await.unwrap();
        cluster.task_status("proxmox1", &task).await.unwrap();

        assert!(!cluster.is_running("proxmox1", ResourceKind::Container, 100).await.unwrap());
        let err = cluster
            .stop("proxmox1", ResourceKind::Container, 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CT 100 not running"));

        cluster.start("proxmox1", ResourceKind::Container, 100).await.unwrap();
        assert!(cluster.is_running("proxmox1", ResourceKind::Container, 100).await.unwrap());
        let task = cluster.stop("proxmox1", ResourceKind::Container, 100).await.unwrap();
        cluster.task_status("proxmox1", &task).await.unwrap();
        assert!(!cluster.resource(100).unwrap().running);
    }

    #[tokio::test]
    async fn operations_on_missing_resources_error() {
        let cluster = InMemoryCluster::new(&["proxmox1"]);
        assert!(cluster.is_running("proxmox1", ResourceKind::Vm, 5).await.is_err());
        assert!(cluster.stop("proxmox1", ResourceKind::Vm, 5).await.is_err());
        assert!(cluster.delete("proxmox1", ResourceKind::Vm, 5).await.is_err());
    }
}
