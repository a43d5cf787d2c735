//! Table teardown.
//!
//! Removes every resource the ledger holds for a table, in ledger order:
//! stop if running, wait, delete, wait, forget. The table row itself stays so the
//! table can be redeployed on the same VLAN. A failure stops the flow;
//! running it again picks up with whatever is still recorded.

use labgrid_core::TableNetwork;
use labgrid_state::{DeployedResource, ResourceId, TableNumber};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult, TeardownStep};
use crate::orchestrator::Orchestrator;

/// Summary of a successful teardown.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownResult {
    pub table_number: TableNumber,
    /// Node of the first removed resource; `None` when nothing was recorded.
    pub node: Option<String>,
    /// Ids removed from the cluster and the ledger, in removal order.
    pub removed: Vec<ResourceId>,
    /// Every node the removed resources lived on. Differs from `node`
    /// only when a redeploy landed the table elsewhere.
    pub nodes: Vec<String>,
    pub status: String,
}

impl Orchestrator {
    /// Tear down every recorded resource of `table`.
    ///
    /// An unknown table fails with [`OrchestratorError::TableNotFound`]
    /// before any cluster call is made.
    pub async fn delete_table(&self, table: TableNumber) -> OrchestratorResult<TeardownResult> {
        TableNetwork::for_table(table).map_err(|_| OrchestratorError::InvalidTable(table))?;
        let _guard = self.locks.lock(table).await;
        self.ensure_not_cancelled()?;

        if self.state.get_table(table)?.is_none() {
            return Err(OrchestratorError::TableNotFound(table));
        }
        let resources = self.state.list_resources_for_table(table)?;
        info!(table, resources = resources.len(), "tearing down table");

        let mut removed = Vec::with_capacity(resources.len());
        let mut nodes: Vec<String> = Vec::new();
        for resource in &resources {
            self.ensure_not_cancelled()?;
            self.remove(resource).await?;
            removed.push(resource.vmid);
            if !nodes.contains(&resource.node) {
                nodes.push(resource.node.clone());
            }
        }

        info!(table, removed = removed.len(), "table torn down");
        Ok(TeardownResult {
            table_number: table,
            node: nodes.first().cloned(),
            status: format!("Table {table} purged"),
            removed,
            nodes,
        })
    }

    async fn remove(&self, resource: &DeployedResource) -> OrchestratorResult<()> {
        let (table, vmid, kind) = (resource.table_number, resource.vmid, resource.kind);
        let node = resource.node.as_str();
        let failed = |step: TeardownStep| {
            move |e: OrchestratorError| OrchestratorError::teardown(table, vmid, step, e)
        };

        // A clone that never got started cannot be stopped.
        let running = self
            .cluster
            .is_running(node, kind, vmid)
            .await
            .map_err(|e| OrchestratorError::teardown(table, vmid, TeardownStep::Stop, e))?;
        if running {
            let task = self
                .cluster
                .stop(node, kind, vmid)
                .await
                .map_err(|e| OrchestratorError::teardown(table, vmid, TeardownStep::Stop, e))?;
            self.waiter
                .wait(self.cluster.as_ref(), node, &task)
                .await
                .map_err(failed(TeardownStep::Stop))?;
            debug!(table, %node, vmid, "resource stopped");
        } else {
            debug!(table, %node, vmid, "resource already stopped");
        }

        let task = self
            .cluster
            .delete(node, kind, vmid)
            .await
            .map_err(|e| OrchestratorError::teardown(table, vmid, TeardownStep::Delete, e))?;
        self.waiter
            .wait(self.cluster.as_ref(), node, &task)
            .await
            .map_err(failed(TeardownStep::Delete))?;

        self.state
            .delete_resource(vmid)
            .map_err(|e| OrchestratorError::teardown(table, vmid, TeardownStep::Forget, e))?;
        info!(table, %node, vmid, "resource removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::*;
    use labgrid_cluster::{ClusterCall, ClusterOp, InMemoryCluster};

    fn stopped_ids(calls: &[ClusterCall]) -> Vec<u64> {
        calls
            .iter()
            .filter_map(|c| match c {
                ClusterCall::Stop { vmid, .. } => Some(*vmid),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn teardown_removes_resources_and_keeps_table() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        let deployed = orch.deploy_table(7).await.unwrap();

        let result = orch.delete_table(7).await.unwrap();

        assert_eq!(result.removed.len(), 3);
        assert_eq!(result.node.as_deref(), Some("proxmox2"));
        assert_eq!(result.nodes, ["proxmox2"]);
        assert_eq!(result.status, "Table 7 purged");
        assert!(orch.state().list_resources_for_table(7).unwrap().is_empty());
        assert!(orch.state().get_table(7).unwrap().is_some());
        for resource in &deployed.resources {
            assert!(cluster.resource(resource.vmid).is_none());
        }
    }

    #[tokio::test]
    async fn redeploy_after_teardown_reuses_vlan() {
        let (_cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        let first = orch.deploy_table(7).await.unwrap();
        orch.delete_table(7).await.unwrap();

        let second = orch.deploy_table(7).await.unwrap();

        assert_eq!(second.vlan, first.vlan);
        let addresses = |r: &crate::DeploymentResult| {
            let mut a: Vec<_> = r.resources.iter().map(|x| x.address.clone()).collect();
            a.sort();
            a
        };
        assert_eq!(addresses(&second), addresses(&first));
        assert_eq!(orch.state().list_tables().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_table_makes_no_cluster_calls() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));

        let err = orch.delete_table(42).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::TableNotFound(42)));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn resources_are_removed_in_ledger_order() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        orch.deploy_table(7).await.unwrap();
        let ledger: Vec<_> = orch
            .state()
            .list_resources_for_table(7)
            .unwrap()
            .iter()
            .map(|r| r.vmid)
            .collect();
        cluster.clear_calls();

        let result = orch.delete_table(7).await.unwrap();

        assert_eq!(stopped_ids(&cluster.calls()), ledger);
        assert_eq!(result.removed, ledger);
    }

    #[tokio::test]
    async fn failed_delete_aborts_and_is_resumable() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        orch.deploy_table(7).await.unwrap();
        cluster.fail_after(ClusterOp::Delete, 1, "resource is locked");

        let err = orch.delete_table(7).await.unwrap_err();

        match &err {
            OrchestratorError::TeardownFailed { table, step, .. } => {
                assert_eq!(*table, 7);
                assert_eq!(*step, TeardownStep::Delete);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.root_cause().kind(), "ClusterTaskFailed");
        // First resource gone for good, the other two still recorded.
        assert_eq!(orch.state().list_resources_for_table(7).unwrap().len(), 2);

        let resumed = orch.delete_table(7).await.unwrap();
        assert_eq!(resumed.removed.len(), 2);
        assert!(orch.state().list_resources_for_table(7).unwrap().is_empty());
        assert!(cluster.resources().is_empty());
    }

    #[tokio::test]
    async fn failed_stop_leaves_ledger_intact() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        orch.deploy_table(7).await.unwrap();
        cluster.fail_once(ClusterOp::Stop, "timeout waiting for shutdown");

        let err = orch.delete_table(7).await.unwrap_err();

        match &err {
            OrchestratorError::TeardownFailed { step, .. } => assert_eq!(*step, TeardownStep::Stop),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orch.state().list_resources_for_table(7).unwrap().len(), 3);
        assert_eq!(cluster.resources().len(), 3);
    }

    #[tokio::test]
    async fn never_started_clone_is_deleted_without_stop() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        register_standard_templates(orch.state());
        cluster.fail_after(ClusterOp::Configure, 1, "invalid bridge");
        orch.deploy_table(7).await.unwrap_err();
        let recorded = orch.state().list_resources_for_table(7).unwrap();
        assert_eq!(recorded.len(), 2);
        cluster.clear_calls();

        let result = orch.delete_table(7).await.unwrap();

        assert_eq!(result.removed.len(), 2);
        assert!(orch.state().list_resources_for_table(7).unwrap().is_empty());
        assert!(cluster.resources().is_empty());
        // Only the started attacker was stopped.
        let attacker = recorded
            .iter()
            .find(|r| r.role == labgrid_state::TemplateRole::Attacker)
            .unwrap();
        assert_eq!(stopped_ids(&cluster.calls()), [attacker.vmid]);
    }

    #[tokio::test]
    async fn invalid_table_is_rejected_without_a_lock_entry() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));

        let err = orch.delete_table(u32::MAX).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidTable(u32::MAX)));
        assert_eq!(orch.locks.tracked(), 0);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_tables_leave_no_lock_entries() {
        let (_cluster, orch) = harness(InMemoryCluster::new(&NODES));

        for table in 0..=labgrid_core::MAX_TABLE_NUMBER {
            let err = orch.delete_table(table).await.unwrap_err();
            assert_eq!(err.kind(), "TableNotFound");
        }

        assert_eq!(orch.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn empty_table_tears_down_cleanly() {
        let (cluster, orch) = harness(InMemoryCluster::new(&NODES));
        orch.state().upsert_table(9, 0).unwrap();

        let result = orch.delete_table(9).await.unwrap();

        assert!(result.removed.is_empty());
        assert_eq!(result.node, None);
        assert!(cluster.calls().is_empty());
    }
}
