//! Table deployment.
//!
//! A deployment selects the node, registers the table, then provisions
//! each resource in turn: allocate an id, clone the template, wait,
//! record the resource, configure its interface, start it. Each cluster
//! task is waited on before the next step is issued.

use labgrid_cluster::{CloneRequest, NetworkSpec};
use labgrid_core::{HostAssignment, MAX_TABLE_NUMBER, TableNetwork};
use labgrid_placement::select_node;
use labgrid_state::{DeployedResource, ResourceKind, TableNumber, Template, TemplateRole};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DeployStep, ErrorReport, OrchestratorError, OrchestratorResult, Slot};
use crate::orchestrator::{Orchestrator, epoch_secs};

/// Targets honored per table, in registration order.
pub const MAX_TARGETS: usize = 2;

/// Summary of a successful table deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub table_number: TableNumber,
    pub node: String,
    pub vlan: u32,
    pub gateway: String,
    pub resources: Vec<DeployedResource>,
    pub status: String,
}

/// Outcome of one table inside a bulk deployment.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table_number: TableNumber,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Result of a bulk deployment; one outcome per table, in order.
#[derive(Debug, Clone, Serialize)]
pub struct BulkDeployment {
    pub start_table: TableNumber,
    pub end_table: TableNumber,
    pub results: Vec<TableOutcome>,
}

impl BulkDeployment {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// One resource to provision.
#[derive(Debug)]
struct Planned {
    slot: Slot,
    kind: ResourceKind,
    template: Template,
    assignment: HostAssignment,
}

impl Orchestrator {
    /// Deploy one table.
    ///
    /// Deploying an already-deployed table provisions a fresh set of
    /// resources; the table row itself is never duplicated.
    pub async fn deploy_table(&self, table: TableNumber) -> OrchestratorResult<DeploymentResult> {
        let network =
            TableNetwork::for_table(table).map_err(|_| OrchestratorError::InvalidTable(table))?;
        let _guard = self.locks.lock(table).await;
        self.ensure_not_cancelled()?;

        let online = self
            .cluster
            .online_nodes()
            .await
            .map_err(|e| OrchestratorError::provisioning(table, DeployStep::SelectNode, e))?;
        let node = select_node(table, &online).map_err(|_| OrchestratorError::NoAvailableNodes)?;
        info!(table, %node, vlan = network.vlan(), "deploying table");

        let (_, created) = self
            .state
            .upsert_table(table, epoch_secs())
            .map_err(|e| OrchestratorError::provisioning(table, DeployStep::RegisterTable, e))?;
        if !created {
            debug!(table, "table already registered");
        }

        let plan = self
            .plan(&network)
            .map_err(|e| OrchestratorError::provisioning(table, DeployStep::LoadTemplates, e))?;

        let mut resources = Vec::with_capacity(plan.len());
        for planned in &plan {
            self.ensure_not_cancelled()?;
            resources.push(self.provision(table, &node, planned).await?);
        }

        info!(table, %node, resources = resources.len(), "table deployed");
        Ok(DeploymentResult {
            table_number: table,
            status: format!("Table {table} deployed on {node}"),
            node,
            vlan: network.vlan(),
            gateway: network.gateway().to_string(),
            resources,
        })
    }

    /// Deploy every table in `start..=end`, one after the other.
    ///
    /// A failing table is reported and the next one is still attempted.
    /// A range reaching past [`MAX_TABLE_NUMBER`] is rejected up front.
    pub async fn deploy_tables(
        &self,
        start: TableNumber,
        end: TableNumber,
    ) -> OrchestratorResult<BulkDeployment> {
        if start > end {
            return Err(OrchestratorError::InvalidRange { start, end });
        }
        if end > MAX_TABLE_NUMBER {
            return Err(OrchestratorError::InvalidTable(end));
        }

        let mut results = Vec::new();
        for table in start..=end {
            let outcome = match self.deploy_table(table).await {
                Ok(deployed) => TableOutcome {
                    table_number: table,
                    success: true,
                    node: Some(deployed.node),
                    status: Some(deployed.status),
                    error: None,
                },
                Err(e) => {
                    warn!(table, error = %e, "table deployment failed, continuing");
                    TableOutcome {
                        table_number: table,
                        success: false,
                        node: None,
                        status: None,
                        error: Some(ErrorReport::from(&e)),
                    }
                }
            };
            results.push(outcome);
        }

        let bulk = BulkDeployment {
            start_table: start,
            end_table: end,
            results,
        };
        info!(start, end, succeeded = bulk.succeeded(), failed = bulk.failed(), "bulk deployment finished");
        Ok(bulk)
    }

    /// First attacker template, then up to [`MAX_TARGETS`] targets.
    ///
    /// Target octets follow the template's position, so a skipped
    /// non-container target still consumes its address.
    fn plan(&self, network: &TableNetwork) -> OrchestratorResult<Vec<Planned>> {
        let mut plan = Vec::new();

        match self.state.templates_for_role(TemplateRole::Attacker)?.into_iter().next() {
            Some(template) => plan.push(Planned {
                slot: Slot::Attacker,
                kind: ResourceKind::Vm,
                template,
                assignment: network.attacker(),
            }),
            None => debug!(table = network.table(), "no attacker template registered"),
        }

        let targets = self.state.templates_for_role(TemplateRole::Target)?;
        for (position, template) in targets.into_iter().take(MAX_TARGETS).enumerate() {
            if !template.is_container {
                debug!(table = network.table(), template = %template.name, "skipping non-container target");
                continue;
            }
            let position = position as u8;
            plan.push(Planned {
                slot: Slot::Target(position + 1),
                kind: ResourceKind::Container,
                template,
                assignment: network.target(position),
            });
        }

        Ok(plan)
    }

    async fn provision(
        &self,
        table: TableNumber,
        node: &str,
        planned: &Planned,
    ) -> OrchestratorResult<DeployedResource> {
        let slot = planned.slot;

        let vmid = self
            .cluster
            .next_id()
            .await
            .map_err(step_failed(table, DeployStep::AllocateId(slot)))?;

        let request = CloneRequest {
            node: node.to_string(),
            kind: planned.kind,
            source: planned.template.vmid,
            new_id: vmid,
            name: slot.resource_name(table),
            storage: self.provisioning.storage.clone(),
            full: self.provisioning.full_clone,
        };
        let task = self
            .cluster
            .clone_template(&request)
            .await
            .map_err(step_failed(table, DeployStep::Clone(slot)))?;
        self.waiter
            .wait(self.cluster.as_ref(), node, &task)
            .await
            .map_err(step_failed(table, DeployStep::Clone(slot)))?;
        info!(table, %node, vmid, %slot, template = %planned.template.name, "resource cloned");

        // Recorded as soon as the clone is confirmed, before configure or
        // start, so a later failure still leaves a ledger entry to clean up.
        let resource = DeployedResource {
            vmid,
            table_number: table,
            node: node.to_string(),
            kind: planned.kind,
            role: planned.template.role,
            name: request.name,
            template: planned.template.name.clone(),
            address: planned.assignment.cidr(),
            created_at: epoch_secs(),
        };
        self.state
            .put_resource(&resource)
            .map_err(step_failed(table, DeployStep::Record(slot)))?;

        let net = NetworkSpec {
            bridge: self.provisioning.bridge.clone(),
            assignment: planned.assignment,
        };
        let configured = self
            .cluster
            .configure_network(node, planned.kind, vmid, &net)
            .await
            .map_err(step_failed(table, DeployStep::Configure(slot)))?;
        if let Some(task) = configured {
            self.waiter
                .wait(self.cluster.as_ref(), node, &task)
                .await
                .map_err(step_failed(table, DeployStep::Configure(slot)))?;
        }
        debug!(table, vmid, address = %planned.assignment, "network configured");

        self.cluster
            .start(node, planned.kind, vmid)
            .await
            .map_err(step_failed(table, DeployStep::Start(slot)))?;
        debug!(table, vmid, "start issued");

        Ok(resource)
    }
}

fn step_failed<E: Into<OrchestratorError>>(
    table: TableNumber,
    step: DeployStep,
) -> impl FnOnce(E) -> OrchestratorError {
    move |e| OrchestratorError::provisioning(table, step, e)
}
