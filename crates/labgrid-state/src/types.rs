//! Domain types for the resource ledger.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-assigned resource id (unique across the cluster).
pub type ResourceId = u64;

/// Table number identifying one lab instance.
pub type TableNumber = u32;

// ── Template ──────────────────────────────────────────────────────

/// Role a template plays inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateRole {
    Attacker,
    Target,
}

impl fmt::Display for TemplateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateRole::Attacker => f.write_str("attacker"),
            TemplateRole::Target => f.write_str("target"),
        }
    }
}

/// A reusable provisioning source registered on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,
    /// Template id on the cluster.
    pub vmid: ResourceId,
    pub role: TemplateRole,
    pub is_container: bool,
    /// Registration position, assigned by the store.
    #[serde(default)]
    pub seq: u64,
}

impl Template {
    pub fn new(name: &str, vmid: ResourceId, role: TemplateRole, is_container: bool) -> Self {
        Self {
            name: name.to_string(),
            vmid,
            role,
            is_container,
            seq: 0,
        }
    }
}

// ── Table ─────────────────────────────────────────────────────────

/// One lab instance. The VLAN is derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableLab {
    pub table_number: TableNumber,
    /// Optional human label (usually the student's name).
    pub label: Option<String>,
    /// Unix timestamp (seconds) of first registration.
    pub created_at: u64,
}

impl TableLab {
    pub fn new(table_number: TableNumber, created_at: u64) -> Self {
        Self {
            table_number,
            label: None,
            created_at,
        }
    }

    pub fn vlan(&self) -> u32 {
        labgrid_core::vlan_for_table(self.table_number)
    }

    pub fn gateway(&self) -> String {
        labgrid_core::gateway_for_table(self.table_number)
    }
}

// ── Deployed resource ─────────────────────────────────────────────

/// Whether a resource is a full VM or a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Container,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Vm => f.write_str("vm"),
            ResourceKind::Container => f.write_str("container"),
        }
    }
}

/// A VM or container this system provisioned for a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployedResource {
    pub vmid: ResourceId,
    pub table_number: TableNumber,
    /// Cluster node the resource lives on.
    pub node: String,
    pub kind: ResourceKind,
    pub role: TemplateRole,
    /// Name given to the resource on the cluster.
    pub name: String,
    /// Template the resource was cloned from.
    pub template: String,
    /// Interface address in CIDR form.
    pub address: String,
    pub created_at: u64,
}

impl DeployedResource {
    /// Build the composite key for the resources table.
    pub fn table_key(&self) -> String {
        resource_key(self.table_number, self.vmid)
    }
}

pub(crate) fn resource_key(table_number: TableNumber, vmid: ResourceId) -> String {
    format!("{table_number:010}:{vmid:020}")
}

/// Key range `[start, end)` covering every resource of a table.
pub(crate) fn resource_range(table_number: TableNumber) -> (String, String) {
    // ';' sorts immediately after ':'.
    (format!("{table_number:010}:"), format!("{table_number:010};"))
}
