//! labgrid-core: shared configuration and network identity rules.
//!
//! Everything in here is free of I/O except [`LabConfig::from_file`].

pub mod config;
pub mod network;

pub use config::{ClusterConfig, LabConfig, ProvisioningConfig, ServerConfig, TaskConfig};
pub use network::{
    HostAssignment, MAX_TABLE_NUMBER, NetworkError, TableNetwork, gateway_for_table,
    vlan_for_table,
};
