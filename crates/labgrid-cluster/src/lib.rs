//! labgrid-cluster: access to the virtualization cluster's management plane.
//!
//! The orchestrator only sees the [`ClusterClient`] trait. This crate
//! provides the Proxmox VE implementation ([`ProxmoxClient`]), the
//! endpoint failover used to obtain one ([`connect`]), and, behind the
//! `test-util` feature, an [`InMemoryCluster`] double with scripted task
//! outcomes.
//!
//! # Components
//!
//! - **`client`**: the `ClusterClient` contract and its request/response types
//! - **`proxmox`**: HTTP implementation against `/api2/json`
//! - **`memory`**: in-memory cluster for tests (feature `test-util`)

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod proxmox;

pub use client::{CloneRequest, ClusterClient, NetworkSpec, TaskId, TaskStatus};
pub use error::{ClusterError, ClusterResult};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{ClusterCall, ClusterOp, InMemoryCluster};
pub use proxmox::{ProxmoxClient, connect};
