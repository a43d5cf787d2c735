//! Proxmox VE implementation of [`ClusterClient`].
//!
//! Talks to `/api2/json` with API-token authentication. Every response is
//! wrapped in `{"data": ...}`; mutating calls answer with a UPID that
//! identifies the task doing the work.

use async_trait::async_trait;
use labgrid_core::ClusterConfig;
use labgrid_state::{ResourceId, ResourceKind};
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::client::{CloneRequest, ClusterClient, NetworkSpec, TaskId, TaskStatus};
use crate::error::{ClusterError, ClusterResult};

/// Management API port used when an endpoint does not name one.
pub const DEFAULT_PORT: u16 = 8006;

const API_PATH: &str = "/api2/json";

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct NodeEntry {
    node: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct CurrentStatus {
    status: String,
}

#[derive(Deserialize)]
struct TaskStatusBody {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

/// Client bound to one management endpoint.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base: Url,
    endpoint: String,
    auth: String,
    probe_timeout: std::time::Duration,
}

/// Try each configured endpoint in order and return a client for the
/// first one that answers.
pub async fn connect(config: &ClusterConfig) -> ClusterResult<ProxmoxClient> {
    let mut failures = Vec::new();

    for endpoint in config
        .endpoints
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
    {
        let attempt = async {
            let client = ProxmoxClient::new(endpoint, config)?;
            client.probe().await?;
            Ok::<_, ClusterError>(client)
        }
        .await;

        match attempt {
            Ok(client) => {
                info!(%endpoint, "connected to cluster endpoint");
                return Ok(client);
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "cluster endpoint unreachable, trying next");
                failures.push(format!("{endpoint}: {e}"));
            }
        }
    }

    Err(ClusterError::Unreachable(failures.join("; ")))
}

impl ProxmoxClient {
    pub fn new(endpoint: &str, config: &ClusterConfig) -> ClusterResult<Self> {
        let base = base_url(endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            http,
            base,
            endpoint: endpoint.to_string(),
            auth: format!(
                "PVEAPIToken={}!{}={}",
                config.user, config.token_name, config.token_value
            ),
            probe_timeout: config.connect_timeout(),
        })
    }

    /// The endpoint this client is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Cheap authenticated call used to test an endpoint.
    async fn probe(&self) -> ClusterResult<()> {
        let url = self.url(&["nodes"])?;
        let _: Vec<NodeEntry> = self
            .send(self.http.get(url).timeout(self.probe_timeout))
            .await?;
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> ClusterResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClusterError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "cannot be a base URL".to_string(),
            })?
            .extend(segments);
        Ok(url)
    }

    fn resource_url(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
        tail: &[&str],
    ) -> ClusterResult<Url> {
        let vmid = vmid.to_string();
        let mut segments = vec!["nodes", node, kind_segment(kind), vmid.as_str()];
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ClusterResult<T> {
        let resp = req.header(AUTHORIZATION, &self.auth).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: Envelope<T> = resp.json().await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ClusterClient for ProxmoxClient {
    async fn online_nodes(&self) -> ClusterResult<Vec<String>> {
        let nodes: Vec<NodeEntry> = self.send(self.http.get(self.url(&["nodes"])?)).await?;
        let online: Vec<String> = nodes
            .into_iter()
            .filter(|n| n.status.as_deref() == Some("online"))
            .map(|n| n.node)
            .collect();
        debug!(?online, "online nodes");
        Ok(online)
    }

    async fn next_id(&self) -> ClusterResult<ResourceId> {
        let url = self.url(&["cluster", "nextid"])?;
        let raw: serde_json::Value = self.send(self.http.get(url)).await?;
        parse_id(&raw)
    }

    async fn clone_template(&self, req: &CloneRequest) -> ClusterResult<TaskId> {
        let url = self.resource_url(&req.node, req.kind, req.source, &["clone"])?;
        let form = clone_form(req);
        let upid: String = self.send(self.http.post(url).form(&form)).await?;
        debug!(node = %req.node, source = req.source, new_id = req.new_id, %upid, "clone issued");
        Ok(TaskId(upid))
    }

    async fn configure_network(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
        net: &NetworkSpec,
    ) -> ClusterResult<Option<TaskId>> {
        let url = self.resource_url(node, kind, vmid, &["config"])?;
        let upid: Option<String> = match kind {
            ResourceKind::Vm => {
                let form = [("net0", vm_net0(net)), ("ipconfig0", vm_ipconfig0(net))];
                self.send(self.http.post(url).form(&form)).await?
            }
            ResourceKind::Container => {
                let form = [("net0", container_net0(net))];
                self.send(self.http.put(url).form(&form)).await?
            }
        };
        debug!(%node, vmid, address = %net.assignment, "network configured");
        Ok(upid.map(TaskId))
    }

    async fn start(&self, node: &str, kind: ResourceKind, vmid: ResourceId) -> ClusterResult<()> {
        let url = self.resource_url(node, kind, vmid, &["status", "start"])?;
        let upid: Option<String> = self.send(self.http.post(url)).await?;
        debug!(%node, vmid, ?upid, "start issued");
        Ok(())
    }

    async fn is_running(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<bool> {
        let url = self.resource_url(node, kind, vmid, &["status", "current"])?;
        let current: CurrentStatus = self.send(self.http.get(url)).await?;
        Ok(current.status == "running")
    }

    async fn stop(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<TaskId> {
        let url = self.resource_url(node, kind, vmid, &["status", "stop"])?;
        let upid: String = self.send(self.http.post(url)).await?;
        Ok(TaskId(upid))
    }

    async fn delete(
        &self,
        node: &str,
        kind: ResourceKind,
        vmid: ResourceId,
    ) -> ClusterResult<TaskId> {
        let url = self.resource_url(node, kind, vmid, &[])?;
        let upid: String = self.send(self.http.delete(url)).await?;
        Ok(TaskId(upid))
    }

    async fn task_status(&self, node: &str, task: &TaskId) -> ClusterResult<TaskStatus> {
        let url = self.url(&["nodes", node, "tasks", task.as_str(), "status"])?;
        let body: TaskStatusBody = self.send(self.http.get(url)).await?;
        Ok(if body.status == "stopped" {
            TaskStatus::Stopped {
                exit_status: body.exitstatus,
            }
        } else {
            TaskStatus::Running
        })
    }
}

/// Normalize an endpoint into the API base URL.
///
/// `host` becomes `https://host:8006/api2/json`; an explicit scheme,
/// port or path is kept.
fn base_url(endpoint: &str) -> ClusterResult<Url> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else if has_port(endpoint) {
        format!("https://{endpoint}")
    } else {
        format!("https://{endpoint}:{DEFAULT_PORT}")
    };

    let mut url = Url::parse(&raw).map_err(|e| ClusterError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(API_PATH);
    }
    Ok(url)
}

fn has_port(endpoint: &str) -> bool {
    endpoint
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
}

fn kind_segment(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Vm => "qemu",
        ResourceKind::Container => "lxc",
    }
}

fn parse_id(raw: &serde_json::Value) -> ClusterResult<ResourceId> {
    match raw {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ClusterError::Decode(format!("invalid resource id: {raw}")))
}

fn clone_form(req: &CloneRequest) -> Vec<(&'static str, String)> {
    let name_field = match req.kind {
        ResourceKind::Vm => "name",
        ResourceKind::Container => "hostname",
    };
    let mut form = vec![
        ("newid", req.new_id.to_string()),
        (name_field, req.name.clone()),
        ("full", if req.full { "1" } else { "0" }.to_string()),
    ];
    // Target storage is only accepted for full clones.
    if req.full {
        form.push(("storage", req.storage.clone()));
    }
    form
}

pub fn vm_net0(net: &NetworkSpec) -> String {
    format!("virtio,bridge={},tag={}", net.bridge, net.assignment.vlan)
}

pub fn vm_ipconfig0(net: &NetworkSpec) -> String {
    format!(
        "ip={},gw={}",
        net.assignment.cidr(),
        net.assignment.gateway
    )
}

pub fn container_net0(net: &NetworkSpec) -> String {
    format!(
        "name=eth0,bridge={},gw={},ip={},tag={}",
        net.bridge,
        net.assignment.gateway,
        net.assignment.cidr(),
        net.assignment.vlan
    )
}
