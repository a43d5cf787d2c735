//! labgrid.toml configuration parser.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Management API endpoints and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Candidate endpoints, tried in order on connect.
    pub endpoints: Vec<String>,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default = "default_bridge")]
    pub bridge: String,
    #[serde(default = "default_true")]
    pub full_clone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_connect_timeout() -> u64 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_storage() -> String {
    "Data".to_string()
}

fn default_bridge() -> String {
    "vmbr0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_wait() -> u64 {
    600
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/labgrid")
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            bridge: default_bridge(),
            full_clone: true,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("endpoints", &self.endpoints)
            .field("user", &self.user)
            .field("token_name", &self.token_name)
            .field("token_value", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ClusterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TaskConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl LabConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LabConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configs that can never work.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.endpoints.iter().all(|e| e.trim().is_empty()) {
            anyhow::bail!("cluster.endpoints must list at least one endpoint");
        }
        if self.tasks.poll_interval_ms == 0 {
            anyhow::bail!("tasks.poll_interval_ms must be greater than zero");
        }
        if self.tasks.max_wait_secs == 0 {
            anyhow::bail!("tasks.max_wait_secs must be greater than zero");
        }
        Ok(())
    }
}
