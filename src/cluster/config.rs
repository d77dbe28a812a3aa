//! Cluster topology file

use crate::error::{Result, SomError};
use crate::exec::RemoteNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_K8S_VERSION: &str = "1.28.2";
pub const DEFAULT_POD_CIDR: &str = "10.244.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
pub const DEFAULT_DOCKER_VERSION: &str = "24.0.7";
pub const DEFAULT_CONTAINERD_VERSION: &str = "1.7.11";
pub const DEFAULT_PAUSE_VERSION: &str = "3.9";
pub const DEFAULT_CNI_VERSION: &str = "1.4.0";
pub const DEFAULT_RUNC_VERSION: &str = "1.1.10";
pub const DEFAULT_SWARM_LISTEN_ADDR: &str = "0.0.0.0:2377";

/// Kind of cluster a topology file describes or the detector finds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    K8s,
    Swarm,
    Docker,
    None,
}

impl ClusterType {
    /// Name shown to the user
    pub fn display_name(self) -> &'static str {
        match self {
            ClusterType::K8s => "Kubernetes",
            ClusterType::Swarm => "Docker Swarm",
            ClusterType::Docker => "Docker",
            ClusterType::None => "Unknown",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterType::K8s => "k8s",
            ClusterType::Swarm => "swarm",
            ClusterType::Docker => "docker",
            ClusterType::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for ClusterType {
    type Err = SomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "k8s" | "kubernetes" => Ok(ClusterType::K8s),
            "swarm" => Ok(ClusterType::Swarm),
            "docker" => Ok(ClusterType::Docker),
            "none" => Ok(ClusterType::None),
            other => Err(SomError::InvalidArgument(format!(
                "unsupported cluster type: {}",
                other
            ))),
        }
    }
}

/// Top-level document: everything lives under `cluster:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster: ClusterSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(rename = "type", default)]
    pub cluster_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<RemoteNode>,
    #[serde(rename = "k8sConfig", default)]
    pub k8s: K8sConfig,
    #[serde(rename = "swarmConfig", default)]
    pub swarm: SwarmConfig,
}

/// Kubernetes settings. Empty fields are filled by [`K8sConfig::with_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sConfig {
    pub version: String,
    pub pod_network_cidr: String,
    pub service_cidr: String,
    pub docker_version: String,
    pub containerd_version: String,
    /// `docker` or `containerd`
    pub container_runtime: String,
    /// Mirror for control plane images, e.g. `registry.aliyuncs.com/google_containers`
    pub image_repository: String,
    pub pause_image_version: String,
    pub cni_plugins_version: String,
    pub runc_version: String,
}

fn fill(field: &mut String, default: &str) {
    if field.trim().is_empty() {
        *field = default.to_string();
    }
}

impl K8sConfig {
    pub fn with_defaults(mut self) -> Self {
        fill(&mut self.version, DEFAULT_K8S_VERSION);
        fill(&mut self.pod_network_cidr, DEFAULT_POD_CIDR);
        fill(&mut self.service_cidr, DEFAULT_SERVICE_CIDR);
        fill(&mut self.docker_version, DEFAULT_DOCKER_VERSION);
        fill(&mut self.containerd_version, DEFAULT_CONTAINERD_VERSION);
        fill(&mut self.container_runtime, "containerd");
        fill(&mut self.pause_image_version, DEFAULT_PAUSE_VERSION);
        fill(&mut self.cni_plugins_version, DEFAULT_CNI_VERSION);
        fill(&mut self.runc_version, DEFAULT_RUNC_VERSION);
        self.version = self.version.trim_start_matches('v').to_string();
        self
    }

    pub fn uses_docker(&self) -> bool {
        self.container_runtime.eq_ignore_ascii_case("docker")
    }

    /// CRI socket passed to kubeadm
    pub fn cri_socket(&self) -> &'static str {
        if self.uses_docker() {
            "unix:///var/run/dockershim.sock"
        } else {
            "unix:///var/run/containerd/containerd.sock"
        }
    }

    /// Registry the pause image is pulled from
    pub fn pause_image(&self) -> String {
        let repo = if self.image_repository.is_empty() {
            "registry.k8s.io"
        } else {
            self.image_repository.as_str()
        };
        format!("{}/pause:{}", repo, self.pause_image_version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmConfig {
    pub advertise_addr: String,
    pub listen_addr: String,
    pub default_addr_pool: Vec<String>,
    pub subnet_size: u32,
    pub data_path_port: u32,
}

pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

impl ClusterConfig {
    /// Load a topology file and check the fields every cluster needs
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SomError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        let mut config: ClusterConfig = serde_yaml::from_str(content)
            .map_err(|e| SomError::Config(format!("failed to parse config file: {}", e)))?;

        if config.cluster.cluster_type.trim().is_empty() {
            return Err(SomError::Config("cluster type must be specified".to_string()));
        }
        if config.cluster.nodes.is_empty() {
            return Err(SomError::Config("at least one node must be specified".to_string()));
        }
        config.cluster.k8s = std::mem::take(&mut config.cluster.k8s).with_defaults();
        Ok(config)
    }
}

impl ClusterSpec {
    pub fn cluster_type(&self) -> Result<ClusterType> {
        self.cluster_type.parse()
    }

    /// Nodes with a role, in file order
    pub fn nodes_with_role(&self, role: &str) -> Vec<&RemoteNode> {
        self.nodes.iter().filter(|n| n.has_role(role)).collect()
    }

    /// `ip<TAB>host` line per node
    pub fn hosts_entries(&self) -> String {
        self.nodes
            .iter()
            .map(|n| format!("{}\t{}\n", n.ip, n.host))
            .collect()
    }

    fn validate_common(&self, control_role: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SomError::Config("cluster name cannot be empty".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(SomError::Config("no nodes defined in cluster configuration".to_string()));
        }
        for node in &self.nodes {
            if !is_valid_ipv4(&node.ip) {
                return Err(SomError::Config(format!(
                    "invalid IP address format for node {}: {}",
                    node.host, node.ip
                )));
            }
        }
        if self.nodes_with_role(control_role).is_empty() {
            return Err(SomError::Config(format!(
                "at least one {} node is required",
                control_role
            )));
        }
        Ok(())
    }

    pub fn validate_swarm(&self) -> Result<()> {
        self.validate_common("manager")
    }

    pub fn validate_k8s(&self) -> Result<()> {
        self.validate_common("master")?;
        if self.k8s.pod_network_cidr.is_empty() {
            return Err(SomError::Config("pod network CIDR cannot be empty".to_string()));
        }
        if self.k8s.service_cidr.is_empty() {
            return Err(SomError::Config("service CIDR cannot be empty".to_string()));
        }
        Ok(())
    }
}
