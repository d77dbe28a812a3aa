//! Detect which orchestrator the current host belongs to

use super::config::ClusterType;
use crate::exec::{Executor, RemoteNode};
use std::sync::Arc;
use tracing::debug;

/// Probes a node with kubectl and docker to find the cluster type
pub struct ClusterDetector {
    executor: Arc<dyn Executor>,
    node: RemoteNode,
}

impl ClusterDetector {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            node: RemoteNode::local(),
        }
    }

    pub fn on_node(mut self, node: RemoteNode) -> Self {
        self.node = node;
        self
    }

    async fn has_command(&self, name: &str) -> bool {
        self.executor
            .run(&self.node, &format!("command -v {}", name))
            .await
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false)
    }

    /// Kubernetes wins over Swarm, Swarm over plain Docker
    pub async fn detect(&self) -> ClusterType {
        if self.has_command("kubectl").await {
            match self.executor.run(&self.node, "kubectl cluster-info").await {
                Ok(out) if out.contains("is running at") => return ClusterType::K8s,
                Ok(_) => debug!("kubectl present but no cluster reachable"),
                Err(e) => debug!("kubectl cluster-info failed: {}", e),
            }
        }

        if self.has_command("docker").await {
            if let Ok(out) = self.executor.run(&self.node, "docker node ls").await {
                if out.contains("ID") && out.contains("HOSTNAME") {
                    return ClusterType::Swarm;
                }
            }
            if self.executor.run(&self.node, "docker info").await.is_ok() {
                return ClusterType::Docker;
            }
        }

        ClusterType::None
    }
}
