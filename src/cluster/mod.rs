//! Cluster lifecycle
//!
//! A topology file names the cluster type and its nodes. [`ClusterManager`]
//! loads it and hands off to the swarm or kubernetes bring-up.

pub mod common;
pub mod config;
pub mod detector;
pub mod kubernetes;
pub mod swarm;

pub use config::{ClusterConfig, ClusterSpec, ClusterType, K8sConfig, SwarmConfig};
pub use detector::ClusterDetector;
pub use kubernetes::K8sCluster;
pub use swarm::SwarmCluster;

use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{Result, SomError};
use crate::exec::Executor;
use crate::output;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point for `cluster create|remove|detect`
pub struct ClusterManager<'a> {
    settings: &'a Settings,
    executor: Arc<dyn Executor>,
    downloader: Downloader,
}

impl<'a> ClusterManager<'a> {
    pub fn new(settings: &'a Settings, executor: Arc<dyn Executor>) -> Self {
        Self {
            settings,
            executor,
            downloader: Downloader::from_settings(settings),
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    fn load(&self, file: &Path, type_override: Option<&str>) -> Result<(ClusterSpec, ClusterType)> {
        let mut spec = ClusterConfig::load(file)
            .map_err(|e| SomError::Config(format!("failed to load config: {}", e)))?
            .cluster;
        if let Some(t) = type_override.filter(|t| !t.is_empty()) {
            spec.cluster_type = t.to_string();
        }
        let cluster_type = spec.cluster_type()?;
        Ok((spec, cluster_type))
    }

    /// Join command left by an earlier bring-up, if any
    fn previous_state(&self, spec: &ClusterSpec, cluster_type: ClusterType) -> Option<PathBuf> {
        let path = match cluster_type {
            ClusterType::Swarm => SwarmCluster::new(self.settings, self.executor.clone()).join_file(),
            ClusterType::K8s => {
                K8sCluster::new(self.settings, self.executor.clone(), self.downloader.clone())
                    .join_file(spec)
            }
            _ => return None,
        };
        path.exists().then_some(path)
    }

    /// Bring up the cluster described by `file`.
    ///
    /// Without `force`, join commands saved by an earlier run stop the bring-up.
    pub async fn create(
        &self,
        file: &Path,
        type_override: Option<&str>,
        force: bool,
        skip_precheck: bool,
    ) -> Result<()> {
        let (spec, cluster_type) = self.load(file, type_override)?;
        if let Some(path) = self.previous_state(&spec, cluster_type) {
            if !force {
                return Err(SomError::Cluster(format!(
                    "state from a previous bring-up found at {}, use --force to create anyway",
                    path.display()
                )));
            }
            output::warning(format!("Overwriting previous cluster state at {}", path.display()));
        }
        self.settings.ensure_dirs()?;

        match cluster_type {
            ClusterType::Swarm => {
                SwarmCluster::new(self.settings, self.executor.clone())
                    .create(&spec, skip_precheck)
                    .await
            }
            ClusterType::K8s => {
                K8sCluster::new(self.settings, self.executor.clone(), self.downloader.clone())
                    .create(&spec, skip_precheck)
                    .await
            }
            other => Err(SomError::Cluster(format!("unsupported cluster type: {}", other))),
        }
    }

    /// Tear down the cluster described by `file`, asking first unless `force`
    pub async fn remove(&self, file: &Path, force: bool) -> Result<()> {
        let (spec, cluster_type) = self.load(file, None)?;
        if !matches!(cluster_type, ClusterType::Swarm | ClusterType::K8s) {
            return Err(SomError::Cluster(format!("unsupported cluster type: {}", cluster_type)));
        }
        let prompt = format!(
            "Are you sure you want to remove the {} cluster {}?",
            cluster_type.display_name(),
            spec.name
        );
        if !force && !common::confirm(&prompt) {
            return Err(SomError::Cluster("cluster removal cancelled".to_string()));
        }

        match cluster_type {
            ClusterType::Swarm => {
                SwarmCluster::new(self.settings, self.executor.clone())
                    .remove(&spec, force)
                    .await
            }
            _ => {
                K8sCluster::new(self.settings, self.executor.clone(), self.downloader.clone())
                    .remove(&spec)
                    .await
            }
        }
    }

    /// Detect the cluster type of the local host
    pub async fn detect(&self) -> ClusterType {
        ClusterDetector::new(self.executor.clone()).detect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedExecutor;
    use tempfile::TempDir;

    const SWARM: &str = r#"
cluster:
  type: swarm
  name: demo
  nodes:
    - { host: mgr1, ip: 10.0.0.1, role: manager }
"#;

    fn setup() -> (TempDir, Settings, PathBuf) {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().join("work"),
            offline: true,
            ..Default::default()
        };
        let file = dir.path().join("cluster.yaml");
        std::fs::write(&file, SWARM).unwrap();
        (dir, settings, file)
    }

    #[tokio::test]
    async fn test_type_override_is_validated() {
        let (_dir, settings, file) = setup();
        let manager = ClusterManager::new(&settings, Arc::new(ScriptedExecutor::new()));
        let err = manager.create(&file, Some("nomad"), false, true).await.unwrap_err();
        assert!(err.to_string().contains("unsupported cluster type"));
    }

    #[tokio::test]
    async fn test_previous_state_requires_force() {
        let (_dir, settings, file) = setup();
        std::fs::create_dir_all(&settings.workdir).unwrap();
        std::fs::write(settings.workdir.join(swarm::JOIN_FILE), "Manager: x\nWorker: y").unwrap();

        let executor = Arc::new(
            ScriptedExecutor::new()
                .reply("join-token", "docker swarm join --token T 10.0.0.1:2377")
                .reply("docker node ls", "ID HOSTNAME"),
        );
        let manager = ClusterManager::new(&settings, executor.clone());
        let err = manager.create(&file, None, false, true).await.unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(executor.commands().is_empty());

        manager.create(&file, None, true, true).await.unwrap();
        assert!(executor.position("docker swarm init").is_some());
    }

    #[tokio::test]
    async fn test_forced_remove_swarm() {
        let (_dir, settings, file) = setup();
        std::fs::create_dir_all(settings.script_dir()).unwrap();
        std::fs::write(settings.script_dir().join(crate::docker::SCRIPT_NAME), "#!/bin/sh\n").unwrap();
        let executor = Arc::new(ScriptedExecutor::new().reply("test -f", "exists"));
        let manager = ClusterManager::new(&settings, executor.clone());
        manager.remove(&file, true).await.unwrap();
        let cmds = executor.commands_on("mgr1");
        assert_eq!(cmds[0], "docker swarm leave --force");
        assert!(cmds.last().unwrap().ends_with("docker-manager.sh -y -u"));
    }
}
