//! Install resources on the local machine or remote hosts

use super::fetch::ResourceFetcher;
use super::manifest::{Resource, ResourceConfig};
use crate::config::Settings;
use crate::download::{checksum, Downloader};
use crate::error::{Result, SomError};
use crate::exec::{Executor, RemoteNode};
use crate::output;
use crate::template::TemplateContext;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Downloads, distributes and runs install scripts for resources
pub struct ResourceInstaller<'a> {
    settings: &'a Settings,
    executor: Arc<dyn Executor>,
    fetcher: ResourceFetcher<'a>,
    nodes: Vec<RemoteNode>,
}

impl<'a> ResourceInstaller<'a> {
    pub fn new(settings: &'a Settings, executor: Arc<dyn Executor>, downloader: Downloader) -> Self {
        Self {
            settings,
            executor,
            fetcher: ResourceFetcher::new(settings, downloader),
            nodes: Vec::new(),
        }
    }

    /// Nodes used to resolve `Resource::hosts`
    pub fn with_nodes(mut self, nodes: Vec<RemoteNode>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Look up a host by name or IP among the known nodes
    pub fn resolve_node(&self, host: &str) -> RemoteNode {
        self.nodes
            .iter()
            .find(|n| n.host == host || n.ip == host)
            .cloned()
            .unwrap_or_else(|| {
                debug!("host {} not in node list, using defaults", host);
                RemoteNode::new(host, host, "")
            })
    }

    /// Nodes a resource installs on. No hosts means every manifest node,
    /// or the local machine when the manifest lists none.
    pub fn target_nodes(&self, resource: &Resource) -> Vec<RemoteNode> {
        if !resource.hosts.is_empty() {
            resource.hosts.iter().map(|h| self.resolve_node(h)).collect()
        } else if !self.nodes.is_empty() {
            self.nodes.clone()
        } else {
            vec![RemoteNode::local()]
        }
    }

    /// Download, copy to hosts, write extra files, then run pre- and post-install scripts
    pub async fn install(&self, resource: &Resource) -> Result<()> {
        output::stage(format!("Installing {} {}", resource.name, resource.version));
        let targets = self.target_nodes(resource);

        for url in &resource.urls {
            let result = self.fetcher.fetch(resource, url).await;
            if let Some(e) = result.error {
                return Err(SomError::Install(format!(
                    "{}: download of {} failed: {}",
                    resource.name, result.url, e
                )));
            }
            for node in targets.iter().filter(|n| !n.is_local()) {
                self.copy_if_changed(node, &result.local_path).await?;
            }
        }

        for (path, content) in &resource.extra_files {
            for node in &targets {
                debug!("writing {} on {}", path, node.label());
                self.executor
                    .upload(node, content.clone().into_bytes(), path, Some(0o644))
                    .await?;
            }
        }

        self.run_scripts(resource, &resource.pre_install, &targets, "pre-install")
            .await?;
        self.run_scripts(resource, &resource.post_install, &targets, "post-install")
            .await?;

        output::success(format!("{} {} installed", resource.name, resource.version));
        Ok(())
    }

    /// Run the resource's remove scripts
    pub async fn remove(&self, resource: &Resource) -> Result<()> {
        output::stage(format!("Removing {} {}", resource.name, resource.version));
        let targets = self.target_nodes(resource);
        self.run_scripts(resource, &resource.remove_scripts, &targets, "remove")
            .await
    }

    /// Copy a cached file to the same path on a node unless the node already has it
    async fn copy_if_changed(&self, node: &RemoteNode, local: &Path) -> Result<()> {
        let remote = local.display().to_string();
        let local_sum = checksum::sha256_file(local)?;
        let probe = format!(
            "test -f {p} && {cmd} || true",
            p = remote,
            cmd = checksum::remote_command(checksum::Algorithm::Sha256, &remote)
        );
        if let Ok(remote_sum) = self.executor.run(node, &probe).await {
            if remote_sum.eq_ignore_ascii_case(&local_sum) {
                output::info(format!("{} already present on {}, skipping copy", remote, node.label()));
                return Ok(());
            }
        }
        output::info(format!("Copying {} to {}", remote, node.label()));
        self.executor.copy_file(node, local, &remote).await
    }

    /// Scripts are templated and run on every target. Failures are logged, not fatal.
    async fn run_scripts(
        &self,
        resource: &Resource,
        scripts: &[String],
        targets: &[RemoteNode],
        phase: &str,
    ) -> Result<()> {
        if scripts.is_empty() {
            return Ok(());
        }
        debug!("{} scripts for {}", phase, resource.name);
        let ctx = TemplateContext::for_resource(self.settings, &resource.name, &resource.version);
        let mut failures = 0;

        for script in scripts {
            let command = ctx.render(script.trim())?;
            for node in targets {
                match self.executor.run(node, &command).await {
                    Ok(out) => {
                        output::debug(format!("[{}] {} ->\n{}", node.label(), command, out))
                    }
                    Err(e) => {
                        failures += 1;
                        debug!("{} script failed on {}: {}", phase, node.label(), e);
                        output::debug(format!("[{}] {} failed: {}", node.label(), command, e));
                    }
                }
            }
        }

        if failures > 0 {
            debug!("{} {} script(s) failed for {}", failures, phase, resource.name);
        }
        Ok(())
    }

    /// Install every resource in a manifest
    pub async fn install_from_file(&self, path: &Path) -> Result<()> {
        let config = ResourceConfig::load(path)?;
        for resource in &config.resources {
            self.install(resource).await.map_err(|e| {
                SomError::Install(format!("{} install failed: {}", resource.name, e))
            })?;
        }
        Ok(())
    }

    /// Install one named resource from a manifest
    pub async fn install_tool(&self, path: &Path, name: &str) -> Result<()> {
        let config = ResourceConfig::load(path)?;
        let resource = config
            .find(name)
            .ok_or_else(|| SomError::Install(format!("resource {} not found in {}", name, path.display())))?;
        self.install(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedExecutor;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            workdir: dir.path().to_path_buf(),
            offline: true,
            ..Default::default()
        }
    }

    fn cached(dir: &TempDir, rel: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("download").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn runc() -> Resource {
        let mut res = Resource::new("runc", "1.1.10");
        res.urls = vec!["https://example.com/runc.amd64".to_string()];
        res.hosts = vec!["10.0.0.11".to_string()];
        res.pre_install = vec!["echo pre {{.Name}}".to_string()];
        res.post_install = vec![" install -m 755 {{.CacheDir}}/runc.amd64 /usr/local/sbin/runc".to_string()];
        res.extra_files
            .insert("/etc/runc.conf".to_string(), "debug = false".to_string());
        res
    }

    #[tokio::test]
    async fn test_install_copies_then_runs_scripts_in_order() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let local = cached(&dir, "runc/1.1.10/runc.amd64", "binary");
        let executor = Arc::new(ScriptedExecutor::new());
        let installer = ResourceInstaller::new(&settings, executor.clone(), Downloader::new().with_offline(true))
            .with_nodes(vec![RemoteNode::new("node1", "10.0.0.11", "worker")]);

        installer.install(&runc()).await.unwrap();

        let uploads = executor.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].0, "node1");
        assert_eq!(uploads[0].1, local.display().to_string());
        assert_eq!(uploads[1].1, "/etc/runc.conf");

        let commands = executor.commands_on("node1");
        assert!(commands[0].starts_with("test -f"));
        assert_eq!(commands[1], "echo pre runc");
        assert_eq!(
            commands[2],
            format!("install -m 755 {}/download/runc/1.1.10/runc.amd64 /usr/local/sbin/runc", dir.path().display())
        );
    }

    #[tokio::test]
    async fn test_install_skips_copy_when_remote_matches() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let local = cached(&dir, "runc/1.1.10/runc.amd64", "binary");
        let sum = checksum::sha256_file(&local).unwrap();
        let executor = Arc::new(ScriptedExecutor::new().reply("sha256sum", &sum.to_uppercase()));
        let installer = ResourceInstaller::new(&settings, executor.clone(), Downloader::new().with_offline(true));

        let mut res = runc();
        res.extra_files.clear();
        installer.install(&res).await.unwrap();
        assert!(executor.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_script_failures_are_not_fatal() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(ScriptedExecutor::new().fail("yum", "no network"));
        let installer = ResourceInstaller::new(&settings, executor.clone(), Downloader::new().with_offline(true));

        let mut res = Resource::new("base-dependencies", "");
        res.hosts = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        res.post_install = vec![
            "yum install -y socat".to_string(),
            "modprobe overlay".to_string(),
        ];
        installer.install(&res).await.unwrap();
        assert_eq!(executor.commands().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_download_is_fatal() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(ScriptedExecutor::new());
        let installer = ResourceInstaller::new(&settings, executor.clone(), Downloader::new().with_offline(true));

        let err = installer.install(&runc()).await.unwrap_err();
        assert!(matches!(err, SomError::Install(_)));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_install_tool_not_found() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let manifest = dir.path().join("res.yaml");
        std::fs::write(&manifest, "resources:\n  - name: helm\n").unwrap();
        let installer = ResourceInstaller::new(&settings, Arc::new(ScriptedExecutor::new()), Downloader::new());

        let err = installer.install_tool(&manifest, "kubectl").await.unwrap_err();
        assert!(err.to_string().contains("kubectl"));
        installer.install_tool(&manifest, "helm").await.unwrap();
    }

    #[test]
    fn test_target_nodes() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let installer = ResourceInstaller::new(&settings, Arc::new(ScriptedExecutor::new()), Downloader::new())
            .with_nodes(vec![RemoteNode::new("node1", "10.0.0.11", "worker")]);

        let mut pinned = Resource::new("x", "1");
        pinned.hosts = vec!["10.0.0.99".to_string()];
        let targets = installer.target_nodes(&pinned);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].ip, "10.0.0.99");

        assert_eq!(installer.resolve_node("node1").ip, "10.0.0.11");
        assert_eq!(installer.resolve_node("10.0.0.99").ip, "10.0.0.99");
    }

    #[test]
    fn test_target_nodes_default_to_manifest_nodes() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let installer = ResourceInstaller::new(&settings, Arc::new(ScriptedExecutor::new()), Downloader::new())
            .with_nodes(vec![
                RemoteNode::new("node1", "10.0.0.11", "worker"),
                RemoteNode::new("node2", "10.0.0.12", "worker"),
            ]);
        let targets = installer.target_nodes(&Resource::new("x", "1"));
        let hosts: Vec<&str> = targets.iter().map(|n| n.host.as_str()).collect();
        assert_eq!(hosts, vec!["node1", "node2"]);

        let bare = ResourceInstaller::new(&settings, Arc::new(ScriptedExecutor::new()), Downloader::new());
        let local = bare.target_nodes(&Resource::new("x", "1"));
        assert_eq!(local.len(), 1);
        assert!(local[0].is_local());
    }
}
