//! Docker engine install, uninstall and status through `docker-manager.sh`

use crate::archive;
use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{Result, SomError};
use crate::exec::{CommandRunner, Executor, RemoteNode};
use crate::output;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Location of the helper script
pub const SCRIPT_URL: &str = "https://structured.oss-cn-beijing.aliyuncs.com/docker/2.4/docker-manager.sh";
pub const SCRIPT_NAME: &str = "docker-manager.sh";

/// Version value meaning "whatever the script installs by default"
pub const LATEST: &str = "latest";

/// Drives the docker-manager script locally or on remote nodes
pub struct DockerInstaller<'a> {
    settings: &'a Settings,
    executor: Arc<dyn Executor>,
    downloader: Downloader,
    silent: bool,
}

impl<'a> DockerInstaller<'a> {
    pub fn new(settings: &'a Settings, executor: Arc<dyn Executor>) -> Self {
        Self {
            settings,
            executor,
            downloader: Downloader::from_settings(settings).with_quiet(true),
            silent: false,
        }
    }

    /// Pass `-y` to the script and suppress progress lines
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// `scripts/docker-manager.sh` under the work directory
    pub fn script_path(&self) -> PathBuf {
        self.settings.script_dir().join(SCRIPT_NAME)
    }

    /// Offline package directory for a version
    pub fn package_dir(&self, version: &str) -> PathBuf {
        self.settings.download_dir().join("docker").join(version)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.settings.data_dir().join("docker")
    }

    /// Make sure the script is present, downloading it unless offline
    pub async fn ensure_script(&self) -> Result<PathBuf> {
        let path = self.script_path();
        if path.exists() {
            return Ok(path);
        }
        if self.settings.offline {
            return Err(SomError::Install(format!(
                "{} not found in offline mode: {}",
                SCRIPT_NAME,
                path.display()
            )));
        }
        if !self.silent {
            output::info("Downloading docker-manager script...");
        }
        self.downloader.download(SCRIPT_URL, &path).await?;
        set_executable(&path)?;
        Ok(path)
    }

    /// Script arguments for an install
    pub fn install_args(&self, version: &str, package_dir: &Path, data_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.silent {
            args.push("-y".to_string());
        }
        if self.settings.offline {
            args.push("-o".to_string());
        }
        if version != LATEST {
            args.push("-v".to_string());
            args.push(version.to_string());
        }
        args.push("-p".to_string());
        args.push(package_dir.display().to_string());
        args.push("--data".to_string());
        args.push(data_dir.display().to_string());
        args
    }

    /// Install Docker on each node, or locally when `nodes` is empty
    pub async fn install(&self, version: &str, nodes: &[RemoteNode]) -> Result<()> {
        let script = self.ensure_script().await?;
        for node in nodes_or_local(nodes) {
            if !self.silent {
                output::info(format!("Installing Docker ({}) on {}", version, node.label()));
            }
            let result = if node.is_local() {
                let args = self.install_args(version, &self.package_dir(version), &self.data_dir());
                run_local_script(&script, &args).await
            } else {
                self.install_remote(&node, &script, version).await
            };
            result.map_err(|e| {
                SomError::Install(format!("failed to install Docker on {}: {}", node.label(), e))
            })?;
            if !self.silent {
                output::success(format!("Docker installed on {}", node.label()));
            }
        }
        Ok(())
    }

    /// Remote paths mirror the local work directory layout
    async fn install_remote(&self, node: &RemoteNode, script: &Path, version: &str) -> Result<()> {
        let package_dir = self.package_dir(version);
        let data_dir = self.data_dir();
        let script_dir = self.settings.script_dir();

        self.executor
            .run(
                node,
                &format!(
                    "mkdir -p {} {} {}",
                    script_dir.display(),
                    package_dir.display(),
                    data_dir.display()
                ),
            )
            .await?;

        self.upload_script(node, script).await?;

        if package_dir.is_dir() {
            self.copy_dir(node, &package_dir).await?;
        }

        let args = self.install_args(version, &package_dir, &data_dir);
        self.run_remote_script(node, &args).await.map(|_| ())
    }

    async fn upload_script(&self, node: &RemoteNode, script: &Path) -> Result<()> {
        let data = tokio::fs::read(script).await?;
        self.executor
            .upload(node, data, &script.display().to_string(), Some(0o755))
            .await
    }

    /// Copy a directory as a tarball and unpack it at the same path on the node
    async fn copy_dir(&self, node: &RemoteNode, dir: &Path) -> Result<()> {
        if !self.silent {
            output::info(format!("Copying {} to {}", dir.display(), node.label()));
        }
        let bundle = {
            let dir = dir.to_path_buf();
            tokio::task::spawn_blocking(move || archive::pack_dir_to_vec(&dir))
                .await
                .map_err(|e| SomError::Internal(e.to_string()))??
        };
        let remote_tmp = format!("/tmp/somcli-docker-{}.tar.gz", uuid::Uuid::new_v4());
        self.executor.upload(node, bundle, &remote_tmp, None).await?;
        self.executor
            .run(
                node,
                &format!(
                    "tar -xzf {tmp} -C {dir} && rm -f {tmp}",
                    tmp = remote_tmp,
                    dir = dir.display()
                ),
            )
            .await?;
        Ok(())
    }

    async fn run_remote_script(&self, node: &RemoteNode, args: &[String]) -> Result<String> {
        let script = self.script_path();
        let command = format!(
            "chmod +x {s} && {s} {args}",
            s = script.display(),
            args = args.join(" ")
        );
        debug!("docker-manager on {}: {}", node.label(), command);
        self.executor.run(node, command.trim_end()).await
    }

    /// Make sure the script exists on a remote node
    async fn ensure_remote_script(&self, node: &RemoteNode, script: &Path) -> Result<()> {
        let probe = format!("test -f {} && echo exists || echo missing", script.display());
        if self.executor.run(node, &probe).await? != "exists" {
            self.upload_script(node, script).await?;
        }
        Ok(())
    }

    /// Uninstall Docker from each node, or locally when `nodes` is empty
    pub async fn uninstall(&self, nodes: &[RemoteNode]) -> Result<()> {
        let script = self.ensure_script().await?;
        for node in nodes_or_local(nodes) {
            if !self.silent {
                output::info(format!("Uninstalling Docker from {}", node.label()));
            }
            let result = if node.is_local() {
                let mut args = Vec::new();
                if self.silent {
                    args.push("-y".to_string());
                }
                args.push("-u".to_string());
                run_local_script(&script, &args).await
            } else {
                self.ensure_remote_script(&node, &script).await?;
                self.run_remote_script(&node, &["-y".to_string(), "-u".to_string()])
                    .await
                    .map(|_| ())
            };
            result.map_err(|e| {
                SomError::Install(format!("failed to uninstall Docker from {}: {}", node.label(), e))
            })?;
            if !self.silent {
                output::success(format!("Docker uninstalled from {}", node.label()));
            }
        }
        Ok(())
    }

    /// Report the Docker status of each node
    pub async fn status(&self, nodes: &[RemoteNode]) -> Result<Vec<(String, String)>> {
        let script = self.ensure_script().await?;
        let mut reports = Vec::new();
        for node in nodes_or_local(nodes) {
            let report = if node.is_local() {
                let script = script.display().to_string();
                CommandRunner::run(&script, &["-c"]).await?.combined()
            } else {
                self.ensure_remote_script(&node, &script).await?;
                self.run_remote_script(&node, &["-c".to_string()]).await?
            };
            if !self.silent {
                output::info(format!("Docker status on {}:", node.label()));
            }
            println!("{}", report);
            reports.push((node.label(), report));
        }
        Ok(reports)
    }

    /// Forward arguments to `docker` on each node and return the last exit code
    pub async fn passthrough(&self, args: &[String], nodes: &[RemoteNode]) -> Result<i32> {
        let mut code = 0;
        for node in nodes_or_local(nodes) {
            if node.is_local() {
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                code = CommandRunner::run_interactive("docker", &refs).await?;
            } else {
                if !self.silent {
                    output::info(format!("Running on {}: docker {}", node.label(), args.join(" ")));
                }
                let quoted: Vec<String> = args.iter().map(|a| crate::exec::shell_quote(a)).collect();
                let out = self
                    .executor
                    .run(&node, &format!("docker {}", quoted.join(" ")))
                    .await?;
                println!("{}", out);
            }
        }
        Ok(code)
    }
}

fn nodes_or_local(nodes: &[RemoteNode]) -> Vec<RemoteNode> {
    if nodes.is_empty() {
        vec![RemoteNode::local()]
    } else {
        nodes.to_vec()
    }
}

async fn run_local_script(script: &Path, args: &[String]) -> Result<()> {
    set_executable(script)?;
    let program = script.display().to_string();
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let code = CommandRunner::run_interactive(&program, &refs).await?;
    if code == 0 {
        Ok(())
    } else {
        Err(SomError::command(
            format!("{} {}", program, args.join(" ")),
            code,
            "",
            "",
        ))
    }
}

fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}
