//! Nodes and the executor that runs commands on them

use super::command::{CommandRunner, DEFAULT_TIMEOUT};
use super::ssh::{SshSession, SSH_PORT};
use crate::config::expand_tilde;
use crate::error::{Result, SomError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

fn default_user() -> String {
    "root".to_string()
}

/// A host taking part in a cluster or resource install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Hostname written to `/etc/hosts`
    #[serde(default)]
    pub host: String,
    /// Address used for SSH
    #[serde(default)]
    pub ip: String,
    /// master, worker, manager, ...
    #[serde(default)]
    pub role: String,
    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path, `~` is expanded
    #[serde(default, rename = "sshKey")]
    pub ssh_key: String,
    /// Force local execution
    #[serde(default)]
    pub is_local: bool,
}

impl RemoteNode {
    pub fn new(host: &str, ip: &str, role: &str) -> Self {
        Self {
            host: host.to_string(),
            ip: ip.to_string(),
            role: role.to_string(),
            user: default_user(),
            ssh_key: String::new(),
            is_local: false,
        }
    }

    /// The machine somcli runs on
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            ip: "127.0.0.1".to_string(),
            is_local: true,
            ..Self::new("", "", "")
        }
    }

    /// Case-insensitive role comparison
    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }

    /// Whether commands for this node run on this machine
    pub fn is_local(&self) -> bool {
        if self.is_local
            || self.host == "localhost"
            || self.host == "127.0.0.1"
            || self.ip == "127.0.0.1"
        {
            return true;
        }
        let hostname = gethostname::gethostname();
        !self.host.is_empty() && hostname.to_string_lossy() == self.host.as_str()
    }

    /// Address to connect to
    pub fn address(&self) -> &str {
        if self.ip.is_empty() {
            &self.host
        } else {
            &self.ip
        }
    }

    /// Human-readable name for log lines
    pub fn label(&self) -> String {
        match (self.host.is_empty(), self.ip.is_empty()) {
            (false, false) if self.host != self.ip => format!("{} ({})", self.host, self.ip),
            (false, _) => self.host.clone(),
            _ => self.ip.clone(),
        }
    }
}

/// Runs shell commands and transfers files on nodes
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command and return its trimmed stdout, failing on a non-zero exit
    async fn run(&self, node: &RemoteNode, command: &str) -> Result<String>;

    /// Write bytes to a path on the node
    async fn upload(
        &self,
        node: &RemoteNode,
        data: Vec<u8>,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()>;

    /// Copy a local file to the same or another path on the node
    async fn copy_file(&self, node: &RemoteNode, local: &Path, remote_path: &str) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        self.upload(node, data, remote_path, None).await
    }
}

/// Executes locally or over SSH depending on the node
#[derive(Default)]
pub struct NodeExecutor {
    sessions: Mutex<HashMap<String, Arc<SshSession>>>,
}

impl NodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self, node: &RemoteNode) -> Result<Arc<SshSession>> {
        let key = format!("{}@{}", node.user, node.address());
        if let Some(session) = self.sessions.lock().await.get(&key) {
            return Ok(session.clone());
        }

        // Connect without holding the cache lock so other hosts are not blocked
        let key_path = (!node.ssh_key.is_empty()).then(|| expand_tilde(&node.ssh_key));
        let session = Arc::new(
            SshSession::connect(node.address(), SSH_PORT, &node.user, key_path.as_deref()).await?,
        );

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&key) {
            let existing = existing.clone();
            drop(sessions);
            session.close().await;
            return Ok(existing);
        }
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Close all cached SSH connections
    pub async fn close(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            session.close().await;
        }
    }
}

#[async_trait]
impl Executor for NodeExecutor {
    async fn run(&self, node: &RemoteNode, command: &str) -> Result<String> {
        let output = if node.is_local() {
            CommandRunner::run_shell(command).await?
        } else {
            let session = self.session(node).await?;
            tokio::time::timeout(DEFAULT_TIMEOUT, session.exec(command))
                .await
                .map_err(|_| SomError::Timeout {
                    command: command.to_string(),
                    secs: DEFAULT_TIMEOUT.as_secs(),
                })??
        };

        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(SomError::command(
                format!("{} on {}", command, node.label()),
                output.code,
                &output.stdout,
                &output.stderr,
            ))
        }
    }

    async fn upload(
        &self,
        node: &RemoteNode,
        data: Vec<u8>,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        if node.is_local() {
            let path = Path::new(remote_path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, data).await?;
            if let Some(mode) = mode {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
            }
            return Ok(());
        }
        debug!("upload {} bytes to {}:{}", data.len(), node.label(), remote_path);
        self.session(node).await?.upload(&data, remote_path, mode).await
    }

    async fn copy_file(&self, node: &RemoteNode, local: &Path, remote_path: &str) -> Result<()> {
        if node.is_local() && local == Path::new(remote_path) {
            return Ok(());
        }
        let data = tokio::fs::read(local).await?;
        self.upload(node, data, remote_path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_node_yaml_defaults() {
        let node: RemoteNode =
            serde_yaml::from_str("host: master1\nip: 10.0.0.1\nrole: master\n").unwrap();
        assert_eq!(node.user, "root");
        assert!(node.ssh_key.is_empty());
        assert!(node.has_role("MASTER"));
        assert_eq!(node.label(), "master1 (10.0.0.1)");
    }

    #[test]
    fn test_is_local() {
        assert!(RemoteNode::local().is_local());
        assert!(RemoteNode::new("localhost", "10.0.0.1", "worker").is_local());
        assert!(RemoteNode::new("node1", "127.0.0.1", "worker").is_local());
        assert!(!RemoteNode::new("node-that-is-not-here", "10.0.0.9", "worker").is_local());
    }

    #[tokio::test]
    async fn test_local_run() {
        let executor = NodeExecutor::new();
        let out = executor
            .run(&RemoteNode::local(), "echo '  padded  '")
            .await
            .unwrap();
        assert_eq!(out, "padded");

        let err = executor.run(&RemoteNode::local(), "exit 7").await.unwrap_err();
        assert!(matches!(err, SomError::Command { code: 7, .. }));
    }

    #[tokio::test]
    async fn test_local_upload_and_copy() {
        let dir = TempDir::new().unwrap();
        let executor = NodeExecutor::new();
        let node = RemoteNode::local();

        let target = dir.path().join("nested/file.sh");
        executor
            .upload(&node, b"echo hi".to_vec(), target.to_str().unwrap(), Some(0o755))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "echo hi");

        let copy = dir.path().join("copy.sh");
        executor
            .copy_file(&node, &target, copy.to_str().unwrap())
            .await
            .unwrap();
        assert!(copy.exists());
    }
}
