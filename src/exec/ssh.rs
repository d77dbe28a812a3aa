//! SSH client for remote nodes
//!
//! A thin wrapper over `russh` that opens one authenticated connection per
//! host and runs each command on a fresh session channel.

use super::command::CommandOutput;
use crate::config::home_dir;
use crate::error::{Result, SomError};
use russh::client;
use russh::{ChannelMsg, Disconnect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default SSH port
pub const SSH_PORT: u16 = 22;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Private keys tried when a node does not name one
pub fn default_key_paths() -> Vec<PathBuf> {
    let ssh_dir = home_dir().join(".ssh");
    vec![
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_rsa"),
        ssh_dir.join("id_ecdsa"),
    ]
}

struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Cluster nodes are freshly provisioned hosts without known_hosts entries
        Ok(true)
    }
}

/// An authenticated SSH connection
pub struct SshSession {
    host: String,
    handle: client::Handle<ClientHandler>,
}

impl SshSession {
    /// Connect and authenticate with a key file, or the default keys when none is given
    pub async fn connect(host: &str, port: u16, user: &str, key: Option<&Path>) -> Result<Self> {
        info!("Connecting to {}@{}:{}", user, host, port);

        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let addr = format!("{}:{}", host, port);
        let connect = client::connect(Arc::new(config), addr, ClientHandler);
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| ssh_error(host, "connection timed out"))?
            .map_err(|e| ssh_error(host, format!("connection failed: {}", e)))?;

        let candidates = match key {
            Some(path) => vec![path.to_path_buf()],
            None => default_key_paths(),
        };

        for key_path in candidates.iter().filter(|p| p.exists()) {
            let key_pair = match russh_keys::load_secret_key(key_path, None) {
                Ok(k) => k,
                Err(e) => {
                    debug!("Failed to load key {:?}: {}", key_path, e);
                    continue;
                }
            };
            match handle.authenticate_publickey(user, Arc::new(key_pair)).await {
                Ok(true) => {
                    debug!("Authenticated to {} with key {:?}", host, key_path);
                    return Ok(Self {
                        host: host.to_string(),
                        handle,
                    });
                }
                Ok(false) => debug!("Key {:?} rejected by {}", key_path, host),
                Err(e) => debug!("Key {:?} failed on {}: {}", key_path, host, e),
            }
        }

        Err(ssh_error(
            host,
            format!("no usable private key for user {} (tried {:?})", user, candidates),
        ))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a command and collect its output and exit status
    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        debug!("ssh {}: {}", self.host, command);
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to exec: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // stream 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => code = Some(exit_status as i32),
                _ => {}
            }
        }

        Ok(CommandOutput {
            code: code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Write bytes to a remote file, creating its parent directory
    pub async fn upload(&self, data: &[u8], remote_path: &str, mode: Option<u32>) -> Result<()> {
        let quoted = super::command::shell_quote(remote_path);
        let mut command = format!("mkdir -p \"$(dirname {q})\" && cat > {q}", q = quoted);
        if let Some(mode) = mode {
            command.push_str(&format!(" && chmod {:o} {}", mode, quoted));
        }

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to open channel: {}", e)))?;
        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to exec: {}", e)))?;
        channel
            .data(data)
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to send data: {}", e)))?;
        channel
            .eof()
            .await
            .map_err(|e| ssh_error(&self.host, format!("failed to close stream: {}", e)))?;

        let mut stderr = Vec::new();
        let mut code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExtendedData { ref data, .. } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => code = Some(exit_status as i32),
                _ => {}
            }
        }

        match code {
            Some(0) => Ok(()),
            other => Err(SomError::command(
                format!("upload {}:{}", self.host, remote_path),
                other.unwrap_or(-1),
                "",
                &String::from_utf8_lossy(&stderr),
            )),
        }
    }

    /// Close the connection
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

fn ssh_error(host: &str, message: impl Into<String>) -> SomError {
    SomError::Ssh {
        host: host.to_string(),
        message: message.into(),
    }
}
