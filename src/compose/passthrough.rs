//! Forward arguments to docker-compose

use super::installer::{ComposeInstaller, DEFAULT_VERSION};
use crate::error::{Result, SomError};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// somcli's own options found among the forwarded compose arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeFlags {
    pub silent: bool,
    pub install_path: Option<PathBuf>,
    pub env_file: Option<String>,
}

impl ComposeFlags {
    pub fn from_args(args: &[String]) -> Self {
        let mut flags = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-y" | "--yes" => flags.silent = true,
                "--path" => flags.install_path = iter.next().map(PathBuf::from),
                "-e" | "--env-file" => flags.env_file = iter.next().cloned(),
                _ => {}
            }
        }
        flags
    }
}

/// Drop somcli's own flags (`-y`, `-p`, `--path`, `-e`) before forwarding.
/// The value-taking flags also drop the following argument.
pub fn filter_args(args: &[String]) -> Vec<String> {
    let mut filtered = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-y" | "--yes" => {}
            "-p" | "--proxy" | "--path" | "-e" | "--env-file" => {
                iter.next();
            }
            _ => filtered.push(arg.clone()),
        }
    }
    filtered
}

/// `up` runs detached and `ps` lists stopped containers unless told otherwise
pub fn process_args(mut args: Vec<String>) -> Vec<String> {
    let has = |args: &[String], short: &str, long: &str| args.iter().any(|a| a == short || a == long);
    match args.first().map(String::as_str) {
        Some("up") if !has(&args, "-d", "--detach") => args.push("-d".to_string()),
        Some("ps") if !has(&args, "-a", "--all") => args.push("-a".to_string()),
        _ => {}
    }
    args
}

/// Run docker-compose attached to the terminal, installing it first when
/// missing. An `-e` env file is passed on as `--env-file`. SIGINT and SIGTERM
/// are relayed to the child. Returns its exit code.
pub async fn passthrough(installer: &ComposeInstaller<'_>, raw: &[String]) -> Result<i32> {
    if !installer.is_installed() {
        crate::output::warning("Docker Compose not found, attempting to install...");
        installer.install(DEFAULT_VERSION).await.map_err(|e| {
            SomError::Compose(format!("auto-install failed: {}\nPlease install manually first", e))
        })?;
    }

    let mut args = process_args(filter_args(raw));
    if let Some(env_file) = ComposeFlags::from_args(raw).env_file {
        args.splice(0..0, ["--env-file".to_string(), env_file]);
    }
    let program = installer.install_path().display().to_string();
    debug!("exec: {} {}", program, args.join(" "));

    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| SomError::Spawn {
            command: program.clone(),
            source,
        })?;

    let relay = child.id().map(|pid| tokio::spawn(relay_signals(pid)));
    let status = child.wait().await;
    if let Some(relay) = relay {
        relay.abort();
    }
    Ok(status?.code().unwrap_or(-1))
}

async fn relay_signals(pid: u32) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("failed to register signal handlers: {}", e);
            return;
        }
    };

    loop {
        let sig = tokio::select! {
            _ = sigint.recv() => libc::SIGINT,
            _ = sigterm.recv() => libc::SIGTERM,
        };
        debug!("forwarding signal {} to pid {}", sig, pid);
        // SAFETY: kill(2) has no memory-safety preconditions
        unsafe {
            libc::kill(pid as libc::pid_t, sig);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_args() {
        let args = strings(&["-y", "--path", "/opt/dc", "-f", "a.yml", "-e", ".env", "up", "-p", "x"]);
        assert_eq!(filter_args(&args), strings(&["-f", "a.yml", "up"]));
    }

    #[test]
    fn test_compose_flags() {
        let args = strings(&["-y", "--path", "/opt/dc", "-e", ".env.prod", "up"]);
        let flags = ComposeFlags::from_args(&args);
        assert!(flags.silent);
        assert_eq!(flags.install_path, Some(PathBuf::from("/opt/dc")));
        assert_eq!(flags.env_file.as_deref(), Some(".env.prod"));
        assert_eq!(ComposeFlags::from_args(&strings(&["ps"])), ComposeFlags::default());
    }

    #[test]
    fn test_process_args() {
        assert_eq!(process_args(strings(&["up"])), strings(&["up", "-d"]));
        assert_eq!(process_args(strings(&["up", "--detach"])), strings(&["up", "--detach"]));
        assert_eq!(process_args(strings(&["ps"])), strings(&["ps", "-a"]));
        assert_eq!(process_args(strings(&["logs", "-f"])), strings(&["logs", "-f"]));
        assert!(process_args(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_passthrough_returns_child_exit_code() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let installer =
            ComposeInstaller::new(&settings).with_install_path(Some("/bin/sh".into()));
        let code = passthrough(&installer, &strings(&["-c", "exit 3"])).await.unwrap();
        assert_eq!(code, 3);
    }
}
