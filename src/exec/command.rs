//! Local process execution

use crate::error::{Result, SomError};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Upper bound for a single command. Cluster bring-up steps such as
/// `kubeadm init` pull images and can take a long time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (_, true) => out.to_string(),
            _ => format!("{}\n{}", out, err),
        }
    }

    /// Convert a non-zero exit into an error carrying the captured output
    pub fn into_checked(self, command: &str) -> Result<String> {
        if self.success() {
            Ok(self.stdout.trim().to_string())
        } else {
            Err(SomError::command(command, self.code, &self.stdout, &self.stderr))
        }
    }
}

/// Runs commands on the local machine
pub struct CommandRunner;

impl CommandRunner {
    /// Run a program with arguments and capture its output
    pub async fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
        Self::run_with_timeout(program, args, None, DEFAULT_TIMEOUT).await
    }

    /// Run a program in a working directory with an explicit timeout
    pub async fn run_with_timeout(
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let shown = display_command(program, args);
        debug!("exec: {}", shown);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }

        let child = command.output();
        let output = tokio::select! {
            result = child => result.map_err(|source| SomError::Spawn {
                command: shown.clone(),
                source,
            })?,
            _ = tokio::time::sleep(timeout) => {
                return Err(SomError::Timeout { command: shown, secs: timeout.as_secs() });
            }
        };

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a command line through `sh -c`
    pub async fn run_shell(command: &str) -> Result<CommandOutput> {
        Self::run("sh", &["-c", command]).await
    }

    /// Run a program and fail on a non-zero exit, returning trimmed stdout
    pub async fn run_checked(program: &str, args: &[&str]) -> Result<String> {
        let output = Self::run(program, args).await?;
        output.into_checked(&display_command(program, args))
    }

    /// Shell variant of [`CommandRunner::run_checked`]
    pub async fn shell_checked(command: &str) -> Result<String> {
        Self::run_shell(command).await?.into_checked(command)
    }

    /// Run a program attached to the terminal and return its exit code
    pub async fn run_interactive(program: &str, args: &[&str]) -> Result<i32> {
        debug!("exec (interactive): {}", display_command(program, args));
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| SomError::Spawn {
                command: display_command(program, args),
                source,
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Whether an executable with this name is on `PATH`
    pub fn exists(name: &str) -> bool {
        if name.contains('/') {
            return is_executable(Path::new(name));
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
            .unwrap_or(false)
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Quote a value for safe interpolation into a POSIX shell command
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let output = CommandRunner::run("echo", &["hello"]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let result = CommandRunner::run("nonexistent_command_12345", &[]).await;
        assert!(matches!(result, Err(SomError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_shell_checked_failure_carries_output() {
        let err = CommandRunner::shell_checked("echo boom >&2; exit 3")
            .await
            .unwrap_err();
        match err {
            SomError::Command { code, output, .. } => {
                assert_eq!(code, 3);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = CommandRunner::run_with_timeout(
            "sleep",
            &["5"],
            None,
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(SomError::Timeout { .. })));
    }

    #[test]
    fn test_exists() {
        assert!(CommandRunner::exists("sh"));
        assert!(!CommandRunner::exists("nonexistent_command_12345"));
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            code: 0,
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
