//! Error types for somcli

use thiserror::Error;

/// Result type for somcli operations
pub type Result<T> = std::result::Result<T, SomError>;

/// somcli error types
#[derive(Error, Debug)]
pub enum SomError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command `{command}` failed with exit code {code}: {output}")]
    Command {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("SSH error on {host}: {message}")]
    Ssh { host: String, message: String },

    #[error("Download error: {0}")]
    Download(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SomError {
    /// Build a command failure from captured process output
    pub fn command(command: impl Into<String>, code: i32, stdout: &str, stderr: &str) -> Self {
        let output = match (stdout.trim(), stderr.trim()) {
            ("", "") => "<no output>".to_string(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        };
        SomError::Command {
            command: command.into(),
            code,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_includes_output() {
        let err = SomError::command("docker info", 1, "", "daemon not running");
        let msg = err.to_string();
        assert!(msg.contains("docker info"));
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("daemon not running"));
    }

    #[test]
    fn test_command_error_without_output() {
        let err = SomError::command("false", 1, "  ", "");
        assert!(err.to_string().ends_with("<no output>"));
    }
}
