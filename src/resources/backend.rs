//! Translate resource operations into kubectl, docker and docker-compose calls

use super::mapper::normalize_type;
use crate::cluster::ClusterType;
use crate::config::Settings;
use crate::error::{Result, SomError};
use crate::exec::CommandRunner;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A program and its arguments, ready to run locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Run and return stdout, failing on a non-zero exit
    pub async fn output(&self) -> Result<String> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        CommandRunner::run_checked(self.program, &args).await
    }

    /// Run attached to the terminal
    pub async fn run(&self) -> Result<()> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        match CommandRunner::run_interactive(self.program, &args).await? {
            0 => Ok(()),
            code => Err(SomError::command(self.to_string(), code, "", "")),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Namespace and output options. Only kubernetes honours them.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub output: Option<String>,
}

impl QueryOptions {
    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|n| !n.is_empty())
    }
}

fn unsupported(cluster: ClusterType, op: &str, kind: &str) -> SomError {
    SomError::Resource(format!(
        "unsupported {} resource type for {}: {}",
        cluster.display_name(),
        op,
        kind
    ))
}

fn require_name<'n>(name: Option<&'n str>, op: &str) -> Result<&'n str> {
    name.filter(|n| !n.is_empty())
        .ok_or_else(|| SomError::InvalidArgument(format!("resource name is required for {}", op)))
}

pub fn get_invocation(
    cluster: ClusterType,
    kind: &str,
    name: Option<&str>,
    opts: &QueryOptions,
) -> Result<Invocation> {
    let canonical = normalize_type(kind)?;
    match cluster {
        ClusterType::K8s => {
            let mut inv = Invocation::new("kubectl", &["get", canonical]);
            if let Some(name) = name {
                inv = inv.arg(name);
            }
            if opts.all_namespaces {
                inv = inv.arg("-A");
            } else if let Some(ns) = opts.namespace() {
                inv = inv.arg("-n").arg(ns);
            }
            if let Some(fmt) = opts.output.as_deref().filter(|f| !f.is_empty()) {
                inv = inv.arg("-o").arg(fmt);
            }
            Ok(inv)
        }
        ClusterType::Swarm => match canonical {
            "services" => Ok(Invocation::new("docker", &["service", "ls"])),
            "nodes" => Ok(Invocation::new("docker", &["node", "ls"])),
            "stacks" => Ok(Invocation::new("docker", &["stack", "ls"])),
            _ => Err(unsupported(cluster, "get", kind)),
        },
        ClusterType::Docker => match canonical {
            "containers" => Ok(Invocation::new("docker", &["ps", "-a"])),
            "images" => Ok(Invocation::new("docker", &["images"])),
            _ => Err(unsupported(cluster, "get", kind)),
        },
        ClusterType::None => Err(no_cluster()),
    }
}

pub fn delete_invocation(
    cluster: ClusterType,
    kind: &str,
    name: Option<&str>,
    opts: &QueryOptions,
) -> Result<Invocation> {
    let canonical = normalize_type(kind)?;
    let name = require_name(name, "delete")?;
    match cluster {
        ClusterType::K8s => {
            let mut inv = Invocation::new("kubectl", &["delete", canonical, name]);
            if let Some(ns) = opts.namespace() {
                inv = inv.arg("-n").arg(ns);
            }
            Ok(inv)
        }
        ClusterType::Swarm => match canonical {
            "services" => Ok(Invocation::new("docker", &["service", "rm", name])),
            "stacks" => Ok(Invocation::new("docker", &["stack", "rm", name])),
            _ => Err(unsupported(cluster, "delete", kind)),
        },
        ClusterType::Docker => match canonical {
            "containers" => Ok(Invocation::new("docker", &["rm", "-f", name])),
            "images" => Ok(Invocation::new("docker", &["rmi", name])),
            _ => Err(unsupported(cluster, "delete", kind)),
        },
        ClusterType::None => Err(no_cluster()),
    }
}

pub fn describe_invocation(
    cluster: ClusterType,
    kind: &str,
    name: Option<&str>,
    opts: &QueryOptions,
) -> Result<Invocation> {
    let canonical = normalize_type(kind)?;
    match cluster {
        ClusterType::K8s => {
            let mut inv = Invocation::new("kubectl", &["describe", canonical]);
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                inv = inv.arg(name);
            }
            if let Some(ns) = opts.namespace() {
                inv = inv.arg("-n").arg(ns);
            }
            Ok(inv)
        }
        ClusterType::Swarm => {
            let name = require_name(name, "describe")?;
            match canonical {
                "services" => Ok(Invocation::new("docker", &["service", "inspect", "--pretty", name])),
                "nodes" => Ok(Invocation::new("docker", &["node", "inspect", "--pretty", name])),
                "stacks" => Ok(Invocation::new("docker", &["stack", "services", name])),
                _ => Err(unsupported(cluster, "describe", kind)),
            }
        }
        ClusterType::Docker => {
            let name = require_name(name, "describe")?;
            match canonical {
                "containers" => Ok(Invocation::new("docker", &["inspect", "--format", "{{json .}}", name])),
                "images" => Ok(Invocation::new(
                    "docker",
                    &["image", "inspect", "--format", "{{json .}}", name],
                )),
                _ => Err(unsupported(cluster, "describe", kind)),
            }
        }
        ClusterType::None => Err(no_cluster()),
    }
}

fn no_cluster() -> SomError {
    SomError::Resource("no supported cluster detected; pass --cluster-type".to_string())
}

#[derive(Deserialize, Default)]
struct StackHeader {
    #[serde(default)]
    stack: Option<String>,
}

/// Copy a compose file to `workdir/docker-stack-<name>.yaml`.
/// The stack is named by the file's `stack:` key, else the file stem.
pub fn prepare_stack(settings: &Settings, file: &Path) -> Result<(String, PathBuf)> {
    let data = std::fs::read_to_string(file).map_err(|e| {
        SomError::Resource(format!("failed to read input file {}: {}", file.display(), e))
    })?;
    let header: StackHeader = if data.trim().is_empty() {
        StackHeader::default()
    } else {
        serde_yaml::from_str(&data)
            .map_err(|e| SomError::Resource(format!("failed to parse YAML: {}", e)))?
    };
    let name = match header.stack.filter(|s| !s.trim().is_empty()) {
        Some(name) => name,
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| SomError::InvalidArgument(format!("invalid file name: {}", file.display())))?,
    };

    std::fs::create_dir_all(&settings.workdir)?;
    let stack_file = settings.workdir.join(format!("docker-stack-{}.yaml", name));
    std::fs::write(&stack_file, data)?;
    debug!("stack {} written to {}", name, stack_file.display());
    Ok((name, stack_file))
}

pub fn apply_invocation(settings: &Settings, cluster: ClusterType, file: &Path) -> Result<Invocation> {
    let path = file.display().to_string();
    match cluster {
        ClusterType::K8s => Ok(Invocation::new("kubectl", &["apply", "-f", &path])),
        ClusterType::Swarm => {
            let (name, stack_file) = prepare_stack(settings, file)?;
            let stack_path = stack_file.display().to_string();
            Ok(Invocation::new("docker", &["stack", "deploy", "-c", &stack_path, &name]))
        }
        ClusterType::Docker => Ok(Invocation::new("docker-compose", &["-f", &path, "up", "-d"])),
        ClusterType::None => Err(no_cluster()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(inv: &Invocation) -> Vec<&str> {
        inv.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_k8s_get_flags() {
        let opts = QueryOptions {
            namespace: Some("kube-system".into()),
            all_namespaces: false,
            output: Some("wide".into()),
        };
        let inv = get_invocation(ClusterType::K8s, "po", None, &opts).unwrap();
        assert_eq!(inv.to_string(), "kubectl get pods -n kube-system -o wide");

        let all = QueryOptions {
            namespace: Some("ignored".into()),
            all_namespaces: true,
            output: None,
        };
        let inv = get_invocation(ClusterType::K8s, "deploy", Some("web"), &all).unwrap();
        assert_eq!(args(&inv), vec!["get", "deployments", "web", "-A"]);
    }

    #[test]
    fn test_swarm_and_docker_get() {
        let opts = QueryOptions::default();
        let inv = get_invocation(ClusterType::Swarm, "svc", None, &opts).unwrap();
        assert_eq!(inv.to_string(), "docker service ls");
        let inv = get_invocation(ClusterType::Docker, "ct", None, &opts).unwrap();
        assert_eq!(inv.to_string(), "docker ps -a");

        let err = get_invocation(ClusterType::Swarm, "pods", None, &opts).unwrap_err();
        assert!(err.to_string().contains("Docker Swarm"));
        assert!(get_invocation(ClusterType::None, "pods", None, &opts).is_err());
    }

    #[test]
    fn test_delete() {
        let opts = QueryOptions {
            namespace: Some("apps".into()),
            ..Default::default()
        };
        let inv = delete_invocation(ClusterType::K8s, "svc", Some("web"), &opts).unwrap();
        assert_eq!(inv.to_string(), "kubectl delete services web -n apps");
        let inv = delete_invocation(ClusterType::Docker, "ct", Some("web"), &opts).unwrap();
        assert_eq!(inv.to_string(), "docker rm -f web");
        let inv = delete_invocation(ClusterType::Swarm, "stack", Some("shop"), &opts).unwrap();
        assert_eq!(inv.to_string(), "docker stack rm shop");

        let err = delete_invocation(ClusterType::K8s, "pods", None, &opts).unwrap_err();
        assert!(matches!(err, SomError::InvalidArgument(_)));
        assert!(delete_invocation(ClusterType::Swarm, "nodes", Some("n1"), &opts).is_err());
    }

    #[test]
    fn test_describe() {
        let opts = QueryOptions::default();
        let inv = describe_invocation(ClusterType::Swarm, "no", Some("n1"), &opts).unwrap();
        assert_eq!(inv.to_string(), "docker node inspect --pretty n1");
        let inv = describe_invocation(ClusterType::Docker, "images", Some("nginx"), &opts).unwrap();
        assert_eq!(args(&inv), vec!["image", "inspect", "--format", "{{json .}}", "nginx"]);
        let inv = describe_invocation(ClusterType::K8s, "nodes", None, &opts).unwrap();
        assert_eq!(inv.to_string(), "kubectl describe nodes");
    }

    #[test]
    fn test_apply_swarm_uses_stack_key() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().join("work"),
            ..Default::default()
        };
        let file = dir.path().join("app.yml");
        std::fs::write(&file, "stack: shop\nversion: '3'\nservices: {}\n").unwrap();

        let inv = apply_invocation(&settings, ClusterType::Swarm, &file).unwrap();
        let stack_file = settings.workdir.join("docker-stack-shop.yaml");
        assert!(stack_file.is_file());
        assert_eq!(
            args(&inv),
            vec!["stack", "deploy", "-c", stack_file.to_str().unwrap(), "shop"]
        );
    }

    #[test]
    fn test_apply_swarm_falls_back_to_stem() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let file = dir.path().join("web.yaml");
        std::fs::write(&file, "services:\n  web:\n    image: nginx\n").unwrap();
        let (name, path) = prepare_stack(&settings, &file).unwrap();
        assert_eq!(name, "web");
        assert_eq!(path, dir.path().join("docker-stack-web.yaml"));
    }

    #[test]
    fn test_apply_k8s_and_docker() {
        let settings = Settings::default();
        let file = Path::new("deploy.yaml");
        let inv = apply_invocation(&settings, ClusterType::K8s, file).unwrap();
        assert_eq!(inv.to_string(), "kubectl apply -f deploy.yaml");
        let inv = apply_invocation(&settings, ClusterType::Docker, file).unwrap();
        assert_eq!(inv.to_string(), "docker-compose -f deploy.yaml up -d");
    }
}
