//! Resolve which nodes a docker command targets

use crate::error::{Result, SomError};
use crate::exec::RemoteNode;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum NodesFile {
    Wrapped { nodes: Vec<RemoteNode> },
    Bare(Vec<RemoteNode>),
}

/// Read nodes from YAML, either a `nodes:` list or a bare list
pub fn load_nodes_file(path: &Path) -> Result<Vec<RemoteNode>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SomError::Config(format!("failed to load nodes from {}: {}", path.display(), e))
    })?;
    let parsed: NodesFile = serde_yaml::from_str(&content)
        .map_err(|e| SomError::Config(format!("failed to parse nodes file {}: {}", path.display(), e)))?;
    Ok(match parsed {
        NodesFile::Wrapped { nodes } | NodesFile::Bare(nodes) => nodes,
    })
}

/// Nodes from the file followed by the `--node` addresses. No source at all
/// means an empty list, which callers treat as the local machine.
pub fn target_nodes(
    file: Option<&Path>,
    ips: &[String],
    user: &str,
    ssh_key: Option<&str>,
) -> Result<Vec<RemoteNode>> {
    let mut nodes = match file {
        Some(path) => load_nodes_file(path)?,
        None => Vec::new(),
    };
    for ip in ips.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let mut node = RemoteNode::new(ip, ip, "");
        node.user = user.to_string();
        node.ssh_key = ssh_key.unwrap_or_default().to_string();
        nodes.push(node);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_then_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.yaml");
        std::fs::write(
            &path,
            "nodes:\n  - host: node1\n    ip: 10.0.0.1\n    sshKey: ~/.ssh/id\n",
        )
        .unwrap();

        let nodes = target_nodes(Some(&path), &["10.0.0.9".to_string()], "ops", None).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].host, "node1");
        assert_eq!(nodes[0].user, "root");
        assert_eq!(nodes[1].ip, "10.0.0.9");
        assert_eq!(nodes[1].user, "ops");
        assert!(nodes[1].ssh_key.is_empty());
    }

    #[test]
    fn test_bare_list_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.yaml");
        std::fs::write(&path, "- { host: a, ip: 10.0.0.1 }\n- { host: b, ip: 10.0.0.2 }\n").unwrap();
        assert_eq!(load_nodes_file(&path).unwrap().len(), 2);

        assert!(target_nodes(None, &[], "root", None).unwrap().is_empty());
        assert!(load_nodes_file(&dir.path().join("missing.yaml")).is_err());
    }
}
