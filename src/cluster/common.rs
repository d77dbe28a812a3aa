//! Node preparation shared by swarm and kubernetes bring-up

use crate::error::{Result, SomError};
use crate::exec::{Executor, RemoteNode};
use crate::output;
use std::io::{BufRead, Write};

pub const HOSTS_MARKER_START: &str = "# ===== Cluster Nodes Start =====";
pub const HOSTS_MARKER_END: &str = "# ===== Cluster Nodes End =====";

const FIREWALL_COMMANDS: &[&str] = &[
    "systemctl stop firewalld || true",
    "systemctl disable firewalld || true",
    "ufw disable || true",
];

/// Stop and disable the host firewall
pub async fn configure_firewall(executor: &dyn Executor, node: &RemoteNode) -> Result<()> {
    output::info(format!("Configuring firewall on node {}...", node.host));
    for cmd in FIREWALL_COMMANDS {
        if let Err(e) = executor.run(node, cmd).await {
            output::warning(format!("Firewall command failed on node {}: {}", node.host, e));
            return Err(SomError::Cluster("firewall configuration failed".to_string()));
        }
    }
    Ok(())
}

/// Commands that replace the cluster block in `/etc/hosts`
pub fn hosts_file_commands(entries: &str) -> Vec<String> {
    let block = format!(
        "\n{}\n{}\n{}\n",
        HOSTS_MARKER_START,
        entries.trim_end(),
        HOSTS_MARKER_END
    );
    vec![
        "cp /etc/hosts /etc/hosts.bak".to_string(),
        format!(
            "sed -i '/{}/,/{}/d' /etc/hosts",
            HOSTS_MARKER_START.replace('#', "\\#"),
            HOSTS_MARKER_END.replace('#', "\\#")
        ),
        format!("echo \"{}\" >> /etc/hosts", block.replace('"', "\\\"")),
    ]
}

/// Write the cluster block to `/etc/hosts`, then check it landed
pub async fn configure_hosts_file(
    executor: &dyn Executor,
    node: &RemoteNode,
    entries: &str,
) -> Result<()> {
    output::info(format!("Configuring hosts file on node {}...", node.host));
    let steps = ["backup hosts file", "clean old hosts entries", "update hosts file"];
    for (cmd, step) in hosts_file_commands(entries).iter().zip(steps) {
        executor
            .run(node, cmd)
            .await
            .map_err(|e| SomError::Cluster(format!("failed to {}: {}", step, e)))?;
    }

    let verify = format!("grep -q '{}' /etc/hosts || echo 'failed'", HOSTS_MARKER_START);
    match executor.run(node, &verify).await {
        Ok(out) if out.trim() != "failed" => Ok(()),
        _ => Err(SomError::Cluster("hosts file verification failed".to_string())),
    }
}

/// Ping every other node once. Unreachable peers only produce a warning.
pub async fn check_connectivity(executor: &dyn Executor, node: &RemoteNode, peers: &[RemoteNode]) {
    output::info(format!("Checking network connectivity for node {}...", node.host));
    for peer in peers.iter().filter(|p| p.host != node.host) {
        let cmd = format!("ping -c 1 -W 1 {}", peer.ip);
        if let Err(e) = executor.run(node, &cmd).await {
            output::warning(format!(
                "Node {} cannot reach {} ({}): {}",
                node.host, peer.host, peer.ip, e
            ));
        }
    }
}

/// Ask a yes/no question on the terminal. Anything but y/yes is a no.
pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    is_yes(&answer)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedExecutor;

    fn node() -> RemoteNode {
        RemoteNode::new("node1", "10.0.0.1", "manager")
    }

    #[test]
    fn test_hosts_file_commands() {
        let cmds = hosts_file_commands("10.0.0.1\tnode1\n10.0.0.2\tnode2\n");
        assert_eq!(cmds[0], "cp /etc/hosts /etc/hosts.bak");
        assert_eq!(
            cmds[1],
            "sed -i '/\\# ===== Cluster Nodes Start =====/,/\\# ===== Cluster Nodes End =====/d' /etc/hosts"
        );
        assert!(cmds[2].starts_with("echo \"\n# ===== Cluster Nodes Start =====\n10.0.0.1\tnode1\n10.0.0.2\tnode2\n# ===== Cluster Nodes End"));
        assert!(cmds[2].ends_with(">> /etc/hosts"));
    }

    #[tokio::test]
    async fn test_hosts_verification_failure() {
        let executor = ScriptedExecutor::new().reply("grep -q", "failed");
        let err = configure_hosts_file(&executor, &node(), "10.0.0.1\tnode1\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("verification failed"));
        assert_eq!(executor.commands().len(), 4);
    }

    #[tokio::test]
    async fn test_firewall_failure_is_fatal() {
        let executor = ScriptedExecutor::new().fail("ufw", "boom");
        let err = configure_firewall(&executor, &node()).await.unwrap_err();
        assert_eq!(err.to_string(), "Cluster error: firewall configuration failed");
    }

    #[tokio::test]
    async fn test_ping_failures_are_warnings() {
        let executor = ScriptedExecutor::new().fail("ping", "unreachable");
        let peers = vec![
            node(),
            RemoteNode::new("node2", "10.0.0.2", "worker"),
            RemoteNode::new("node3", "10.0.0.3", "worker"),
        ];
        check_connectivity(&executor, &node(), &peers).await;
        let cmds = executor.commands_on("node1");
        assert_eq!(cmds, vec!["ping -c 1 -W 1 10.0.0.2", "ping -c 1 -W 1 10.0.0.3"]);
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }
}
