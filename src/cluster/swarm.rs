//! Docker Swarm bring-up and teardown

use super::common::{self, HOSTS_MARKER_END, HOSTS_MARKER_START};
use super::config::{ClusterSpec, DEFAULT_SWARM_LISTEN_ADDR};
use crate::config::Settings;
use crate::docker::{DockerInstaller, LATEST};
use crate::error::{Result, SomError};
use crate::exec::{Executor, RemoteNode};
use crate::output;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const JOIN_FILE: &str = "swarm-join-command.txt";
pub const INFO_FILE: &str = "cluster-info.txt";

/// `docker swarm join ...` commands for each role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTokens {
    pub manager: String,
    pub worker: String,
}

impl JoinTokens {
    /// `Manager: ...\nWorker: ...`
    pub fn to_file_content(&self) -> String {
        format!("Manager: {}\nWorker: {}", self.manager, self.worker)
    }

    /// Join command for a node role
    pub fn for_role(&self, role: &str) -> Result<&str> {
        match role.to_ascii_lowercase().as_str() {
            "manager" => Ok(&self.manager),
            "worker" => Ok(&self.worker),
            _ => Err(SomError::Cluster(format!("unknown node role: {}", role))),
        }
    }

    /// Swap the manager hostname for its IP so joins don't depend on DNS
    pub fn with_address(&self, host: &str, ip: &str) -> Self {
        if host.is_empty() {
            return self.clone();
        }
        Self {
            manager: rewrite_join_address(&self.manager, host, ip),
            worker: rewrite_join_address(&self.worker, host, ip),
        }
    }
}

/// Rewrite the trailing `host:port` argument of a join command. The token
/// itself is left alone even when it happens to contain the hostname.
fn rewrite_join_address(cmd: &str, host: &str, ip: &str) -> String {
    let prefix = format!("{}:", host);
    match cmd.trim_end().rsplit_once(char::is_whitespace) {
        Some((head, addr)) if addr.starts_with(&prefix) => {
            format!("{} {}{}", head, ip, &addr[host.len()..])
        }
        _ => cmd.to_string(),
    }
}

/// First line of `docker swarm join-token` output that holds the join command
pub fn extract_join_line(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("docker swarm join"))
        .map(|line| line.trim().to_string())
}

/// Builds a Swarm cluster from a topology file
pub struct SwarmCluster<'a> {
    settings: &'a Settings,
    executor: Arc<dyn Executor>,
}

impl<'a> SwarmCluster<'a> {
    pub fn new(settings: &'a Settings, executor: Arc<dyn Executor>) -> Self {
        Self { settings, executor }
    }

    pub fn join_file(&self) -> PathBuf {
        self.settings.workdir.join(JOIN_FILE)
    }

    pub fn info_file(&self) -> PathBuf {
        self.settings.workdir.join(INFO_FILE)
    }

    fn docker(&self) -> DockerInstaller<'a> {
        DockerInstaller::new(self.settings, self.executor.clone()).silent(true)
    }

    pub async fn create(&self, spec: &ClusterSpec, skip_precheck: bool) -> Result<()> {
        output::banner(&format!("Creating Docker Swarm Cluster: {}", spec.name));
        spec.validate_swarm()
            .map_err(|e| SomError::Cluster(format!("invalid cluster configuration: {}", e)))?;

        output::info("Cluster nodes configuration:");
        for node in &spec.nodes {
            output::info(format!("Node: {}, IP: {}, Role: {}", node.host, node.ip, node.role));
        }

        if !skip_precheck {
            self.prepare(spec).await?;
        }

        let manager = spec
            .nodes
            .iter()
            .find(|n| n.has_role("manager"))
            .ok_or_else(|| {
                let roles: Vec<&str> = spec.nodes.iter().map(|n| n.role.as_str()).collect();
                SomError::Cluster(format!(
                    "no manager node found in configuration. Existing roles: {:?}",
                    roles
                ))
            })?;

        let tokens = self.init(spec, manager).await?;
        self.join_nodes(spec, manager, &tokens).await?;
        self.print_info(spec, manager).await
    }

    /// Firewall, Docker, hosts file and connectivity on every node
    async fn prepare(&self, spec: &ClusterSpec) -> Result<()> {
        let entries = spec.hosts_entries();
        let executor = self.executor.as_ref();

        for node in &spec.nodes {
            common::configure_firewall(executor, node).await.map_err(|e| {
                SomError::Cluster(format!("firewall configuration failed for node {}: {}", node.host, e))
            })?;

            if executor.run(node, "docker --version").await.is_err() {
                output::info(format!("Installing Docker on node {}...", node.host));
                self.docker()
                    .install(LATEST, std::slice::from_ref(node))
                    .await
                    .map_err(|e| {
                        SomError::Cluster(format!("failed to install Docker on node {}: {}", node.host, e))
                    })?;
            }

            executor.run(node, "systemctl start docker").await.map_err(|e| {
                SomError::Cluster(format!("failed to start Docker on node {}: {}", node.host, e))
            })?;

            common::configure_hosts_file(executor, node, &entries)
                .await
                .map_err(|e| {
                    SomError::Cluster(format!(
                        "failed to configure hosts file on node {}: {}",
                        node.host, e
                    ))
                })?;

            common::check_connectivity(executor, node, &spec.nodes).await;
        }
        Ok(())
    }

    /// `docker swarm init` command for the first manager
    pub fn init_command(spec: &ClusterSpec, manager: &RemoteNode) -> String {
        let swarm = &spec.swarm;
        let advertise = if swarm.advertise_addr.is_empty() {
            manager.ip.as_str()
        } else {
            swarm.advertise_addr.as_str()
        };
        let listen = if swarm.listen_addr.is_empty() {
            DEFAULT_SWARM_LISTEN_ADDR
        } else {
            swarm.listen_addr.as_str()
        };

        let mut cmd = format!(
            "docker swarm init --advertise-addr {} --listen-addr {}",
            advertise, listen
        );
        for pool in &swarm.default_addr_pool {
            cmd.push_str(&format!(" --default-addr-pool {}", pool));
        }
        if swarm.subnet_size > 0 {
            cmd.push_str(&format!(" --default-addr-pool-mask-length {}", swarm.subnet_size));
        }
        if swarm.data_path_port > 0 {
            cmd.push_str(&format!(" --data-path-port {}", swarm.data_path_port));
        }
        cmd
    }

    async fn init(&self, spec: &ClusterSpec, manager: &RemoteNode) -> Result<JoinTokens> {
        output::info(format!("Initializing Swarm on manager node {}...", manager.host));
        let cmd = Self::init_command(spec, manager);
        debug!("swarm init: {}", cmd);
        self.executor
            .run(manager, &cmd)
            .await
            .map_err(|e| SomError::Cluster(format!("failed to initialize swarm: {}", e)))?;

        let tokens = JoinTokens {
            manager: self.join_token(manager, "manager").await?,
            worker: self.join_token(manager, "worker").await?,
        };

        let path = self.join_file();
        std::fs::create_dir_all(&self.settings.workdir)?;
        std::fs::write(&path, tokens.to_file_content())
            .map_err(|e| SomError::Cluster(format!("failed to save join command: {}", e)))?;
        info!("swarm join commands saved to {}", path.display());

        output::success("Swarm initialized successfully");
        Ok(tokens)
    }

    async fn join_token(&self, manager: &RemoteNode, role: &str) -> Result<String> {
        let out = self
            .executor
            .run(manager, &format!("docker swarm join-token {}", role))
            .await
            .map_err(|e| SomError::Cluster(format!("failed to get {} token: {}", role, e)))?;
        extract_join_line(&out)
            .ok_or_else(|| SomError::Cluster(format!("empty {} token, output: {}", role, out)))
    }

    async fn join_nodes(&self, spec: &ClusterSpec, manager: &RemoteNode, tokens: &JoinTokens) -> Result<()> {
        let tokens = tokens.with_address(&manager.host, &manager.ip);

        for node in spec.nodes.iter().filter(|n| n.host != manager.host) {
            output::info(format!("Joining node {} ({}) as {}...", node.host, node.ip, node.role));
            let cmd = tokens.for_role(&node.role)?;
            let out = self.executor.run(node, cmd).await.map_err(|e| {
                SomError::Cluster(format!("failed to join node {}: {}\nCommand: {}", node.host, e, cmd))
            })?;
            if !out.contains("This node joined a swarm") {
                return Err(SomError::Cluster(format!(
                    "node {} may not have joined successfully. Output: {}",
                    node.host, out
                )));
            }
            output::success(format!("Node {} joined successfully as {}", node.host, node.role));
        }
        Ok(())
    }

    async fn print_info(&self, spec: &ClusterSpec, manager: &RemoteNode) -> Result<()> {
        let nodes = self
            .executor
            .run(manager, "docker node ls")
            .await
            .map_err(|e| SomError::Cluster(format!("failed to get cluster nodes: {}", e)))?;

        output::success("Docker Swarm Cluster created successfully!");
        output::info("=== Cluster Information ===");
        output::info(format!("Cluster Name: {}", spec.name));
        output::info(format!("Manager Node: {} ({})", manager.host, manager.ip));
        output::info("Cluster Nodes:");
        println!("{}", nodes);

        let hosts_block = format!(
            "{}\n{}{}",
            HOSTS_MARKER_START,
            spec.hosts_entries(),
            HOSTS_MARKER_END
        );
        output::info("=== Hosts Configuration ===");
        for line in hosts_block.lines() {
            output::info(line);
        }

        output::info("=== Verification Guide ===");
        output::info("1. Check cluster status: docker node ls && docker service ls");
        output::info(format!("2. Test hosts resolution: ping {}", spec.nodes[0].host));
        output::info("3. Deploy test service: docker service create --name test --replicas 2 nginx");

        let content = format!(
            "Cluster Name: {}\nCreated At: {}\nManager Node: {}\n\nNodes:\n{}\n\nHosts Entries:\n{}",
            spec.name,
            chrono::Utc::now().to_rfc3339(),
            manager.host,
            nodes,
            hosts_block
        );
        let path = self.info_file();
        match std::fs::write(&path, content) {
            Ok(()) => output::info(format!("Cluster information saved to: {}", path.display())),
            Err(e) => output::warning(format!("Failed to save cluster info: {}", e)),
        }
        Ok(())
    }

    /// Leave the swarm on every node. With `uninstall_docker` Docker is removed too.
    pub async fn remove(&self, spec: &ClusterSpec, uninstall_docker: bool) -> Result<()> {
        output::banner(&format!("Removing Docker Swarm Cluster: {}", spec.name));

        for node in &spec.nodes {
            output::info(format!("Leaving Swarm on node {}...", node.host));
            let cmd = if node.has_role("manager") {
                "docker swarm leave --force"
            } else {
                "docker swarm leave"
            };
            match self.executor.run(node, cmd).await {
                Ok(_) => output::success(format!("Node {} left swarm successfully", node.host)),
                Err(e) => output::warning(format!("Failed to leave swarm on node {}: {}", node.host, e)),
            }

            if uninstall_docker {
                output::info(format!("Uninstalling Docker from node {}...", node.host));
                if let Err(e) = self.docker().uninstall(std::slice::from_ref(node)).await {
                    output::warning(format!("Failed to uninstall Docker from node {}: {}", node.host, e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::ClusterConfig;
    use crate::exec::testing::ScriptedExecutor;
    use tempfile::TempDir;

    const TOPOLOGY: &str = r#"
cluster:
  type: swarm
  name: demo
  nodes:
    - { host: mgr1, ip: 10.0.0.1, role: manager }
    - { host: wk1, ip: 10.0.0.2, role: worker }
    - { host: mgr2, ip: 10.0.0.3, role: manager }
  swarmConfig:
    defaultAddrPool: ["10.20.0.0/16"]
    subnetSize: 24
"#;

    const MANAGER_TOKEN: &str = "To add a manager to this swarm, run the following command:\n\n    docker swarm join --token SWMTKN-1-mgr mgr1:2377\n";
    const WORKER_TOKEN: &str = "To add a worker to this swarm, run the following command:\n\n    docker swarm join --token SWMTKN-1-wrk mgr1:2377\n";

    fn spec() -> ClusterSpec {
        ClusterConfig::parse_str(TOPOLOGY).unwrap().cluster
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            workdir: dir.path().to_path_buf(),
            offline: true,
            ..Default::default()
        }
    }

    fn joined_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .reply("join-token manager", MANAGER_TOKEN)
            .reply("join-token worker", WORKER_TOKEN)
            .reply("docker swarm join --token", "This node joined a swarm as a worker.")
            .reply("docker node ls", "ID HOSTNAME STATUS")
    }

    #[test]
    fn test_init_command() {
        let spec = spec();
        assert_eq!(
            SwarmCluster::init_command(&spec, &spec.nodes[0]),
            "docker swarm init --advertise-addr 10.0.0.1 --listen-addr 0.0.0.0:2377 --default-addr-pool 10.20.0.0/16 --default-addr-pool-mask-length 24"
        );
    }

    #[test]
    fn test_tokens() {
        let tokens = JoinTokens {
            manager: extract_join_line(MANAGER_TOKEN).unwrap(),
            worker: extract_join_line(WORKER_TOKEN).unwrap(),
        };
        assert_eq!(tokens.manager, "docker swarm join --token SWMTKN-1-mgr mgr1:2377");
        let by_ip = tokens.with_address("mgr1", "10.0.0.1");
        assert_eq!(by_ip.for_role("Worker").unwrap(), "docker swarm join --token SWMTKN-1-wrk 10.0.0.1:2377");
        assert!(by_ip.for_role("observer").is_err());
        assert!(extract_join_line("Error: not a swarm manager").is_none());
    }

    #[test]
    fn test_address_rewrite_leaves_token_intact() {
        let tokens = JoinTokens {
            manager: "docker swarm join --token SWMTKN-1-4xkq9m1b-zz0m1r m1:2377".to_string(),
            worker: "docker swarm join --token SWMTKN-1-lkl-7p73s1dx5im1atdymyhg9hu2 m1:2377".to_string(),
        };
        let by_ip = tokens.with_address("m1", "10.0.0.1");
        assert_eq!(
            by_ip.worker,
            "docker swarm join --token SWMTKN-1-lkl-7p73s1dx5im1atdymyhg9hu2 10.0.0.1:2377"
        );
        assert_eq!(
            by_ip.manager,
            "docker swarm join --token SWMTKN-1-4xkq9m1b-zz0m1r 10.0.0.1:2377"
        );

        let already_ip = by_ip.with_address("m1", "10.0.0.9");
        assert_eq!(already_ip.worker, by_ip.worker);
    }

    #[tokio::test]
    async fn test_create_skip_precheck() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(joined_executor());
        let swarm = SwarmCluster::new(&settings, executor.clone());

        swarm.create(&spec(), true).await.unwrap();

        let mgr = executor.commands_on("mgr1");
        assert!(mgr[0].starts_with("docker swarm init"));
        assert_eq!(mgr[1], "docker swarm join-token manager");
        assert_eq!(mgr[2], "docker swarm join-token worker");
        assert_eq!(mgr[3], "docker node ls");
        assert_eq!(executor.commands_on("wk1"), vec!["docker swarm join --token SWMTKN-1-wrk 10.0.0.1:2377"]);
        assert_eq!(executor.commands_on("mgr2"), vec!["docker swarm join --token SWMTKN-1-mgr 10.0.0.1:2377"]);

        let saved = std::fs::read_to_string(dir.path().join(JOIN_FILE)).unwrap();
        assert!(saved.starts_with("Manager: docker swarm join --token SWMTKN-1-mgr"));
        assert!(saved.contains("\nWorker: docker swarm join --token SWMTKN-1-wrk"));
        let info = std::fs::read_to_string(dir.path().join(INFO_FILE)).unwrap();
        assert!(info.contains("Cluster Name: demo"));
        assert!(info.contains("Created At: "));
        assert!(info.contains("10.0.0.2\twk1"));
    }

    #[tokio::test]
    async fn test_prepare_runs_before_init() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(joined_executor());
        let swarm = SwarmCluster::new(&settings, executor.clone());

        swarm.create(&spec(), false).await.unwrap();

        let mgr = executor.commands_on("mgr1");
        assert_eq!(mgr[0], "systemctl stop firewalld || true");
        assert!(mgr.contains(&"docker --version".to_string()));
        assert!(mgr.contains(&"systemctl start docker".to_string()));
        assert!(mgr.contains(&"ping -c 1 -W 1 10.0.0.2".to_string()));
        assert!(executor.position("cp /etc/hosts").unwrap() < executor.position("docker swarm init").unwrap());
    }

    #[tokio::test]
    async fn test_join_without_confirmation_fails() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(
            ScriptedExecutor::new()
                .reply("join-token manager", MANAGER_TOKEN)
                .reply("join-token worker", WORKER_TOKEN),
        );
        let swarm = SwarmCluster::new(&settings, executor);
        let err = swarm.create(&spec(), true).await.unwrap_err();
        assert!(err.to_string().contains("may not have joined successfully"));
    }

    #[tokio::test]
    async fn test_remove_leave_failures_are_warnings() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let executor = Arc::new(ScriptedExecutor::new().fail("swarm leave", "not part of a swarm"));
        let swarm = SwarmCluster::new(&settings, executor.clone());

        swarm.remove(&spec(), false).await.unwrap();
        assert_eq!(executor.commands_on("mgr1"), vec!["docker swarm leave --force"]);
        assert_eq!(executor.commands_on("wk1"), vec!["docker swarm leave"]);
    }
}
