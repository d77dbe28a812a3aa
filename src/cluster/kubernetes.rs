//! Kubernetes bring-up with kubeadm
//!
//! Binaries come from templated resources installed on every node by
//! [`ResourceInstaller`]. The first master runs `kubeadm init`, workers join
//! with the command extracted from its output.

use super::common;
use super::config::{ClusterSpec, K8sConfig};
use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{Result, SomError};
use crate::exec::{Executor, RemoteNode};
use crate::installer::{Resource, ResourceInstaller};
use crate::output;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Minimum memory per node
pub const MIN_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub const INFO_FILE: &str = "k8s-cluster-info.txt";

const CONTAINERD_SERVICE: &str = r#"[Unit]
Description=containerd container runtime
Documentation=https://containerd.io
After=network.target local-fs.target

[Service]
ExecStartPre=-/sbin/modprobe overlay
ExecStart=/usr/local/bin/containerd
Restart=always
RestartSec=5
Delegate=yes
KillMode=process
OOMScoreAdjust=-999
LimitNOFILE=1048576
LimitNPROC=infinity
LimitCORE=infinity

[Install]
WantedBy=multi-user.target
"#;

const DOCKER_DAEMON_JSON: &str = r#"{
  "exec-opts": ["native.cgroupdriver=systemd"],
  "log-driver": "json-file",
  "log-opts": {"max-size": "100m"},
  "storage-driver": "overlay2"
}
"#;

const K8S_SYSCTL: &str = "net.bridge.bridge-nf-call-iptables  = 1\nnet.bridge.bridge-nf-call-ip6tables = 1\nnet.ipv4.ip_forward                 = 1\n";

const K8S_MODULES: &str = "overlay\nbr_netfilter\n";

const KUBEADM_DROPIN: &str = r#"[Service]
Environment="KUBELET_KUBECONFIG_ARGS=--bootstrap-kubeconfig=/etc/kubernetes/bootstrap-kubelet.conf --kubeconfig=/etc/kubernetes/kubelet.conf"
Environment="KUBELET_CONFIG_ARGS=--config=/var/lib/kubelet/config.yaml"
EnvironmentFile=-/var/lib/kubelet/kubeadm-flags.env
EnvironmentFile=-/etc/sysconfig/kubelet
ExecStart=
ExecStart=/usr/local/bin/kubelet $KUBELET_KUBECONFIG_ARGS $KUBELET_CONFIG_ARGS $KUBELET_KUBEADM_ARGS $KUBELET_EXTRA_ARGS
"#;

const KUBECTL_CONFIG_COMMANDS: &[&str] = &[
    "mkdir -p $HOME/.kube",
    "cp -i /etc/kubernetes/admin.conf $HOME/.kube/config",
    "chown $(id -u):$(id -g) $HOME/.kube/config",
];

const CLEANUP_COMMANDS: &[&str] = &[
    "rm -rf /etc/cni/net.d",
    "rm -rf $HOME/.kube",
    "rm -rf /etc/kubernetes",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// OS packages, kernel modules and sysctls every node needs
pub fn base_dependencies(hosts: &[String]) -> Resource {
    let mut res = Resource::new("base-dependencies", "");
    res.method = "package".to_string();
    res.hosts = hosts.to_vec();
    res.extra_files
        .insert("/etc/modules-load.d/k8s.conf".to_string(), K8S_MODULES.to_string());
    res.extra_files
        .insert("/etc/sysctl.d/k8s.conf".to_string(), K8S_SYSCTL.to_string());
    res.post_install = strings(&[
        "yum install -y socat conntrack ebtables ipset",
        "swapoff -a",
        "sed -i '/ swap / s/^/#/' /etc/fstab",
        "modprobe overlay",
        "modprobe br_netfilter",
        "sysctl --system",
    ]);
    res
}

/// Static Docker binaries configured for the systemd cgroup driver
pub fn docker_runtime(k8s: &K8sConfig, hosts: &[String]) -> Resource {
    let mut res = Resource::new("docker", &k8s.docker_version);
    res.method = "binary".to_string();
    res.hosts = hosts.to_vec();
    res.target = "{{.Name}}-{{.Version}}.tgz".to_string();
    res.urls = vec![
        "https://download.docker.com/linux/static/stable/x86_64/docker-{{.Version}}.tgz".to_string(),
    ];
    res.extra_files
        .insert("/etc/docker/daemon.json".to_string(), DOCKER_DAEMON_JSON.to_string());
    res.post_install = strings(&[
        "tar xzvf {{.CacheDir}}/{{.Name}}-{{.Version}}.tgz --strip-components=1 -C /usr/local/bin",
        "chmod +x /usr/local/bin/docker*",
        "groupadd docker || true",
        "usermod -aG docker $USER",
        "mkdir -p /etc/docker",
        "systemctl enable docker",
        "systemctl start docker",
    ]);
    res
}

/// CNI plugins, runc and containerd, in install order
pub fn containerd_runtime(k8s: &K8sConfig, hosts: &[String]) -> Vec<Resource> {
    let mut cni = Resource::new("cni-plugins", &k8s.cni_plugins_version);
    cni.method = "binary".to_string();
    cni.hosts = hosts.to_vec();
    cni.urls = vec![
        "https://github.com/containernetworking/plugins/releases/download/v{{.Version}}/cni-plugins-linux-{{.Arch}}-v{{.Version}}.tgz".to_string(),
    ];
    cni.post_install = strings(&[
        "mkdir -p /opt/cni/bin",
        "tar Cxzvf /opt/cni/bin {{.CacheDir}}/cni-plugins-linux-{{.Arch}}-v{{.Version}}.tgz",
    ]);

    let mut runc = Resource::new("runc", &k8s.runc_version);
    runc.method = "binary".to_string();
    runc.hosts = hosts.to_vec();
    runc.urls = vec![
        "https://github.com/opencontainers/runc/releases/download/v{{.Version}}/runc.{{.Arch}}".to_string(),
    ];
    runc.post_install = strings(&["install -m 755 {{.CacheDir}}/runc.{{.Arch}} /usr/local/sbin/runc"]);

    let mut containerd = Resource::new("containerd", &k8s.containerd_version);
    containerd.method = "binary".to_string();
    containerd.hosts = hosts.to_vec();
    containerd.urls = vec![
        "https://github.com/containerd/containerd/releases/download/v{{.Version}}/containerd-{{.Version}}-linux-{{.Arch}}.tar.gz".to_string(),
    ];
    containerd.extra_files.insert(
        "/etc/systemd/system/containerd.service".to_string(),
        CONTAINERD_SERVICE.to_string(),
    );
    let mut post = strings(&[
        "tar Cxzvf /usr/local {{.CacheDir}}/containerd-{{.Version}}-linux-{{.Arch}}.tar.gz",
        "mkdir -p /etc/containerd",
        "containerd config default | tee /etc/containerd/config.toml >/dev/null",
        "sed -i 's|SystemdCgroup = false|SystemdCgroup = true|g' /etc/containerd/config.toml",
    ]);
    if !k8s.image_repository.is_empty() {
        post.push(format!(
            "sed -i 's|k8s.gcr.io|{}|g' /etc/containerd/config.toml",
            k8s.image_repository
        ));
    }
    post.push(format!(
        "sed -i 's|sandbox_image = \".*\"|sandbox_image = \"{}\"|g' /etc/containerd/config.toml",
        k8s.pause_image()
    ));
    post.push("systemctl daemon-reload".to_string());
    post.push("systemctl enable --now containerd".to_string());
    containerd.post_install = post;

    vec![cni, runc, containerd]
}

/// kubeadm, kubelet, kubectl and the kubelet units
pub fn k8s_components(k8s: &K8sConfig, hosts: &[String]) -> Resource {
    let mut res = Resource::new("kubernetes", &k8s.version);
    res.method = "binary".to_string();
    res.hosts = hosts.to_vec();
    res.urls = vec![
        "https://dl.k8s.io/v{{.Version}}/bin/linux/{{.Arch}}/kubeadm".to_string(),
        "https://dl.k8s.io/v{{.Version}}/bin/linux/{{.Arch}}/kubelet".to_string(),
        "https://dl.k8s.io/v{{.Version}}/bin/linux/{{.Arch}}/kubectl".to_string(),
        "https://structured.oss-cn-beijing.aliyuncs.com/somwork/service/kubelet.service".to_string(),
    ];
    res.extra_files.insert(
        "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf".to_string(),
        KUBEADM_DROPIN.to_string(),
    );
    res.post_install = strings(&[
        "install -o root -g root -m 0755 {{.CacheDir}}/kubeadm /usr/local/bin/kubeadm",
        "install -o root -g root -m 0755 {{.CacheDir}}/kubelet /usr/local/bin/kubelet",
        "install -o root -g root -m 0755 {{.CacheDir}}/kubectl /usr/local/bin/kubectl",
        "install -o root -g root -m 0644 {{.CacheDir}}/kubelet.service /etc/systemd/system/kubelet.service",
        "systemctl daemon-reload",
        "systemctl enable --now kubelet",
    ]);
    res
}

/// `kubeadm init` for the first master
pub fn init_command(k8s: &K8sConfig, master: &RemoteNode) -> String {
    let mut cmd = format!(
        "kubeadm init --kubernetes-version={} --apiserver-advertise-address={} --pod-network-cidr={} --service-cidr={} --cri-socket {}",
        k8s.version,
        master.ip,
        k8s.pod_network_cidr,
        k8s.service_cidr,
        k8s.cri_socket()
    );
    if !k8s.image_repository.is_empty() {
        cmd.push_str(&format!(" --image-repository={}", k8s.image_repository));
    }
    cmd
}

/// The `kubeadm join` command printed by `kubeadm init`, with backslash
/// continuations folded into one line
pub fn extract_join_command(output: &str) -> Option<String> {
    let mut lines = output.lines().skip_while(|l| !l.contains("kubeadm join"));
    let mut parts = Vec::new();
    for line in lines.by_ref() {
        let line = line.trim();
        match line.strip_suffix('\\') {
            Some(head) => parts.push(head.trim().to_string()),
            None => {
                parts.push(line.to_string());
                break;
            }
        }
    }
    if parts.is_empty() {
        return None;
    }
    let joined = parts.join(" ");
    let start = joined.find("kubeadm join")?;
    Some(joined[start..].to_string())
}

/// Total memory in bytes from `free -b`
pub fn parse_total_memory(free_output: &str) -> Result<u64> {
    let line = free_output
        .lines()
        .nth(1)
        .ok_or_else(|| SomError::Cluster("invalid memory info format".to_string()))?;
    let total = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| SomError::Cluster("invalid memory info format".to_string()))?;
    total
        .parse()
        .map_err(|e| SomError::Cluster(format!("failed to parse memory size {}: {}", total, e)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitConfiguration<'a> {
    api_version: &'static str,
    kind: &'static str,
    node_registration: NodeRegistration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRegistration<'a> {
    cri_socket: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfiguration<'a> {
    api_version: &'static str,
    kind: &'static str,
    kubernetes_version: &'a str,
    api_server: ApiServer<'a>,
    control_plane_endpoint: String,
    networking: Networking<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_repository: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiServer<'a> {
    #[serde(rename = "certSANs")]
    cert_sans: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Networking<'a> {
    pod_subnet: &'a str,
    service_subnet: &'a str,
}

/// kubeadm v1beta3 InitConfiguration and ClusterConfiguration documents
pub fn kubeadm_config(k8s: &K8sConfig, master: &RemoteNode) -> Result<String> {
    let init = InitConfiguration {
        api_version: "kubeadm.k8s.io/v1beta3",
        kind: "InitConfiguration",
        node_registration: NodeRegistration {
            cri_socket: k8s.cri_socket(),
            name: &master.host,
        },
    };
    let cluster = ClusterConfiguration {
        api_version: "kubeadm.k8s.io/v1beta3",
        kind: "ClusterConfiguration",
        kubernetes_version: &k8s.version,
        api_server: ApiServer {
            cert_sans: vec![&master.ip],
        },
        control_plane_endpoint: format!("{}:6443", master.ip),
        networking: Networking {
            pod_subnet: &k8s.pod_network_cidr,
            service_subnet: &k8s.service_cidr,
        },
        image_repository: Some(k8s.image_repository.as_str()).filter(|r| !r.is_empty()),
    };
    Ok(format!(
        "{}---\n{}",
        serde_yaml::to_string(&init)?,
        serde_yaml::to_string(&cluster)?
    ))
}

/// Builds a Kubernetes cluster from a topology file
pub struct K8sCluster<'a> {
    settings: &'a Settings,
    executor: Arc<dyn Executor>,
    downloader: Downloader,
}

impl<'a> K8sCluster<'a> {
    pub fn new(settings: &'a Settings, executor: Arc<dyn Executor>, downloader: Downloader) -> Self {
        Self {
            settings,
            executor,
            downloader,
        }
    }

    pub fn join_file(&self, spec: &ClusterSpec) -> PathBuf {
        self.settings
            .work_tmp_dir()
            .join(format!("{}_k8s-join-command.txt", spec.name))
    }

    pub fn kubeadm_config_file(&self, spec: &ClusterSpec) -> PathBuf {
        self.settings
            .work_tmp_dir()
            .join(format!("{}_kubeadm-config.yaml", spec.name))
    }

    pub fn info_file(&self) -> PathBuf {
        self.settings.workdir.join(INFO_FILE)
    }

    pub async fn create(&self, spec: &ClusterSpec, skip_precheck: bool) -> Result<()> {
        let started = Instant::now();
        let k8s = &spec.k8s;
        output::banner(&format!("Creating Kubernetes cluster: {}", spec.name));
        output::info(format!("Kubernetes version: {}", k8s.version));
        output::info(format!("Pod network CIDR: {}", k8s.pod_network_cidr));
        output::info(format!("Service CIDR: {}", k8s.service_cidr));
        output::info(format!("Container runtime: {}", k8s.container_runtime));

        output::stage("== Cluster preparation ==");
        self.prepare(spec, skip_precheck)
            .await
            .map_err(|e| SomError::Cluster(format!("cluster preparation failed: {}", e)))?;
        output::success("✓ Cluster preparation complete");

        output::stage("== Dependencies ==");
        self.install_dependencies(spec)
            .await
            .map_err(|e| SomError::Cluster(format!("dependency installation failed: {}", e)))?;
        output::success("✓ Dependencies installed");

        output::stage("== Control plane ==");
        let master = spec
            .nodes
            .iter()
            .find(|n| n.has_role("master"))
            .ok_or_else(|| SomError::Cluster("no master node found in configuration".to_string()))?;
        output::info(format!("Using master node {} ({})", master.host, master.ip));
        self.init_master(spec, master).await?;

        output::stage("== Workers ==");
        self.join_workers(spec).await?;

        output::stage("== Cluster information ==");
        self.print_info(spec, master).await?;

        output::success(format!(
            "✓ Kubernetes cluster '{}' created in {}s",
            spec.name,
            started.elapsed().as_secs()
        ));
        Ok(())
    }

    async fn prepare(&self, spec: &ClusterSpec, skip_precheck: bool) -> Result<()> {
        self.settings.ensure_dirs()?;
        if skip_precheck {
            output::warning("Skipping environment prechecks, installation may fail");
            return Ok(());
        }

        spec.validate_k8s()?;
        let entries = spec.hosts_entries();
        for (i, node) in spec.nodes.iter().enumerate() {
            output::info(format!("Node {}: host={}, ip={}, role={}", i + 1, node.host, node.ip, node.role));
        }
        for node in &spec.nodes {
            output::stage(format!("Preparing node {} ({})", node.host, node.ip));
            self.check_os(node)
                .await
                .map_err(|e| SomError::Cluster(format!("node {} OS check failed: {}", node.host, e)))?;
            common::configure_hosts_file(self.executor.as_ref(), node, &entries).await?;
        }
        Ok(())
    }

    /// Linux on x86_64 with at least 2 GiB of memory, then swap off
    async fn check_os(&self, node: &RemoteNode) -> Result<()> {
        let os = self.executor.run(node, "uname -s").await?;
        if !os.to_lowercase().contains("linux") {
            return Err(SomError::Cluster(format!("unsupported OS type: {}, only Linux is supported", os.trim())));
        }

        let arch = self.executor.run(node, "uname -m").await?;
        let arch_lower = arch.to_lowercase();
        if !arch_lower.contains("x86_64") && !arch_lower.contains("amd64") {
            return Err(SomError::Cluster(format!(
                "unsupported CPU architecture: {}, only x86_64/amd64 is supported",
                arch.trim()
            )));
        }

        let total = parse_total_memory(&self.executor.run(node, "free -b").await?)?;
        if total < MIN_MEMORY_BYTES {
            return Err(SomError::Cluster(format!(
                "insufficient memory: {} bytes (minimum {} bytes)",
                total, MIN_MEMORY_BYTES
            )));
        }
        output::info(format!(
            "{}: {} {}, {:.2}GB memory",
            node.host,
            os.trim(),
            arch.trim(),
            total as f64 / (1024.0 * 1024.0 * 1024.0)
        ));

        self.executor.run(node, "swapoff -a").await?;
        self.executor
            .run(node, "sed -i '/ swap / s/^/#/' /etc/fstab")
            .await?;
        Ok(())
    }

    fn installer(&self, spec: &ClusterSpec) -> ResourceInstaller<'a> {
        ResourceInstaller::new(self.settings, self.executor.clone(), self.downloader.clone())
            .with_nodes(spec.nodes.clone())
    }

    async fn install_dependencies(&self, spec: &ClusterSpec) -> Result<()> {
        let k8s = &spec.k8s;
        let hosts: Vec<String> = spec.nodes.iter().map(|n| n.ip.clone()).collect();
        let installer = self.installer(spec);

        installer.install(&base_dependencies(&hosts)).await?;

        match k8s.container_runtime.to_ascii_lowercase().as_str() {
            "docker" => installer.install(&docker_runtime(k8s, &hosts)).await?,
            "containerd" => {
                for res in containerd_runtime(k8s, &hosts) {
                    installer.install(&res).await?;
                }
            }
            other => {
                return Err(SomError::Cluster(format!("unsupported container runtime: {}", other)))
            }
        }

        installer.install(&k8s_components(k8s, &hosts)).await
    }

    async fn init_master(&self, spec: &ClusterSpec, master: &RemoteNode) -> Result<()> {
        let config_path = self.kubeadm_config_file(spec);
        std::fs::create_dir_all(self.settings.work_tmp_dir())?;
        std::fs::write(&config_path, kubeadm_config(&spec.k8s, master)?)?;
        debug!("kubeadm config written to {}", config_path.display());

        let cmd = init_command(&spec.k8s, master);
        output::info(format!("Initializing master with: {}", cmd));
        let out = self
            .executor
            .run(master, &cmd)
            .await
            .map_err(|e| SomError::Cluster(format!("master initialization failed: {}", e)))?;
        output::debug(format!("kubeadm init output:\n{}", out));

        let join = extract_join_command(&out).ok_or_else(|| {
            SomError::Cluster("could not extract join command from kubeadm init output".to_string())
        })?;
        let join_file = self.join_file(spec);
        std::fs::write(&join_file, &join)
            .map_err(|e| SomError::Cluster(format!("failed to save join command: {}", e)))?;
        output::info(format!("Join command saved to {}", join_file.display()));

        output::info("Configuring kubectl...");
        for cmd in KUBECTL_CONFIG_COMMANDS {
            self.executor
                .run(master, cmd)
                .await
                .map_err(|e| SomError::Cluster(format!("kubectl configuration failed: {}", e)))?;
        }

        for extra in spec.nodes_with_role("master").into_iter().skip(1) {
            output::warning(format!(
                "Additional master {} must be joined to the control plane manually",
                extra.label()
            ));
        }
        output::success("✓ Master initialized");
        Ok(())
    }

    async fn join_workers(&self, spec: &ClusterSpec) -> Result<()> {
        let join = std::fs::read_to_string(self.join_file(spec))
            .map_err(|e| SomError::Cluster(format!("failed to read join command: {}", e)))?;
        for node in spec.nodes_with_role("worker") {
            output::stage(format!("Joining worker {}", node.host));
            self.executor.run(node, join.trim()).await.map_err(|e| {
                SomError::Cluster(format!("worker {} failed to join: {}", node.host, e))
            })?;
            output::success(format!("✓ Node {} joined", node.host));
        }
        Ok(())
    }

    async fn print_info(&self, spec: &ClusterSpec, master: &RemoteNode) -> Result<()> {
        let nodes = self
            .executor
            .run(master, "kubectl get nodes")
            .await
            .map_err(|e| SomError::Cluster(format!("failed to get cluster nodes: {}", e)))?;

        output::info(format!("Cluster Name: {}", spec.name));
        output::info(format!("Master Node: {} ({})", master.host, master.ip));
        println!("{}", nodes);
        output::info("Verify with: kubectl get nodes && kubectl get pods --all-namespaces");

        let content = format!(
            "Cluster Name: {}\nCreated At: {}\nMaster Node: {}\n\nNodes:\n{}",
            spec.name,
            chrono::Utc::now().to_rfc3339(),
            master.host,
            nodes
        );
        let path = self.info_file();
        match std::fs::write(&path, content) {
            Ok(()) => output::info(format!("Cluster information saved to: {}", path.display())),
            Err(e) => output::warning(format!("Failed to save cluster info: {}", e)),
        }
        Ok(())
    }

    /// `kubeadm reset` on every node, then remove leftover config
    pub async fn remove(&self, spec: &ClusterSpec) -> Result<()> {
        output::banner(&format!("Removing Kubernetes cluster: {}", spec.name));
        for node in &spec.nodes {
            output::stage(format!("Resetting node {} ({})", node.host, node.ip));
            self.executor
                .run(node, "kubeadm reset -f")
                .await
                .map_err(|e| SomError::Cluster(format!("failed to reset node {}: {}", node.host, e)))?;
            for cmd in CLEANUP_COMMANDS {
                if let Err(e) = self.executor.run(node, cmd).await {
                    output::warning(format!("Cleanup failed: {}: {}", cmd, e));
                }
            }
            output::success(format!("✓ Node {} reset", node.host));
        }
        output::success(format!("✓ Kubernetes cluster '{}' removed", spec.name));
        Ok(())
    }
}
