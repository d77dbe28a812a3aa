//! somcli - container platform operations from one binary
//!
//! This is the main CLI entry point for somcli.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use somcli::cluster::ClusterManager;
use somcli::compose::{self, ComposeFlags, ComposeInstaller};
use somcli::config::{Overrides, Settings};
use somcli::docker::{self, DockerInstaller};
use somcli::download::Downloader;
use somcli::exec::{CommandRunner, Executor, NodeExecutor};
use somcli::images::{self, ImageManager, Scope};
use somcli::installer::{print_results, ResourceConfig, ResourceFetcher, ResourceInstaller};
use somcli::output;
use somcli::registry::{self, HarborManager, RegistrySyncer};
use somcli::resources::{self, QueryOptions};
use somcli::version::BuildInfo;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// somcli - install Docker, bring up clusters and move images
#[derive(Parser, Debug)]
#[command(name = "somcli")]
#[command(version)]
#[command(about = "Container platform operations: Docker, Compose, Kubernetes, Swarm and Harbor", long_about = None)]
struct Cli {
    /// Config file (default is $HOME/.somcli.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Working directory (default is ./somwork)
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// GitHub proxy URL, e.g. https://gh-proxy.com/
    #[arg(long, global = true)]
    github_proxy: Option<String>,

    /// Only use files already in the download cache
    #[arg(long, global = true)]
    offline: bool,

    /// Base URL for relative resource URLs
    #[arg(long, global = true)]
    source: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install Docker or pass commands through to the docker CLI
    Docker(DockerArgs),

    /// Manage docker-compose and pass commands through to it
    #[command(name = "docker-compose", visible_aliases = ["compose", "dc"])]
    Compose {
        /// install [version] | uninstall | version | any docker-compose arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Create, remove or detect clusters
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },

    /// Manage the Harbor registry and sync images between registries
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },

    /// Pull, push, export and import image lists
    #[command(name = "docker-images")]
    DockerImages {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// List resources of the current cluster
    Get {
        #[command(flatten)]
        target: ResourceTarget,
        /// All namespaces
        #[arg(short = 'A', long)]
        all_namespaces: bool,
        /// Output format
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Delete a resource
    Delete {
        #[command(flatten)]
        target: ResourceTarget,
    },

    /// Show details of a resource
    Describe {
        #[command(flatten)]
        target: ResourceTarget,
    },

    /// Apply a manifest, stack or compose file
    Apply {
        /// File to apply
        #[arg(short, long)]
        file: PathBuf,
        /// Cluster type (k8s|swarm|docker), detected when omitted
        #[arg(long)]
        cluster_type: Option<String>,
    },

    /// Download the resources of a manifest into the cache
    Download(DownloadArgs),

    /// Offline package preparation
    Offline {
        #[command(subcommand)]
        command: OfflineCommands,
    },

    /// Install resources from a manifest
    Install {
        /// Manifest file
        #[arg(short, long)]
        file: PathBuf,
        /// Install only this resource
        #[arg(long)]
        name: Option<String>,
    },

    /// Print version information
    Version {
        /// Print just the version number
        #[arg(short, long)]
        short: bool,
        /// Print the version as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct DockerArgs {
    /// YAML file with target nodes
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,
    /// Node addresses, comma separated
    #[arg(long = "node", value_delimiter = ',', global = true)]
    nodes: Vec<String>,
    /// SSH user for --node addresses
    #[arg(long, default_value = "root", global = true)]
    user: String,
    /// SSH private key for --node addresses
    #[arg(long, global = true)]
    ssh_key: Option<String>,
    /// Automatic yes to prompts
    #[arg(short = 'y', long = "yes", global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Option<DockerCommands>,
}

#[derive(Subcommand, Debug)]
enum DockerCommands {
    /// Install Docker
    Install {
        /// Docker version
        #[arg(long, default_value = docker::LATEST)]
        version: String,
    },
    /// Uninstall Docker
    Uninstall,
    /// Show Docker status
    Status,
    #[command(external_subcommand)]
    Passthrough(Vec<String>),
}

#[derive(Subcommand, Debug)]
enum ClusterCommands {
    /// Create a cluster from a topology file
    Create {
        /// Cluster configuration file
        #[arg(short, long)]
        file: PathBuf,
        /// Override the cluster type in the file (k8s|swarm)
        #[arg(long)]
        cluster_type: Option<String>,
        /// Create even if a previous bring-up left state behind
        #[arg(long)]
        force: bool,
        /// Skip pre-installation checks
        #[arg(long)]
        skip_precheck: bool,
    },
    /// Remove a cluster
    Remove {
        /// Cluster configuration file
        #[arg(short, long)]
        file: PathBuf,
        /// Remove without confirmation
        #[arg(long)]
        force: bool,
    },
    /// Detect the cluster type of this host
    Detect,
}

#[derive(Subcommand, Debug)]
enum RegistryCommands {
    /// Install Harbor
    Install {
        /// Harbor hostname
        #[arg(short = 'H', long)]
        hostname: String,
        /// Harbor version
        #[arg(short, long, default_value = registry::harbor::DEFAULT_VERSION)]
        version: String,
        /// Directory holding <hostname>.crt and <hostname>.key
        #[arg(long)]
        ca_path: Option<PathBuf>,
    },
    /// Uninstall Harbor
    Uninstall,
    /// Copy images from one registry to another
    Sync {
        /// Source registry URL
        #[arg(short = 's', long)]
        src: String,
        /// Target registry URL
        #[arg(short, long)]
        target: String,
        /// Target registry username
        #[arg(short, long)]
        username: Option<String>,
        /// Target registry password (or REGISTRY_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
        /// Concurrent syncs (1-10)
        #[arg(short, long, default_value_t = registry::sync::DEFAULT_CONCURRENCY)]
        concurrency: usize,
        /// File listing images, one per line
        #[arg(short = 'f', long = "image-list")]
        image_list: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommands {
    /// Pull images and optionally retag them into a repository
    Pull {
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Target registry repository
        #[arg(short, long)]
        repo: Option<String>,
        /// Custom image list file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Write the pulled image list here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Tag images into a repository and push them
    Push {
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Target registry repository
        #[arg(short, long)]
        repo: Option<String>,
        /// Image list file
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Save images into one archive
    Export {
        #[arg(short, long, default_value = "all")]
        scope: Scope,
        /// Source registry repository
        #[arg(short, long)]
        repo: Option<String>,
        /// Custom image list file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output archive
        #[arg(short, long, default_value = "images.tar.gz")]
        output: PathBuf,
    },
    /// Load images from an exported archive
    Import {
        /// Input archive
        #[arg(short, long, default_value = "images.tar.gz")]
        input: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ResourceTarget {
    /// Resource type (pods, svc, deploy, ...)
    kind: String,
    /// Resource name
    name: Option<String>,
    /// Namespace
    #[arg(short, long)]
    namespace: Option<String>,
    /// Cluster type (k8s|swarm|docker), detected when omitted
    #[arg(long)]
    cluster_type: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
    /// Manifest file
    #[arg(short, long)]
    file: PathBuf,
    /// Quiet mode
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum OfflineCommands {
    /// Download the resources of a manifest into the cache
    Download(DownloadArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Console output goes through `output`; tracing is for diagnostics
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("error")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::error(format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let settings = Settings::load(Overrides {
        config: cli.config,
        workdir: cli.workdir,
        github_proxy: cli.github_proxy,
        offline: cli.offline,
        source: cli.source,
        debug: cli.debug,
    })?;
    output::set_debug(settings.debug);
    let nodes = Arc::new(NodeExecutor::new());
    let result = dispatch(&settings, nodes.clone(), cli.command).await;
    nodes.close().await;
    result
}

async fn dispatch(settings: &Settings, executor: Arc<dyn Executor>, command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Docker(args) => return run_docker(settings, executor, args).await,
        Commands::Compose { args } => return run_compose(settings, args).await,

        Commands::Cluster { command } => {
            let manager = ClusterManager::new(settings, executor)
                .with_downloader(Downloader::from_settings(settings));
            match command {
                ClusterCommands::Create {
                    file,
                    cluster_type,
                    force,
                    skip_precheck,
                } => {
                    manager
                        .create(&file, cluster_type.as_deref(), force, skip_precheck)
                        .await?;
                }
                ClusterCommands::Remove { file, force } => manager.remove(&file, force).await?,
                ClusterCommands::Detect => {
                    let detected = manager.detect().await;
                    output::info(format!("Detected cluster type: {}", detected.display_name()));
                }
            }
        }

        Commands::Registry { command } => run_registry(settings, command).await?,
        Commands::DockerImages { command } => run_images(settings, command).await?,

        Commands::Get {
            target,
            all_namespaces,
            output,
        } => {
            let cluster = resources::resolve_cluster_type(target.cluster_type.as_deref(), executor).await?;
            let opts = QueryOptions {
                namespace: target.namespace,
                all_namespaces,
                output,
            };
            let inv = resources::get_invocation(cluster, &target.kind, target.name.as_deref(), &opts)?;
            println!("{}", inv.output().await?);
        }
        Commands::Delete { target } => {
            let cluster = resources::resolve_cluster_type(target.cluster_type.as_deref(), executor).await?;
            let opts = QueryOptions {
                namespace: target.namespace,
                ..Default::default()
            };
            resources::delete_invocation(cluster, &target.kind, target.name.as_deref(), &opts)?
                .run()
                .await?;
        }
        Commands::Describe { target } => {
            let cluster = resources::resolve_cluster_type(target.cluster_type.as_deref(), executor).await?;
            let opts = QueryOptions {
                namespace: target.namespace,
                ..Default::default()
            };
            let inv = resources::describe_invocation(cluster, &target.kind, target.name.as_deref(), &opts)?;
            println!("{}", inv.output().await?);
        }
        Commands::Apply { file, cluster_type } => {
            let cluster = resources::resolve_cluster_type(cluster_type.as_deref(), executor).await?;
            resources::apply_invocation(settings, cluster, &file)?.run().await?;
            output::success(format!("Applied {}", file.display()));
        }

        Commands::Download(args)
        | Commands::Offline {
            command: OfflineCommands::Download(args),
        } => run_download(settings, &args).await?,

        Commands::Install { file, name } => {
            let config = ResourceConfig::load(&file)?;
            let installer = ResourceInstaller::new(settings, executor, manifest_downloader(settings, &config))
                .with_nodes(config.nodes.clone());
            match name {
                Some(name) => installer.install_tool(&file, &name).await?,
                None => installer.install_from_file(&file).await?,
            }
            output::success("Installation completed");
        }

        Commands::Version { short, json } => {
            let info = BuildInfo::current();
            if short {
                println!("{}", info.version);
            } else if json {
                println!("{}", info.to_json()?);
            } else {
                print!("{}", info.render());
            }
        }
    }
    Ok(0)
}

async fn run_docker(settings: &Settings, executor: Arc<dyn Executor>, args: DockerArgs) -> anyhow::Result<i32> {
    let nodes = docker::target_nodes(args.file.as_deref(), &args.nodes, &args.user, args.ssh_key.as_deref())?;
    let installer = DockerInstaller::new(settings, executor).silent(args.silent);
    match args.command {
        None => {
            if !args.silent {
                output::info("No subcommand provided, performing default local Docker installation");
            }
            installer.install(docker::LATEST, &nodes).await?;
        }
        Some(DockerCommands::Install { version }) => installer.install(&version, &nodes).await?,
        Some(DockerCommands::Uninstall) => installer.uninstall(&nodes).await?,
        Some(DockerCommands::Status) => {
            installer.status(&nodes).await?;
        }
        Some(DockerCommands::Passthrough(rest)) => return Ok(installer.passthrough(&rest, &nodes).await?),
    }
    Ok(0)
}

async fn run_compose(settings: &Settings, args: Vec<String>) -> anyhow::Result<i32> {
    let flags = ComposeFlags::from_args(&args);
    let installer = ComposeInstaller::new(settings)
        .with_install_path(flags.install_path.clone())
        .silent(flags.silent);
    let rest = compose::filter_args(&args);

    match rest.first().map(String::as_str) {
        Some("install") => {
            installer.install(compose_install_version(&rest[1..])).await?;
        }
        Some("uninstall") => installer.uninstall()?,
        Some("version") if rest.len() == 1 => {
            let version = installer.version().await?;
            println!("Docker Compose version: {}", version);
        }
        Some(_) => return Ok(compose::passthrough(&installer, &args).await?),
        None => bail!("no docker-compose command given"),
    }
    Ok(0)
}

/// `install v2.x`, `install -v v2.x` and `install --version v2.x` all name the version
fn compose_install_version(args: &[String]) -> &str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--version" => {
                if let Some(v) = iter.next() {
                    return v;
                }
            }
            v if !v.starts_with('-') => return v,
            _ => {}
        }
    }
    compose::DEFAULT_VERSION
}

async fn run_registry(settings: &Settings, command: RegistryCommands) -> anyhow::Result<()> {
    match command {
        RegistryCommands::Install {
            hostname,
            version,
            ca_path,
        } => {
            HarborManager::new(settings, &version, &hostname, ca_path)
                .install()
                .await?
        }
        RegistryCommands::Uninstall => {
            HarborManager::new(settings, registry::harbor::DEFAULT_VERSION, "", None)
                .uninstall()
                .await?
        }
        RegistryCommands::Sync {
            src,
            target,
            username,
            password,
            concurrency,
            image_list,
        } => {
            let password = password.or_else(|| std::env::var(registry::sync::PASSWORD_ENV).ok());
            let images = registry::read_image_list(&image_list)?;
            RegistrySyncer::new(&src, &target, concurrency)?
                .with_credentials(username, password)
                .sync_all(&images)
                .await?;
        }
    }
    Ok(())
}

async fn run_images(settings: &Settings, command: ImageCommands) -> anyhow::Result<()> {
    if !CommandRunner::exists("docker") {
        bail!("docker is not installed, run `somcli docker install` first");
    }
    let manager = ImageManager::new(settings);
    match command {
        ImageCommands::Pull {
            scope,
            repo,
            file,
            output,
        } => {
            let list = images::resolve_images(scope, file.as_deref())?;
            let ok = manager.pull(&list, repo.as_deref()).await?;
            output::success(format!("Pulled {}/{} image(s)", ok, list.len()));
            if let Some(path) = output {
                images::save_image_list(&list, &path)?;
                output::info(format!("Image list written to {}", path.display()));
            }
        }
        ImageCommands::Push { scope, repo, input } => {
            let list = images::resolve_images(scope, input.as_deref())?;
            let ok = manager.push(&list, repo.as_deref()).await?;
            output::success(format!("Pushed {}/{} image(s)", ok, list.len()));
        }
        ImageCommands::Export {
            scope,
            repo,
            file,
            output,
        } => {
            let list = images::resolve_images(scope, file.as_deref())?;
            manager.export(&list, repo.as_deref(), &output).await?;
        }
        ImageCommands::Import { input } => {
            manager.import(&input).await?;
        }
    }
    Ok(())
}

/// A non-empty manifest `proxy` takes over from the global GitHub proxy
fn manifest_downloader(settings: &Settings, config: &ResourceConfig) -> Downloader {
    let downloader = Downloader::from_settings(settings);
    if config.proxy.trim().is_empty() {
        downloader
    } else {
        downloader.with_proxy(Some(config.proxy.clone()))
    }
}

async fn run_download(settings: &Settings, args: &DownloadArgs) -> anyhow::Result<()> {
    let config = ResourceConfig::load(&args.file)
        .with_context(|| format!("failed to load config {}", args.file.display()))?;
    settings.ensure_dirs()?;
    let downloader = manifest_downloader(settings, &config).with_quiet(args.quiet);
    let results = ResourceFetcher::new(settings, downloader).fetch_all(&config).await;
    println!("\nDownload results:");
    let failures = print_results(&results);
    if failures > 0 {
        bail!("{} download(s) failed", failures);
    }
    Ok(())
}
