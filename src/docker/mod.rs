//! Docker engine management
//!
//! Install, uninstall and status are delegated to the `docker-manager.sh`
//! helper script, run locally or copied to each target node.

pub mod installer;
pub mod targets;

pub use installer::{DockerInstaller, LATEST, SCRIPT_NAME, SCRIPT_URL};
pub use targets::{load_nodes_file, target_nodes};
