//! somcli - container platform operations from one binary
//!
//! somcli installs Docker and docker-compose, brings up Kubernetes and
//! Docker Swarm clusters over SSH, runs a Harbor registry and moves
//! images between registries and offline archives. It provides:
//!
//! - Resource manifests with cached, checksummed downloads
//! - Remote execution over SSH with file upload
//! - Cluster bring-up and teardown driven by a topology file
//! - Registry sync with bounded parallelism

pub mod archive;
pub mod cluster;
pub mod compose;
pub mod config;
pub mod docker;
pub mod download;
pub mod error;
pub mod exec;
pub mod images;
pub mod installer;
pub mod output;
pub mod registry;
pub mod resources;
pub mod template;
pub mod version;

pub use error::{Result, SomError};
