//! docker-compose management
//!
//! Installs the standalone binary from the GitHub releases and forwards
//! everything else to it.

pub mod installer;
pub mod passthrough;

pub use installer::{ComposeInstaller, DEFAULT_INSTALL_PATH, DEFAULT_VERSION};
pub use passthrough::{filter_args, passthrough, process_args, ComposeFlags};
