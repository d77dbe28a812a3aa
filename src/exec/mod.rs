//! Command execution
//!
//! Everything somcli does ends up as a shell command. This module provides:
//!
//! - Local process execution with timeouts
//! - SSH sessions to remote nodes
//! - The [`Executor`] seam used by cluster, install and registry flows

pub mod command;
pub mod node;
pub mod ssh;

pub use command::{shell_quote, CommandOutput, CommandRunner};
pub use node::{Executor, NodeExecutor, RemoteNode};
pub use ssh::SshSession;
