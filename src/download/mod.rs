//! Resource downloads
//!
//! Provides the retrying HTTP [`Downloader`] and checksum helpers used by
//! the installer, Harbor setup and the compose binary install.

pub mod checksum;
pub mod downloader;

pub use checksum::{verify_file, Checksum};
pub use downloader::{apply_github_proxy, Downloader};
