//! Resource manifests, offline downloads and resource installation

pub mod fetch;
pub mod manifest;
pub mod resource;

pub use fetch::{print_results, ResourceFetcher};
pub use manifest::{DownloadResult, Resource, ResourceConfig};
pub use resource::ResourceInstaller;
