//! Resource manifest files

use crate::error::{Result, SomError};
use crate::exec::RemoteNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A resource manifest: what to download and where to install it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// GitHub proxy used for this manifest's downloads
    #[serde(default)]
    pub proxy: String,
    /// Resources, also accepted under the `download` key
    #[serde(default, alias = "download")]
    pub resources: Vec<Resource>,
    /// Hosts referenced by `Resource::hosts`
    #[serde(default)]
    pub nodes: Vec<RemoteNode>,
}

impl ResourceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SomError::Config(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SomError::Config(format!("failed to parse manifest: {}", e)))
    }

    pub fn find(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// A named, versioned artifact with install scripts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// file, tar, rpm, deb, exe, sh
    #[serde(default)]
    pub res_type: String,
    #[serde(default)]
    pub urls: Vec<String>,
    /// File name inside the cache directory, templated. Defaults to the URL file name.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub image: String,
    /// Hostnames or IPs to install on. Empty means the local machine.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub pre_install: Vec<String>,
    #[serde(default)]
    pub post_install: Vec<String>,
    #[serde(default)]
    pub remove_scripts: Vec<String>,
    #[serde(default)]
    pub method: String,
    /// Files written verbatim to every target host, keyed by absolute path
    #[serde(default, rename = "ExtraFiles", alias = "extra_files")]
    pub extra_files: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Resource {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    /// Target template, falling back to the URL file name
    pub fn target_template(&self) -> &str {
        if self.target.trim().is_empty() {
            "{{.Filename}}"
        } else {
            &self.target
        }
    }
}

/// Outcome of downloading one URL of a resource
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub name: String,
    pub version: String,
    pub url: String,
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// `✓ name-version: path` or `✗ name-version: error`
    pub fn summary_line(&self) -> String {
        match &self.error {
            None => format!("✓ {}-{}: {}", self.name, self.version, self.local_path.display()),
            Some(e) => format!("✗ {}-{}: {}", self.name, self.version, e),
        }
    }
}
