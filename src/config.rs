//! Global settings
//!
//! Settings are merged from command-line flags, environment variables and
//! the optional `~/.somcli.yaml` file, in that order of precedence.

use crate::error::{Result, SomError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name in the home directory
pub const DEFAULT_CONFIG_FILE: &str = ".somcli.yaml";

/// Default work directory name
pub const DEFAULT_WORKDIR: &str = "somwork";

pub const ENV_OFFLINE: &str = "SOMCLI_OFFLINE";
pub const ENV_GITHUB_PROXY: &str = "SOMCLI_GITHUB_PROXY";
pub const ENV_WORKDIR: &str = "SOMCLI_WORKDIR";

/// Subdirectories created under the work directory
pub const WORK_SUBDIRS: &[&str] = &["download", "data", "apps", "logs", "scripts", "images", "tmp"];

/// Contents of the YAML config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub github_proxy: Option<String>,
    #[serde(default)]
    pub offline: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
}

impl FileConfig {
    /// Read a config file. A missing file yields the empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| SomError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub github_proxy: Option<String>,
    pub offline: bool,
    pub source: Option<String>,
    pub debug: bool,
}

/// Resolved settings shared by every command
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the work directory layout
    pub workdir: PathBuf,
    /// Prefix applied to github.com download URLs
    pub github_proxy: Option<String>,
    /// Only use files already present in the download cache
    pub offline: bool,
    /// Base URL used to resolve relative resource URLs
    pub source: Option<String>,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            github_proxy: None,
            offline: false,
            source: None,
            debug: false,
        }
    }
}

impl Settings {
    /// Resolve settings from flags, the process environment and the config file
    pub fn load(overrides: Overrides) -> Result<Self> {
        let path = match overrides.config.clone() {
            Some(p) => p,
            None => default_config_path(),
        };
        let file = FileConfig::load(&path)?;
        Self::resolve(overrides, |key| std::env::var(key).ok(), file)
    }

    /// Merge the three sources using the supplied environment lookup
    pub fn resolve<F>(overrides: Overrides, env: F, file: FileConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workdir = overrides
            .workdir
            .or_else(|| env(ENV_WORKDIR).map(PathBuf::from))
            .or(file.workdir)
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_WORKDIR)
            });

        let github_proxy = overrides
            .github_proxy
            .or_else(|| env(ENV_GITHUB_PROXY))
            .or(file.github_proxy)
            .filter(|p| !p.trim().is_empty());
        if let Some(proxy) = &github_proxy {
            validate_proxy(proxy)?;
        }

        let env_offline = env(ENV_OFFLINE)
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(false);
        let offline = overrides.offline || env_offline || file.offline.unwrap_or(false);

        Ok(Self {
            workdir,
            github_proxy,
            offline,
            source: overrides.source.or(file.source),
            debug: overrides.debug || file.debug.unwrap_or(false),
        })
    }

    /// Create the work directory layout
    pub fn ensure_dirs(&self) -> Result<()> {
        for sub in WORK_SUBDIRS {
            std::fs::create_dir_all(self.workdir.join(sub))?;
        }
        Ok(())
    }

    pub fn download_dir(&self) -> PathBuf {
        self.workdir.join("download")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.workdir.join("data")
    }

    pub fn app_dir(&self) -> PathBuf {
        self.workdir.join("apps")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workdir.join("logs")
    }

    pub fn script_dir(&self) -> PathBuf {
        self.workdir.join("scripts")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.workdir.join("images")
    }

    /// Scratch space inside the work directory
    pub fn work_tmp_dir(&self) -> PathBuf {
        self.workdir.join("tmp")
    }

    /// System temporary directory exposed to templates
    pub fn tmp_dir(&self) -> PathBuf {
        PathBuf::from("/tmp")
    }

    /// Cache directory of one resource version
    pub fn cache_dir(&self, name: &str, version: &str) -> PathBuf {
        self.download_dir().join(name).join(version)
    }
}

/// `~/.somcli.yaml`
pub fn default_config_path() -> PathBuf {
    home_dir().join(DEFAULT_CONFIG_FILE)
}

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// A GitHub proxy must be an http(s) URL
pub fn validate_proxy(proxy: &str) -> Result<()> {
    if proxy.starts_with("http://") || proxy.starts_with("https://") {
        Ok(())
    } else {
        Err(SomError::Config(format!(
            "GitHub proxy must start with http:// or https://: {}",
            proxy
        )))
    }
}
