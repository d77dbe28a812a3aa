//! Install, remove and query the docker-compose binary

use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{Result, SomError};
use crate::exec::CommandRunner;
use crate::output;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_INSTALL_PATH: &str = "/usr/local/bin/docker-compose";
pub const DEFAULT_VERSION: &str = "v2.24.0";
const RELEASE_BASE: &str = "https://github.com/docker/compose/releases/download";

/// `v`-prefixed release tag
pub fn normalize_version(version: &str) -> String {
    let version = version.trim();
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Release asset suffix for an OS and architecture, e.g. `Linux-x86_64`
pub fn platform_suffix(os: &str, arch: &str) -> Result<String> {
    let os = match os {
        "linux" => "Linux",
        "macos" => "Darwin",
        other => {
            return Err(SomError::Compose(format!("unsupported platform: {}/{}", other, arch)));
        }
    };
    let arch = match arch {
        "x86_64" => "x86_64",
        "aarch64" => "aarch64",
        other => {
            return Err(SomError::Compose(format!("unsupported platform: {}/{}", os, other)));
        }
    };
    Ok(format!("{}-{}", os, arch))
}

pub fn download_url(version: &str, suffix: &str) -> String {
    format!(
        "{}/{}/docker-compose-{}",
        RELEASE_BASE,
        normalize_version(version),
        suffix
    )
}

pub struct ComposeInstaller<'a> {
    settings: &'a Settings,
    downloader: Downloader,
    install_path: PathBuf,
    silent: bool,
}

impl<'a> ComposeInstaller<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            downloader: Downloader::from_settings(settings),
            install_path: PathBuf::from(DEFAULT_INSTALL_PATH),
            silent: false,
        }
    }

    pub fn with_install_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.install_path = path;
        }
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn is_installed(&self) -> bool {
        self.install_path.exists()
    }

    /// Cached download location for a version
    pub fn cache_file(&self, version: &str, suffix: &str) -> PathBuf {
        let version = normalize_version(version);
        self.settings
            .cache_dir("docker-compose", &version)
            .join(format!("docker-compose-{}-{}", version, suffix))
    }

    pub async fn install(&self, version: &str) -> Result<()> {
        output::stage(format!("Installing Docker Compose {}", normalize_version(version)));
        if self.is_installed() {
            if !self.silent {
                output::info(format!(
                    "Docker Compose is already installed at {}",
                    self.install_path.display()
                ));
            }
            return Ok(());
        }

        let suffix = platform_suffix(std::env::consts::OS, std::env::consts::ARCH)?;
        let url = download_url(version, &suffix);
        let cached = self.cache_file(version, &suffix);
        if !self.silent {
            output::info(format!("Downloading from: {}", url));
        }
        self.downloader
            .download(&url, &cached)
            .await
            .map_err(|e| SomError::Compose(format!("download failed: {}", e)))?;

        if let Some(parent) = self.install_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&cached, &self.install_path).map_err(|e| {
            SomError::Compose(format!("failed to install docker-compose: {}", e))
        })?;
        std::fs::set_permissions(&self.install_path, std::fs::Permissions::from_mode(0o755))?;

        if !self.silent {
            output::success(format!(
                "Docker Compose {} installed to {}",
                normalize_version(version),
                self.install_path.display()
            ));
        }
        Ok(())
    }

    pub fn uninstall(&self) -> Result<()> {
        output::stage("Uninstalling Docker Compose");
        if !self.is_installed() {
            if !self.silent {
                output::info("Docker Compose is not installed");
            }
            return Ok(());
        }
        std::fs::remove_file(&self.install_path).map_err(|e| {
            SomError::Compose(format!("failed to uninstall docker-compose: {}", e))
        })?;
        if !self.silent {
            output::success("Docker Compose uninstalled");
        }
        Ok(())
    }

    /// Output of `docker-compose version --short`
    pub async fn version(&self) -> Result<String> {
        if !self.is_installed() {
            return Err(SomError::Compose("docker compose is not installed".to_string()));
        }
        let program = self.install_path.display().to_string();
        let out = CommandRunner::run(&program, &["version", "--short"]).await?;
        if !out.success() {
            return Err(SomError::Compose(format!("failed to get version: {}", out.combined())));
        }
        let version = out.stdout.trim().to_string();
        debug!("docker-compose reports {}", version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_url() {
        let suffix = platform_suffix("linux", "x86_64").unwrap();
        assert_eq!(
            download_url("2.24.0", &suffix),
            "https://github.com/docker/compose/releases/download/v2.24.0/docker-compose-Linux-x86_64"
        );
        assert_eq!(platform_suffix("macos", "aarch64").unwrap(), "Darwin-aarch64");
        assert!(platform_suffix("windows", "x86_64").is_err());
        assert!(platform_suffix("linux", "riscv64").is_err());
    }

    #[tokio::test]
    async fn test_offline_install_from_cache() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().join("work"),
            offline: true,
            ..Default::default()
        };
        let target = dir.path().join("bin/docker-compose");
        let installer = ComposeInstaller::new(&settings)
            .with_install_path(Some(target.clone()))
            .silent(true);

        let suffix = platform_suffix(std::env::consts::OS, std::env::consts::ARCH).unwrap();
        let cached = installer.cache_file(DEFAULT_VERSION, &suffix);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, "#!/bin/sh\necho v2.24.0\n").unwrap();

        installer.install(DEFAULT_VERSION).await.unwrap();
        assert!(installer.is_installed());
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        installer.uninstall().unwrap();
        assert!(!target.exists());
        installer.uninstall().unwrap();
    }

    #[tokio::test]
    async fn test_offline_install_without_cache_fails() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().to_path_buf(),
            offline: true,
            ..Default::default()
        };
        let installer = ComposeInstaller::new(&settings)
            .with_install_path(Some(dir.path().join("docker-compose")))
            .silent(true);
        let err = installer.install("2.24.0").await.unwrap_err();
        assert!(err.to_string().contains("download failed"));
    }
}
