//! Harbor registry install and uninstall from the offline installer

use super::certs::CertGenerator;
use crate::archive;
use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{Result, SomError};
use crate::exec::{shell_quote, CommandRunner};
use crate::output;
use std::path::{Path, PathBuf};

pub const DEFAULT_VERSION: &str = "v2.5.0";
const APP_DIR: &str = "registry";
const HARBOR_DIR: &str = "harbor";
const CERT_DIR: &str = "certs";

/// Offline installer URL for a Harbor release
pub fn installer_url(version: &str) -> String {
    format!(
        "https://github.com/goharbor/harbor/releases/download/{v}/harbor-offline-installer-{v}.tgz",
        v = version
    )
}

/// Fill `harbor.yml.tmpl` with the host, data and log dirs and the TLS files
pub fn render_config(
    template: &str,
    hostname: &str,
    data_dir: &Path,
    log_dir: &Path,
    certificate: &Path,
    private_key: &Path,
) -> String {
    template
        .replace("hostname: reg.mydomain.com", &format!("hostname: {}", hostname))
        .replace("data_volume: /data", &format!("data_volume: {}", data_dir.display()))
        .replace("location: /var/log/harbor", &format!("location: {}", log_dir.display()))
        .replace(
            "  certificate: /your/certificate/path",
            &format!("  certificate: {}", certificate.display()),
        )
        .replace(
            "  private_key: /your/private/key/path",
            &format!("  private_key: {}", private_key.display()),
        )
}

pub struct HarborManager<'a> {
    settings: &'a Settings,
    downloader: Downloader,
    version: String,
    hostname: String,
    ca_path: Option<PathBuf>,
}

impl<'a> HarborManager<'a> {
    pub fn new(settings: &'a Settings, version: &str, hostname: &str, ca_path: Option<PathBuf>) -> Self {
        let version = if version.is_empty() { DEFAULT_VERSION } else { version };
        Self {
            settings,
            downloader: Downloader::from_settings(settings),
            version: version.to_string(),
            hostname: hostname.to_string(),
            ca_path,
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// `apps/registry`
    pub fn install_dir(&self) -> PathBuf {
        self.settings.app_dir().join(APP_DIR)
    }

    /// Directory the installer unpacks to
    pub fn harbor_dir(&self) -> PathBuf {
        self.install_dir().join(HARBOR_DIR)
    }

    fn validate_environment() -> Result<()> {
        for tool in ["docker", "docker-compose"] {
            if !CommandRunner::exists(tool) {
                return Err(SomError::Registry(format!("{} is not installed", tool)));
            }
        }
        Ok(())
    }

    pub async fn install(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(SomError::InvalidArgument("harbor hostname is required".to_string()));
        }
        Self::validate_environment()?;
        std::fs::create_dir_all(self.install_dir())?;

        self.download_and_extract().await?;
        self.configure().await?;

        output::info("Running Harbor install.sh...");
        let script = format!("cd {} && ./install.sh", shell_quote(&self.harbor_dir().display().to_string()));
        let code = CommandRunner::run_interactive("sh", &["-c", &script]).await?;
        if code != 0 {
            return Err(SomError::Registry(format!("failed to install Harbor: install.sh exited with {}", code)));
        }
        output::success(format!("Harbor {} installed at https://{}", self.version, self.hostname));
        Ok(())
    }

    async fn download_and_extract(&self) -> Result<()> {
        let file = format!("harbor-offline-installer-{}.tgz", self.version);
        let dest = self
            .settings
            .download_dir()
            .join("harbor")
            .join(&self.version)
            .join(file);
        output::info("Downloading Harbor...");
        self.downloader
            .download(&installer_url(&self.version), &dest)
            .await
            .map_err(|e| SomError::Registry(format!("failed to download Harbor: {}", e)))?;

        let install_dir = self.install_dir();
        tokio::task::spawn_blocking(move || archive::unpack(&dest, &install_dir))
            .await
            .map_err(|e| SomError::Internal(e.to_string()))?
            .map_err(|e| SomError::Registry(format!("failed to extract Harbor package: {}", e)))?;
        Ok(())
    }

    async fn configure(&self) -> Result<()> {
        let dir = self.harbor_dir();
        let template = std::fs::read_to_string(dir.join("harbor.yml.tmpl"))
            .map_err(|e| SomError::Registry(format!("failed to read Harbor config template: {}", e)))?;

        let data_dir = dir.join("data");
        let log_dir = dir.join("logs");
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&log_dir)?;

        let ca_dir = match &self.ca_path {
            Some(path) => path.clone(),
            None => {
                let generator = CertGenerator::new(&self.hostname, &dir.join(CERT_DIR));
                generator.generate().await?;
                output::info(format!("Certificates generated in {}", generator.output_dir().display()));
                generator.output_dir().to_path_buf()
            }
        };

        let config = render_config(
            &template,
            &self.hostname,
            &data_dir,
            &log_dir,
            &ca_dir.join(format!("{}.crt", self.hostname)),
            &ca_dir.join(format!("{}.key", self.hostname)),
        );
        std::fs::write(dir.join("harbor.yml"), config)?;
        Ok(())
    }

    /// Stop Harbor and delete its install directory
    pub async fn uninstall(&self) -> Result<()> {
        let compose = self.harbor_dir().join("docker-compose.yml");
        if compose.exists() {
            let path = compose.display().to_string();
            CommandRunner::run_checked("docker-compose", &["-f", &path, "down", "-v"])
                .await
                .map_err(|e| SomError::Registry(format!("failed to stop Harbor: {}", e)))?;
        } else {
            output::warning(format!("{} not found, skipping shutdown", compose.display()));
        }

        let dir = self.install_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| SomError::Registry(format!("failed to remove Harbor directory: {}", e)))?;
        }
        output::success("Harbor uninstalled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "hostname: reg.mydomain.com\nhttps:\n  port: 443\n  certificate: /your/certificate/path\n  private_key: /your/private/key/path\ndata_volume: /data\nlog:\n  local:\n    location: /var/log/harbor\n";

    #[test]
    fn test_render_config() {
        let out = render_config(
            TEMPLATE,
            "harbor.local",
            Path::new("/w/harbor/data"),
            Path::new("/w/harbor/logs"),
            Path::new("/ca/harbor.local.crt"),
            Path::new("/ca/harbor.local.key"),
        );
        assert!(out.starts_with("hostname: harbor.local\n"));
        assert!(out.contains("  certificate: /ca/harbor.local.crt\n"));
        assert!(out.contains("  private_key: /ca/harbor.local.key\n"));
        assert!(out.contains("data_volume: /w/harbor/data\n"));
        assert!(out.contains("location: /w/harbor/logs\n"));
    }

    #[test]
    fn test_paths_and_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let manager = HarborManager::new(&settings, "", "harbor.local", None);
        assert_eq!(manager.version, DEFAULT_VERSION);
        assert_eq!(manager.harbor_dir(), dir.path().join("apps/registry/harbor"));
        assert_eq!(
            installer_url("v2.5.0"),
            "https://github.com/goharbor/harbor/releases/download/v2.5.0/harbor-offline-installer-v2.5.0.tgz"
        );
    }

    #[tokio::test]
    async fn test_uninstall_without_install_dir() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            workdir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let stale = dir.path().join("apps/registry/harbor/data");
        std::fs::create_dir_all(&stale).unwrap();
        HarborManager::new(&settings, "", "h", None).uninstall().await.unwrap();
        assert!(!dir.path().join("apps/registry").exists());
    }
}
