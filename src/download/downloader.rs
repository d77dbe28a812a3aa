//! HTTP downloader with a fixed retry budget

use super::checksum::sha256_file;
use crate::config::Settings;
use crate::error::{Result, SomError};
use crate::output;
use reqwest::header::USER_AGENT;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENT: &str = "somcli-downloader/1.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Rewrite a github.com URL to go through a proxy: `proxy/` + host + path.
/// Other hosts are returned unchanged.
pub fn apply_github_proxy(url: &str, proxy: &str) -> Result<String> {
    if proxy.is_empty() {
        return Ok(url.to_string());
    }
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| SomError::Download(format!("invalid URL {}: {}", url, e)))?;
    let host = parsed.host_str().unwrap_or_default();
    if !host.contains("github.com") {
        return Ok(url.to_string());
    }
    let mut prefix = proxy.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    Ok(format!("{}{}{}", prefix, host, parsed.path()))
}

/// Downloads files with retry, timeout and optional GitHub proxy
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    proxy: Option<String>,
    user_agent: String,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    quiet: bool,
    offline: bool,
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            quiet: false,
            offline: false,
        }
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downloader configured from global settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with_proxy(settings.github_proxy.clone())
            .with_offline(settings.offline)
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// URL actually fetched for `url`
    pub fn effective_url(&self, url: &str) -> Result<String> {
        match &self.proxy {
            Some(proxy) => apply_github_proxy(url, proxy),
            None => Ok(url.to_string()),
        }
    }

    /// Download `url` to `dest`, creating parent directories.
    ///
    /// In offline mode nothing is fetched and `dest` must already exist.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.offline {
            if dest.exists() {
                debug!("offline: using cached {}", dest.display());
                return Ok(dest.to_path_buf());
            }
            return Err(SomError::Download(format!(
                "offline mode and file not present: {} (download the offline package first)",
                dest.display()
            )));
        }

        let url = self.effective_url(url)?;
        if self.proxy.is_some() && url.contains("github.com") {
            debug!("using GitHub proxy: {}", url);
        }

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                output::info(format!(
                    "Retrying download (attempt {}/{}) in {}s...",
                    attempt,
                    self.max_attempts,
                    self.retry_delay.as_secs()
                ));
                tokio::time::sleep(self.retry_delay).await;
            }

            match tokio::time::timeout(self.timeout, self.fetch(&url, dest)).await {
                Ok(Ok(())) => {
                    let digest = sha256_file(dest)?;
                    info!("downloaded {} -> {}", url, dest.display());
                    if !self.quiet {
                        output::info(format!("Downloaded {} (sha256:{})", dest.display(), digest));
                    }
                    return Ok(dest.to_path_buf());
                }
                Ok(Err(e)) => {
                    warn!("download failed: {} (attempt {}/{})", e, attempt, self.max_attempts);
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!("download timed out (attempt {}/{})", attempt, self.max_attempts);
                    last_error = Some(format!("timed out after {}s", self.timeout.as_secs()));
                }
            }
        }

        Err(SomError::Download(format!(
            "{}: exceeded max attempts {}: {}",
            url,
            self.max_attempts,
            last_error.unwrap_or_default()
        )))
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if !self.quiet {
            output::info(format!("Downloading {}", url));
        }
        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?;

        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, dest).await?;
        Ok(())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
