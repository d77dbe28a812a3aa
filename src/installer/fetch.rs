//! Download resources into the work directory cache

use super::manifest::{DownloadResult, Resource, ResourceConfig};
use crate::config::Settings;
use crate::download::{verify_file, Downloader};
use crate::output;
use crate::template::TemplateContext;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Downloads every URL of a resource into `download/<name>/<version>/`
pub struct ResourceFetcher<'a> {
    settings: &'a Settings,
    downloader: Downloader,
}

impl<'a> ResourceFetcher<'a> {
    pub fn new(settings: &'a Settings, downloader: Downloader) -> Self {
        Self {
            settings,
            downloader,
        }
    }

    /// Resolve a relative URL against the configured source base
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.settings.source {
            Some(base) if !url.contains("://") => {
                format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    /// Local path a URL of this resource is stored at
    pub fn local_path(&self, resource: &Resource, url: &str) -> crate::Result<(String, PathBuf)> {
        let ctx = TemplateContext::for_resource(self.settings, &resource.name, &resource.version);
        let url = self.resolve_url(&ctx.render(url)?);
        let target = ctx.with_url(&url).render(resource.target_template())?;
        let path = if Path::new(&target).is_absolute() {
            PathBuf::from(target)
        } else {
            self.settings
                .cache_dir(&resource.name, &resource.version)
                .join(target)
        };
        Ok((url, path))
    }

    /// Download one URL of a resource and verify its checksum
    pub async fn fetch(&self, resource: &Resource, url: &str) -> DownloadResult {
        let mut result = DownloadResult {
            name: resource.name.clone(),
            version: resource.version.clone(),
            url: url.to_string(),
            local_path: PathBuf::new(),
            error: None,
        };

        let (resolved, path) = match self.local_path(resource, url) {
            Ok(v) => v,
            Err(e) => {
                result.error = Some(format!("template failed: {}", e));
                return result;
            }
        };
        result.url = resolved.clone();
        result.local_path = path.clone();

        if !resource.checksum.is_empty() && path.exists() && verify_file(&path, &resource.checksum).is_ok() {
            output::info(format!("{} already cached, skipping download", path.display()));
            return result;
        }

        debug!("fetch {} -> {}", resolved, path.display());
        if let Err(e) = self.downloader.download(&resolved, &path).await {
            result.error = Some(e.to_string());
            return result;
        }

        if let Err(e) = verify_file(&path, &resource.checksum) {
            let _ = std::fs::remove_file(&path);
            result.error = Some(format!("checksum verification failed: {}", e));
        }
        result
    }

    /// Download every URL of every resource in a manifest
    pub async fn fetch_all(&self, config: &ResourceConfig) -> Vec<DownloadResult> {
        let mut results = Vec::new();
        for resource in &config.resources {
            for url in &resource.urls {
                results.push(self.fetch(resource, url).await);
            }
        }
        results
    }
}

/// Print one line per result and the `Summary: X/Y succeeded` footer.
/// Returns the number of failures.
pub fn print_results(results: &[DownloadResult]) -> usize {
    for result in results {
        println!("{}", result.summary_line());
    }
    let ok = results.iter().filter(|r| r.is_ok()).count();
    println!("\nSummary: {}/{} succeeded", ok, results.len());
    results.len() - ok
}
