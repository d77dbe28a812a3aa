//! Copy images from one registry to another with bounded parallelism

use crate::error::{Result, SomError};
use crate::exec::CommandRunner;
use crate::output;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const MAX_CONCURRENCY: usize = 10;
pub const PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Runs `docker` subcommands for the syncer
#[async_trait]
pub trait ImageMover: Send + Sync + 'static {
    async fn docker(&self, args: Vec<String>) -> Result<()>;
}

/// The local `docker` CLI
pub struct DockerCli;

#[async_trait]
impl ImageMover for DockerCli {
    async fn docker(&self, args: Vec<String>) -> Result<()> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        CommandRunner::run_checked("docker", &refs).await.map(|_| ())
    }
}

/// Read an image list: one image per line, `#` starts a comment
pub fn read_image_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(SomError::Registry(format!(
            "image list file does not exist: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Pulls from a source registry, retags and pushes to a target
pub struct RegistrySyncer {
    source: String,
    target: String,
    username: Option<String>,
    password: Option<String>,
    concurrency: usize,
    mover: Arc<dyn ImageMover>,
}

impl RegistrySyncer {
    /// `target` must be an http(s) URL and `concurrency` within 1..=10
    pub fn new(source: &str, target: &str, concurrency: usize) -> Result<Self> {
        if !target.starts_with("http://") && !target.starts_with("https://") {
            return Err(SomError::InvalidArgument(
                "target registry must start with http:// or https://".to_string(),
            ));
        }
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SomError::InvalidArgument(format!(
                "concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            username: None,
            password: None,
            concurrency,
            mover: Arc::new(DockerCli),
        })
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_mover(mut self, mover: Arc<dyn ImageMover>) -> Self {
        self.mover = mover;
        self
    }

    /// Target host without the URL scheme
    pub fn target_host(&self) -> &str {
        self.target
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }

    /// Name an image gets in the target registry
    pub fn target_image(&self, image: &str) -> String {
        let host = self.target_host();
        if !self.source.is_empty() && image.contains(&self.source) {
            image.replacen(&self.source, host, 1)
        } else if !image.contains('/') {
            format!("{}/library/{}", host, image)
        } else {
            format!("{}/{}", host, image)
        }
    }

    async fn login(&self) -> Result<()> {
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            output::info(format!("Logging in to {}", self.target));
            self.mover
                .docker(vec![
                    "login".to_string(),
                    "-u".to_string(),
                    user.clone(),
                    "-p".to_string(),
                    pass.clone(),
                    self.target.clone(),
                ])
                .await
                .map_err(|e| SomError::Registry(format!("target login failed: {}", e)))?;
        }
        Ok(())
    }

    /// Pull, tag and push one image. Cleanup failures are ignored.
    pub async fn sync_image(&self, image: &str) -> Result<()> {
        sync_one(self.mover.clone(), image.to_string(), self.target_image(image)).await
    }

    /// Sync every image, collecting failures instead of stopping at the first
    pub async fn sync_all(&self, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Err(SomError::Registry("no images found in the image list".to_string()));
        }
        self.login().await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for image in images {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SomError::Internal(e.to_string()))?;
            let mover = self.mover.clone();
            let image = image.clone();
            let target = self.target_image(&image);
            tasks.spawn(async move {
                let result = sync_one(mover, image, target).await;
                drop(permit);
                result
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(e) => errors.push(format!("sync task failed: {}", e)),
            }
        }

        if errors.is_empty() {
            output::success(format!("Synced {} image(s) to {}", images.len(), self.target_host()));
            Ok(())
        } else {
            Err(SomError::Registry(format!(
                "sync completed with {} errors:\n{}",
                errors.len(),
                errors.join("\n")
            )))
        }
    }
}

async fn sync_one(mover: Arc<dyn ImageMover>, image: String, target: String) -> Result<()> {
    output::info(format!("Syncing {} -> {}", image, target));
    let steps: [(&str, Vec<String>); 3] = [
        ("pull", vec!["pull".to_string(), image.clone()]),
        ("tag", vec!["tag".to_string(), image.clone(), target.clone()]),
        ("push", vec!["push".to_string(), target.clone()]),
    ];
    for (step, args) in steps {
        mover
            .docker(args)
            .await
            .map_err(|e| SomError::Registry(format!("failed to {} image {}: {}", step, image, e)))?;
    }
    if let Err(e) = mover
        .docker(vec!["rmi".to_string(), image.clone(), target.clone()])
        .await
    {
        debug!("cleanup of {} failed: {}", image, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingMover {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ImageMover for CountingMover {
        async fn docker(&self, args: Vec<String>) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(args.clone());
            match self.fail_on {
                Some(pat) if args.iter().any(|a| a.contains(pat)) && args[0] == "pull" => {
                    Err(SomError::command("docker pull", 1, "", "manifest unknown"))
                }
                _ => Ok(()),
            }
        }
    }

    fn images(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("docker.io/app/svc{}:1.0", i)).collect()
    }

    #[test]
    fn test_target_naming() {
        let syncer = RegistrySyncer::new("docker.io", "https://harbor.example.com/", 3).unwrap();
        assert_eq!(syncer.target_host(), "harbor.example.com");
        assert_eq!(
            syncer.target_image("docker.io/library/nginx:1.25"),
            "harbor.example.com/library/nginx:1.25"
        );
        assert_eq!(syncer.target_image("redis:7"), "harbor.example.com/library/redis:7");
        assert_eq!(
            syncer.target_image("quay.io/coreos/etcd:v3"),
            "harbor.example.com/quay.io/coreos/etcd:v3"
        );
    }

    #[test]
    fn test_arguments_validated() {
        assert!(RegistrySyncer::new("a", "harbor.example.com", 3).is_err());
        assert!(RegistrySyncer::new("a", "http://h", 0).is_err());
        assert!(RegistrySyncer::new("a", "http://h", 11).is_err());
        assert!(RegistrySyncer::new("a", "http://h", 10).is_ok());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mover = Arc::new(CountingMover::default());
        let syncer = RegistrySyncer::new("docker.io", "https://h", 3)
            .unwrap()
            .with_mover(mover.clone());
        syncer.sync_all(&images(12)).await.unwrap();
        let peak = mover.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {}", peak);
        assert!(peak >= 2);
        assert_eq!(mover.calls.lock().unwrap().len(), 48);
    }

    #[tokio::test]
    async fn test_errors_are_collected() {
        let mover = Arc::new(CountingMover {
            fail_on: Some("svc1"),
            ..Default::default()
        });
        let syncer = RegistrySyncer::new("docker.io", "https://h", 2)
            .unwrap()
            .with_credentials(Some("admin".to_string()), Some("secret".to_string()))
            .with_mover(mover.clone());
        let err = syncer.sync_all(&images(3)).await.unwrap_err();
        assert!(err.to_string().contains("sync completed with 1 errors"));

        let calls = mover.calls.lock().unwrap();
        assert_eq!(calls[0][0], "login");
        let pushes = calls.iter().filter(|c| c[0] == "push").count();
        assert_eq!(pushes, 2);
    }

    #[tokio::test]
    async fn test_no_login_without_credentials() {
        let mover = Arc::new(CountingMover::default());
        let syncer = RegistrySyncer::new("", "http://h", 1)
            .unwrap()
            .with_credentials(Some("admin".to_string()), None)
            .with_mover(mover.clone());
        syncer.sync_image("nginx:latest").await.unwrap();
        let calls = mover.calls.lock().unwrap();
        assert!(calls.iter().all(|c| c[0] != "login"));
        assert_eq!(calls[1], vec!["tag", "nginx:latest", "h/library/nginx:latest"]);
    }

    #[test]
    fn test_read_image_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("images.txt");
        std::fs::write(&path, "# base\nnginx:latest\n\n  redis:7  \n#skip\n").unwrap();
        assert_eq!(read_image_list(&path).unwrap(), vec!["nginx:latest", "redis:7"]);
        assert!(read_image_list(&dir.path().join("missing")).is_err());
    }
}
