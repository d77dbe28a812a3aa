//! Pull, push, export and import image lists with the docker CLI

use super::list::Image;
use crate::archive;
use crate::config::Settings;
use crate::error::{Result, SomError};
use crate::output;
use crate::registry::sync::{DockerCli, ImageMover};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Per-image failures are warnings. Each operation returns how many images succeeded.
pub struct ImageManager<'a> {
    settings: &'a Settings,
    mover: Arc<dyn ImageMover>,
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl<'a> ImageManager<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            mover: Arc::new(DockerCli),
        }
    }

    pub fn with_mover(mut self, mover: Arc<dyn ImageMover>) -> Self {
        self.mover = mover;
        self
    }

    /// Pull each image, then tag it into `repo` when one is given
    pub async fn pull(&self, images: &[Image], repo: Option<&str>) -> Result<usize> {
        let mut ok = 0;
        for image in images {
            let local = image.reference(None);
            output::info(format!("Pulling image: {}", local));
            if let Err(e) = self.mover.docker(args(&["pull", &local])).await {
                output::warning(format!("Failed to pull image {}: {}", local, e));
                continue;
            }
            if let Some(target) = repo.map(|r| image.reference(Some(r))).filter(|t| *t != local) {
                if let Err(e) = self.mover.docker(args(&["tag", &local, &target])).await {
                    output::warning(format!("Failed to tag image {} as {}: {}", local, target, e));
                    continue;
                }
            }
            ok += 1;
        }
        Ok(ok)
    }

    /// Tag each image into `repo` and push it
    pub async fn push(&self, images: &[Image], repo: Option<&str>) -> Result<usize> {
        let mut ok = 0;
        for image in images {
            let local = image.reference(None);
            let remote = image.reference(repo);
            if remote != local {
                output::info(format!("Tagging image {} as {}", local, remote));
                if let Err(e) = self.mover.docker(args(&["tag", &local, &remote])).await {
                    output::warning(format!("Failed to tag image {} as {}: {}", local, remote, e));
                    continue;
                }
            }
            output::info(format!("Pushing image: {}", remote));
            if let Err(e) = self.mover.docker(args(&["push", &remote])).await {
                output::warning(format!("Failed to push image {}: {}", remote, e));
                continue;
            }
            ok += 1;
        }
        Ok(ok)
    }

    fn scratch_dir(&self, kind: &str) -> PathBuf {
        self.settings
            .work_tmp_dir()
            .join(format!("{}-{}", kind, uuid::Uuid::new_v4()))
    }

    /// `docker save` each image and pack the tarballs into one gzip archive
    pub async fn export(&self, images: &[Image], repo: Option<&str>, out: &Path) -> Result<usize> {
        let scratch = self.scratch_dir("export");
        std::fs::create_dir_all(&scratch)?;
        let result = self.export_into(images, repo, out, &scratch).await;
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }

    async fn export_into(
        &self,
        images: &[Image],
        repo: Option<&str>,
        out: &Path,
        scratch: &Path,
    ) -> Result<usize> {
        let mut saved = Vec::new();
        for image in images {
            let name = image.reference(repo);
            let file = scratch.join(image.archive_name());
            let file_arg = file.display().to_string();
            output::info(format!("Saving image: {} to {}", name, file_arg));
            match self.mover.docker(args(&["save", "-o", &file_arg, &name])).await {
                Ok(()) => saved.push(file),
                Err(e) => output::warning(format!("Failed to save image {}: {}", name, e)),
            }
        }
        if saved.is_empty() {
            return Err(SomError::Image("no images were saved".to_string()));
        }

        let count = saved.len();
        let out = out.to_path_buf();
        let dest = out.clone();
        tokio::task::spawn_blocking(move || archive::pack_files(&saved, &dest))
            .await
            .map_err(|e| SomError::Internal(e.to_string()))??;
        info!("exported {} image(s) to {}", count, out.display());
        output::success(format!("Images exported to: {}", out.display()));
        Ok(count)
    }

    /// Unpack an export archive and `docker load` every tarball in it
    pub async fn import(&self, input: &Path) -> Result<usize> {
        if !input.is_file() {
            return Err(SomError::Image(format!("input file not found: {}", input.display())));
        }
        let scratch = self.scratch_dir("import");
        let result = self.import_from(input, &scratch).await;
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }

    async fn import_from(&self, input: &Path, scratch: &Path) -> Result<usize> {
        let (archive_path, dest) = (input.to_path_buf(), scratch.to_path_buf());
        let files = tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &dest))
            .await
            .map_err(|e| SomError::Internal(e.to_string()))?
            .map_err(|e| SomError::Image(format!("failed to read archive {}: {}", input.display(), e)))?;

        let mut ok = 0;
        for file in files.iter().filter(|f| f.extension().is_some_and(|e| e == "tar")) {
            let path = file.display().to_string();
            output::info(format!("Loading image from: {}", path));
            match self.mover.docker(args(&["load", "-i", &path])).await {
                Ok(()) => ok += 1,
                Err(e) => output::warning(format!("Failed to load image from {}: {}", path, e)),
            }
        }
        output::success(format!("Images imported from: {}", input.display()));
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records calls, writes a file for `save`, fails on a chosen image
    #[derive(Default)]
    struct FakeDocker {
        calls: Mutex<Vec<Vec<String>>>,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl ImageMover for FakeDocker {
        async fn docker(&self, args: Vec<String>) -> Result<()> {
            self.calls.lock().unwrap().push(args.clone());
            if let Some(bad) = self.fail {
                if args.iter().any(|a| a.contains(bad)) {
                    return Err(SomError::command(args.join(" "), 1, "", "no such image"));
                }
            }
            if args[0] == "save" {
                std::fs::write(&args[2], format!("image {}", args[3])).unwrap();
            }
            Ok(())
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            workdir: dir.path().join("work"),
            ..Default::default()
        }
    }

    fn images() -> Vec<Image> {
        vec![Image::new("library/nginx", "latest"), Image::new("k8s.gcr.io/pause", "3.7")]
    }

    #[tokio::test]
    async fn test_pull_tags_into_repo() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let fake = Arc::new(FakeDocker {
            fail: Some("pause"),
            ..Default::default()
        });
        let manager = ImageManager::new(&settings).with_mover(fake.clone());
        let ok = manager.pull(&images(), Some("harbor.local")).await.unwrap();
        assert_eq!(ok, 1);
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["pull", "library/nginx:latest"]);
        assert_eq!(calls[1], vec!["tag", "library/nginx:latest", "harbor.local/library/nginx:latest"]);
        assert_eq!(calls[2], vec!["pull", "k8s.gcr.io/pause:3.7"]);
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_push_without_repo_skips_tag() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let fake = Arc::new(FakeDocker::default());
        let manager = ImageManager::new(&settings).with_mover(fake.clone());
        assert_eq!(manager.push(&images(), None).await.unwrap(), 2);
        let calls = fake.calls.lock().unwrap();
        assert!(calls.iter().all(|c| c[0] == "push"));
    }

    #[tokio::test]
    async fn test_export_then_import() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let fake = Arc::new(FakeDocker::default());
        let manager = ImageManager::new(&settings).with_mover(fake.clone());

        let out = dir.path().join("images.tar.gz");
        assert_eq!(manager.export(&images(), None, &out).await.unwrap(), 2);
        assert!(out.is_file());

        assert_eq!(manager.import(&out).await.unwrap(), 2);
        let calls = fake.calls.lock().unwrap();
        let loads: Vec<_> = calls.iter().filter(|c| c[0] == "load").collect();
        assert!(loads[0][2].ends_with("k8s.gcr.io_pause_3.7.tar"));
        assert!(loads[1][2].ends_with("library_nginx_latest.tar"));

        let leftovers = std::fs::read_dir(settings.work_tmp_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_export_nothing_saved() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let fake = Arc::new(FakeDocker {
            fail: Some(":"),
            ..Default::default()
        });
        let manager = ImageManager::new(&settings).with_mover(fake);
        let err = manager
            .export(&images(), None, &dir.path().join("x.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, SomError::Image(_)));
    }
}
