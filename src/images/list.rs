//! Image lists: scopes, list files and built-in defaults

use crate::error::{Result, SomError};
use crate::output;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const HARBOR_IMAGES_FILE: &str = "harbor-images.yaml";
pub const K8S_IMAGES_FILE: &str = "k8s-images.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    #[serde(default = "latest")]
    pub tag: String,
}

fn latest() -> String {
    "latest".to_string()
}

impl Image {
    pub fn new(name: &str, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Parse `name[:tag]`. A colon before the last `/` belongs to a registry port.
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[slash..].rfind(':') {
            Some(i) => {
                let (name, tag) = reference.split_at(slash + i);
                let tag = &tag[1..];
                if name.is_empty() || tag.is_empty() {
                    None
                } else {
                    Some(Self::new(name, tag))
                }
            }
            None => Some(Self::new(reference, "latest")),
        }
    }

    /// `name:tag`, prefixed with `repo/` when a repo is given
    pub fn reference(&self, repo: Option<&str>) -> String {
        match repo.map(|r| r.trim_end_matches('/')).filter(|r| !r.is_empty()) {
            Some(repo) => format!("{}/{}:{}", repo, self.name, self.tag),
            None => format!("{}:{}", self.name, self.tag),
        }
    }

    /// File name used inside export archives
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.reference(None).replace(['/', ':'], "_"))
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Which built-in list to use when no file is given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Harbor,
    K8s,
    All,
}

impl FromStr for Scope {
    type Err = SomError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "harbor" => Ok(Scope::Harbor),
            "k8s" => Ok(Scope::K8s),
            "all" => Ok(Scope::All),
            other => Err(SomError::InvalidArgument(format!(
                "invalid scope: {}, must be one of: harbor, k8s, all",
                other
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListDocument {
    Wrapped { images: Vec<Image> },
    Bare(Vec<Image>),
}

/// Parse a list file: YAML (`images: [...]` or a bare sequence), falling
/// back to one `name:tag` per line
pub fn parse_image_list(content: &str) -> Vec<Image> {
    match serde_yaml::from_str::<ListDocument>(content) {
        Ok(ListDocument::Wrapped { images }) | Ok(ListDocument::Bare(images)) => images,
        Err(_) => content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|line| {
                let image = Image::parse(line);
                if image.is_none() {
                    output::warning(format!("Invalid image format: {}", line));
                }
                image
            })
            .collect(),
    }
}

pub fn load_image_list(path: &Path) -> Result<Vec<Image>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SomError::Image(format!("failed to read image list file {}: {}", path.display(), e))
    })?;
    Ok(parse_image_list(&content))
}

/// Write a list as `images: [...]` YAML
pub fn save_image_list(images: &[Image], path: &Path) -> Result<()> {
    #[derive(Serialize)]
    struct Doc<'a> {
        images: &'a [Image],
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_yaml::to_string(&Doc { images })?)?;
    Ok(())
}

/// Directories searched for default list files: `.`, `~/.config/somcli`, the executable's dir
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(config) = dirs::config_dir() {
        dirs.push(config.join("somcli"));
    }
    dirs.push(crate::config::home_dir().join(".config").join("somcli"));
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    dirs.dedup();
    dirs
}

fn find_in(dirs: &[PathBuf], file: &str) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(file)).find(|p| p.is_file())
}

fn scope_list(dirs: &[PathBuf], file: &str, fallback: &[(&str, &str)]) -> Vec<Image> {
    if let Some(path) = find_in(dirs, file) {
        match load_image_list(&path) {
            Ok(images) if !images.is_empty() => return images,
            Ok(_) => {}
            Err(e) => output::warning(format!("{}", e)),
        }
    }
    fallback.iter().map(|(n, t)| Image::new(n, t)).collect()
}

/// Images for a scope, or the contents of `file` when given
pub fn resolve_images(scope: Scope, file: Option<&Path>) -> Result<Vec<Image>> {
    resolve_images_in(scope, file, &search_dirs())
}

pub fn resolve_images_in(scope: Scope, file: Option<&Path>, dirs: &[PathBuf]) -> Result<Vec<Image>> {
    if let Some(file) = file {
        return load_image_list(file);
    }
    let harbor = || scope_list(dirs, HARBOR_IMAGES_FILE, &[("library/nginx", "latest")]);
    let k8s = || scope_list(dirs, K8S_IMAGES_FILE, &[("k8s.gcr.io/pause", "3.7")]);
    Ok(match scope {
        Scope::Harbor => harbor(),
        Scope::K8s => k8s(),
        Scope::All => {
            let mut all = harbor();
            all.extend(k8s());
            all
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_reference() {
        assert_eq!(Image::parse("nginx").unwrap(), Image::new("nginx", "latest"));
        assert_eq!(Image::parse("redis:7").unwrap(), Image::new("redis", "7"));
        assert_eq!(
            Image::parse("reg.local:5000/app/api:1.2").unwrap(),
            Image::new("reg.local:5000/app/api", "1.2")
        );
        assert_eq!(
            Image::parse("reg.local:5000/app/api").unwrap(),
            Image::new("reg.local:5000/app/api", "latest")
        );
        assert!(Image::parse("nginx:").is_none());
    }

    #[test]
    fn test_reference_and_archive_name() {
        let img = Image::new("k8s.gcr.io/pause", "3.7");
        assert_eq!(img.reference(Some("harbor.local/")), "harbor.local/k8s.gcr.io/pause:3.7");
        assert_eq!(img.reference(None), "k8s.gcr.io/pause:3.7");
        assert_eq!(img.archive_name(), "k8s.gcr.io_pause_3.7.tar");
    }

    #[test]
    fn test_parse_list_formats() {
        let wrapped = "images:\n  - name: library/nginx\n    tag: \"1.25\"\n  - name: redis\n";
        assert_eq!(
            parse_image_list(wrapped),
            vec![Image::new("library/nginx", "1.25"), Image::new("redis", "latest")]
        );
        let bare = "- name: busybox\n  tag: \"1.36\"\n";
        assert_eq!(parse_image_list(bare), vec![Image::new("busybox", "1.36")]);
        let plain = "# images\nnginx:1.25\n\nredis:7\n";
        assert_eq!(
            parse_image_list(plain),
            vec![Image::new("nginx", "1.25"), Image::new("redis", "7")]
        );
    }

    #[test]
    fn test_scopes_and_defaults() {
        let dir = TempDir::new().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        let all = resolve_images_in(Scope::All, None, &dirs).unwrap();
        assert_eq!(
            all,
            vec![Image::new("library/nginx", "latest"), Image::new("k8s.gcr.io/pause", "3.7")]
        );

        std::fs::write(dir.path().join(K8S_IMAGES_FILE), "images:\n  - {name: coredns, tag: v1.9.3}\n").unwrap();
        let k8s = resolve_images_in(Scope::K8s, None, &dirs).unwrap();
        assert_eq!(k8s, vec![Image::new("coredns", "v1.9.3")]);
        assert!("docker".parse::<Scope>().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/list.yaml");
        let images = vec![Image::new("nginx", "1.25")];
        save_image_list(&images, &path).unwrap();
        assert_eq!(load_image_list(&path).unwrap(), images);
    }
}
