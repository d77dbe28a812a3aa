//! `{{.Var}}` placeholder rendering for resource URLs, targets and scripts

use crate::config::{home_dir, Settings};
use crate::error::{Result, SomError};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\.([A-Za-z][A-Za-z0-9]*)\s*\}\}").expect("placeholder pattern")
    })
}

/// Operating system name as used in download URLs
pub fn platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture as used in download URLs
pub fn arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Variables available to a template
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    /// Variables describing one resource within the work directory
    pub fn for_resource(settings: &Settings, name: &str, version: &str) -> Self {
        let path = |p: &Path| p.display().to_string();
        let mut vars = BTreeMap::new();
        vars.insert("Name", name.to_string());
        vars.insert("Version", version.to_string());
        vars.insert("Platform", platform().to_string());
        vars.insert("Arch", arch().to_string());
        vars.insert("DownloadDir", path(&settings.download_dir()));
        vars.insert("AppDir", path(&settings.app_dir()));
        vars.insert("HostDir", path(&home_dir()));
        vars.insert("WorkDir", path(&settings.workdir));
        vars.insert("DataDir", path(&settings.data_dir()));
        vars.insert("TmpDir", path(&settings.tmp_dir()));
        vars.insert("ImagesDir", path(&settings.images_dir()));
        vars.insert("ScriptDir", path(&settings.script_dir()));
        vars.insert("CacheDir", path(&settings.cache_dir(name, version)));
        Self { vars }
    }

    /// Add `Filename` and `Ext` derived from a download URL
    pub fn with_url(mut self, url: &str) -> Self {
        let filename = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let ext = Path::new(&filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.vars.insert("Filename", filename);
        self.vars.insert("Ext", ext);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Substitute every placeholder. An unknown variable is an error.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut missing = None;
        let rendered = placeholder().replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match self.vars.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(key) => Err(SomError::Template(format!(
                "unknown variable .{} in {:?}",
                key, template
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings() -> Settings {
        Settings {
            workdir: PathBuf::from("/opt/somwork"),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_resource_vars() {
        let ctx = TemplateContext::for_resource(&settings(), "docker", "24.0.7");
        let url = ctx
            .render("https://download.docker.com/linux/static/stable/x86_64/docker-{{.Version}}.tgz")
            .unwrap();
        assert_eq!(
            url,
            "https://download.docker.com/linux/static/stable/x86_64/docker-24.0.7.tgz"
        );

        let script = ctx
            .render("tar xzvf {{.CacheDir}}/{{.Name}}-{{ .Version }}.tgz -C /usr/local/bin")
            .unwrap();
        assert_eq!(
            script,
            "tar xzvf /opt/somwork/download/docker/24.0.7/docker-24.0.7.tgz -C /usr/local/bin"
        );
    }

    #[test]
    fn test_render_target_vars() {
        let url = "https://github.com/opencontainers/runc/releases/download/v1.1.10/runc.amd64";
        let ctx = TemplateContext::for_resource(&settings(), "runc", "1.1.10").with_url(url);
        assert_eq!(ctx.render("{{.Filename}}").unwrap(), "runc.amd64");
        assert_eq!(ctx.render("{{.Ext}}").unwrap(), ".amd64");
    }

    #[test]
    fn test_unknown_variable() {
        let ctx = TemplateContext::for_resource(&settings(), "x", "1");
        let err = ctx.render("{{.Nope}}").unwrap_err();
        assert!(err.to_string().contains(".Nope"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let ctx = TemplateContext::for_resource(&settings(), "x", "1");
        assert_eq!(ctx.render("echo {{ not a var").unwrap(), "echo {{ not a var");
    }

    #[test]
    fn test_arch_names() {
        assert!(!arch().is_empty());
        assert_ne!(platform(), "macos");
    }
}
