//! Self-signed CA and server certificate via `openssl`

use crate::error::{Result, SomError};
use crate::exec::CommandRunner;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subject fields and key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertConfig {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub unit: String,
    pub days: u32,
    pub key_size: u32,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            country: "CN".to_string(),
            state: "Beijing".to_string(),
            locality: "Beijing".to_string(),
            organization: "example".to_string(),
            unit: "Personal".to_string(),
            days: 3650,
            key_size: 4096,
        }
    }
}

/// Generates `ca.{key,crt}` and `<domain>.{key,csr,crt,cert}` in one directory
pub struct CertGenerator {
    domain: String,
    output_dir: PathBuf,
    config: CertConfig,
}

impl CertGenerator {
    pub fn new(domain: &str, output_dir: &Path) -> Self {
        Self {
            domain: domain.to_string(),
            output_dir: output_dir.to_path_buf(),
            config: CertConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CertConfig) -> Self {
        self.config = config;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn path(&self, name: &str) -> String {
        self.output_dir.join(name).display().to_string()
    }

    pub fn subject(&self) -> String {
        let c = &self.config;
        format!(
            "/C={}/ST={}/L={}/O={}/OU={}/CN={}",
            c.country, c.state, c.locality, c.organization, c.unit, self.domain
        )
    }

    /// Server certificate and key paths
    pub fn server_cert(&self) -> PathBuf {
        self.output_dir.join(format!("{}.crt", self.domain))
    }

    pub fn server_key(&self) -> PathBuf {
        self.output_dir.join(format!("{}.key", self.domain))
    }

    /// Extension file giving the server certificate its SAN
    pub fn v3_ext(&self) -> String {
        format!(
            "authorityKeyIdentifier=keyid,issuer\n\
             basicConstraints=CA:FALSE\n\
             keyUsage = digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment\n\
             extendedKeyUsage = serverAuth\n\
             subjectAltName = @alt_names\n\
             \n\
             [alt_names]\n\
             DNS.1={}\n",
            self.domain
        )
    }

    /// `openssl` invocations in order, each with a description for errors
    pub fn steps(&self) -> Vec<(&'static str, Vec<String>)> {
        let days = self.config.days.to_string();
        let bits = self.config.key_size.to_string();
        let subject = self.subject();
        let key = format!("{}.key", self.domain);
        let csr = format!("{}.csr", self.domain);
        let crt = format!("{}.crt", self.domain);
        let cert = format!("{}.cert", self.domain);

        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        vec![
            ("generate CA key", args(&["genrsa", "-out", &self.path("ca.key"), &bits])),
            (
                "generate CA cert",
                args(&[
                    "req", "-x509", "-new", "-nodes", "-sha512", "-days", &days, "-subj", &subject,
                    "-key", &self.path("ca.key"), "-out", &self.path("ca.crt"),
                ]),
            ),
            ("generate server key", args(&["genrsa", "-out", &self.path(&key), &bits])),
            (
                "generate CSR",
                args(&[
                    "req", "-sha512", "-new", "-subj", &subject, "-key", &self.path(&key), "-out",
                    &self.path(&csr),
                ]),
            ),
            (
                "generate server cert",
                args(&[
                    "x509", "-req", "-sha512", "-days", &days, "-extfile", &self.path("v3.ext"),
                    "-CA", &self.path("ca.crt"), "-CAkey", &self.path("ca.key"), "-CAcreateserial",
                    "-in", &self.path(&csr), "-out", &self.path(&crt),
                ]),
            ),
            (
                "generate .cert file",
                args(&["x509", "-inform", "PEM", "-in", &self.path(&crt), "-out", &self.path(&cert)]),
            ),
        ]
    }

    pub async fn generate(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::write(self.output_dir.join("v3.ext"), self.v3_ext())?;
        for (what, args) in self.steps() {
            debug!("openssl {}", args.join(" "));
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            CommandRunner::run_checked("openssl", &refs)
                .await
                .map_err(|e| SomError::Registry(format!("failed to {}: {}", what, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_subject_and_steps() {
        let generator = CertGenerator::new("harbor.local", Path::new("/certs"));
        assert_eq!(
            generator.subject(),
            "/C=CN/ST=Beijing/L=Beijing/O=example/OU=Personal/CN=harbor.local"
        );
        let steps = generator.steps();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0].1, vec!["genrsa", "-out", "/certs/ca.key", "4096"]);
        assert!(steps[4].1.contains(&"/certs/v3.ext".to_string()));
        assert!(generator.v3_ext().ends_with("[alt_names]\nDNS.1=harbor.local\n"));
        assert_eq!(generator.server_key(), PathBuf::from("/certs/harbor.local.key"));
    }

    #[tokio::test]
    async fn test_generate_with_openssl() {
        if !CommandRunner::exists("openssl") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let generator = CertGenerator::new("reg.test", dir.path()).with_config(CertConfig {
            key_size: 2048,
            days: 30,
            ..Default::default()
        });
        generator.generate().await.unwrap();
        for name in ["ca.key", "ca.crt", "reg.test.key", "reg.test.csr", "v3.ext", "reg.test.crt", "reg.test.cert"] {
            assert!(dir.path().join(name).is_file(), "{} missing", name);
        }
    }
}
