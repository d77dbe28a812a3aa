//! File checksums
//!
//! Checksums are written as `algo:hex` or bare hex, which means sha256.

use crate::error::{Result, SomError};
use sha2::{Digest, Sha256, Sha512};
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Coreutils program computing this digest
    pub fn command(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256sum",
            Algorithm::Sha512 => "sha512sum",
        }
    }
}

/// An expected digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: Algorithm,
    pub hex: String,
}

impl Checksum {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (algorithm, hex) = match value.split_once(':') {
            Some(("sha256", hex)) => (Algorithm::Sha256, hex),
            Some(("sha512", hex)) => (Algorithm::Sha512, hex),
            Some((other, _)) => {
                return Err(SomError::InvalidArgument(format!(
                    "unsupported hash algorithm: {}",
                    other
                )))
            }
            None => (Algorithm::Sha256, value),
        };
        if hex.is_empty() {
            return Err(SomError::InvalidArgument(format!("empty checksum: {:?}", value)));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Case-insensitive comparison against a computed digest
    pub fn matches(&self, actual: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual.trim())
    }

    /// Shell command printing the digest of a file on a node
    pub fn remote_command(&self, path: &str) -> String {
        remote_command(self.algorithm, path)
    }
}

/// `sha256sum path | awk '{print $1}'` and friends
pub fn remote_command(algorithm: Algorithm, path: &str) -> String {
    format!("{} {} | awk '{{print $1}}'", algorithm.command(), path)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn hash_reader<D: Digest, R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Hex digest of a file
pub fn file_digest(path: &Path, algorithm: Algorithm) -> Result<String> {
    let file = std::fs::File::open(path)?;
    match algorithm {
        Algorithm::Sha256 => hash_reader::<Sha256, _>(file),
        Algorithm::Sha512 => hash_reader::<Sha512, _>(file),
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    file_digest(path, Algorithm::Sha256)
}

/// Verify a file against an expected checksum. An empty checksum always passes.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    if expected.trim().is_empty() {
        return Ok(());
    }
    let checksum = Checksum::parse(expected)?;
    let actual = file_digest(path, checksum.algorithm)?;
    if checksum.matches(&actual) {
        Ok(())
    } else {
        Err(SomError::Checksum {
            path: path.display().to_string(),
            expected: checksum.hex,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_parse() {
        let c = Checksum::parse("sha512:ABC").unwrap();
        assert_eq!(c.algorithm, Algorithm::Sha512);
        assert_eq!(c.hex, "ABC");

        let c = Checksum::parse("abc").unwrap();
        assert_eq!(c.algorithm, Algorithm::Sha256);

        assert!(Checksum::parse("md5:abc").is_err());
        assert!(Checksum::parse("sha256:").is_err());
    }

    #[test]
    fn test_verify_file_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();

        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA256);
        verify_file(&path, HELLO_SHA256).unwrap();
        verify_file(&path, &format!("sha256:{}", HELLO_SHA256.to_uppercase())).unwrap();
        verify_file(&path, "").unwrap();

        let err = verify_file(&path, "sha256:deadbeef").unwrap_err();
        assert!(matches!(err, SomError::Checksum { .. }));
    }

    #[test]
    fn test_remote_command() {
        let c = Checksum::parse("abc").unwrap();
        assert_eq!(
            c.remote_command("/opt/file.tgz"),
            "sha256sum /opt/file.tgz | awk '{print $1}'"
        );
    }
}
