//! Content digest utilities
//!
//! Digests are `algorithm:hex` strings. This module validates them, maps them
//! to local blob file names, and verifies streamed content against them.

use crate::error::{RegistryError, Result};
use sha2::Digest;
use std::path::{Path, PathBuf};

/// Which kind of blob a local file holds; decides the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Config,
    Layer,
}

/// Utilities for working with content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Split `algorithm:hex`, rejecting empty parts
    pub fn split(digest: &str) -> Result<(&str, &str)> {
        match digest.split_once(':') {
            Some((algorithm, hex)) if !algorithm.is_empty() && !hex.is_empty() => {
                Ok((algorithm, hex))
            }
            _ => Err(RegistryError::Validation(format!(
                "Invalid digest '{}': expected algorithm:hex",
                digest
            ))),
        }
    }

    /// Extract the hex part of a digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        Self::split(digest).map(|(_, hex)| hex)
    }

    /// Local file a blob is stored in: `<dir>/<hex>.json` for configs,
    /// `<dir>/<hex>.tar.gz` for layers
    pub fn local_path(dir: &Path, digest: &str, kind: BlobKind) -> Result<PathBuf> {
        let hex = Self::extract_hex_part(digest)?;
        if hex.contains(['/', '\\']) || hex.contains("..") {
            return Err(RegistryError::Validation(format!(
                "Digest '{}' cannot be used as a file name",
                digest
            )));
        }
        let file_name = match kind {
            BlobKind::Config => format!("{}.json", hex),
            BlobKind::Layer => format!("{}.tar.gz", hex),
        };
        Ok(dir.join(file_name))
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        if digest.chars().count() > 19 {
            format!("{}...", digest.chars().take(19).collect::<String>())
        } else {
            digest.to_string()
        }
    }
}

/// Incremental verifier fed while a blob streams to disk
pub struct DigestVerifier {
    expected: String,
    hasher: Option<sha2::Sha256>,
}

impl DigestVerifier {
    /// Only sha256 digests are verified; other algorithms pass through unchecked
    pub fn new(expected: &str) -> Self {
        let hasher = match DigestUtils::split(expected) {
            Ok(("sha256", hex)) if DigestUtils::is_valid_sha256_hex(hex) => {
                Some(sha2::Sha256::new())
            }
            _ => None,
        };
        Self {
            expected: expected.to_string(),
            hasher,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
    }

    /// Returns the computed digest on mismatch
    pub fn finish(self) -> std::result::Result<(), String> {
        let Some(hasher) = self.hasher else {
            return Ok(());
        };
        let computed = format!("sha256:{}", hex::encode(hasher.finalize()));
        if computed.eq_ignore_ascii_case(&self.expected) {
            Ok(())
        } else {
            Err(computed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_by_kind() {
        let dir = Path::new("/data/images");
        let digest = "sha256:abc123";
        assert_eq!(
            DigestUtils::local_path(dir, digest, BlobKind::Config).unwrap(),
            PathBuf::from("/data/images/abc123.json")
        );
        assert_eq!(
            DigestUtils::local_path(dir, digest, BlobKind::Layer).unwrap(),
            PathBuf::from("/data/images/abc123.tar.gz")
        );
    }

    #[test]
    fn test_rejects_malformed_digests() {
        assert!(DigestUtils::split("abc123").is_err());
        assert!(DigestUtils::split("sha256:").is_err());
        assert!(DigestUtils::local_path(Path::new("."), "sha256:../etc", BlobKind::Layer).is_err());
    }

    #[test]
    fn test_verifier_detects_mismatch() {
        let mut verifier = DigestVerifier::new(
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        );
        verifier.update(b"hello ");
        verifier.update(b"world");
        assert!(verifier.finish().is_ok());

        let mut verifier = DigestVerifier::new(
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        verifier.update(b"not empty");
        assert!(verifier.finish().is_err());
    }

    #[test]
    fn test_format_digest_short_counts_chars() {
        assert_eq!(
            DigestUtils::format_digest_short("sha256:0123456789abcdef"),
            "sha256:0123456789a..."
        );
        assert_eq!(DigestUtils::format_digest_short("sha256:abc"), "sha256:abc");
        assert_eq!(
            DigestUtils::format_digest_short("sha256:éééééééééééééé"),
            "sha256:éééééééééééé..."
        );
    }

    #[test]
    fn test_verifier_skips_unknown_algorithms() {
        let mut verifier = DigestVerifier::new("sha512:abc");
        verifier.update(b"anything");
        assert!(verifier.finish().is_ok());
    }
}
