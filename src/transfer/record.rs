//! Persisted transfer outcomes
//!
//! A download run writes `images.manifest.json` (the raw manifest fetch results)
//! and `images.download.manifest` (one [`TransferManifest`] per image). Upload reads
//! the latter and writes `images.upload.manifest` in the same shape.

use crate::error::{Outcome, RegistryError, Result, Status};
use crate::image::{ImageReference, Manifest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_RESPONSES_FILE: &str = "images.manifest.json";
pub const DOWNLOAD_MANIFEST_FILE: &str = "images.download.manifest";
pub const UPLOAD_MANIFEST_FILE: &str = "images.upload.manifest";

/// Outcome of transferring one blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub digest: String,
    pub local_path: String,
}

impl TransferRecord {
    pub fn new(digest: impl Into<String>, local_path: &Path, outcome: Outcome) -> Self {
        Self {
            status: outcome.status,
            message: outcome.message,
            digest: digest.into(),
            local_path: local_path.display().to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Per-image transfer result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferManifest {
    pub image: ImageReference,
    pub config: TransferRecord,
    #[serde(default)]
    pub layers: Vec<TransferRecord>,
}

impl TransferManifest {
    /// Records whose status is not ok, config included
    pub fn failures(&self) -> usize {
        std::iter::once(&self.config)
            .chain(self.layers.iter())
            .filter(|record| !record.is_ok())
            .count()
    }
}

/// Result of one manifest fetch, persisted before any blob is transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub manifest: Manifest,
}

impl ManifestResponse {
    pub fn ok(manifest: Manifest) -> Self {
        Self {
            status: Status::Ok,
            message: None,
            manifest,
        }
    }

    pub fn failed(image: ImageReference, outcome: Outcome) -> Self {
        Self {
            status: outcome.status,
            message: outcome.message,
            manifest: Manifest::empty(image),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Total failing records across a run
pub fn count_failures(manifests: &[TransferManifest]) -> usize {
    manifests.iter().map(TransferManifest::failures).sum()
}

pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, content).await.map_err(|e| {
        RegistryError::Io(format!("Failed to write {}: {}", path.display(), e))
    })
}

/// Read a file written by [`write_json`]. Missing or malformed input is a precondition failure.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        RegistryError::Precondition(format!("Cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        RegistryError::Precondition(format!("Malformed {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(digest: &str, status: Status) -> TransferRecord {
        TransferRecord {
            status,
            message: None,
            digest: digest.to_string(),
            local_path: format!("images/{}.tar.gz", digest.trim_start_matches("sha256:")),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(record("sha256:abc", Status::Ok)).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["digest"], "sha256:abc");
        assert_eq!(value["localPath"], "images/abc.tar.gz");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_failures_count_config_and_layers() {
        let manifest = TransferManifest {
            image: ImageReference::new("library/redis", "6"),
            config: record("sha256:c0", Status::NotFound),
            layers: vec![
                record("sha256:l1", Status::Ok),
                record("sha256:l2", Status::InternalError),
            ],
        };
        assert_eq!(manifest.failures(), 2);
        assert_eq!(count_failures(&[manifest.clone(), manifest]), 4);
    }

    #[tokio::test]
    async fn test_round_trip_with_empty_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DOWNLOAD_MANIFEST_FILE);
        let manifests = vec![
            TransferManifest {
                image: ImageReference::new("library/redis", "6"),
                config: record("sha256:c0", Status::Ok),
                layers: vec![
                    record("sha256:abc", Status::Ok),
                    TransferRecord {
                        message: Some("Rate limited".to_string()),
                        ..record("sha256:def", Status::TooManyRequests)
                    },
                ],
            },
            TransferManifest {
                image: ImageReference::new("library/scratch", "latest"),
                config: record("sha256:c1", Status::Ok),
                layers: Vec::new(),
            },
        ];

        write_json(&path, &manifests).await.unwrap();
        let loaded: Vec<TransferManifest> = read_json(&path).await.unwrap();
        assert_eq!(loaded, manifests);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_input_are_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_json::<Vec<TransferManifest>>(&dir.path().join("absent")).await;
        assert!(matches!(missing, Err(RegistryError::Precondition(_))));

        let path = dir.path().join(DOWNLOAD_MANIFEST_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let malformed = read_json::<Vec<TransferManifest>>(&path).await;
        assert!(matches!(malformed, Err(RegistryError::Precondition(_))));
    }

    #[test]
    fn test_failed_manifest_response_keeps_image() {
        let response = ManifestResponse::failed(
            ImageReference::new("library/ghost", "1"),
            Outcome::failed(Status::NotFound, "manifest unknown"),
        );
        assert!(!response.is_ok());
        assert_eq!(response.manifest.image.name, "library/ghost");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "not_found");
    }
}
