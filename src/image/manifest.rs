//! Registry image manifest model (Docker image manifest v2, schema 2)

use crate::image::reference::ImageReference;
use serde::{Deserialize, Serialize};

pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// A content-addressed blob descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub config: Layer,
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Which requested image this manifest answers; not part of the registry document
    #[serde(default)]
    pub image: ImageReference,
}

impl Manifest {
    /// Placeholder for an image whose manifest could not be fetched
    pub fn empty(image: ImageReference) -> Self {
        Self {
            image,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_manifest() {
        let body = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": 7023,
                "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
            },
            "layers": [
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 32654,
                    "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"
                }
            ]
        }"#;
        let manifest: Manifest = serde_json::from_str(body).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.config.size, 7023);
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 32654);
        assert!(manifest.image.is_empty());
    }

    #[test]
    fn test_empty_manifest_keeps_image() {
        let manifest = Manifest::empty(ImageReference::new("library/redis", "6"));
        assert_eq!(manifest.image.tag, "6");
        assert!(manifest.config.digest.is_empty());
        assert!(manifest.layers.is_empty());
    }
}
