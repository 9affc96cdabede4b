//! Declarative image set files
//!
//! ```yaml
//! org_name: itom
//! version: "2024.05"
//! images:
//!   - redis:6
//!   - nginx
//! ```

use crate::error::{RegistryError, Result};
use crate::image::reference::ImageReference;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ImageSet {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load an image set, treating a missing or unreadable file as a precondition failure
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RegistryError::Precondition(format!(
                "Image set file {} does not exist",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Precondition(format!("Cannot read image set {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parsed references, qualified with the set's organization. Blank entries are dropped.
    pub fn references(&self) -> Vec<ImageReference> {
        self.images
            .iter()
            .map(|image| image.trim())
            .filter(|image| !image.is_empty())
            .map(|image| ImageReference::qualified(image, &self.org_name))
            .collect()
    }

    /// Name shown to operators when the run starts
    pub fn display_org(&self) -> &str {
        if self.org_name.is_empty() {
            "official library"
        } else {
            &self.org_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml() {
        let set = ImageSet::from_yaml(
            "org_name: itom\nversion: \"2024.05\"\nimages:\n  - redis:6\n  - nginx\n  - \"\"\n",
        )
        .unwrap();
        assert_eq!(set.org_name, "itom");
        assert_eq!(set.version, "2024.05");
        assert_eq!(
            set.references(),
            vec![
                ImageReference::new("itom/redis", "6"),
                ImageReference::new("itom/nginx", "latest"),
            ]
        );
    }

    #[test]
    fn test_empty_org_uses_library() {
        let set = ImageSet::from_yaml("images: [busybox]").unwrap();
        assert_eq!(set.display_org(), "official library");
        assert_eq!(
            set.references(),
            vec![ImageReference::new("library/busybox", "latest")]
        );
    }

    #[test]
    fn test_missing_file_is_precondition_error() {
        let err = ImageSet::load(Path::new("/nonexistent/images.yaml")).unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
    }
}
