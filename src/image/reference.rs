//! Image reference parsing
//!
//! Image sets list images as `name[:tag]`. A missing tag means `latest`; a name
//! without a namespace segment is placed under the configured organization
//! (`library` when none is configured).

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const DEFAULT_ORG_NAME: &str = "library";

/// Repository name and tag of one image, immutable once parsed
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Split `name[:tag]` without applying any organization prefix.
    ///
    /// An empty source yields an empty reference (`name` and `tag` both empty).
    pub fn parse(image: &str) -> Self {
        if image.is_empty() {
            return Self::default();
        }
        match image.split_once(':') {
            Some((name, tag)) => Self::new(name, tag),
            None => Self::new(image, DEFAULT_IMAGE_TAG),
        }
    }

    /// Parse and place the repository under `org` (or [`DEFAULT_ORG_NAME`] when
    /// `org` is empty). Names that already carry a namespace are left as is.
    pub fn qualified(image: &str, org: &str) -> Self {
        let mut reference = Self::parse(image);
        if reference.name.is_empty() || reference.name.contains('/') {
            return reference;
        }
        let org = if org.is_empty() { DEFAULT_ORG_NAME } else { org };
        reference.name = format!("{}/{}", org, reference.name);
        reference
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Short `repo:tag` label without the namespace, used for progress titles
    pub fn short_name(&self) -> String {
        let repo = self.name.rsplit('/').next().unwrap_or(&self.name);
        format!("{}:{}", repo, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
