//! Image module
//!
//! Image references, image set files, and the registry manifest model.

pub mod image_set;
pub mod manifest;
pub mod reference;

pub use image_set::ImageSet;
pub use manifest::{Layer, MANIFEST_V2_MEDIA_TYPE, Manifest};
pub use reference::ImageReference;
