//! image-courier library
//!
//! Bulk download and upload of container images directly against Docker registry
//! v2 endpoints, with each shared blob transferred once per run.

pub mod cli;
pub mod concurrency;
pub mod digest;
pub mod error;
pub mod image;
pub mod lock;
pub mod logging;
pub mod registry;
pub mod transfer;

pub use error::{Outcome, RegistryError, Result, Status};
pub use logging::Logger;
