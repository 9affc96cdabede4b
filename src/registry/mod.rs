//! Registry module for Docker Registry HTTP API v2 interactions
//!
//! - `auth`: challenge negotiation and per-call credentials
//! - `transport`: the [`RegistryApi`] seam and the retry loop under every request
//! - `client`: the reqwest-backed [`RegistryClient`]

pub mod auth;
pub mod client;
pub mod transport;

pub use auth::{AuthAction, AuthMode, AuthNegotiator, AuthSession, Credential};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use transport::{RegistryApi, RetryPolicy, UploadSession};
