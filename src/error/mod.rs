//! Error types and per-item status classification for registry operations
//!
//! Two layers of failure exist in a transfer run:
//! - [`RegistryError`] aborts the run (unreachable registry, rejected credentials,
//!   missing working directory, unreadable input manifest, lock contention).
//! - [`Status`] is recorded per manifest or blob and never stops sibling work.

pub mod handlers;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry probe could not reach the host
    #[error("Connection error: {0}")]
    Connection(String),
    /// Bad or missing credentials, or token negotiation failure
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Working directory, image set or input manifest is missing or invalid
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// Another instance holds the process lock
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        RegistryError::Parse(format!("YAML error: {}", err))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Connection(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegistryError::Internal(format!("Task failed: {}", err))
    }
}

/// Canonical outcome of a single registry call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    TooManyRequests,
    InternalError,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::TooManyRequests => "Too Many Requests",
            Status::InternalError => "Internal Error",
        };
        f.write_str(text)
    }
}

/// A classified status with the registry's (or transport's) explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: Status,
    pub message: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
        }
    }

    pub fn failed(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::TooManyRequests).unwrap();
        assert_eq!(json, "\"too_many_requests\"");
        let back: Status = serde_json::from_str("\"not_found\"").unwrap();
        assert_eq!(back, Status::NotFound);
    }
}
