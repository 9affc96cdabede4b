//! Standardized mapping from HTTP responses and transport errors to [`Outcome`]s

use crate::error::{Outcome, Status};
use reqwest::StatusCode;
use std::time::Duration;

/// Standard classifier for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Classify a response status code into a canonical [`Status`]
    pub fn classify(status: StatusCode) -> Status {
        if status.is_success() {
            return Status::Ok;
        }
        match status.as_u16() {
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            403 => Status::Forbidden,
            404 => Status::NotFound,
            429 => Status::TooManyRequests,
            _ => Status::InternalError,
        }
    }

    /// Build an [`Outcome`] for a failed response, keeping the registry's error body
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> Outcome {
        let message = match status.as_u16() {
            400 => format!("Bad request during {}: {}", operation, error_text),
            401 => format!("Unauthorized to perform {}: {}", operation, error_text),
            403 => format!("Forbidden: insufficient permissions for {}: {}", operation, error_text),
            404 => format!("Resource not found for {}: {}", operation, error_text),
            429 => format!("Rate limited during {}: {}", operation, error_text),
            500 => format!("Registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed (status {}): {}", operation, status, error_text),
        };

        Outcome::failed(Self::classify(status), message)
    }

    /// Whether a response status is worth another attempt
    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Exponential backoff capped at `max_delay`
    pub fn get_retry_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
        let backoff_multiplier = 2_u32.saturating_pow(attempt.min(16));
        base_delay.saturating_mul(backoff_multiplier).min(max_delay)
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Transport-level failures always classify as [`Status::InternalError`]
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> Outcome {
        let message = if error.is_timeout() {
            format!("{} timeout: {}", context, error)
        } else if error.is_connect() {
            format!("Connection error during {}: {}", context, error)
        } else if error.is_body() || error.is_decode() {
            format!("Invalid response body during {}: {}", context, error)
        } else {
            format!("Network error during {}: {}", context, error)
        };

        Outcome::failed(Status::InternalError, message)
    }

    /// Local file failures during a transfer are recorded per item as well
    pub fn handle_io_error(error: &std::io::Error, context: &str) -> Outcome {
        Outcome::failed(Status::InternalError, format!("IO error during {}: {}", context, error))
    }
}
