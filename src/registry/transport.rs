//! Registry operations seam and the retrying HTTP send loop beneath it

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Outcome, Result};
use crate::logging::Logger;
use crate::registry::auth::AuthSession;
use crate::transfer::record::ManifestResponse;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// An open blob upload on the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Value of `Docker-Upload-UUID`, or the last path segment of `Location`
    pub id: String,
    /// Absolute upload URL from `Location`, including any state query the registry added
    pub location: Option<String>,
}

/// Registry v2 operations used by the transfer orchestrators.
///
/// Per-item failures come back as [`Outcome`] data; only run-fatal conditions
/// (unreachable registry, authentication failure) are returned as `Err`.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn ping(&self) -> Result<AuthSession>;

    /// `GET /v2/<name>/manifests/<reference>`. The response's manifest always
    /// carries `name`/`reference` as its image, even on failure.
    async fn fetch_manifest(&self, name: &str, reference: &str) -> Result<ManifestResponse>;

    /// Stream `GET /v2/<name>/blobs/<digest>` into `destination`
    async fn fetch_blob(&self, name: &str, digest: &str, destination: &Path) -> Result<Outcome>;

    /// `HEAD /v2/<name>/blobs/<digest>`; ok means the repository already has it
    async fn check_blob_exists(&self, name: &str, digest: &str) -> Result<Outcome>;

    /// `POST /v2/<name>/blobs/uploads/`
    async fn begin_upload(&self, name: &str) -> Result<(Option<UploadSession>, Outcome)>;

    /// `PUT` the file at `source` to the session, finalizing it under `digest`
    async fn push_blob(
        &self,
        name: &str,
        session: &UploadSession,
        digest: &str,
        source: &Path,
    ) -> Result<Outcome>;

    /// `GET /v2/<name>/tags/list`
    async fn list_tags(&self, name: &str) -> Result<(Vec<String>, Outcome)>;
}

/// Bounded exponential backoff for every registry request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_delay: Duration) -> Self {
        Self {
            max_retries,
            max_delay,
            ..Default::default()
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        HttpErrorHandler::get_retry_delay(attempt, self.base_delay, self.max_delay)
    }

    /// Send the request produced by `build`, rebuilding it for every attempt.
    ///
    /// Transport errors, 429 and 5xx answers are retried. When attempts run out the
    /// last response is returned as is (so the caller classifies it), and a
    /// transport error becomes an `internal_error` [`Outcome`]. `build` itself may
    /// fail with an `Outcome`, which is returned without retrying.
    pub async fn send<F, Fut>(
        &self,
        build: F,
        output: &Logger,
        context: &str,
    ) -> std::result::Result<Response, Outcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<RequestBuilder, Outcome>>,
    {
        let mut attempt = 0;
        loop {
            let request = build().await?;
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if HttpErrorHandler::is_retryable(status) && attempt < self.max_retries {
                        let delay = self.delay_for(attempt);
                        output.warning(&format!(
                            "{} returned {}, retrying in {:?} (attempt {}/{})",
                            context,
                            status,
                            delay,
                            attempt + 1,
                            self.max_retries
                        ));
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let outcome = NetworkErrorHandler::handle_network_error(&e, context);
                    if attempt >= self.max_retries {
                        return Err(outcome);
                    }
                    let delay = self.delay_for(attempt);
                    output.warning(&format!(
                        "{}, retrying in {:?} (attempt {}/{})",
                        outcome.message.as_deref().unwrap_or(context),
                        delay,
                        attempt + 1,
                        self.max_retries
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_into_outcome() {
        let client = reqwest::Client::new();
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let outcome = policy
            .send(
                || async { Ok::<_, Outcome>(client.get("http://127.0.0.1:1/v2/")) },
                &Logger::new_quiet(),
                "probe",
            )
            .await
            .unwrap_err();
        assert_eq!(outcome.status, Status::InternalError);
    }

    #[tokio::test]
    async fn test_build_failure_is_not_retried() {
        let outcome = RetryPolicy::default()
            .send(
                || async { Err::<RequestBuilder, _>(Outcome::failed(Status::InternalError, "no source file")) },
                &Logger::new_quiet(),
                "push",
            )
            .await
            .unwrap_err();
        assert_eq!(outcome.message.as_deref(), Some("no source file"));
    }
}
