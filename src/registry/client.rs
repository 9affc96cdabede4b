//! Docker Registry v2 client
//!
//! Every operation asks the [`AuthNegotiator`] for a credential scoped to the
//! repository it touches, sends the request through the [`RetryPolicy`], and
//! classifies the answer into an [`Outcome`]. Only authentication failures and an
//! unreachable registry escape as errors.

use crate::cli::config::AuthConfig;
use crate::digest::{DigestUtils, DigestVerifier};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Outcome, RegistryError, Result, Status};
use crate::image::{ImageReference, MANIFEST_V2_MEDIA_TYPE, Manifest};
use crate::logging::Logger;
use crate::registry::auth::{AuthAction, AuthNegotiator, AuthSession, Credential};
use crate::registry::transport::{RegistryApi, RetryPolicy, UploadSession};
use crate::transfer::record::ManifestResponse;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

const UPLOAD_UUID_HEADER: &str = "Docker-Upload-UUID";

pub struct RegistryClientBuilder {
    address: String,
    auth_config: AuthConfig,
    skip_tls: bool,
    timeout: u64,
    retry: RetryPolicy,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth_config: AuthConfig::default(),
            skip_tls: false,
            timeout: 7200,
            retry: RetryPolicy::default(),
            output: Logger::new(false),
        }
    }

    pub fn with_auth(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let address = self.address.trim_end_matches('/').to_string();
        Url::parse(&address)?;

        let client_builder = if self.skip_tls {
            self.output.verbose("TLS verification disabled");
            Client::builder().danger_accept_invalid_certs(true)
        } else {
            Client::builder()
        };

        let client = client_builder
            .timeout(Duration::from_secs(self.timeout))
            .connect_timeout(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(300))
            .user_agent(concat!("image-courier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        let auth = AuthNegotiator::new(
            client.clone(),
            &address,
            self.auth_config,
            self.retry.clone(),
            self.output.clone(),
        );

        Ok(RegistryClient {
            client,
            address,
            auth,
            retry: self.retry,
            output: self.output,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct RegistryClient {
    client: Client,
    address: String,
    auth: AuthNegotiator,
    retry: RetryPolicy,
    output: Logger,
}

impl RegistryClient {
    pub fn builder(address: impl Into<String>) -> RegistryClientBuilder {
        RegistryClientBuilder::new(address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn credential(&self, repository: &str, action: AuthAction) -> Result<Credential> {
        self.auth.authorize(repository, action).await
    }

    /// Send with retries; a transport failure comes back as the `Err` outcome
    async fn send_simple(
        &self,
        credential: &Credential,
        build: impl Fn(&Client) -> reqwest::RequestBuilder,
        context: &str,
    ) -> std::result::Result<Response, Outcome> {
        self.retry
            .send(
                || async { Ok::<_, Outcome>(credential.apply(build(&self.client))) },
                &self.output,
                context,
            )
            .await
    }

    /// Turn a non-success response into its outcome
    async fn failure(response: Response, operation: &str) -> Outcome {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        HttpErrorHandler::handle_registry_error(status, &error_text, operation)
    }

    /// Resolve the upload `Location` header against the registry address
    fn resolve_location(&self, name: &str, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.address, location)
        } else {
            format!("{}/v2/{}/blobs/uploads/{}", self.address, name, location)
        }
    }

    fn session_url(&self, name: &str, session: &UploadSession, digest: &str) -> std::result::Result<Url, Outcome> {
        let base = session
            .location
            .clone()
            .unwrap_or_else(|| format!("{}/v2/{}/blobs/uploads/{}", self.address, name, session.id));
        let mut url = Url::parse(&base).map_err(|e| {
            Outcome::failed(Status::InternalError, format!("Invalid upload URL {}: {}", base, e))
        })?;
        url.query_pairs_mut().append_pair("digest", digest);
        Ok(url)
    }

    async fn stream_to_file(
        mut response: Response,
        digest: &str,
        destination: &Path,
    ) -> std::result::Result<(), Outcome> {
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| NetworkErrorHandler::handle_io_error(&e, "blob create"))?;
        let mut verifier = DigestVerifier::new(digest);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob download"))?
        {
            verifier.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| NetworkErrorHandler::handle_io_error(&e, "blob write"))?;
        }
        file.flush()
            .await
            .map_err(|e| NetworkErrorHandler::handle_io_error(&e, "blob write"))?;

        verifier.finish().map_err(|computed| {
            Outcome::failed(
                Status::InternalError,
                format!("digest mismatch: expected {}, got {}", digest, computed),
            )
        })
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn ping(&self) -> Result<AuthSession> {
        self.auth.ping().await
    }

    async fn fetch_manifest(&self, name: &str, reference: &str) -> Result<ManifestResponse> {
        let image = ImageReference::new(name, reference);
        let credential = self.credential(name, AuthAction::Pull).await?;
        let url = format!("{}/v2/{}/manifests/{}", self.address, name, reference);
        self.output.detail(&format!("Fetching manifest {}", image));

        let response = match self
            .send_simple(
                &credential,
                |client| client.get(&url).header(ACCEPT, MANIFEST_V2_MEDIA_TYPE),
                "manifest fetch",
            )
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok(ManifestResponse::failed(image, outcome)),
        };

        if !response.status().is_success() {
            let outcome = Self::failure(response, "manifest fetch").await;
            return Ok(ManifestResponse::failed(image, outcome));
        }

        match response.json::<Manifest>().await {
            Ok(mut manifest) => {
                manifest.image = image;
                Ok(ManifestResponse::ok(manifest))
            }
            Err(e) => Ok(ManifestResponse::failed(
                image,
                NetworkErrorHandler::handle_network_error(&e, "manifest decode"),
            )),
        }
    }

    async fn fetch_blob(&self, name: &str, digest: &str, destination: &Path) -> Result<Outcome> {
        let credential = self.credential(name, AuthAction::Pull).await?;
        let url = format!("{}/v2/{}/blobs/{}", self.address, name, digest);
        self.output.detail(&format!(
            "Downloading blob {} -> {}",
            DigestUtils::format_digest_short(digest),
            destination.display()
        ));

        let response = match self
            .send_simple(&credential, |client| client.get(&url), "blob download")
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok(outcome),
        };
        if !response.status().is_success() {
            return Ok(Self::failure(response, "blob download").await);
        }

        match Self::stream_to_file(response, digest, destination).await {
            Ok(()) => Ok(Outcome::ok()),
            Err(outcome) => {
                let _ = tokio::fs::remove_file(destination).await;
                Ok(outcome)
            }
        }
    }

    async fn check_blob_exists(&self, name: &str, digest: &str) -> Result<Outcome> {
        let credential = self.credential(name, AuthAction::Pull).await?;
        let url = format!("{}/v2/{}/blobs/{}", self.address, name, digest);

        let response = match self
            .send_simple(&credential, |client| client.head(&url), "blob existence check")
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok(outcome),
        };

        // HEAD answers carry no body to quote
        let status = response.status();
        if status.is_success() {
            self.output.detail(&format!(
                "Blob {} exists in {}",
                DigestUtils::format_digest_short(digest),
                name
            ));
            Ok(Outcome::ok())
        } else {
            Ok(HttpErrorHandler::handle_registry_error(status, "", "blob existence check"))
        }
    }

    async fn begin_upload(&self, name: &str) -> Result<(Option<UploadSession>, Outcome)> {
        let credential = self.credential(name, AuthAction::PushPull).await?;
        let url = format!("{}/v2/{}/blobs/uploads/", self.address, name);

        let response = match self
            .send_simple(
                &credential,
                |client| client.post(&url).header(CONTENT_LENGTH, 0),
                "upload session start",
            )
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok((None, outcome)),
        };
        if !response.status().is_success() {
            return Ok((None, Self::failure(response, "upload session start").await));
        }

        let header = |key: &str| {
            response
                .headers()
                .get(key)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let location = header(LOCATION.as_str()).map(|loc| self.resolve_location(name, &loc));
        let id = header(UPLOAD_UUID_HEADER).or_else(|| {
            location.as_deref().and_then(|loc| {
                loc.split('?')
                    .next()
                    .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
                    .map(str::to_string)
            })
        });

        match id {
            Some(id) => {
                self.output
                    .detail(&format!("Upload session {} started for {}", id, name));
                Ok((Some(UploadSession { id, location }), Outcome::ok()))
            }
            None => Ok((
                None,
                Outcome::failed(
                    Status::InternalError,
                    "Upload session response carried neither Location nor Docker-Upload-UUID",
                ),
            )),
        }
    }

    async fn push_blob(
        &self,
        name: &str,
        session: &UploadSession,
        digest: &str,
        source: &Path,
    ) -> Result<Outcome> {
        let credential = self.credential(name, AuthAction::PushPull).await?;
        let url = match self.session_url(name, session, digest) {
            Ok(url) => url,
            Err(outcome) => return Ok(outcome),
        };
        let size = match tokio::fs::metadata(source).await {
            Ok(metadata) => metadata.len(),
            Err(e) => return Ok(NetworkErrorHandler::handle_io_error(&e, "blob read")),
        };
        self.output.detail(&format!(
            "Uploading blob {} ({} bytes) to {}",
            DigestUtils::format_digest_short(digest),
            size,
            name
        ));

        let response = match self
            .retry
            .send(
                || async {
                    let file = tokio::fs::File::open(source)
                        .await
                        .map_err(|e| NetworkErrorHandler::handle_io_error(&e, "blob read"))?;
                    Ok::<_, Outcome>(
                        credential.apply(
                            self.client
                                .put(url.clone())
                                .header(CONTENT_TYPE, "application/octet-stream")
                                .header(CONTENT_LENGTH, size)
                                .body(Body::wrap_stream(ReaderStream::new(file))),
                        ),
                    )
                },
                &self.output,
                "blob upload",
            )
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok(outcome),
        };

        if response.status().is_success() {
            Ok(Outcome::ok())
        } else {
            Ok(Self::failure(response, "blob upload").await)
        }
    }

    async fn list_tags(&self, name: &str) -> Result<(Vec<String>, Outcome)> {
        let credential = self.credential(name, AuthAction::Pull).await?;
        let url = format!("{}/v2/{}/tags/list", self.address, name);

        let response = match self
            .send_simple(&credential, |client| client.get(&url), "tag listing")
            .await
        {
            Ok(response) => response,
            Err(outcome) => return Ok((Vec::new(), outcome)),
        };
        if !response.status().is_success() {
            return Ok((Vec::new(), Self::failure(response, "tag listing").await));
        }

        match response.json::<TagList>().await {
            Ok(list) => Ok((list.tags.unwrap_or_default(), Outcome::ok())),
            Err(e) => Ok((
                Vec::new(),
                NetworkErrorHandler::handle_network_error(&e, "tag list decode"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RegistryClient {
        RegistryClient::builder("https://registry.example/")
            .with_retry_policy(RetryPolicy::none())
            .with_logger(Logger::new_quiet())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_trims_address() {
        assert_eq!(client().address(), "https://registry.example");
    }

    #[test]
    fn test_builder_rejects_invalid_address() {
        assert!(RegistryClient::builder("not a url").build().is_err());
    }

    #[test]
    fn test_resolve_location() {
        let client = client();
        assert_eq!(
            client.resolve_location("library/redis", "/v2/library/redis/blobs/uploads/abc?_state=x"),
            "https://registry.example/v2/library/redis/blobs/uploads/abc?_state=x"
        );
        assert_eq!(
            client.resolve_location("library/redis", "https://cdn.example/upload/abc"),
            "https://cdn.example/upload/abc"
        );
        assert_eq!(
            client.resolve_location("library/redis", "abc"),
            "https://registry.example/v2/library/redis/blobs/uploads/abc"
        );
    }

    #[test]
    fn test_session_url_appends_digest() {
        let client = client();
        let with_state = UploadSession {
            id: "abc".to_string(),
            location: Some("https://registry.example/v2/library/redis/blobs/uploads/abc?_state=x".to_string()),
        };
        let url = client
            .session_url("library/redis", &with_state, "sha256:1234")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example/v2/library/redis/blobs/uploads/abc?_state=x&digest=sha256%3A1234"
        );

        let bare = UploadSession {
            id: "abc".to_string(),
            location: None,
        };
        let url = client.session_url("library/redis", &bare, "sha256:1234").unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example/v2/library/redis/blobs/uploads/abc?digest=sha256%3A1234"
        );
    }

    #[tokio::test]
    async fn test_operations_before_ping_are_auth_errors() {
        let err = client().list_tags("library/redis").await.unwrap_err();
        assert!(matches!(err, RegistryError::Auth(_)));
    }
}
