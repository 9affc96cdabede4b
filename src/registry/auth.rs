//! Authentication negotiation for Docker registry access
//!
//! The registry announces its scheme in the `WWW-Authenticate` header of an
//! unauthenticated `GET /v2/` probe. [`AuthNegotiator::ping`] records the scheme
//! once per client; [`AuthNegotiator::authorize`] then derives a fresh credential
//! for every `(repository, action)` pair. Credentials are never cached across
//! calls because the bearer scope differs per repository and per pull/push.

use crate::cli::config::AuthConfig;
use crate::error::{Outcome, RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::RetryPolicy;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Bearer,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => f.write_str("none"),
            AuthMode::Basic => f.write_str("basic"),
            AuthMode::Bearer => f.write_str("bearer"),
        }
    }
}

/// Negotiated scheme, set once by ping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub mode: AuthMode,
    pub realm: String,
    pub service: String,
}

impl AuthSession {
    /// Build a session from the raw `WWW-Authenticate` header value, if any
    pub fn from_challenge(header: Option<&str>) -> Self {
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return Self::default();
        };

        if header.starts_with("Bearer") {
            let params = parse_challenge_params(header["Bearer".len()..].trim());
            return Self {
                mode: AuthMode::Bearer,
                realm: params.get("realm").cloned().unwrap_or_default(),
                service: params.get("service").cloned().unwrap_or_default(),
            };
        }

        // Any other scheme ("Basic realm=...") is handled as basic auth
        let params = header
            .split_once(char::is_whitespace)
            .map(|(_, rest)| parse_challenge_params(rest.trim()))
            .unwrap_or_default();
        Self {
            mode: AuthMode::Basic,
            realm: params.get("realm").cloned().unwrap_or_default(),
            service: params.get("service").cloned().unwrap_or_default(),
        }
    }
}

/// Parse a comma separated `key="value"` list. Commas inside quotes belong to the value.
fn parse_challenge_params(params: &str) -> HashMap<String, String> {
    let mut parsed = HashMap::new();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in params.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    for part in parts {
        if let Some((key, value)) = part.split_once('=') {
            parsed.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    parsed
}

/// What a credential is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Pull,
    PushPull,
}

impl AuthAction {
    pub fn scope_action(&self) -> &'static str {
        match self {
            AuthAction::Pull => "pull",
            AuthAction::PushPull => "push,pull",
        }
    }
}

/// Credential for one registry call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic(String),
    Bearer(String),
}

impl Credential {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Anonymous => request,
            Credential::Basic(encoded) => {
                request.header(reqwest::header::AUTHORIZATION, format!("Basic {}", encoded))
            }
            Credential::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthNegotiator {
    client: Client,
    address: String,
    auth_config: AuthConfig,
    retry: RetryPolicy,
    session: Arc<RwLock<Option<AuthSession>>>,
    output: Logger,
}

impl AuthNegotiator {
    pub fn new(
        client: Client,
        address: &str,
        auth_config: AuthConfig,
        retry: RetryPolicy,
        output: Logger,
    ) -> Self {
        Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            auth_config,
            retry,
            session: Arc::new(RwLock::new(None)),
            output,
        }
    }

    /// Probe `GET /v2/` and record the negotiated scheme.
    ///
    /// Failing to reach the host is a [`RegistryError::Connection`]; any HTTP answer
    /// (including 401) counts as reachable.
    pub async fn ping(&self) -> Result<AuthSession> {
        let url = format!("{}/v2/", self.address);
        self.output.verbose(&format!("Pinging {} ...", url));

        let response = self
            .retry
            .send(|| async { Ok::<_, Outcome>(self.client.get(&url)) }, &self.output, "registry ping")
            .await
            .map_err(|outcome| {
                RegistryError::Connection(
                    outcome
                        .message
                        .unwrap_or_else(|| format!("Cannot reach {}", self.address)),
                )
            })?;

        let header = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok());
        let session = AuthSession::from_challenge(header);

        self.output.verbose(&format!(
            "Ping {} OK (status {}), auth mode: {}, realm: {}, service: {}",
            self.address,
            response.status(),
            session.mode,
            session.realm,
            session.service
        ));

        let mut guard = self
            .session
            .write()
            .map_err(|_| RegistryError::Internal("Failed to acquire session write lock".to_string()))?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Session recorded by the last successful ping
    pub fn session(&self) -> Option<AuthSession> {
        self.session.read().ok().and_then(|guard| guard.clone())
    }

    /// Credential for `repository` under the session recorded by [`ping`](Self::ping)
    pub async fn authorize(&self, repository: &str, action: AuthAction) -> Result<Credential> {
        let session = self.session().ok_or_else(|| {
            RegistryError::Auth("Registry has not been pinged; auth mode unknown".to_string())
        })?;
        self.authorize_with(&session, repository, action).await
    }

    pub async fn authorize_with(
        &self,
        session: &AuthSession,
        repository: &str,
        action: AuthAction,
    ) -> Result<Credential> {
        match session.mode {
            AuthMode::None => Ok(Credential::Anonymous),
            AuthMode::Basic => self
                .auth_config
                .basic_token()
                .map(Credential::Basic)
                .ok_or_else(|| RegistryError::Auth("bad credential".to_string())),
            AuthMode::Bearer => self.fetch_token(session, repository, action).await,
        }
    }

    async fn fetch_token(
        &self,
        session: &AuthSession,
        repository: &str,
        action: AuthAction,
    ) -> Result<Credential> {
        if session.realm.is_empty() {
            return Err(RegistryError::Auth(
                "Bearer challenge did not name a token realm".to_string(),
            ));
        }

        let scope = format!("repository:{}:{}", repository, action.scope_action());
        self.output
            .detail(&format!("Requesting token from {} for {}", session.realm, scope));

        let response = self
            .retry
            .send(
                || async {
                    let mut request = self
                        .client
                        .get(&session.realm)
                        .query(&[("service", session.service.as_str()), ("scope", scope.as_str())]);
                    if let (Some(username), Some(password)) =
                        (self.auth_config.username(), self.auth_config.password())
                    {
                        request = request.basic_auth(username, Some(password));
                    }
                    Ok::<_, Outcome>(request)
                },
                &self.output,
                "token request",
            )
            .await
            .map_err(|outcome| {
                RegistryError::Auth(
                    outcome
                        .message
                        .unwrap_or_else(|| "Token request failed".to_string()),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RegistryError::Auth(format!(
                "Token request for {} failed with status {}: {}",
                scope, status, error_text
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Auth(format!("Failed to parse token response: {}", e)))?;

        match body.token.or(body.access_token).filter(|t| !t.is_empty()) {
            Some(token) => Ok(Credential::Bearer(token)),
            None => Err(RegistryError::Auth("token is null".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_header_means_no_auth() {
        assert_eq!(AuthSession::from_challenge(None).mode, AuthMode::None);
        assert_eq!(AuthSession::from_challenge(Some("  ")).mode, AuthMode::None);
    }

    #[test]
    fn test_bearer_challenge() {
        let session = AuthSession::from_challenge(Some(
            r#"Bearer realm="https://auth.example/token",service="registry.example""#,
        ));
        assert_eq!(session.mode, AuthMode::Bearer);
        assert_eq!(session.realm, "https://auth.example/token");
        assert_eq!(session.service, "registry.example");
    }

    #[test]
    fn test_bearer_scope_with_comma_inside_quotes() {
        let session = AuthSession::from_challenge(Some(
            r#"Bearer realm="https://auth.docker.io/token", service="registry.docker.io", scope="repository:library/redis:pull,push""#,
        ));
        assert_eq!(session.realm, "https://auth.docker.io/token");
        assert_eq!(session.service, "registry.docker.io");
    }

    #[test]
    fn test_basic_challenge() {
        let session = AuthSession::from_challenge(Some(r#"Basic realm="Registry Realm""#));
        assert_eq!(session.mode, AuthMode::Basic);
        assert_eq!(session.realm, "Registry Realm");
        assert!(session.service.is_empty());
    }

    #[test]
    fn test_scope_actions() {
        assert_eq!(AuthAction::Pull.scope_action(), "pull");
        assert_eq!(AuthAction::PushPull.scope_action(), "push,pull");
    }

    fn negotiator(auth_config: AuthConfig) -> AuthNegotiator {
        AuthNegotiator::new(
            Client::new(),
            "http://127.0.0.1:1",
            auth_config,
            RetryPolicy::none(),
            Logger::new_quiet(),
        )
    }

    #[tokio::test]
    async fn test_basic_requires_credentials() {
        let session = AuthSession {
            mode: AuthMode::Basic,
            ..Default::default()
        };
        let err = negotiator(AuthConfig::default())
            .authorize_with(&session, "library/redis", AuthAction::Pull)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Auth(ref msg) if msg == "bad credential"));
    }

    #[tokio::test]
    async fn test_basic_encodes_user_and_password() {
        let session = AuthSession {
            mode: AuthMode::Basic,
            ..Default::default()
        };
        let credential = negotiator(AuthConfig::new("admin", "secret"))
            .authorize_with(&session, "library/redis", AuthAction::PushPull)
            .await
            .unwrap();
        assert_eq!(credential, Credential::Basic("YWRtaW46c2VjcmV0".to_string()));
    }

    #[tokio::test]
    async fn test_none_mode_is_anonymous() {
        let credential = negotiator(AuthConfig::default())
            .authorize_with(&AuthSession::default(), "library/redis", AuthAction::Pull)
            .await
            .unwrap();
        assert_eq!(credential, Credential::Anonymous);
    }

    #[tokio::test]
    async fn test_authorize_before_ping_fails() {
        let err = negotiator(AuthConfig::default())
            .authorize("library/redis", AuthAction::Pull)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Auth(_)));
    }
}
