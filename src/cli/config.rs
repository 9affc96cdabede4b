//! Configuration management module
//!
//! [`AppConfig`] is built from the parsed arguments, then overridden from
//! `IMAGE_COURIER_*` environment variables, then validated.

use crate::cli::args::{Args, Command};
use crate::concurrency::TransferLimiter;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::RetryPolicy;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Authentication configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// base64 of `user:pass`, when both are configured
    pub fn basic_token(&self) -> Option<String> {
        match (self.username(), self.password()) {
            (Some(username), Some(password)) => {
                Some(STANDARD.encode(format!("{}:{}", username, password)))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Download,
    Upload,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
        }
    }

    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.as_str())
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub operation: Operation,
    pub registry: String,
    pub auth: AuthConfig,
    pub org: Option<String>,
    pub dir: PathBuf,
    pub image_set: PathBuf,
    pub retry_attempts: u32,
    pub max_backoff_secs: u64,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub skip_tls: bool,
    pub overwrite: bool,
    pub force: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            operation: Operation::Download,
            registry: "https://registry-1.docker.io".to_string(),
            auth: AuthConfig::default(),
            org: None,
            dir: PathBuf::from("images"),
            image_set: PathBuf::from("images.yaml"),
            retry_attempts: 3,
            max_backoff_secs: 5,
            timeout_secs: 7200,
            max_concurrent: 8,
            skip_tls: false,
            overwrite: false,
            force: false,
            verbose: false,
            quiet: false,
        }
    }
}

impl AppConfig {
    pub fn from_args(args: &Args) -> Self {
        let common = args.common();
        let mut config = Self {
            registry: common.registry.clone(),
            auth: AuthConfig {
                username: common.username.clone(),
                password: common.password.clone(),
            },
            org: common.org.clone().filter(|org| !org.is_empty()),
            dir: PathBuf::from(&common.dir),
            retry_attempts: common.retry,
            max_backoff_secs: common.max_backoff,
            timeout_secs: common.timeout,
            max_concurrent: common.concurrency,
            skip_tls: common.skip_tls,
            force: common.force,
            verbose: common.verbose,
            quiet: common.quiet,
            ..Default::default()
        };

        match &args.command {
            Command::Download(download) => {
                config.operation = Operation::Download;
                config.image_set = PathBuf::from(&download.image_set);
            }
            Command::Upload(upload) => {
                config.operation = Operation::Upload;
                config.overwrite = upload.overwrite;
            }
        }
        config
    }

    /// Apply `IMAGE_COURIER_*` overrides from the process environment
    pub fn with_env(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Credentials only fill what the flags left empty; the other variables override
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.auth.username().is_none() {
            self.auth.username = lookup("IMAGE_COURIER_USERNAME");
        }
        if self.auth.password().is_none() {
            self.auth.password = lookup("IMAGE_COURIER_PASSWORD");
        }
        if let Some(registry) = lookup("IMAGE_COURIER_REGISTRY").filter(|r| !r.is_empty()) {
            self.registry = registry;
        }
        if let Some(retry) = lookup("IMAGE_COURIER_RETRY").and_then(|r| r.parse().ok()) {
            self.retry_attempts = retry;
        }
        if lookup("IMAGE_COURIER_VERBOSE").is_some() {
            self.verbose = true;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(RegistryError::Validation(
                "Registry address cannot be empty".to_string(),
            ));
        }
        if !self.registry.starts_with("http://") && !self.registry.starts_with("https://") {
            return Err(RegistryError::Validation(format!(
                "Invalid registry address: {}. Must start with http:// or https://",
                self.registry
            )));
        }
        if self.timeout_secs == 0 {
            return Err(RegistryError::Validation(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(RegistryError::Validation(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.auth.username().is_some() != self.auth.password().is_some() {
            return Err(RegistryError::Validation(
                "Username and password must be given together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    pub fn limiter(&self) -> TransferLimiter {
        TransferLimiter::new(self.max_concurrent)
    }

    /// Console logger honouring the quiet/verbose flags
    pub fn logger(&self) -> Logger {
        if self.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(self.verbose)
        }
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.dir.join(self.operation.log_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_basic_token() {
        let auth = AuthConfig::new("admin", "secret");
        assert_eq!(auth.basic_token().as_deref(), Some("YWRtaW46c2VjcmV0"));
        assert_eq!(AuthConfig::default().basic_token(), None);
        assert_eq!(AuthConfig::new("admin", "").basic_token(), None);
    }

    #[test]
    fn test_from_args() {
        let args = Args::try_parse_from([
            "image-courier",
            "download",
            "-i",
            "set.yaml",
            "-d",
            "/tmp/out",
            "-o",
            "itom",
            "-t",
            "5",
        ])
        .unwrap();
        let config = AppConfig::from_args(&args);
        assert_eq!(config.operation, Operation::Download);
        assert_eq!(config.image_set, PathBuf::from("set.yaml"));
        assert_eq!(config.dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.org.as_deref(), Some("itom"));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.log_file_path(), PathBuf::from("/tmp/out/download.log"));
    }

    #[test]
    fn test_env_fills_missing_credentials_only() {
        let config = AppConfig {
            auth: AuthConfig {
                username: Some("flag-user".to_string()),
                password: None,
            },
            ..Default::default()
        }
        .apply_env(env(&[
            ("IMAGE_COURIER_USERNAME", "env-user"),
            ("IMAGE_COURIER_PASSWORD", "env-pass"),
            ("IMAGE_COURIER_REGISTRY", "http://localhost:5000"),
            ("IMAGE_COURIER_RETRY", "7"),
            ("IMAGE_COURIER_VERBOSE", "1"),
        ]));
        assert_eq!(config.auth.username(), Some("flag-user"));
        assert_eq!(config.auth.password(), Some("env-pass"));
        assert_eq!(config.registry, "http://localhost:5000");
        assert_eq!(config.retry_attempts, 7);
        assert!(config.verbose);
    }

    #[test]
    fn test_validate() {
        assert!(AppConfig::default().validate().is_ok());

        let bad_scheme = AppConfig {
            registry: "registry.example".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad_scheme.validate(), Err(RegistryError::Validation(_))));

        let half_credentials = AppConfig {
            auth: AuthConfig {
                username: Some("admin".to_string()),
                password: None,
            },
            ..Default::default()
        };
        assert!(half_credentials.validate().is_err());

        let zero_timeout = AppConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
