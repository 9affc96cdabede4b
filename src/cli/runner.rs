//! Runs one operation: lock, working directory, transfer, signals, exit code

use crate::cli::config::{AppConfig, Operation};
use crate::error::{RegistryError, Result};
use crate::image::ImageSet;
use crate::lock::ProcessLock;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::transfer::{
    DownloadOrchestrator, TransferContext, TransferReport, UploadOptions, UploadOrchestrator,
};
use std::sync::Arc;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_TRANSFER_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Interrupt,
    Quit,
    Terminate,
}

impl ExitSignal {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitSignal::Interrupt | ExitSignal::Quit => 0,
            ExitSignal::Terminate => 1,
        }
    }
}

pub struct Runner {
    config: AppConfig,
    output: Logger,
}

impl Runner {
    pub fn new(config: AppConfig) -> Self {
        let output = config.logger();
        Self { config, output }
    }

    /// Run to completion or until a signal arrives; returns the process exit code.
    /// The lock is released on every path before returning.
    pub async fn run(mut self) -> i32 {
        let operation = self.config.operation.as_str();

        let mut lock = if self.config.force {
            self.output.warning("Process lock ignored (--force)");
            None
        } else {
            match ProcessLock::acquire(ProcessLock::default_path(operation)) {
                Ok(lock) => Some(lock),
                Err(e) => {
                    self.output.error(&e.to_string());
                    return EXIT_FATAL;
                }
            }
        };

        let code = match self.prepare_work_dir() {
            Ok(()) => {
                tokio::select! {
                    result = self.execute() => self.exit_code(result),
                    signal = wait_for_signal() => {
                        self.output.warning(&format!("Received {:?}, stopping {}", signal, operation));
                        signal.exit_code()
                    }
                }
            }
            Err(e) => {
                self.output.error(&e.to_string());
                EXIT_FATAL
            }
        };

        if self.output.has_log_file() {
            self.output.info(&format!(
                "You can refer to {} for more detail.",
                self.config.log_file_path().display()
            ));
        }
        if let Some(lock) = lock.as_mut() {
            lock.release();
        }
        code
    }

    /// Download creates the working directory; upload requires it. The run log goes inside.
    fn prepare_work_dir(&mut self) -> Result<()> {
        let dir = &self.config.dir;
        match self.config.operation {
            Operation::Download => std::fs::create_dir_all(dir).map_err(|e| {
                RegistryError::Precondition(format!(
                    "Cannot create working directory {}: {}",
                    dir.display(),
                    e
                ))
            })?,
            Operation::Upload if !dir.is_dir() => {
                return Err(RegistryError::Precondition(format!(
                    "Images directory {} does not exist",
                    dir.display()
                )));
            }
            Operation::Upload => {}
        }
        self.output = self.output.clone().with_log_file(&self.config.log_file_path());
        Ok(())
    }

    async fn execute(&self) -> Result<TransferReport> {
        let config = &self.config;
        self.output.section(&format!("image-courier {}", config.operation.as_str()));
        self.output.summary_kv(
            "Configuration",
            &[
                ("Registry", config.registry.clone()),
                ("Directory", config.dir.display().to_string()),
                ("Retry", config.retry_attempts.to_string()),
                ("Concurrency", config.max_concurrent.to_string()),
            ],
        );

        // Input files are checked before any network activity
        let image_set = match config.operation {
            Operation::Download => {
                let mut image_set = ImageSet::load(&config.image_set)?;
                if let Some(org) = &config.org {
                    image_set.org_name = org.clone();
                }
                Some(image_set)
            }
            Operation::Upload => None,
        };

        let client = RegistryClient::builder(config.registry.as_str())
            .with_auth(config.auth.clone())
            .with_skip_tls(config.skip_tls)
            .with_timeout(config.timeout_secs)
            .with_retry_policy(config.retry_policy())
            .with_logger(self.output.clone())
            .build()?;
        let ctx = TransferContext::new(Arc::new(client), config.dir.clone(), self.output.clone())
            .with_limiter(config.limiter());

        let report = match image_set {
            Some(image_set) => DownloadOrchestrator::new(ctx).run(&image_set).await?,
            None => {
                let options = UploadOptions {
                    overwrite: config.overwrite,
                    org: config.org.clone(),
                };
                UploadOrchestrator::new(ctx, options).run().await?
            }
        };

        self.report(&report);
        Ok(report)
    }

    fn report(&self, report: &TransferReport) {
        let blobs: usize = report.manifests.iter().map(|m| m.layers.len() + 1).sum();
        self.output.summary_kv(
            "Summary",
            &[
                ("Images", report.manifests.len().to_string()),
                ("Blobs", blobs.to_string()),
                ("Failed manifests", report.failed_manifests.to_string()),
                ("Skipped images", report.skipped_images.to_string()),
                ("Failures", report.failures.to_string()),
                ("Elapsed", self.output.format_duration(self.output.elapsed())),
            ],
        );
    }

    fn exit_code(&self, result: Result<TransferReport>) -> i32 {
        match result {
            Ok(report) if report.is_success() => {
                self.output.success(&format!(
                    "{} successfully.",
                    capitalize(self.config.operation.as_str())
                ));
                EXIT_SUCCESS
            }
            Ok(report) => {
                self.output.error(&format!(
                    "{} finished with {} failures.",
                    capitalize(self.config.operation.as_str()),
                    report.failures
                ));
                EXIT_TRANSFER_FAILED
            }
            Err(e) => {
                self.output.error(&e.to_string());
                EXIT_FATAL
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> ExitSignal {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut interrupt), Ok(mut quit), Ok(mut terminate)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
        signal(SignalKind::terminate()),
    ) else {
        return std::future::pending().await;
    };

    tokio::select! {
        _ = interrupt.recv() => ExitSignal::Interrupt,
        _ = quit.recv() => ExitSignal::Quit,
        _ = terminate.recv() => ExitSignal::Terminate,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ExitSignal {
    match tokio::signal::ctrl_c().await {
        Ok(()) => ExitSignal::Interrupt,
        Err(_) => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_exit_codes() {
        assert_eq!(ExitSignal::Interrupt.exit_code(), 0);
        assert_eq!(ExitSignal::Quit.exit_code(), 0);
        assert_eq!(ExitSignal::Terminate.exit_code(), 1);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("download"), "Download");
        assert_eq!(capitalize(""), "");
    }

    #[tokio::test]
    async fn test_upload_without_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            operation: Operation::Upload,
            dir: dir.path().join("missing"),
            force: true,
            quiet: true,
            ..Default::default()
        };
        assert_eq!(Runner::new(config).run().await, EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_missing_image_set_is_fatal_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            operation: Operation::Download,
            dir: dir.path().join("images"),
            image_set: dir.path().join("absent.yaml"),
            registry: "http://127.0.0.1:1".to_string(),
            force: true,
            quiet: true,
            ..Default::default()
        };
        assert_eq!(Runner::new(config).run().await, EXIT_FATAL);
        assert!(dir.path().join("images").join("download.log").exists());
    }
}
