//! Transfer orchestration
//!
//! Download: fetch every manifest, persist the raw results, compute the set of
//! unique layers, then fetch blobs with one task per image and one future per
//! layer. Upload mirrors this from the download manifest. Both share blobs across
//! images through the [`LayerDeduplicator`](crate::concurrency::LayerDeduplicator).

pub mod download;
pub mod progress;
pub mod record;
pub mod upload;

pub use download::DownloadOrchestrator;
pub use progress::ImageProgress;
pub use record::{ManifestResponse, TransferManifest, TransferRecord};
pub use upload::{UploadOptions, UploadOrchestrator};

use crate::concurrency::TransferLimiter;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::RegistryApi;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Everything a run needs, built once and cloned into each image task
#[derive(Clone)]
pub struct TransferContext {
    pub registry: Arc<dyn RegistryApi>,
    pub work_dir: PathBuf,
    pub limiter: TransferLimiter,
    pub output: Logger,
}

impl TransferContext {
    pub fn new(registry: Arc<dyn RegistryApi>, work_dir: impl Into<PathBuf>, output: Logger) -> Self {
        Self {
            registry,
            work_dir: work_dir.into(),
            limiter: TransferLimiter::default(),
            output,
        }
    }

    pub fn with_limiter(mut self, limiter: TransferLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// The working directory must be an existing directory
    pub fn check_work_dir(&self) -> Result<()> {
        if self.work_dir.is_dir() {
            Ok(())
        } else {
            Err(RegistryError::Precondition(format!(
                "Working directory {} does not exist",
                self.work_dir.display()
            )))
        }
    }
}

/// Summary handed back to the runner
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub manifests: Vec<TransferManifest>,
    /// Images whose manifest could not be fetched
    pub failed_manifests: usize,
    /// Images skipped because their tag already exists remotely
    pub skipped_images: usize,
    /// Failed manifests plus failed blob records
    pub failures: usize,
    pub total_mb: u64,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }
}

/// Join per-image tasks back into submission order. The first fatal error
/// aborts the remaining tasks and is returned.
async fn join_ordered<T: Send + 'static>(mut tasks: JoinSet<(usize, Result<T>)>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results.push((index, value)),
            Ok((_, Err(e))) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(e.into());
            }
        }
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, value)| value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_ordered_restores_submission_order() {
        let mut tasks = JoinSet::new();
        for index in 0..4usize {
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(((4 - index) * 5) as u64)).await;
                (index, Ok(index * 10))
            });
        }
        assert_eq!(join_ordered(tasks).await.unwrap(), vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_join_ordered_stops_on_fatal_error() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { (0usize, Ok(1)) });
        tasks.spawn(async { (1usize, Err(RegistryError::Auth("token is null".to_string()))) });
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            (2usize, Ok(3))
        });
        let err = join_ordered(tasks).await.unwrap_err();
        assert!(matches!(err, RegistryError::Auth(_)));
    }
}
