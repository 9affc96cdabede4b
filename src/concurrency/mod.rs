//! Concurrency coordination shared by the transfer tasks of a run
//!
//! [`LayerDeduplicator`] guarantees at most one transfer per blob digest.
//! [`TransferLimiter`] caps how many blob transfers hit the network at once.
//! Waiting on another task's transfer never holds a permit.

pub mod dedup;

pub use dedup::{Claim, ClaimState, LayerDeduplicator, Publisher, ResultHandle};

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_MAX_CONCURRENT: usize = 8;

#[derive(Debug, Clone)]
pub struct TransferLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TransferLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Wait for a free transfer slot. `None` only if the limiter was closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

impl Default for TransferLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_raised_to_one() {
        assert_eq!(TransferLimiter::new(0).max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let limiter = TransferLimiter::new(2);
        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(limiter.semaphore.available_permits(), 0);
        drop(first);
        assert_eq!(limiter.semaphore.available_permits(), 1);
    }
}
