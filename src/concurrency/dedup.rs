//! Claim-or-await registry of blob digests
//!
//! Every digest maps to one entry holding a `watch` channel. The first task to
//! claim a digest gets a [`Publisher`] and performs the transfer; every later
//! claimant gets a [`ResultHandle`] that resolves to the very record the publisher
//! stores. Dropping a `Publisher` without publishing stores an `internal_error`
//! record so waiters never hang.

use crate::error::Status;
use crate::image::{ImageReference, Layer};
use crate::transfer::record::{ManifestResponse, TransferRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Unclaimed,
    InProgress,
    Done,
}

#[derive(Debug)]
struct RequiredLayer {
    layer: Layer,
    owner: ImageReference,
    state: ClaimState,
    result: Arc<watch::Sender<Option<TransferRecord>>>,
}

impl RequiredLayer {
    fn new(layer: Layer, owner: ImageReference) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            layer,
            owner,
            state: ClaimState::Unclaimed,
            result: Arc::new(result),
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, RequiredLayer>>>;

/// What a caller of [`LayerDeduplicator::claim`] must do next
#[derive(Debug)]
pub enum Claim {
    /// Perform the transfer, then hand the record to the publisher
    Transfer(Publisher),
    /// Someone else transfers this digest; await their record
    Await(ResultHandle),
}

/// Shared across all transfer tasks of one run
#[derive(Debug, Clone, Default)]
pub struct LayerDeduplicator {
    entries: Registry,
    total_mb: u64,
}

fn lock(entries: &Registry) -> MutexGuard<'_, HashMap<String, RequiredLayer>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LayerDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every layer of every successful manifest. Failed manifests and
    /// manifests without layers contribute nothing. The size estimate counts each
    /// digest once, rounding each layer up to whole MB.
    pub fn compute_required(responses: &[ManifestResponse]) -> Self {
        let mut entries = HashMap::new();
        let mut total_mb = 0;

        for response in responses.iter().filter(|r| r.is_ok()) {
            for layer in &response.manifest.layers {
                if entries.contains_key(&layer.digest) {
                    continue;
                }
                total_mb += layer.size.div_ceil(BYTES_PER_MB);
                entries.insert(
                    layer.digest.clone(),
                    RequiredLayer::new(layer.clone(), response.manifest.image.clone()),
                );
            }
        }

        Self {
            entries: Arc::new(Mutex::new(entries)),
            total_mb,
        }
    }

    pub fn total_mb(&self) -> u64 {
        self.total_mb
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, digest: &str) -> Option<ClaimState> {
        lock(&self.entries).get(digest).map(|entry| entry.state)
    }

    /// Image that first referenced `digest`
    pub fn owner(&self, digest: &str) -> Option<ImageReference> {
        lock(&self.entries).get(digest).map(|entry| entry.owner.clone())
    }

    /// Atomic check-and-set on `digest`. Digests not seen by
    /// [`compute_required`](Self::compute_required) (config blobs) are added on first claim.
    pub fn claim(&self, digest: &str, layer: &Layer, owner: &ImageReference) -> Claim {
        let mut entries = lock(&self.entries);
        let entry = entries
            .entry(digest.to_string())
            .or_insert_with(|| RequiredLayer::new(layer.clone(), owner.clone()));

        match entry.state {
            ClaimState::Unclaimed => {
                entry.state = ClaimState::InProgress;
                Claim::Transfer(Publisher {
                    digest: digest.to_string(),
                    entries: Arc::clone(&self.entries),
                    sender: Arc::clone(&entry.result),
                    published: false,
                })
            }
            ClaimState::InProgress | ClaimState::Done => Claim::Await(ResultHandle {
                digest: digest.to_string(),
                receiver: entry.result.subscribe(),
            }),
        }
    }
}

/// Sole right to transfer one digest
#[derive(Debug)]
pub struct Publisher {
    digest: String,
    entries: Registry,
    sender: Arc<watch::Sender<Option<TransferRecord>>>,
    published: bool,
}

impl Publisher {
    /// Store the record, mark the digest done and wake every waiter
    pub fn publish(mut self, record: TransferRecord) -> TransferRecord {
        self.store(record.clone());
        record
    }

    fn store(&mut self, record: TransferRecord) {
        if let Some(entry) = lock(&self.entries).get_mut(&self.digest) {
            entry.state = ClaimState::Done;
        }
        self.sender.send_replace(Some(record));
        self.published = true;
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.published {
            let record = abandoned(&self.digest);
            self.store(record);
        }
    }
}

/// Pending result of another task's transfer
#[derive(Debug)]
pub struct ResultHandle {
    digest: String,
    receiver: watch::Receiver<Option<TransferRecord>>,
}

impl ResultHandle {
    pub async fn wait(mut self) -> TransferRecord {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(|| abandoned(&self.digest)),
            Err(_) => abandoned(&self.digest),
        }
    }
}

fn abandoned(digest: &str) -> TransferRecord {
    TransferRecord {
        status: Status::InternalError,
        message: Some("transfer abandoned".to_string()),
        digest: digest.to_string(),
        local_path: String::new(),
    }
}
