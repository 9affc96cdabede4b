//! Download orchestration
//!
//! `FetchingManifests -> CheckingManifests -> TransferringBlobs -> Finalizing`.
//! Failed manifests are excluded and counted; the run continues with the rest.

use super::progress::ImageProgress;
use super::record::{
    DOWNLOAD_MANIFEST_FILE, MANIFEST_RESPONSES_FILE, ManifestResponse, TransferManifest,
    TransferRecord, count_failures, write_json,
};
use super::{TransferContext, TransferReport, join_ordered};
use crate::concurrency::{Claim, ClaimState, LayerDeduplicator};
use crate::digest::{BlobKind, DigestUtils};
use crate::error::{Result, Status};
use crate::image::{ImageReference, ImageSet, Layer, Manifest};
use futures::future::join_all;
use tokio::task::JoinSet;

pub struct DownloadOrchestrator {
    ctx: TransferContext,
}

impl DownloadOrchestrator {
    pub fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, image_set: &ImageSet) -> Result<TransferReport> {
        let ctx = &self.ctx;
        ctx.check_work_dir()?;
        ctx.registry.ping().await?;

        ctx.output.section(&format!(
            "Starting the download of the {} ...",
            image_set.display_org()
        ));

        let responses = self.fetch_manifests(image_set.references()).await?;
        let failed_manifests = self.check_manifests(&responses);
        write_json(&ctx.work_dir.join(MANIFEST_RESPONSES_FILE), &responses).await?;

        let dedup = LayerDeduplicator::compute_required(&responses);
        ctx.output
            .warning("Please make sure you have enough disk space for downloading images.");
        ctx.output.info(&format!(
            "Total size of the images: {} MB ({} unique layers), up to {} transfers at once.",
            dedup.total_mb(),
            dedup.len(),
            ctx.limiter.max_concurrent()
        ));

        let mut tasks = JoinSet::new();
        for (index, response) in responses.into_iter().filter(ManifestResponse::is_ok).enumerate() {
            let ctx = ctx.clone();
            let dedup = dedup.clone();
            tasks.spawn(async move { (index, download_image(&ctx, &dedup, response.manifest).await) });
        }
        let manifests = join_ordered(tasks).await?;

        write_json(&ctx.work_dir.join(DOWNLOAD_MANIFEST_FILE), &manifests).await?;

        let failures = failed_manifests + count_failures(&manifests);
        Ok(TransferReport {
            manifests,
            failed_manifests,
            skipped_images: 0,
            failures,
            total_mb: dedup.total_mb(),
        })
    }

    /// One task per image; no early cancellation on individual failures
    async fn fetch_manifests(&self, references: Vec<ImageReference>) -> Result<Vec<ManifestResponse>> {
        self.ctx
            .output
            .step(&format!("Fetching {} manifests", references.len()));

        let mut tasks = JoinSet::new();
        for (index, image) in references.into_iter().enumerate() {
            let registry = self.ctx.registry.clone();
            tasks.spawn(async move {
                (index, registry.fetch_manifest(&image.name, &image.tag).await)
            });
        }
        join_ordered(tasks).await
    }

    fn check_manifests(&self, responses: &[ManifestResponse]) -> usize {
        let failed: Vec<&ManifestResponse> = responses.iter().filter(|r| !r.is_ok()).collect();
        for response in &failed {
            self.ctx.output.error(&format!(
                "Fetch manifest of {} failed: {} {}",
                response.manifest.image,
                response.status,
                response.message.as_deref().unwrap_or_default()
            ));
        }
        if !failed.is_empty() {
            self.ctx.output.warning(&format!(
                "{} of {} images will not be downloaded",
                failed.len(),
                responses.len()
            ));
        }
        failed.len()
    }
}

async fn download_image(
    ctx: &TransferContext,
    dedup: &LayerDeduplicator,
    manifest: Manifest,
) -> Result<TransferManifest> {
    let image = manifest.image.clone();
    let progress = ImageProgress::new(&image, manifest.layers.len() + 1, ctx.output.clone());

    let config = fetch_shared(ctx, dedup, &image, &manifest.config, BlobKind::Config).await?;
    progress.incr();

    let target = &image;
    let progress = &progress;
    let layers = join_all(manifest.layers.iter().map(|layer| async move {
        let record = fetch_shared(ctx, dedup, target, layer, BlobKind::Layer).await;
        progress.incr();
        record
    }))
    .await
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    let transfer = TransferManifest {
        image,
        config,
        layers,
    };
    progress.finish(transfer.failures());
    Ok(transfer)
}

/// Fetch `layer` unless another image already claimed it, in which case reuse its record
async fn fetch_shared(
    ctx: &TransferContext,
    dedup: &LayerDeduplicator,
    image: &ImageReference,
    layer: &Layer,
    kind: BlobKind,
) -> Result<TransferRecord> {
    let path = match DigestUtils::local_path(&ctx.work_dir, &layer.digest, kind) {
        Ok(path) => path,
        Err(e) => {
            return Ok(TransferRecord {
                status: Status::InternalError,
                message: Some(e.to_string()),
                digest: layer.digest.clone(),
                local_path: String::new(),
            });
        }
    };

    match dedup.claim(&layer.digest, layer, image) {
        Claim::Transfer(publisher) => {
            let _permit = ctx.limiter.acquire().await;
            let outcome = ctx
                .registry
                .fetch_blob(&image.name, &layer.digest, &path)
                .await?;
            if !outcome.is_ok() {
                ctx.output.error(&format!(
                    "Fetch blob {} of {} failed: {} {}",
                    DigestUtils::format_digest_short(&layer.digest),
                    image,
                    outcome.status,
                    outcome.message.as_deref().unwrap_or_default()
                ));
            }
            Ok(publisher.publish(TransferRecord::new(&layer.digest, &path, outcome)))
        }
        Claim::Await(handle) => {
            let owner = dedup
                .owner(&layer.digest)
                .map(|owner| owner.to_string())
                .unwrap_or_default();
            let verb = match dedup.state(&layer.digest) {
                Some(ClaimState::Done) => "already fetched",
                _ => "being fetched",
            };
            ctx.output.detail(&format!(
                "Blob {} of {} is shared, {} for {}",
                DigestUtils::format_digest_short(&layer.digest),
                image,
                verb,
                owner
            ));
            Ok(handle.wait().await)
        }
    }
}
