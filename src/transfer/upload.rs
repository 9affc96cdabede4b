//! Upload orchestration
//!
//! Reads the download manifest from the working directory and pushes every
//! successfully downloaded blob. An image whose tag already exists remotely is
//! skipped unless overwriting; a blob the registry already holds is not pushed.
//! Blobs shared between images are pushed once per run, into the repository of
//! the first image that claims them. Other repositories referencing the same
//! digest reuse that record; no cross-repository mount links them.

use super::progress::ImageProgress;
use super::record::{
    DOWNLOAD_MANIFEST_FILE, TransferManifest, TransferRecord, UPLOAD_MANIFEST_FILE,
    count_failures, read_json, write_json,
};
use super::{TransferContext, TransferReport, join_ordered};
use crate::concurrency::{Claim, LayerDeduplicator};
use crate::digest::DigestUtils;
use crate::error::{Outcome, Result};
use crate::image::{ImageReference, Layer};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Push even when the tag already exists remotely
    pub overwrite: bool,
    /// Push under this organization instead of the downloaded one
    pub org: Option<String>,
}

impl UploadOptions {
    /// `library/redis` becomes `<org>/redis` when an organization is set
    pub fn target(&self, image: &ImageReference) -> ImageReference {
        match self.org.as_deref().filter(|org| !org.is_empty()) {
            Some(org) => {
                let repo = image.name.rsplit('/').next().unwrap_or(&image.name);
                ImageReference::new(format!("{}/{}", org, repo), image.tag.clone())
            }
            None => image.clone(),
        }
    }
}

pub struct UploadOrchestrator {
    ctx: TransferContext,
    options: UploadOptions,
}

impl UploadOrchestrator {
    pub fn new(ctx: TransferContext, options: UploadOptions) -> Self {
        Self { ctx, options }
    }

    pub async fn run(&self) -> Result<TransferReport> {
        let ctx = &self.ctx;
        ctx.check_work_dir()?;
        let sources: Vec<TransferManifest> =
            read_json(&ctx.work_dir.join(DOWNLOAD_MANIFEST_FILE)).await?;
        ctx.registry.ping().await?;

        ctx.output.section(&format!(
            "Starting the upload of {} images (up to {} transfers at once) ...",
            sources.len(),
            ctx.limiter.max_concurrent()
        ));

        let dedup = LayerDeduplicator::new();
        let mut tasks = JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let ctx = ctx.clone();
            let dedup = dedup.clone();
            let options = self.options.clone();
            tasks.spawn(async move { (index, upload_image(&ctx, &dedup, &options, source).await) });
        }
        let results = join_ordered(tasks).await?;

        let skipped_images = results.iter().filter(|(_, skipped)| *skipped).count();
        let manifests: Vec<TransferManifest> =
            results.into_iter().map(|(manifest, _)| manifest).collect();
        write_json(&ctx.work_dir.join(UPLOAD_MANIFEST_FILE), &manifests).await?;

        let failures = count_failures(&manifests);
        Ok(TransferReport {
            manifests,
            failed_manifests: 0,
            skipped_images,
            failures,
            total_mb: 0,
        })
    }
}

/// Returns the image's records and whether it was skipped
async fn upload_image(
    ctx: &TransferContext,
    dedup: &LayerDeduplicator,
    options: &UploadOptions,
    source: TransferManifest,
) -> Result<(TransferManifest, bool)> {
    let image = options.target(&source.image);
    let progress = ImageProgress::new(&image, source.layers.len() + 1, ctx.output.clone());

    if !options.overwrite && tag_exists(ctx, &image).await? {
        ctx.output
            .info(&format!("{} already exists on the registry, skipping", image));
        let skipped = |record: &TransferRecord| TransferRecord {
            message: Some("tag already exists".to_string()),
            ..record.clone()
        };
        for _ in 0..=source.layers.len() {
            progress.incr();
        }
        let manifest = TransferManifest {
            config: skipped(&source.config),
            layers: source.layers.iter().map(skipped).collect(),
            image,
        };
        return Ok((manifest, true));
    }

    let config = push_shared(ctx, dedup, &image, &source.config).await?;
    progress.incr();

    let target = &image;
    let progress = &progress;
    let layers = join_all(source.layers.iter().map(|record| async move {
        let pushed = push_shared(ctx, dedup, target, record).await;
        progress.incr();
        pushed
    }))
    .await
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    let manifest = TransferManifest {
        image,
        config,
        layers,
    };
    progress.finish(manifest.failures());
    Ok((manifest, false))
}

async fn tag_exists(ctx: &TransferContext, image: &ImageReference) -> Result<bool> {
    let (tags, outcome) = ctx.registry.list_tags(&image.name).await?;
    Ok(outcome.is_ok() && tags.iter().any(|tag| tag == &image.tag))
}

/// Push the blob behind `record` unless another image already claimed its digest
async fn push_shared(
    ctx: &TransferContext,
    dedup: &LayerDeduplicator,
    image: &ImageReference,
    record: &TransferRecord,
) -> Result<TransferRecord> {
    if !record.is_ok() {
        return Ok(TransferRecord {
            message: Some(format!(
                "not downloaded: {}",
                record.message.as_deref().unwrap_or("unknown error")
            )),
            ..record.clone()
        });
    }

    let layer = Layer {
        digest: record.digest.clone(),
        ..Default::default()
    };
    match dedup.claim(&record.digest, &layer, image) {
        Claim::Transfer(publisher) => {
            let source = local_source(&ctx.work_dir, &record.local_path);
            let outcome = push_blob(ctx, image, &record.digest, &source).await?;
            if !outcome.is_ok() {
                ctx.output.error(&format!(
                    "Push blob {} of {} failed: {} {}",
                    DigestUtils::format_digest_short(&record.digest),
                    image,
                    outcome.status,
                    outcome.message.as_deref().unwrap_or_default()
                ));
            }
            Ok(publisher.publish(TransferRecord::new(&record.digest, &source, outcome)))
        }
        Claim::Await(handle) => Ok(handle.wait().await),
    }
}

/// Blob file inside this run's working directory. The recorded path is where the
/// download run wrote it, which no longer holds once the directory is moved.
fn local_source(work_dir: &Path, recorded: &str) -> PathBuf {
    match Path::new(recorded).file_name() {
        Some(file_name) => work_dir.join(file_name),
        None => work_dir.join(recorded),
    }
}

/// `CheckBlobExists`, then `BeginUpload` + `PushBlob` when the registry lacks it
async fn push_blob(
    ctx: &TransferContext,
    image: &ImageReference,
    digest: &str,
    source: &Path,
) -> Result<Outcome> {
    if ctx.registry.check_blob_exists(&image.name, digest).await?.is_ok() {
        ctx.output.detail(&format!(
            "Blob {} already exists in {}",
            DigestUtils::format_digest_short(digest),
            image.name
        ));
        return Ok(Outcome::ok());
    }

    let _permit = ctx.limiter.acquire().await;
    let (session, outcome) = ctx.registry.begin_upload(&image.name).await?;
    match session {
        Some(session) if outcome.is_ok() => {
            ctx.registry
                .push_blob(&image.name, &session, digest, source)
                .await
        }
        _ => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_keeps_image_without_org() {
        let image = ImageReference::new("library/redis", "6");
        assert_eq!(UploadOptions::default().target(&image), image);
        let empty = UploadOptions {
            org: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(empty.target(&image), image);
    }

    #[test]
    fn test_local_source_ignores_recorded_directory() {
        let work_dir = Path::new("/mnt/carried");
        assert_eq!(
            local_source(work_dir, "images/abc.tar.gz"),
            PathBuf::from("/mnt/carried/abc.tar.gz")
        );
        assert_eq!(
            local_source(work_dir, "/tmp/run/images/c1.json"),
            PathBuf::from("/mnt/carried/c1.json")
        );
    }

    #[test]
    fn test_target_replaces_org() {
        let options = UploadOptions {
            org: Some("mirror".to_string()),
            ..Default::default()
        };
        assert_eq!(
            options.target(&ImageReference::new("library/redis", "6")),
            ImageReference::new("mirror/redis", "6")
        );
    }
}
