//! Thumbnail enrichment for newly seen news items.
//!
//! For each record added in the current run, the thumbnail is downloaded,
//! scaled down to the configured maximum width and written as PNG into the
//! thumbnails directory. Failures are logged per item and never reach the
//! persisted state.

use crate::config::EnrichSettings;
use crate::http::{Fetch, FetchError};
use crate::models::NewsRecord;
use crate::utils::{ensure_writable_dir, slugify_title};
use futures::stream::{self, StreamExt};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat};
use sha2::{Digest, Sha256};
use std::io::{self, Cursor};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

const MAX_SLUG_LEN: usize = 80;
const DIGEST_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("record has no thumbnail")]
    NoThumbnail,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("resize task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome counts of one enrichment pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Scale an encoded image down to at most `max_width` pixels wide.
///
/// The aspect ratio is kept and narrower images are not upscaled. The result
/// is always PNG.
pub fn resize_to_width(bytes: &[u8], max_width: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();

    let img = if w > max_width {
        let new_h = ((u64::from(h) * u64::from(max_width)) / u64::from(w)).max(1) as u32;
        let resized = imageops::resize(&img.to_rgba8(), max_width, new_h, FilterType::Lanczos3);
        DynamicImage::ImageRgba8(resized)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// File name for a record's thumbnail.
///
/// A readable slug from the title (or link) followed by a short digest of
/// the record's identity, so records sharing a headline never share a file.
pub fn thumbnail_filename(record: &NewsRecord) -> String {
    let mut slug = slugify_title(&record.title);
    if slug.is_empty() {
        slug = record
            .link
            .as_deref()
            .map(|link| slugify_title(&link.replace('/', " ")))
            .unwrap_or_default();
    }
    if slug.is_empty() {
        slug = "untitled".to_string();
    }
    if let Some((cut, _)) = slug.char_indices().nth(MAX_SLUG_LEN) {
        slug.truncate(cut);
    }

    let identity = record
        .link
        .as_deref()
        .or(record.thumbnail.as_deref())
        .unwrap_or(&record.title);
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..DIGEST_BYTES]);

    format!("{slug}-{digest}.png")
}

/// Download, resize and store the thumbnail of a single record.
#[instrument(level = "debug", skip_all, fields(title = %record.title))]
pub async fn enrich_one<F: Fetch>(
    fetcher: &F,
    record: &NewsRecord,
    settings: &EnrichSettings,
) -> Result<PathBuf, EnrichError> {
    let url = record.thumbnail.as_deref().ok_or(EnrichError::NoThumbnail)?;
    let bytes = fetcher.get_bytes(url).await?;
    debug!(bytes = bytes.len(), "Downloaded thumbnail");

    let max_width = settings.max_width;
    let png = tokio::task::spawn_blocking(move || resize_to_width(&bytes, max_width)).await??;

    let path = settings.output_dir.join(thumbnail_filename(record));
    if let Err(source) = fs::write(&path, &png).await {
        return Err(EnrichError::Write { path, source });
    }
    Ok(path)
}

/// Enrich `records` with at most `settings.concurrency` downloads in flight.
#[instrument(level = "info", skip_all, fields(count = records.len(), concurrency = settings.concurrency))]
pub async fn enrich_records<F: Fetch>(
    fetcher: &F,
    records: &[NewsRecord],
    settings: &EnrichSettings,
) -> EnrichReport {
    let mut report = EnrichReport::default();
    let (with_thumb, without_thumb): (Vec<&NewsRecord>, Vec<&NewsRecord>) =
        records.iter().partition(|r| r.thumbnail.is_some());

    for record in &without_thumb {
        debug!(title = %record.title, "No thumbnail; skipping enrichment");
    }
    report.skipped = without_thumb.len();

    if with_thumb.is_empty() {
        return report;
    }

    if let Err(e) = ensure_writable_dir(&settings.output_dir).await {
        error!(
            stage = "enrich",
            path = %settings.output_dir.display(),
            error = %e,
            "Thumbnails directory is not writable"
        );
        report.failed = with_thumb.len();
        return report;
    }

    let results: Vec<(&NewsRecord, Result<PathBuf, EnrichError>)> = stream::iter(with_thumb)
        .map(|record| async move { (record, enrich_one(fetcher, record, settings).await) })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    for (record, result) in results {
        match result {
            Ok(path) => {
                report.succeeded += 1;
                info!(title = %record.title, path = %path.display(), "Saved thumbnail");
            }
            Err(e) => {
                report.failed += 1;
                warn!(stage = "enrich", title = %record.title, error = %e, "Thumbnail enrichment failed");
            }
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "Enrichment complete"
    );
    report
}
