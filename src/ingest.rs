//! Registration of captured pages as snapshots.
//!
//! A capture is an image file and a markup file produced by whatever drives
//! the browser. Both are copied into the blob store under content-derived
//! names and recorded with their digests.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::blobs::FsBlobStore;
use crate::config::SiteConfig;
use crate::db::{NewSnapshot, SnapshotStore};
use crate::hashing::sha256_hex;

/// Paths of one capture on local disk.
#[derive(Debug, Clone, Copy)]
pub struct CaptureFiles<'a> {
    pub image_path: &'a Path,
    pub markup_path: &'a Path,
}

/// Store a capture of a configured site and insert its snapshot, returning
/// the new snapshot id.
pub fn ingest_capture(
    store: &dyn SnapshotStore,
    blobs: &FsBlobStore,
    site: &SiteConfig,
    files: CaptureFiles<'_>,
    captured_at: DateTime<Utc>,
) -> Result<i64> {
    let image_bytes = std::fs::read(files.image_path)
        .with_context(|| format!("Failed to read {}", files.image_path.display()))?;
    image::load_from_memory(&image_bytes)
        .with_context(|| format!("{} is not a readable image", files.image_path.display()))?;
    let markup_bytes = std::fs::read(files.markup_path)
        .with_context(|| format!("Failed to read {}", files.markup_path.display()))?;

    let image_hash = sha256_hex(&image_bytes);
    let markup_hash = sha256_hex(&markup_bytes);

    let stem = format!(
        "{}/{}",
        slug(&site.name),
        captured_at.format("%Y%m%dT%H%M%SZ")
    );
    let image_ref = blobs.put(
        &format!(
            "{}-{}.{}",
            stem,
            &image_hash[..12],
            extension(files.image_path, "png")
        ),
        &image_bytes,
    )?;
    let markup_ref = blobs.put(
        &format!(
            "{}-{}.{}",
            stem,
            &markup_hash[..12],
            extension(files.markup_path, "html")
        ),
        &markup_bytes,
    )?;

    let id = store.insert_snapshot(&NewSnapshot {
        site_name: site.name.clone(),
        url: site.url.clone(),
        captured_at,
        image_ref,
        markup_ref,
        image_hash: Some(image_hash),
        markup_hash: Some(markup_hash),
    })?;

    info!("Ingested snapshot {} for {} captured at {}", id, site.name, captured_at);
    Ok(id)
}

/// Lowercase ASCII alphanumerics with runs of anything else folded to '-'.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "site".to_string()
    } else {
        trimmed.to_string()
    }
}

fn extension(path: &Path, default: &str) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| default.to_string())
}
