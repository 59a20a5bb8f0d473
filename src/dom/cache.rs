use anyhow::{Context, Result};

use super::{compute_key, DomFeatureExtractor};
use crate::blobs::BlobSource;
use crate::db::{DomFeatures, Snapshot, SnapshotStore};
use crate::hashing::sha256_hex;

/// Features of a snapshot, extracted on first request and stored for every
/// later one.
///
/// Markup is only fetched when nothing is stored yet. The whole-markup digest
/// is the variant key fallback, taken from the snapshot when ingestion
/// recorded it.
pub fn load_or_extract(
    store: &dyn SnapshotStore,
    blobs: &dyn BlobSource,
    extractor: &DomFeatureExtractor,
    snapshot: &Snapshot,
) -> Result<DomFeatures> {
    if let Some(existing) = store.get_dom_features(snapshot.id)? {
        return Ok(existing);
    }

    let markup = blobs
        .fetch_markup_text(&snapshot.markup_ref)
        .with_context(|| format!("Failed to load markup for snapshot {}", snapshot.id))?;

    let hero = extractor.extract(&markup);
    let fallback = snapshot
        .markup_hash
        .clone()
        .unwrap_or_else(|| sha256_hex(&markup));
    let variant_key = compute_key(&hero.hero_heading, &hero.hero_cta_text, Some(&fallback));

    let features = DomFeatures {
        snapshot_id: snapshot.id,
        hero,
        variant_key,
    };
    store.upsert_dom_features(&features)?;

    tracing::debug!(
        snapshot_id = snapshot.id,
        heading = %features.hero.hero_heading,
        cta = %features.hero.hero_cta_text,
        "Extracted DOM features"
    );
    Ok(features)
}
