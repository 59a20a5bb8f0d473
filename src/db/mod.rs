mod schema;
pub mod backend;
pub mod sqlite;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub use backend::SnapshotStore;
pub use schema::SCHEMA;
pub use sqlite::SqliteDb;

use crate::dom::HeroFeatures;

/// One capture of a page. Written at ingestion and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub site_name: String,
    pub url: String,
    pub captured_at: DateTime<Utc>,
    pub image_ref: String,
    pub markup_ref: String,
    pub image_hash: Option<String>,
    pub markup_hash: Option<String>,
}

/// Snapshot data before it has been assigned an id.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub site_name: String,
    pub url: String,
    pub captured_at: DateTime<Utc>,
    pub image_ref: String,
    pub markup_ref: String,
    pub image_hash: Option<String>,
    pub markup_hash: Option<String>,
}

/// Stored comparison between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPair {
    pub id: i64,
    pub site_name: String,
    pub url: String,
    pub snapshot_id_1: i64,
    pub snapshot_id_2: i64,
    pub compared_at: DateTime<Utc>,
    pub global_similarity: f64,
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct NewSnapshotPair {
    pub site_name: String,
    pub url: String,
    pub snapshot_id_1: i64,
    pub snapshot_id_2: i64,
    pub compared_at: DateTime<Utc>,
    pub global_similarity: f64,
    pub changed: bool,
}

/// A persisted change region belonging to a snapshot pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDiff {
    pub id: i64,
    pub snapshot_pair_id: i64,
    pub region: crate::diff::ChangeRegion,
}

/// Cached DOM features of one snapshot, keyed by snapshot id.
#[derive(Debug, Clone, PartialEq)]
pub struct DomFeatures {
    pub snapshot_id: i64,
    pub hero: HeroFeatures,
    pub variant_key: Option<String>,
}

/// Format a timestamp the way it is stored: fixed-width RFC 3339 in UTC.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {}", value))
}
