//! Storage abstraction for snapshot history and derived records.
//!
//! The comparison and clustering code only talks to this trait, so the
//! record store can be swapped without touching the algorithms.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{DomFeatures, NewSnapshot, NewSnapshotPair, Snapshot, SnapshotDiff, SnapshotPair};
use crate::diff::ChangeRegion;

/// Trait for record stores holding snapshots, comparisons and DOM features.
///
/// Every mutating call must be durable when it returns.
pub trait SnapshotStore {
    // === Snapshots ===

    /// Distinct (site_name, url) pairs that have at least one snapshot
    fn site_list(&self) -> Result<Vec<(String, String)>>;

    /// All snapshots of a page ordered by capture time, then id
    fn ordered_snapshots(&self, site_name: &str, url: &str) -> Result<Vec<Snapshot>>;

    /// Snapshots of every page captured at or after `since`, ordered by page then time
    fn snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>>;

    /// Register a new capture
    fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<i64>;

    // === Comparisons ===

    /// Whether the pair has already been compared
    fn pair_exists(&self, snapshot_id_1: i64, snapshot_id_2: i64) -> Result<bool>;

    /// Record a comparison; fails if the pair already exists
    fn insert_pair(&self, pair: &NewSnapshotPair) -> Result<i64>;

    /// Record one change region of a pair
    fn insert_diff_region(&self, pair_id: i64, region: &ChangeRegion) -> Result<i64>;

    /// Record a comparison and its regions atomically; on error nothing is stored
    fn insert_pair_with_regions(&self, pair: &NewSnapshotPair, regions: &[ChangeRegion])
        -> Result<i64>;

    /// Comparisons of a page ordered by the first snapshot's capture time, then id
    fn pairs_for_site(&self, site_name: &str, url: &str) -> Result<Vec<SnapshotPair>>;

    /// Change regions recorded for a pair
    fn diff_regions(&self, pair_id: i64) -> Result<Vec<SnapshotDiff>>;

    /// Pairs marked changed whose later snapshot was captured at or after `since`
    fn changed_pair_count(&self, site_name: &str, url: &str, since: DateTime<Utc>)
        -> Result<usize>;

    // === DOM features ===

    fn get_dom_features(&self, snapshot_id: i64) -> Result<Option<DomFeatures>>;

    /// Insert or replace the features of a snapshot
    fn upsert_dom_features(&self, features: &DomFeatures) -> Result<()>;

    // === Durability ===

    /// Push any buffered state to durable storage
    fn flush(&self) -> Result<()>;
}
