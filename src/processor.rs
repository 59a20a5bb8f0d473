//! Incremental comparison of consecutive snapshots.
//!
//! For every page, walks the capture history in order and compares each
//! adjacent pair that has no stored comparison yet. A failure on one pair is
//! logged and the pair is left for the next run; a failure on one site is
//! recorded in its status and the run moves on.

use anyhow::{Context, Result};
use chrono::Utc;
use image::DynamicImage;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::blobs::BlobSource;
use crate::config::DiffConfig;
use crate::db::{NewSnapshotPair, Snapshot, SnapshotStore};
use crate::diff::{ChangeRegion, ImageDiffEngine};

/// Result of one pair attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Recorded {
        pair_id: i64,
        changed: bool,
        regions: usize,
    },
    /// Abandoned for this run; nothing was stored.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SiteStatus {
    Completed,
    /// The site was abandoned part way; pairs recorded before the error stay.
    Failed(String),
}

/// Counters for one page in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRun {
    pub site_name: String,
    pub url: String,
    pub status: SiteStatus,
    /// Pairs attempted this run, failed ones included.
    pub compared: usize,
    pub changed: usize,
    pub failed_pairs: usize,
    pub skipped_existing: usize,
    pub budget_exhausted: bool,
}

impl SiteRun {
    fn new(site_name: &str, url: &str) -> Self {
        Self {
            site_name: site_name.to_string(),
            url: url.to_string(),
            status: SiteStatus::Completed,
            compared: 0,
            changed: 0,
            failed_pairs: 0,
            skipped_existing: 0,
            budget_exhausted: false,
        }
    }

    pub fn recorded(&self) -> usize {
        self.compared - self.failed_pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sites: Vec<SiteRun>,
}

impl RunSummary {
    pub fn pairs_recorded(&self) -> usize {
        self.sites.iter().map(SiteRun::recorded).sum()
    }

    pub fn failed_sites(&self) -> usize {
        self.sites
            .iter()
            .filter(|s| matches!(s.status, SiteStatus::Failed(_)))
            .count()
    }
}

/// Decoded images kept between neighbouring pairs.
///
/// Consecutive pairs share a snapshot, so keeping the last two decodes means
/// each image is decoded once per walk in either direction.
#[derive(Default)]
struct ImageCache {
    slots: Vec<(String, Rc<DynamicImage>)>,
}

impl ImageCache {
    const CAPACITY: usize = 2;

    fn load(&mut self, blobs: &dyn BlobSource, image_ref: &str) -> Result<Rc<DynamicImage>> {
        if let Some((_, image)) = self.slots.iter().find(|(r, _)| r == image_ref) {
            return Ok(Rc::clone(image));
        }

        let bytes = blobs.fetch_image_bytes(image_ref)?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode image {}", image_ref))?;
        let image = Rc::new(image);

        if self.slots.len() == Self::CAPACITY {
            self.slots.remove(0);
        }
        self.slots.push((image_ref.to_string(), Rc::clone(&image)));
        Ok(image)
    }
}

pub struct SnapshotPairProcessor<'a> {
    store: &'a dyn SnapshotStore,
    blobs: &'a dyn BlobSource,
    engine: ImageDiffEngine,
}

impl<'a> SnapshotPairProcessor<'a> {
    pub fn new(store: &'a dyn SnapshotStore, blobs: &'a dyn BlobSource, config: DiffConfig) -> Self {
        Self {
            store,
            blobs,
            engine: ImageDiffEngine::new(config),
        }
    }

    /// Process every known page.
    ///
    /// Only a failure to list the pages is returned as an error; everything
    /// after that is captured in the summary.
    pub fn run(&self) -> Result<RunSummary> {
        let sites = self.store.site_list().context("Failed to list sites")?;
        info!("Comparing snapshots for {} pages", sites.len());

        let mut summary = RunSummary::default();
        for (site_name, url) in sites {
            summary.sites.push(self.run_site(&site_name, &url));
        }

        info!(
            "Comparison run finished: {} pairs recorded, {} of {} pages failed",
            summary.pairs_recorded(),
            summary.failed_sites(),
            summary.sites.len()
        );
        Ok(summary)
    }

    /// Process one page, never failing; the outcome is in the returned status.
    pub fn run_site(&self, site_name: &str, url: &str) -> SiteRun {
        let mut run = SiteRun::new(site_name, url);

        if let Err(e) = self.process_site(&mut run) {
            error!("Site {} ({}) aborted: {:#}", site_name, url, e);
            run.status = SiteStatus::Failed(format!("{:#}", e));
        }

        if let Err(e) = self.store.flush() {
            warn!("Failed to flush store after {}: {:#}", site_name, e);
        }

        info!(
            "Site {}: {} compared, {} changed, {} failed, {} already done",
            site_name, run.compared, run.changed, run.failed_pairs, run.skipped_existing
        );
        run
    }

    fn process_site(&self, run: &mut SiteRun) -> Result<()> {
        let snapshots = self.store.ordered_snapshots(&run.site_name, &run.url)?;
        if snapshots.len() < 2 {
            return Ok(());
        }

        let config = self.engine.config();
        let mut order: Vec<usize> = (1..snapshots.len()).collect();
        if config.newest_first {
            order.reverse();
        }

        let mut cache = ImageCache::default();
        for i in order {
            let (first, second) = (&snapshots[i - 1], &snapshots[i]);
            if self.store.pair_exists(first.id, second.id)? {
                run.skipped_existing += 1;
                continue;
            }

            if let Some(max) = config.max_pairs_per_site {
                if run.compared >= max {
                    run.budget_exhausted = true;
                    info!("Site {} reached its budget of {} pairs", run.site_name, max);
                    break;
                }
            }

            run.compared += 1;
            match self.process_pair(first, second, &mut cache) {
                PairOutcome::Recorded { changed, .. } => {
                    if changed {
                        run.changed += 1;
                    }
                }
                PairOutcome::Failed(_) => run.failed_pairs += 1,
            }
        }

        Ok(())
    }

    /// Compare and store one pair, turning any error into `PairOutcome::Failed`.
    fn process_pair(
        &self,
        first: &Snapshot,
        second: &Snapshot,
        cache: &mut ImageCache,
    ) -> PairOutcome {
        match self.compare_and_record(first, second, cache) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Skipping pair {} -> {} of {}: {:#}",
                    first.id, second.id, first.site_name, e
                );
                PairOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    fn compare_and_record(
        &self,
        first: &Snapshot,
        second: &Snapshot,
        cache: &mut ImageCache,
    ) -> Result<PairOutcome> {
        let (similarity, regions) = self.compare(first, second, cache)?;
        let changed = self.engine.is_changed(similarity);

        debug!(
            "Pair {} -> {}: similarity {:.4}, {} regions",
            first.id,
            second.id,
            similarity,
            regions.len()
        );

        let pair = NewSnapshotPair {
            site_name: first.site_name.clone(),
            url: first.url.clone(),
            snapshot_id_1: first.id,
            snapshot_id_2: second.id,
            compared_at: Utc::now(),
            global_similarity: similarity,
            changed,
        };
        let pair_id = self.store.insert_pair_with_regions(&pair, &regions)?;

        Ok(PairOutcome::Recorded {
            pair_id,
            changed,
            regions: regions.len(),
        })
    }

    fn compare(
        &self,
        first: &Snapshot,
        second: &Snapshot,
        cache: &mut ImageCache,
    ) -> Result<(f64, Vec<ChangeRegion>)> {
        if let (Some(h1), Some(h2)) = (&first.image_hash, &second.image_hash) {
            if h1 == h2 {
                return Ok((1.0, Vec::new()));
            }
        }

        let image_a = cache.load(self.blobs, &first.image_ref)?;
        let image_b = cache.load(self.blobs, &second.image_ref)?;
        let comparison = self.engine.compare(&image_a, &image_b)?;
        Ok((comparison.similarity, comparison.regions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::memory::MemoryBlobStore;
    use crate::db::{DomFeatures, NewSnapshot, SnapshotDiff, SnapshotPair, SqliteDb};
    use anyhow::anyhow;
    use chrono::{DateTime, Duration, TimeZone};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::io::Cursor;

    const URL: &str = "https://acme.test/";

    fn png(block_at: Option<u32>) -> Vec<u8> {
        let mut img = RgbImage::from_pixel(120, 120, Rgb([250, 250, 250]));
        if let Some(offset) = block_at {
            for y in offset..offset + 30 {
                for x in offset..offset + 30 {
                    img.put_pixel(x, y, Rgb([10, 10, 10]));
                }
            }
        }
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn test_db() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    /// Six captures of one page: five adjacent pairs, alternating content.
    fn seed(db: &SqliteDb, blobs: &mut MemoryBlobStore, site: &str) -> Vec<i64> {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        (0..6)
            .map(|i| {
                let image_ref = format!("{}/{}.png", site, i);
                let block = if i % 2 == 0 { None } else { Some(40) };
                blobs.insert(&image_ref, png(block));
                db.insert_snapshot(&NewSnapshot {
                    site_name: site.to_string(),
                    url: URL.to_string(),
                    captured_at: base + Duration::hours(i),
                    image_ref,
                    markup_ref: format!("{}/{}.html", site, i),
                    image_hash: None,
                    markup_hash: None,
                })
                .unwrap()
            })
            .collect()
    }

    fn diff_count(db: &SqliteDb, site: &str) -> usize {
        db.pairs_for_site(site, URL)
            .unwrap()
            .iter()
            .map(|p| db.diff_regions(p.id).unwrap().len())
            .sum()
    }

    /// Fails the first fetch of each listed ref, then behaves normally.
    struct FlakyBlobs {
        inner: MemoryBlobStore,
        fail_once: RefCell<HashSet<String>>,
    }

    impl BlobSource for FlakyBlobs {
        fn fetch_image_bytes(&self, blob_ref: &str) -> Result<Vec<u8>> {
            if self.fail_once.borrow_mut().remove(blob_ref) {
                return Err(anyhow!("connection reset while fetching {}", blob_ref));
            }
            self.inner.fetch_image_bytes(blob_ref)
        }

        fn fetch_markup_text(&self, blob_ref: &str) -> Result<String> {
            self.inner.fetch_markup_text(blob_ref)
        }
    }

    #[test]
    fn test_all_pairs_recorded_with_regions_for_changes() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        seed(&db, &mut blobs, "acme");

        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();

        assert_eq!(summary.sites.len(), 1);
        let site = &summary.sites[0];
        assert_eq!(site.status, SiteStatus::Completed);
        assert_eq!(site.compared, 5);
        assert_eq!(site.changed, 5);

        let pairs = db.pairs_for_site("acme", URL).unwrap();
        assert_eq!(pairs.len(), 5);
        for pair in &pairs {
            assert!(pair.changed);
            assert!(pair.snapshot_id_1 < pair.snapshot_id_2);
            assert!(!db.diff_regions(pair.id).unwrap().is_empty());
        }
    }

    #[test]
    fn test_second_run_adds_nothing() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        seed(&db, &mut blobs, "acme");

        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        processor.run().unwrap();
        let pairs_before = db.pairs_for_site("acme", URL).unwrap();
        let diffs_before = diff_count(&db, "acme");

        let summary = processor.run().unwrap();
        assert_eq!(summary.sites[0].compared, 0);
        assert_eq!(summary.sites[0].skipped_existing, 5);
        assert_eq!(db.pairs_for_site("acme", URL).unwrap(), pairs_before);
        assert_eq!(diff_count(&db, "acme"), diffs_before);
    }

    #[test]
    fn test_fetch_failure_abandons_only_that_pair() {
        let db = test_db();
        let mut inner = MemoryBlobStore::default();
        let ids = seed(&db, &mut inner, "acme");

        // Snapshot 2's image is first needed by the pair (1, 2)
        let blobs = FlakyBlobs {
            inner,
            fail_once: RefCell::new(HashSet::from(["acme/2.png".to_string()])),
        };
        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();

        let site = &summary.sites[0];
        assert_eq!(site.status, SiteStatus::Completed);
        assert_eq!(site.compared, 5);
        assert_eq!(site.failed_pairs, 1);
        assert_eq!(site.recorded(), 4);

        let pairs = db.pairs_for_site("acme", URL).unwrap();
        assert_eq!(pairs.len(), 4);
        assert!(!db.pair_exists(ids[1], ids[2]).unwrap());
        assert!(db.pair_exists(ids[2], ids[3]).unwrap());

        // The abandoned pair is picked up on the next run
        let summary = processor.run().unwrap();
        assert_eq!(summary.sites[0].compared, 1);
        assert!(db.pair_exists(ids[1], ids[2]).unwrap());
    }

    #[test]
    fn test_corrupt_image_is_isolated() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        let ids = seed(&db, &mut blobs, "acme");
        blobs.insert("acme/5.png", b"not a png".to_vec());

        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();

        assert_eq!(summary.sites[0].status, SiteStatus::Completed);
        assert_eq!(summary.sites[0].failed_pairs, 1);
        assert!(!db.pair_exists(ids[4], ids[5]).unwrap());
        assert_eq!(db.pairs_for_site("acme", URL).unwrap().len(), 4);
    }

    #[test]
    fn test_budget_limits_pairs_and_newest_first_picks_recent() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        let ids = seed(&db, &mut blobs, "acme");

        let config = DiffConfig {
            max_pairs_per_site: Some(2),
            newest_first: true,
            ..DiffConfig::default()
        };
        let processor = SnapshotPairProcessor::new(&db, &blobs, config);
        let summary = processor.run().unwrap();

        assert_eq!(summary.sites[0].compared, 2);
        assert!(summary.sites[0].budget_exhausted);
        assert!(db.pair_exists(ids[4], ids[5]).unwrap());
        assert!(db.pair_exists(ids[3], ids[4]).unwrap());
        assert!(!db.pair_exists(ids[0], ids[1]).unwrap());

        // Skipped pairs do not use up the budget
        let summary = processor.run().unwrap();
        assert_eq!(summary.sites[0].compared, 2);
        assert_eq!(summary.sites[0].skipped_existing, 2);
        assert!(db.pair_exists(ids[1], ids[2]).unwrap());
    }

    #[test]
    fn test_budget_not_exhausted_by_already_compared_pairs() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        seed(&db, &mut blobs, "acme");

        let recent_first = DiffConfig {
            max_pairs_per_site: Some(2),
            newest_first: true,
            ..DiffConfig::default()
        };
        SnapshotPairProcessor::new(&db, &blobs, recent_first)
            .run()
            .unwrap();

        // The three older pairs fill the budget; the two newer ones are done
        let oldest_first = DiffConfig {
            max_pairs_per_site: Some(3),
            ..DiffConfig::default()
        };
        let summary = SnapshotPairProcessor::new(&db, &blobs, oldest_first)
            .run()
            .unwrap();
        let site = &summary.sites[0];
        assert_eq!(site.compared, 3);
        assert_eq!(site.skipped_existing, 2);
        assert!(!site.budget_exhausted);
    }

    #[test]
    fn test_region_store_failure_leaves_pair_for_retry() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        let ids = seed(&db, &mut blobs, "acme");
        db.conn.execute_batch("DROP TABLE snapshot_diffs").unwrap();

        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();
        let site = &summary.sites[0];
        assert_eq!(site.status, SiteStatus::Completed);
        assert_eq!(site.compared, 5);
        assert_eq!(site.failed_pairs, 5);
        assert_eq!(site.recorded(), 0);
        assert!(db.pairs_for_site("acme", URL).unwrap().is_empty());

        // Once regions can be stored again every pair is scored afresh
        db.initialize().unwrap();
        let summary = processor.run().unwrap();
        assert_eq!(summary.sites[0].compared, 5);
        assert_eq!(summary.sites[0].recorded(), 5);
        assert!(db.pair_exists(ids[0], ids[1]).unwrap());
        assert_eq!(db.pairs_for_site("acme", URL).unwrap().len(), 5);
        assert!(diff_count(&db, "acme") >= 5);
    }

    #[test]
    fn test_equal_hashes_skip_fetching() {
        let db = test_db();
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let ids: Vec<i64> = (0..2)
            .map(|i| {
                db.insert_snapshot(&NewSnapshot {
                    site_name: "acme".to_string(),
                    url: URL.to_string(),
                    captured_at: base + Duration::hours(i),
                    image_ref: format!("missing-{}.png", i),
                    markup_ref: "m.html".to_string(),
                    image_hash: Some("same".to_string()),
                    markup_hash: None,
                })
                .unwrap()
            })
            .collect();

        // No blobs at all: any fetch would fail the pair
        let blobs = MemoryBlobStore::default();
        let processor = SnapshotPairProcessor::new(&db, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();

        assert_eq!(summary.sites[0].failed_pairs, 0);
        let pairs = db.pairs_for_site("acme", URL).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].snapshot_id_1, ids[0]);
        assert_eq!(pairs[0].global_similarity, 1.0);
        assert!(!pairs[0].changed);
    }

    /// Delegates to SQLite but cannot list the snapshots of one site.
    struct BrokenSiteStore {
        inner: SqliteDb,
        broken_site: &'static str,
    }

    impl SnapshotStore for BrokenSiteStore {
        fn site_list(&self) -> Result<Vec<(String, String)>> {
            self.inner.site_list()
        }
        fn ordered_snapshots(&self, site_name: &str, url: &str) -> Result<Vec<Snapshot>> {
            if site_name == self.broken_site {
                return Err(anyhow!("database is locked"));
            }
            self.inner.ordered_snapshots(site_name, url)
        }
        fn snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>> {
            self.inner.snapshots_since(since)
        }
        fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<i64> {
            self.inner.insert_snapshot(snapshot)
        }
        fn pair_exists(&self, id1: i64, id2: i64) -> Result<bool> {
            self.inner.pair_exists(id1, id2)
        }
        fn insert_pair(&self, pair: &NewSnapshotPair) -> Result<i64> {
            self.inner.insert_pair(pair)
        }
        fn insert_diff_region(&self, pair_id: i64, region: &ChangeRegion) -> Result<i64> {
            self.inner.insert_diff_region(pair_id, region)
        }
        fn insert_pair_with_regions(
            &self,
            pair: &NewSnapshotPair,
            regions: &[ChangeRegion],
        ) -> Result<i64> {
            self.inner.insert_pair_with_regions(pair, regions)
        }
        fn pairs_for_site(&self, site_name: &str, url: &str) -> Result<Vec<SnapshotPair>> {
            self.inner.pairs_for_site(site_name, url)
        }
        fn diff_regions(&self, pair_id: i64) -> Result<Vec<SnapshotDiff>> {
            self.inner.diff_regions(pair_id)
        }
        fn changed_pair_count(
            &self,
            site_name: &str,
            url: &str,
            since: DateTime<Utc>,
        ) -> Result<usize> {
            self.inner.changed_pair_count(site_name, url, since)
        }
        fn get_dom_features(&self, snapshot_id: i64) -> Result<Option<DomFeatures>> {
            self.inner.get_dom_features(snapshot_id)
        }
        fn upsert_dom_features(&self, features: &DomFeatures) -> Result<()> {
            self.inner.upsert_dom_features(features)
        }
        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn test_site_failure_does_not_stop_other_sites() {
        let db = test_db();
        let mut blobs = MemoryBlobStore::default();
        seed(&db, &mut blobs, "acme");
        seed(&db, &mut blobs, "globex");

        let store = BrokenSiteStore {
            inner: db,
            broken_site: "acme",
        };
        let processor = SnapshotPairProcessor::new(&store, &blobs, DiffConfig::default());
        let summary = processor.run().unwrap();

        assert_eq!(summary.failed_sites(), 1);
        let acme = summary.sites.iter().find(|s| s.site_name == "acme").unwrap();
        assert!(matches!(&acme.status, SiteStatus::Failed(msg) if msg.contains("locked")));

        let globex = summary.sites.iter().find(|s| s.site_name == "globex").unwrap();
        assert_eq!(globex.status, SiteStatus::Completed);
        assert_eq!(store.inner.pairs_for_site("globex", URL).unwrap().len(), 5);
    }
}
