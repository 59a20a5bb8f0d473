//! SQLite backend implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use super::backend::SnapshotStore;
use super::schema::SCHEMA;
use super::{
    format_timestamp, parse_timestamp, DomFeatures, NewSnapshot, NewSnapshotPair, Snapshot,
    SnapshotDiff, SnapshotPair,
};
use crate::diff::ChangeRegion;
use crate::dom::HeroFeatures;

pub struct SqliteDb {
    pub(crate) conn: Connection,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

/// Convert a stored timestamp inside a row mapper.
fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

const SNAPSHOT_COLUMNS: &str =
    "id, site_name, url, captured_at, image_ref, markup_ref, image_hash, markup_hash";

fn row_to_snapshot(row: &Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        site_name: row.get(1)?,
        url: row.get(2)?,
        captured_at: timestamp_column(row, 3)?,
        image_ref: row.get(4)?,
        markup_ref: row.get(5)?,
        image_hash: row.get(6)?,
        markup_hash: row.get(7)?,
    })
}

fn row_to_pair(row: &Row) -> rusqlite::Result<SnapshotPair> {
    Ok(SnapshotPair {
        id: row.get(0)?,
        site_name: row.get(1)?,
        url: row.get(2)?,
        snapshot_id_1: row.get(3)?,
        snapshot_id_2: row.get(4)?,
        compared_at: timestamp_column(row, 5)?,
        global_similarity: row.get(6)?,
        changed: row.get::<_, i64>(7)? != 0,
    })
}

impl SnapshotStore for SqliteDb {
    // ========================================================================
    // Snapshot operations
    // ========================================================================

    fn site_list(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT site_name, url FROM snapshots ORDER BY site_name, url",
        )?;
        let sites = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sites)
    }

    fn ordered_snapshots(&self, site_name: &str, url: &str) -> Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM snapshots
            WHERE site_name = ? AND url = ?
            ORDER BY captured_at, id
            "#,
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![site_name, url], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM snapshots
            WHERE captured_at >= ?
            ORDER BY site_name, url, captured_at, id
            "#,
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map([format_timestamp(&since)], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO snapshots (
                site_name, url, captured_at, image_ref, markup_ref, image_hash, markup_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                snapshot.site_name,
                snapshot.url,
                format_timestamp(&snapshot.captured_at),
                snapshot.image_ref,
                snapshot.markup_ref,
                snapshot.image_hash,
                snapshot.markup_hash,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ========================================================================
    // Comparison operations
    // ========================================================================

    fn pair_exists(&self, snapshot_id_1: i64, snapshot_id_2: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM snapshot_pairs WHERE snapshot_id_1 = ? AND snapshot_id_2 = ?",
                params![snapshot_id_1, snapshot_id_2],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_pair(&self, pair: &NewSnapshotPair) -> Result<i64> {
        insert_pair_row(&self.conn, pair)
    }

    fn insert_diff_region(&self, pair_id: i64, region: &ChangeRegion) -> Result<i64> {
        insert_region_row(&self.conn, pair_id, region)
    }

    fn insert_pair_with_regions(
        &self,
        pair: &NewSnapshotPair,
        regions: &[ChangeRegion],
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let pair_id = insert_pair_row(&tx, pair)?;
        for region in regions {
            insert_region_row(&tx, pair_id, region).with_context(|| {
                format!("Failed to store a change region of pair {}", pair_id)
            })?;
        }
        tx.commit()?;
        Ok(pair_id)
    }

    fn pairs_for_site(&self, site_name: &str, url: &str) -> Result<Vec<SnapshotPair>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.site_name, p.url, p.snapshot_id_1, p.snapshot_id_2,
                   p.compared_at, p.global_similarity, p.changed
            FROM snapshot_pairs p
            JOIN snapshots s ON s.id = p.snapshot_id_1
            WHERE p.site_name = ? AND p.url = ?
            ORDER BY s.captured_at, s.id, p.snapshot_id_2
            "#,
        )?;
        let pairs = stmt
            .query_map(params![site_name, url], row_to_pair)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    fn diff_regions(&self, pair_id: i64) -> Result<Vec<SnapshotDiff>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, snapshot_pair_id, x, y, w, h, area, norm_x, norm_y, norm_w, norm_h
            FROM snapshot_diffs
            WHERE snapshot_pair_id = ?
            ORDER BY id
            "#,
        )?;
        let diffs = stmt
            .query_map([pair_id], |row| {
                Ok(SnapshotDiff {
                    id: row.get(0)?,
                    snapshot_pair_id: row.get(1)?,
                    region: ChangeRegion {
                        x: row.get(2)?,
                        y: row.get(3)?,
                        w: row.get(4)?,
                        h: row.get(5)?,
                        area: row.get::<_, i64>(6)? as u64,
                        norm_x: row.get(7)?,
                        norm_y: row.get(8)?,
                        norm_w: row.get(9)?,
                        norm_h: row.get(10)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(diffs)
    }

    fn changed_pair_count(
        &self,
        site_name: &str,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM snapshot_pairs p
            JOIN snapshots s ON s.id = p.snapshot_id_2
            WHERE p.site_name = ? AND p.url = ? AND p.changed = 1 AND s.captured_at >= ?
            "#,
            params![site_name, url, format_timestamp(&since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========================================================================
    // DOM feature operations
    // ========================================================================

    fn get_dom_features(&self, snapshot_id: i64) -> Result<Option<DomFeatures>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT hero_heading, hero_subheading, hero_cta_text, hero_cta_target,
                       main_sections, variant_key
                FROM dom_features
                WHERE snapshot_id = ?
                "#,
                [snapshot_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((heading, subheading, cta_text, cta_target, sections_json, variant_key)) = row
        else {
            return Ok(None);
        };

        let main_sections: Vec<String> = serde_json::from_str(&sections_json)
            .with_context(|| format!("Corrupt main_sections for snapshot {}", snapshot_id))?;

        Ok(Some(DomFeatures {
            snapshot_id,
            hero: HeroFeatures {
                hero_heading: heading,
                hero_subheading: subheading,
                hero_cta_text: cta_text,
                hero_cta_target: cta_target,
                main_sections,
            },
            variant_key,
        }))
    }

    fn upsert_dom_features(&self, features: &DomFeatures) -> Result<()> {
        let sections_json = serde_json::to_string(&features.hero.main_sections)?;
        self.conn.execute(
            r#"
            INSERT INTO dom_features (
                snapshot_id, hero_heading, hero_subheading, hero_cta_text, hero_cta_target,
                main_sections, variant_key, extracted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(snapshot_id) DO UPDATE SET
                hero_heading = excluded.hero_heading,
                hero_subheading = excluded.hero_subheading,
                hero_cta_text = excluded.hero_cta_text,
                hero_cta_target = excluded.hero_cta_target,
                main_sections = excluded.main_sections,
                variant_key = excluded.variant_key,
                extracted_at = excluded.extracted_at
            "#,
            params![
                features.snapshot_id,
                features.hero.hero_heading,
                features.hero.hero_subheading,
                features.hero.hero_cta_text,
                features.hero.hero_cta_target,
                sections_json,
                features.variant_key,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        // Returns a status row in every journal mode, including in-memory databases
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("Failed to checkpoint database")?;
        Ok(())
    }
}

fn insert_pair_row(conn: &Connection, pair: &NewSnapshotPair) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO snapshot_pairs (
            site_name, url, snapshot_id_1, snapshot_id_2,
            compared_at, global_similarity, changed
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            pair.site_name,
            pair.url,
            pair.snapshot_id_1,
            pair.snapshot_id_2,
            format_timestamp(&pair.compared_at),
            pair.global_similarity,
            pair.changed as i64,
        ],
    )
    .with_context(|| {
        format!(
            "Failed to record pair {} -> {}",
            pair.snapshot_id_1, pair.snapshot_id_2
        )
    })?;
    Ok(conn.last_insert_rowid())
}

fn insert_region_row(conn: &Connection, pair_id: i64, region: &ChangeRegion) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO snapshot_diffs (
            snapshot_pair_id, x, y, w, h, area, norm_x, norm_y, norm_w, norm_h
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            pair_id,
            region.x,
            region.y,
            region.w,
            region.h,
            region.area as i64,
            region.norm_x,
            region.norm_y,
            region.norm_w,
            region.norm_h,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn snapshot(site: &str, minutes: i64) -> NewSnapshot {
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
        NewSnapshot {
            site_name: site.to_string(),
            url: format!("https://{}.test/", site),
            captured_at: base + Duration::minutes(minutes),
            image_ref: format!("{}-{}.png", site, minutes),
            markup_ref: format!("{}-{}.html", site, minutes),
            image_hash: None,
            markup_hash: Some("abc".to_string()),
        }
    }

    fn pair(id1: i64, id2: i64, changed: bool) -> NewSnapshotPair {
        NewSnapshotPair {
            site_name: "acme".to_string(),
            url: "https://acme.test/".to_string(),
            snapshot_id_1: id1,
            snapshot_id_2: id2,
            compared_at: Utc::now(),
            global_similarity: if changed { 0.7 } else { 0.999 },
            changed,
        }
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let db = test_db();
        db.initialize().unwrap();
        assert!(db.site_list().unwrap().is_empty());
    }

    #[test]
    fn test_ordered_snapshots_follow_capture_time() {
        let db = test_db();
        // Inserted out of order on purpose
        let late = db.insert_snapshot(&snapshot("acme", 30)).unwrap();
        let early = db.insert_snapshot(&snapshot("acme", 10)).unwrap();
        db.insert_snapshot(&snapshot("other", 0)).unwrap();

        let ordered = db.ordered_snapshots("acme", "https://acme.test/").unwrap();
        let ids: Vec<i64> = ordered.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early, late]);
        assert_eq!(ordered[0].markup_hash.as_deref(), Some("abc"));

        let sites = db.site_list().unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].0, "acme");
    }

    #[test]
    fn test_snapshots_since_filters_window() {
        let db = test_db();
        db.insert_snapshot(&snapshot("acme", 0)).unwrap();
        let recent = db.insert_snapshot(&snapshot("acme", 60)).unwrap();

        let since = Utc.with_ymd_and_hms(2026, 5, 4, 8, 30, 0).unwrap();
        let rows = db.snapshots_since(since).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, recent);
    }

    #[test]
    fn test_pair_is_unique() {
        let db = test_db();
        let a = db.insert_snapshot(&snapshot("acme", 0)).unwrap();
        let b = db.insert_snapshot(&snapshot("acme", 5)).unwrap();

        assert!(!db.pair_exists(a, b).unwrap());
        db.insert_pair(&pair(a, b, false)).unwrap();
        assert!(db.pair_exists(a, b).unwrap());
        assert!(!db.pair_exists(b, a).unwrap());

        // A second insert must not rewrite the comparison
        assert!(db.insert_pair(&pair(a, b, true)).is_err());
        let pairs = db.pairs_for_site("acme", "https://acme.test/").unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(!pairs[0].changed);
    }

    #[test]
    fn test_diff_regions_round_trip_and_changed_count() {
        let db = test_db();
        let a = db.insert_snapshot(&snapshot("acme", 0)).unwrap();
        let b = db.insert_snapshot(&snapshot("acme", 5)).unwrap();
        let c = db.insert_snapshot(&snapshot("acme", 10)).unwrap();

        let changed_id = db.insert_pair(&pair(a, b, true)).unwrap();
        db.insert_pair(&pair(b, c, false)).unwrap();

        let region = ChangeRegion {
            x: 10,
            y: 20,
            w: 30,
            h: 40,
            area: 1200,
            norm_x: 0.1,
            norm_y: 0.2,
            norm_w: 0.3,
            norm_h: 0.4,
        };
        db.insert_diff_region(changed_id, &region).unwrap();

        let diffs = db.diff_regions(changed_id).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].region, region);

        let start = Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap();
        assert_eq!(
            db.changed_pair_count("acme", "https://acme.test/", start).unwrap(),
            1
        );
        let after = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).unwrap();
        assert_eq!(
            db.changed_pair_count("acme", "https://acme.test/", after).unwrap(),
            0
        );
    }

    #[test]
    fn test_pair_with_regions_is_all_or_nothing() {
        let db = test_db();
        let a = db.insert_snapshot(&snapshot("acme", 0)).unwrap();
        let b = db.insert_snapshot(&snapshot("acme", 5)).unwrap();
        let c = db.insert_snapshot(&snapshot("acme", 10)).unwrap();
        let region = ChangeRegion {
            x: 0,
            y: 0,
            w: 8,
            h: 8,
            area: 64,
            norm_x: 0.0,
            norm_y: 0.0,
            norm_w: 0.5,
            norm_h: 0.5,
        };

        let id = db
            .insert_pair_with_regions(&pair(a, b, true), &[region.clone(), region.clone()])
            .unwrap();
        assert_eq!(db.diff_regions(id).unwrap().len(), 2);

        db.conn.execute_batch("DROP TABLE snapshot_diffs").unwrap();

        // Unchanged pairs carry no regions and still commit
        db.insert_pair_with_regions(&pair(b, c, false), &[]).unwrap();
        assert!(db.pair_exists(b, c).unwrap());

        let d = db.insert_snapshot(&snapshot("acme", 15)).unwrap();
        assert!(db.insert_pair_with_regions(&pair(c, d, true), &[region]).is_err());
        assert!(!db.pair_exists(c, d).unwrap());
    }

    #[test]
    fn test_pairs_follow_capture_order_not_ids() {
        let db = test_db();
        // Backfilled capture gets the larger id but the earlier time
        let later = db.insert_snapshot(&snapshot("acme", 30)).unwrap();
        let newest = db.insert_snapshot(&snapshot("acme", 60)).unwrap();
        let earliest = db.insert_snapshot(&snapshot("acme", 0)).unwrap();

        db.insert_pair(&pair(later, newest, false)).unwrap();
        db.insert_pair(&pair(earliest, later, true)).unwrap();

        let pairs = db.pairs_for_site("acme", "https://acme.test/").unwrap();
        let firsts: Vec<i64> = pairs.iter().map(|p| p.snapshot_id_1).collect();
        assert_eq!(firsts, vec![earliest, later]);
    }

    #[test]
    fn test_dom_features_upsert() {
        let db = test_db();
        let id = db.insert_snapshot(&snapshot("acme", 0)).unwrap();
        assert!(db.get_dom_features(id).unwrap().is_none());

        let mut features = DomFeatures {
            snapshot_id: id,
            hero: HeroFeatures {
                hero_heading: "Ship faster".to_string(),
                hero_cta_text: "Get started".to_string(),
                main_sections: vec!["Pricing".to_string(), "Customers".to_string()],
                ..Default::default()
            },
            variant_key: Some("k1".to_string()),
        };
        db.upsert_dom_features(&features).unwrap();
        assert_eq!(db.get_dom_features(id).unwrap(), Some(features.clone()));

        features.variant_key = None;
        db.upsert_dom_features(&features).unwrap();
        assert_eq!(db.get_dom_features(id).unwrap().unwrap().variant_key, None);
    }

    #[test]
    fn test_flush_on_memory_database() {
        let db = test_db();
        db.flush().unwrap();
    }
}
