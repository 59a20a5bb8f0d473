pub const SCHEMA: &str = r#"
-- One row per capture of a page (image + markup), written by ingestion
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    url TEXT NOT NULL,
    captured_at TEXT NOT NULL,   -- RFC 3339 UTC, fixed width so text order is time order
    image_ref TEXT NOT NULL,
    markup_ref TEXT NOT NULL,
    image_hash TEXT,             -- sha256 of the image bytes
    markup_hash TEXT             -- sha256 of the markup text
);

CREATE INDEX IF NOT EXISTS idx_snapshots_site ON snapshots(site_name, url, captured_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_captured_at ON snapshots(captured_at);

-- Comparison between consecutive snapshots of a page; written once, never updated
CREATE TABLE IF NOT EXISTS snapshot_pairs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    url TEXT NOT NULL,
    snapshot_id_1 INTEGER NOT NULL,
    snapshot_id_2 INTEGER NOT NULL,
    compared_at TEXT NOT NULL,
    global_similarity REAL NOT NULL,
    changed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (snapshot_id_1, snapshot_id_2),
    FOREIGN KEY (snapshot_id_1) REFERENCES snapshots(id),
    FOREIGN KEY (snapshot_id_2) REFERENCES snapshots(id)
);

-- Bounding boxes of changed regions, in the first snapshot's pixel space
CREATE TABLE IF NOT EXISTS snapshot_diffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_pair_id INTEGER NOT NULL,
    x INTEGER NOT NULL,
    y INTEGER NOT NULL,
    w INTEGER NOT NULL,
    h INTEGER NOT NULL,
    area INTEGER NOT NULL,
    norm_x REAL NOT NULL,
    norm_y REAL NOT NULL,
    norm_w REAL NOT NULL,
    norm_h REAL NOT NULL,
    FOREIGN KEY (snapshot_pair_id) REFERENCES snapshot_pairs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_snapshot_diffs_pair ON snapshot_diffs(snapshot_pair_id);

-- Hero/CTA features extracted from a snapshot's markup, computed once per snapshot
CREATE TABLE IF NOT EXISTS dom_features (
    snapshot_id INTEGER PRIMARY KEY,
    hero_heading TEXT NOT NULL DEFAULT '',
    hero_subheading TEXT NOT NULL DEFAULT '',
    hero_cta_text TEXT NOT NULL DEFAULT '',
    hero_cta_target TEXT NOT NULL DEFAULT '',
    main_sections TEXT NOT NULL DEFAULT '[]',  -- JSON array of headings
    variant_key TEXT,
    extracted_at TEXT NOT NULL,
    FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_dom_features_variant ON dom_features(variant_key);
"#;
