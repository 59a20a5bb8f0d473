//! Weekly variant report.
//!
//! Reads the snapshots captured inside the window, clusters each page's hero
//! variants and renders a single message covering every page.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::fmt::Write as _;
use tracing::{error, info, warn};

use crate::blobs::BlobSource;
use crate::db::{DomFeatures, Snapshot, SnapshotStore};
use crate::dom::{load_or_extract, DomFeatureExtractor};
use crate::llm::VariantSummarizer;
use crate::variants::{cluster_variants, Variant, VariantStatus};

/// Reporting interval, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }

    fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteReport {
    pub site_name: String,
    pub url: String,
    pub status: VariantStatus,
    pub variants: Vec<Variant>,
    /// Consecutive captures that differed visually within the window.
    pub visual_changes: usize,
    /// Snapshots left out because their markup could not be read.
    pub unreadable: usize,
    pub details: String,
    /// Variant summary; only present when the page served several variants.
    pub summary: Option<String>,
}

/// Everything needed to turn stored snapshots into site reports.
pub struct ReportBuilder<'a> {
    pub store: &'a dyn SnapshotStore,
    pub blobs: &'a dyn BlobSource,
    pub extractor: &'a DomFeatureExtractor,
    pub summarizer: &'a dyn VariantSummarizer,
}

impl ReportBuilder<'_> {
    /// One report per page with snapshots in the window, in page order.
    pub fn build_site_reports(&self, window: &ReportWindow) -> Result<Vec<SiteReport>> {
        let snapshots: Vec<Snapshot> = self
            .store
            .snapshots_since(window.start)?
            .into_iter()
            .filter(|s| window.contains(&s.captured_at))
            .collect();
        info!(
            "Building report for {} snapshots since {}",
            snapshots.len(),
            window.start
        );

        let mut reports = Vec::new();
        for group in group_by_page(snapshots) {
            let (site_name, url) = (group[0].site_name.clone(), group[0].url.clone());
            match self.build_site_report(&group, window) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Report for {} ({}) failed: {:#}", site_name, url, e);
                    reports.push(SiteReport {
                        site_name,
                        url,
                        status: VariantStatus::NoData,
                        variants: Vec::new(),
                        visual_changes: 0,
                        unreadable: 0,
                        details: format!("Report could not be built: {:#}", e),
                        summary: None,
                    });
                }
            }
        }
        Ok(reports)
    }

    fn build_site_report(&self, group: &[Snapshot], window: &ReportWindow) -> Result<SiteReport> {
        let site_name = &group[0].site_name;
        let url = &group[0].url;

        let mut members: Vec<(Snapshot, DomFeatures)> = Vec::with_capacity(group.len());
        let mut unreadable = 0;
        for snapshot in group {
            match load_or_extract(self.store, self.blobs, self.extractor, snapshot) {
                Ok(features) => members.push((snapshot.clone(), features)),
                Err(e) => {
                    warn!("Leaving snapshot {} out of the report: {:#}", snapshot.id, e);
                    unreadable += 1;
                }
            }
        }

        let variants = cluster_variants(&members);
        let status = VariantStatus::of(&variants);
        let visual_changes = self.store.changed_pair_count(site_name, url, window.start)?;

        let details = match status {
            VariantStatus::NoData => "No readable snapshots in this window.".to_string(),
            VariantStatus::Stable => {
                "No significant hero or call-to-action variants detected this week.".to_string()
            }
            VariantStatus::MultipleVariants => format!(
                "Detected {} distinct hero/CTA variants across {} snapshots.",
                variants.len(),
                members.len()
            ),
        };

        let summary = if status == VariantStatus::MultipleVariants {
            Some(self.summarize(site_name, url, &variants))
        } else {
            None
        };

        Ok(SiteReport {
            site_name: site_name.clone(),
            url: url.clone(),
            status,
            variants,
            visual_changes,
            unreadable,
            details,
            summary,
        })
    }

    fn summarize(&self, site_name: &str, url: &str, variants: &[Variant]) -> String {
        let raw = raw_variant_text(variants);
        match self.summarizer.summarize_variants(site_name, url, &raw) {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!("Empty variant summary for {}, using raw text", site_name);
                raw
            }
            Err(e) => {
                warn!("Variant summary for {} failed, using raw text: {:#}", site_name, e);
                raw
            }
        }
    }
}

/// Split page-ordered snapshots into one group per (site, url).
fn group_by_page(snapshots: Vec<Snapshot>) -> Vec<Vec<Snapshot>> {
    let mut groups: Vec<Vec<Snapshot>> = Vec::new();
    for snapshot in snapshots {
        match groups.last_mut() {
            Some(group)
                if group[0].site_name == snapshot.site_name && group[0].url == snapshot.url =>
            {
                group.push(snapshot)
            }
            _ => groups.push(vec![snapshot]),
        }
    }
    groups
}

fn or_none(text: &str) -> &str {
    if text.is_empty() {
        "(none)"
    } else {
        text
    }
}

/// Plain description of each variant, used as-is or handed to a summarizer.
pub fn raw_variant_text(variants: &[Variant]) -> String {
    let mut out = String::new();
    for (i, v) in variants.iter().enumerate() {
        let _ = writeln!(
            out,
            "Variant {} ({} snapshots, {} to {})",
            i + 1,
            v.count,
            v.first_seen.format("%Y-%m-%d %H:%M UTC"),
            v.last_seen.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(out, "  Heading: {}", or_none(&v.hero_heading));
        if v.hero_cta_target.is_empty() {
            let _ = writeln!(out, "  CTA: {}", or_none(&v.hero_cta_text));
        } else {
            let _ = writeln!(
                out,
                "  CTA: {} -> {}",
                or_none(&v.hero_cta_text),
                v.hero_cta_target
            );
        }
        if !v.main_sections.is_empty() {
            let _ = writeln!(out, "  Sections: {}", v.main_sections.join(", "));
        }
    }
    out.trim_end().to_string()
}

/// Render the single message published for a run.
pub fn render_message(reports: &[SiteReport], window: &ReportWindow) -> String {
    let header = format!(
        "Weekly AB / UX Watch - Week of {} to {}\n\n",
        window.start.date_naive(),
        window.end.date_naive()
    );

    if reports.is_empty() {
        return header + "No observable data captured.";
    }

    let any_variants = reports
        .iter()
        .any(|r| r.status == VariantStatus::MultipleVariants);
    if !any_variants {
        return header + "No observable layout or AB-type changes across monitored pages this week.";
    }

    let mut out = header;
    for report in reports {
        let _ = writeln!(out, "**{}** - {}", report.site_name, report.url);
        let _ = writeln!(out, "- {}", report.details);
        let _ = writeln!(
            out,
            "- Visual changes between consecutive captures: {}",
            report.visual_changes
        );
        if report.unreadable > 0 {
            let _ = writeln!(out, "- Snapshots without readable markup: {}", report.unreadable);
        }
        if let Some(summary) = &report.summary {
            for line in summary.lines().filter(|l| !l.trim().is_empty()) {
                let _ = writeln!(out, "  {}", line);
            }
        }
        for variant in &report.variants {
            let _ = writeln!(
                out,
                "  - Example variant screenshot: {}",
                variant.representative_image_ref
            );
        }
        out.push('\n');
    }

    out.push_str(
        "_Note: This is an automated summary based on the hero and call-to-action text of captured pages._",
    );
    out
}
