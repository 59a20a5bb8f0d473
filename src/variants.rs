//! Grouping of a page's snapshots into recurring hero/CTA variants.
//!
//! Variants are a view over stored DOM features: they are rebuilt for every
//! report and never persisted.

use chrono::{DateTime, Utc};

use crate::db::{DomFeatures, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// `None` collects every snapshot whose variant could not be identified.
    pub key: Option<String>,
    pub hero_heading: String,
    pub hero_cta_text: String,
    pub hero_cta_target: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Most recent member.
    pub representative_snapshot_id: i64,
    pub representative_image_ref: String,
    /// Section outline of the representative.
    pub main_sections: Vec<String>,
}

impl Variant {
    fn start(snapshot: &Snapshot, features: &DomFeatures) -> Self {
        Self {
            key: features.variant_key.clone(),
            hero_heading: features.hero.hero_heading.clone(),
            hero_cta_text: features.hero.hero_cta_text.clone(),
            hero_cta_target: features.hero.hero_cta_target.clone(),
            count: 1,
            first_seen: snapshot.captured_at,
            last_seen: snapshot.captured_at,
            representative_snapshot_id: snapshot.id,
            representative_image_ref: snapshot.image_ref.clone(),
            main_sections: features.hero.main_sections.clone(),
        }
    }

    fn absorb(&mut self, snapshot: &Snapshot, features: &DomFeatures) {
        self.count += 1;
        self.first_seen = self.first_seen.min(snapshot.captured_at);

        if snapshot.captured_at > self.last_seen {
            self.last_seen = snapshot.captured_at;
            self.representative_snapshot_id = snapshot.id;
            self.representative_image_ref = snapshot.image_ref.clone();
            self.main_sections = features.hero.main_sections.clone();
        }

        fill_if_empty(&mut self.hero_heading, &features.hero.hero_heading);
        fill_if_empty(&mut self.hero_cta_text, &features.hero.hero_cta_text);
        fill_if_empty(&mut self.hero_cta_target, &features.hero.hero_cta_target);
    }
}

fn fill_if_empty(field: &mut String, candidate: &str) {
    if field.is_empty() && !candidate.is_empty() {
        *field = candidate.to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantStatus {
    NoData,
    /// One variant for the whole window.
    Stable,
    MultipleVariants,
}

impl VariantStatus {
    pub fn of(variants: &[Variant]) -> Self {
        match variants.len() {
            0 => VariantStatus::NoData,
            1 => VariantStatus::Stable,
            _ => VariantStatus::MultipleVariants,
        }
    }
}

/// Group snapshots by variant key, in order of each key's first appearance
/// in `members`.
pub fn cluster_variants(members: &[(Snapshot, DomFeatures)]) -> Vec<Variant> {
    let mut variants: Vec<Variant> = Vec::new();

    for (snapshot, features) in members {
        match variants
            .iter_mut()
            .find(|v| v.key == features.variant_key)
        {
            Some(variant) => variant.absorb(snapshot, features),
            None => variants.push(Variant::start(snapshot, features)),
        }
    }

    variants
}
