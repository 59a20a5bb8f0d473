//! Hero and call-to-action extraction from captured page markup.
//!
//! The hero block is found heuristically: block-level elements near the top
//! of the body are scored (see [`scoring`]) and the best one is mined for a
//! heading, a sub-heading and a call to action. Extraction never fails; a page
//! with nothing recognisable yields empty strings.

pub mod cache;
pub mod scoring;
pub mod variant_key;

use scraper::{ElementRef, Html};

use crate::config::DomConfig;
use scoring::{best_candidate, is_cta_label, is_hero_like_name, total_score, CandidateSignals};

pub use cache::load_or_extract;
pub use variant_key::compute_key;

const BLOCK_TAGS: &[&str] = &["div", "section", "header", "main", "article"];
const HERO_HEADING_TAGS: &[&str] = &["h1", "h2", "h3"];
const SECTION_HEADING_TAGS: &[&str] = &["h2", "h3"];
const MEDIA_TAGS: &[&str] = &["img", "video", "picture"];
const INVISIBLE_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "meta", "link", "svg", "iframe",
];

/// Paragraph length accepted as a stand-in heading when the hero has none.
const FALLBACK_HEADING_CHARS: std::ops::RangeInclusive<usize> = 15..=160;

/// Text features of a page's hero block plus its coarse section outline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeroFeatures {
    pub hero_heading: String,
    pub hero_subheading: String,
    pub hero_cta_text: String,
    pub hero_cta_target: String,
    /// h2/h3 texts across the body, in order, de-duplicated and capped.
    pub main_sections: Vec<String>,
}

pub struct DomFeatureExtractor {
    config: DomConfig,
}

impl DomFeatureExtractor {
    pub fn new(config: DomConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, markup: &str) -> HeroFeatures {
        let document = Html::parse_document(markup);
        let body = find_body(&document);
        let elements = visible_descendants(body);

        let mut features = HeroFeatures {
            main_sections: self.section_headings(&elements),
            ..Default::default()
        };

        let Some(hero) = self.hero_block(&elements) else {
            return features;
        };

        let inner = visible_descendants(hero);
        features.hero_heading = hero_heading(&inner);
        features.hero_subheading = paragraphs(&inner)
            .find(|p| !p.is_empty() && *p != features.hero_heading)
            .unwrap_or_default();
        if let Some((text, target)) = find_cta(&inner) {
            features.hero_cta_text = text;
            features.hero_cta_target = target;
        }

        features
    }

    fn hero_block<'a>(&self, elements: &[ElementRef<'a>]) -> Option<ElementRef<'a>> {
        let candidates: Vec<(ElementRef<'a>, CandidateSignals)> = elements
            .iter()
            .filter(|el| BLOCK_TAGS.contains(&el.value().name()))
            .take(self.config.max_candidates)
            .enumerate()
            .filter(|(_, el)| {
                visible_text(**el).chars().count() >= self.config.min_block_text_len
            })
            .map(|(index, el)| (*el, signals_for(*el, index)))
            .collect();

        let scores: Vec<i32> = candidates.iter().map(|(_, s)| total_score(s)).collect();
        let best = best_candidate(&scores)?;

        tracing::trace!(
            candidates = candidates.len(),
            index = candidates[best].1.index,
            score = scores[best],
            "Picked hero block"
        );
        Some(candidates[best].0)
    }

    fn section_headings(&self, elements: &[ElementRef]) -> Vec<String> {
        let mut sections: Vec<String> = Vec::new();
        for el in elements
            .iter()
            .filter(|el| SECTION_HEADING_TAGS.contains(&el.value().name()))
        {
            if sections.len() >= self.config.max_sections {
                break;
            }
            let text = visible_text(*el);
            if !text.is_empty() && !sections.contains(&text) {
                sections.push(text);
            }
        }
        sections
    }
}

fn find_body(document: &Html) -> ElementRef<'_> {
    let root = document.root_element();
    root.children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .unwrap_or(root)
}

fn is_hidden(el: &ElementRef) -> bool {
    let value = el.value();
    if INVISIBLE_TAGS.contains(&value.name()) || value.attr("hidden").is_some() {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") {
        return true;
    }
    value
        .attr("style")
        .map(|style| {
            let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
            compact.to_lowercase().contains("display:none")
        })
        .unwrap_or(false)
}

/// Visible elements below `root`, in document order.
fn visible_descendants(root: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut out = Vec::new();
    collect_visible(root, &mut out);
    out
}

fn collect_visible<'a>(el: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if is_hidden(&child) {
            continue;
        }
        out.push(child);
        collect_visible(child, out);
    }
}

/// Rendered text of an element with whitespace collapsed.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    collapse_whitespace(&parts.join(" "))
}

fn collect_text<'a>(el: ElementRef<'a>, parts: &mut Vec<&'a str>) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_hidden(&child_el) {
                collect_text(child_el, parts);
            }
        } else if let Some(text) = child.value().as_text() {
            parts.push(&**text);
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_tag(elements: &[ElementRef], tags: &[&str]) -> bool {
    elements.iter().any(|el| tags.contains(&el.value().name()))
}

fn signals_for(block: ElementRef<'_>, index: usize) -> CandidateSignals {
    let inner = visible_descendants(block);
    let value = block.value();
    CandidateSignals {
        index,
        has_heading: has_tag(&inner, HERO_HEADING_TAGS),
        has_cta: find_cta(&inner).is_some(),
        hero_like_name: ["class", "id"]
            .iter()
            .filter_map(|attr| value.attr(attr))
            .any(is_hero_like_name),
        has_media: has_tag(&inner, MEDIA_TAGS),
    }
}

fn paragraphs<'a>(elements: &'a [ElementRef<'a>]) -> impl Iterator<Item = String> + 'a {
    elements
        .iter()
        .filter(|el| el.value().name() == "p")
        .map(|el| visible_text(*el))
}

fn hero_heading(inner: &[ElementRef<'_>]) -> String {
    inner
        .iter()
        .filter(|el| HERO_HEADING_TAGS.contains(&el.value().name()))
        .map(|el| visible_text(*el))
        .find(|text| !text.is_empty())
        .or_else(|| {
            paragraphs(inner).find(|text| FALLBACK_HEADING_CHARS.contains(&text.chars().count()))
        })
        .unwrap_or_default()
}

/// Label and target of the first link or button that reads like a CTA.
fn find_cta(inner: &[ElementRef<'_>]) -> Option<(String, String)> {
    inner
        .iter()
        .filter(|el| matches!(el.value().name(), "a" | "button"))
        .find_map(|el| {
            let mut label = visible_text(*el);
            if label.is_empty() {
                label = el
                    .value()
                    .attr("aria-label")
                    .map(collapse_whitespace)
                    .unwrap_or_default();
            }
            if !is_cta_label(&label) {
                return None;
            }
            let target = el
                .value()
                .attr("href")
                .map(|href| href.trim().to_string())
                .unwrap_or_default();
            Some((label, target))
        })
}
