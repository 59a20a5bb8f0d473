use anyhow::{bail, Result};

use super::provider::{create_provider, LlmProvider};
use crate::config::LlmConfig;

/// Turns raw variant descriptions into a short human summary.
///
/// Purely advisory: callers fall back to the raw text on any error.
pub trait VariantSummarizer {
    fn summarize_variants(&self, site_name: &str, url: &str, raw_text: &str) -> Result<String>;
}

/// Returns the raw text unchanged.
pub struct PassthroughSummarizer;

impl VariantSummarizer for PassthroughSummarizer {
    fn summarize_variants(&self, _site_name: &str, _url: &str, raw_text: &str) -> Result<String> {
        Ok(raw_text.to_string())
    }
}

pub struct LlmSummarizer {
    provider: Box<dyn LlmProvider>,
}

impl LlmSummarizer {
    pub fn new(provider: Box<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

impl VariantSummarizer for LlmSummarizer {
    fn summarize_variants(&self, site_name: &str, url: &str, raw_text: &str) -> Result<String> {
        let prompt = build_prompt(site_name, url, raw_text);
        let summary = self.provider.complete(&prompt)?;
        let summary = summary.trim();
        if summary.is_empty() {
            bail!("{} returned an empty summary", self.provider.provider_name());
        }
        Ok(summary.to_string())
    }
}

fn build_prompt(site_name: &str, url: &str, raw_text: &str) -> String {
    format!(
        "You are summarizing weekly UI/UX changes for an internal experiment log.\n\
         Site: {site_name} ({url})\n\n\
         Below are DOM-based variant descriptions observed this week. Each variant \
         includes the hero heading, primary CTA text, and sometimes key sections.\n\n\
         {raw_text}\n\n\
         Write a concise summary (2-5 short bullet points) that:\n\
         - Highlights how the hero and primary CTA changed (or stayed stable).\n\
         - Mentions any major section-level changes if visible (e.g., pricing, features, signup).\n\
         - Avoids speculation about business metrics (no mentions of CTR, conversion, etc.).\n\
         - Is suitable to paste into a weekly product/marketing update.\n\
         Do NOT repeat the site name or URL; just describe the observed changes.\n"
    )
}

/// Summarizer for the configuration; pass-through when summaries are disabled.
pub fn create_summarizer(config: &LlmConfig) -> Box<dyn VariantSummarizer> {
    if !config.enabled {
        return Box::new(PassthroughSummarizer);
    }
    let provider = create_provider(config);
    tracing::info!("Variant summaries via {}", provider.provider_name());
    Box::new(LlmSummarizer::new(provider))
}
