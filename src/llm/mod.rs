pub mod provider;
pub mod summarizer;

pub use provider::{create_provider, LlmProvider};
pub use summarizer::{create_summarizer, LlmSummarizer, PassthroughSummarizer, VariantSummarizer};
