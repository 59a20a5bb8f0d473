use std::path::PathBuf;
use thiserror::Error;

/// Problems with configuration or startup identifiers.
///
/// These are the only failures that stop a run before it starts; everything
/// that happens per site or per pair is recorded and skipped instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{field} must be within {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: String,
    },

    #[error("blob directory does not exist: {0}")]
    MissingBlobDir(PathBuf),

    #[error("llm provider {provider} requires an api_key")]
    MissingCredential { provider: &'static str },

    #[error("site '{0}' is not listed in the config")]
    UnknownSite(String),
}
