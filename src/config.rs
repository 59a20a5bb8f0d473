use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub diff: DiffConfig,

    #[serde(default)]
    pub dom: DomConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Monitored pages, used when registering new captures.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Write logs to daily files here when journald is unavailable.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory where image and markup blobs are materialized, keyed by ref.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
        }
    }
}

/// Thresholds for the image comparison pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Structural similarity at or above this means "no meaningful change".
    #[serde(default = "default_global_threshold")]
    pub global_threshold: f64,

    /// Blurred luminance difference above this marks a pixel as changed (0-255).
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,

    /// Regions smaller than this fraction of the image area are dropped.
    #[serde(default = "default_min_area_ratio")]
    pub min_area_ratio: f64,

    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u32,

    #[serde(default = "default_erode_iterations")]
    pub erode_iterations: u32,

    /// Maximum number of pairs compared per site in one run.
    #[serde(default)]
    pub max_pairs_per_site: Option<usize>,

    /// Walk pairs from the most recent backwards.
    #[serde(default)]
    pub newest_first: bool,
}

fn default_global_threshold() -> f64 {
    0.985
}

fn default_pixel_threshold() -> u8 {
    25
}

fn default_min_area_ratio() -> f64 {
    0.001
}

fn default_blur_sigma() -> f32 {
    1.1 // sigma of a 5x5 gaussian kernel
}

fn default_dilate_iterations() -> u32 {
    2
}

fn default_erode_iterations() -> u32 {
    1
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            global_threshold: default_global_threshold(),
            pixel_threshold: default_pixel_threshold(),
            min_area_ratio: default_min_area_ratio(),
            blur_sigma: default_blur_sigma(),
            dilate_iterations: default_dilate_iterations(),
            erode_iterations: default_erode_iterations(),
            max_pairs_per_site: None,
            newest_first: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomConfig {
    /// How many block-level elements from the top of the body are hero candidates.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_min_block_text_len")]
    pub min_block_text_len: usize,

    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
}

fn default_max_candidates() -> usize {
    80
}

fn default_min_block_text_len() -> usize {
    30
}

fn default_max_sections() -> usize {
    8
}

impl Default for DomConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            min_block_text_len: default_min_block_text_len(),
            max_sections: default_max_sections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Append the report here instead of printing it.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_window_days() -> u32 {
    7
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    LmStudio,
    OpenAI,
    Anthropic,
    Ollama,
}

impl LlmProviderType {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProviderType::LmStudio => "lmstudio",
            LlmProviderType::OpenAI => "openai",
            LlmProviderType::Anthropic => "anthropic",
            LlmProviderType::Ollama => "ollama",
        }
    }

    fn requires_api_key(&self) -> bool {
        matches!(self, LlmProviderType::OpenAI | LlmProviderType::Anthropic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Summaries are optional; when disabled the raw variant text is reported.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub provider: LlmProviderType,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_llm_model() -> String {
    "gemma-3-4b".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LlmProviderType::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagewatch")
        .join("pagewatch.db")
}

fn default_blob_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagewatch")
        .join("blobs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            diff: DiffConfig::default(),
            dom: DomConfig::default(),
            report: ReportConfig::default(),
            llm: LlmConfig::default(),
            sites: Vec::new(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, writing a default config on first use.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Ok(Self::load_from(&config_path)?)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Check everything that would make a run meaningless before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let diff = &self.diff;
        if !(diff.global_threshold > 0.0 && diff.global_threshold <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "diff.global_threshold",
                range: "(0, 1]",
                value: diff.global_threshold.to_string(),
            });
        }
        if !(0.0..1.0).contains(&diff.min_area_ratio) {
            return Err(ConfigError::OutOfRange {
                field: "diff.min_area_ratio",
                range: "[0, 1)",
                value: diff.min_area_ratio.to_string(),
            });
        }
        if !(diff.blur_sigma > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "diff.blur_sigma",
                range: "(0, inf)",
                value: diff.blur_sigma.to_string(),
            });
        }
        if diff.max_pairs_per_site == Some(0) {
            return Err(ConfigError::OutOfRange {
                field: "diff.max_pairs_per_site",
                range: "[1, inf)",
                value: "0".to_string(),
            });
        }

        if !self.storage.blob_dir.is_dir() {
            return Err(ConfigError::MissingBlobDir(self.storage.blob_dir.clone()));
        }

        if self.llm.enabled && self.llm.provider.requires_api_key() {
            let has_key = self
                .llm
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);
            if !has_key {
                return Err(ConfigError::MissingCredential {
                    provider: self.llm.provider.name(),
                });
            }
        }

        Ok(())
    }

    pub fn find_site(&self, name: &str) -> Result<&SiteConfig, ConfigError> {
        self.sites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSite(name.to_string()))
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PAGEWATCH_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagewatch")
            .join("config.toml")
    }
}
