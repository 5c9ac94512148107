use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::{EmbeddingProvider, HashingEmbedder, RetryingEmbedder};
use crate::error::{RagError, Result};
use crate::http_embedding::HttpEmbeddingProvider;
use crate::merger::MergeColumns;

const APP_DIR: &str = "school-rag";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// JSON array of primary school records
    pub schools_path: PathBuf,
    /// JSON array of program flag records
    pub programs_path: PathBuf,
    /// Path prefix shared by the persisted bundle artifacts
    pub bundle_prefix: PathBuf,
    pub top_k: usize,
    pub columns: MergeColumns,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Http,
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Vector width of the hashing backend
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Http,
            endpoint: "http://localhost:11434/api/embed".to_string(),
            model: "all-minilm".to_string(),
            timeout_secs: 30,
            batch_size: 64,
            max_retries: 3,
            retry_backoff_ms: 500,
            dimension: 384,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        Self {
            schools_path: PathBuf::from("BPS.json"),
            programs_path: PathBuf::from("BPS-special-programs.json"),
            bundle_prefix: data_dir.join("bps"),
            top_k: 3,
            columns: MergeColumns::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl RagConfig {
    /// Reads `path`, or the default config file when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| RagError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| RagError::Config(e.to_string()))
    }

    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("could not determine config directory".to_string()))?;
        Ok(dir.join(APP_DIR).join("config.toml"))
    }
}

impl EmbeddingConfig {
    /// Instantiates the configured backend wrapped in retries.
    pub fn provider(&self) -> Result<Box<dyn EmbeddingProvider>> {
        let backoff = Duration::from_millis(self.retry_backoff_ms);
        let provider: Box<dyn EmbeddingProvider> = match self.backend {
            EmbeddingBackend::Http => {
                let http = HttpEmbeddingProvider::new(
                    &self.endpoint,
                    &self.model,
                    Duration::from_secs(self.timeout_secs),
                    self.batch_size,
                )?;
                Box::new(RetryingEmbedder::new(http, self.max_retries, backoff))
            }
            EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(self.dimension)),
        };
        Ok(provider)
    }
}
