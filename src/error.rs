use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the retrieval subsystem.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("cannot build an index from zero vectors")]
    EmptyIndex,

    #[error("index has not been built or loaded")]
    IndexNotBuilt,

    #[error("vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("bundle artifact missing: {}", path.display())]
    BundleMissing { path: PathBuf },

    #[error("bundle is corrupt: {0}")]
    BundleCorrupt(String),

    #[error("embedding provider failed: {0}")]
    EmbeddingProvider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read source records: {0}")]
    SourceData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// Provider failures are transient from the caller's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::EmbeddingProvider(_))
    }

    /// The persisted bundle cannot be used and must be rebuilt from source records.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            RagError::BundleMissing { .. } | RagError::BundleCorrupt(_)
        )
    }
}
