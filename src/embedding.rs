use std::hash::{Hash, Hasher};
use std::thread::sleep;
use std::time::Duration;

use lazy_static::lazy_static;
use ndarray::Array2;
use regex::Regex;
use rustc_hash::{FxHashSet, FxHasher};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::error::{RagError, Result};

/// Maps text to fixed-dimension vectors.
///
/// Output is positionally stable: `encode(texts)[i]` embeds `texts[i]`, and
/// every vector returned within a session has the same dimension.
pub trait EmbeddingProvider: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Names the model and vector width behind `encode`. Bundles embedded
    /// under a different fingerprint are not reused. `None` when unknown.
    fn fingerprint(&self) -> Option<String> {
        None
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).encode(texts)
    }

    fn fingerprint(&self) -> Option<String> {
        (**self).fingerprint()
    }
}

/// Packs provider output into an `(N, D)` matrix, rejecting responses that
/// would break document/embedding alignment.
pub fn to_matrix(vectors: Vec<Vec<f32>>, expected_rows: usize) -> Result<Array2<f32>> {
    if vectors.len() != expected_rows {
        return Err(RagError::EmbeddingProvider(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected_rows
        )));
    }
    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    if expected_rows > 0 && dim == 0 {
        return Err(RagError::EmbeddingProvider(
            "provider returned zero-dimensional vectors".to_string(),
        ));
    }
    if let Some((row, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(RagError::EmbeddingProvider(format!(
            "vector {} has dimension {}, expected {}",
            row,
            v.len(),
            dim
        )));
    }

    let flat: Vec<f32> = vectors.into_iter().flatten().collect();
    Array2::from_shape_vec((expected_rows, dim), flat)
        .map_err(|e| RagError::EmbeddingProvider(format!("malformed embedding matrix: {e}")))
}

lazy_static! {
    static ref STOP_WORDS: FxHashSet<&'static str> = {
        let words = vec![
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
            "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
            "to", "was", "were", "will", "with"
        ];
        words.into_iter().collect()
    };
    static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").unwrap();
}

/// Offline feature-hashing embedder.
///
/// Deterministic across runs, so it doubles as the embedder for
/// tests and for environments without a model server.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let text = text.nfc().collect::<String>().to_lowercase();
        let text = PUNCTUATION.replace_all(&text, " ");

        text.split_whitespace()
            .filter(|&token| !STOP_WORDS.contains(token))
            .map(|token| token.to_string())
            .collect()
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in self.tokenize(text) {
            let mut hasher = FxHasher::default();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            // high half of the hash is the better mixed one
            let bucket = ((hash >> 32) % self.dimension as u64) as usize;
            let sign = if hash & (1 << 31) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    fn fingerprint(&self) -> Option<String> {
        Some(format!("hashing/{}", self.dimension))
    }
}

/// Retries retryable provider failures with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryingEmbedder<P> {
    inner: P,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl<P: EmbeddingProvider> RetryingEmbedder<P> {
    pub fn new(inner: P, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(16),
        }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for RetryingEmbedder<P> {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.inner.encode(texts) {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "embedding request failed, retrying");
                    sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fingerprint(&self) -> Option<String> {
        self.inner.fingerprint()
    }
}
