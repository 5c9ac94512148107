use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an Ollama-compatible `/api/embed` endpoint.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, endpoint, model, batch_size))
    }

    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| RagError::EmbeddingProvider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RagError::EmbeddingProvider(format!(
                "{} returned {status}: {body}",
                self.endpoint
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| RagError::EmbeddingProvider(format!("invalid response body: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::EmbeddingProvider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "requesting embeddings");
            vectors.extend(self.encode_batch(batch)?);
        }
        Ok(vectors)
    }

    fn fingerprint(&self) -> Option<String> {
        Some(format!("http/{}", self.model))
    }
}
