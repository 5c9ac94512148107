use std::fmt::Write as _;
use std::path::Path;

use ndarray::ArrayView1;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::embedding::{EmbeddingProvider, to_matrix};
use crate::error::{RagError, Result};
use crate::persistence::Bundle;
use crate::vector_db::{FlatIndex, VectorIndex};

pub const CONTEXT_HEADER: &str = "# RETRIEVED_SCHOOLS";

/// A retrieved document together with its squared distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDocument<'a> {
    pub document: &'a Document,
    pub distance: f32,
}

/// How `Retriever::load_or_build` obtained its bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleSource {
    Loaded,
    Rebuilt,
}

impl<I: VectorIndex + Default> Bundle<I> {
    /// Embeds every document's content and builds a fresh index over it.
    pub fn build<P>(documents: Vec<Document>, provider: &P) -> Result<Self>
    where
        P: EmbeddingProvider + ?Sized,
    {
        if documents.is_empty() {
            return Err(RagError::EmptyIndex);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = to_matrix(provider.encode(&texts)?, documents.len())?;

        let mut index = I::default();
        index.build(embeddings.view())?;

        info!(
            documents = documents.len(),
            dimension = embeddings.ncols(),
            "built retrieval bundle"
        );
        Ok(Bundle::new(documents, embeddings, index)?.with_embedder(provider.fingerprint()))
    }
}

/// Owns an embedding provider and at most one queryable bundle.
///
/// A bundle is only ever replaced whole, so readers never observe documents
/// and index out of step. Queries take `&self` and never mutate.
pub struct Retriever<P, I = FlatIndex> {
    provider: P,
    bundle: Option<Bundle<I>>,
}

impl<P, I> Retriever<P, I>
where
    P: EmbeddingProvider,
    I: VectorIndex + Default,
{
    pub fn new(provider: P) -> Self {
        Retriever {
            provider,
            bundle: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn is_ready(&self) -> bool {
        self.bundle.is_some()
    }

    pub fn bundle(&self) -> Option<&Bundle<I>> {
        self.bundle.as_ref()
    }

    /// Documents of the current bundle, empty before build or load.
    pub fn documents(&self) -> &[Document] {
        self.bundle
            .as_ref()
            .map(|b| b.documents())
            .unwrap_or(&[])
    }

    /// Builds a new bundle from `documents` and swaps it in. On failure the
    /// previous bundle, if any, keeps serving.
    pub fn build(&mut self, documents: Vec<Document>) -> Result<()> {
        let bundle = Bundle::build(documents, &self.provider)?;
        self.bundle = Some(bundle);
        Ok(())
    }

    /// Swaps in a complete bundle, returning the one it replaces.
    pub fn install(&mut self, bundle: Bundle<I>) -> Option<Bundle<I>> {
        self.bundle.replace(bundle)
    }

    pub fn teardown(&mut self) -> Option<Bundle<I>> {
        self.bundle.take()
    }

    /// Nearest documents to `query` with their distances, nearest first.
    pub fn retrieve_scored(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument<'_>>> {
        let bundle = self.bundle.as_ref().ok_or(RagError::IndexNotBuilt)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let encoded = self.provider.encode(&[query.to_string()])?;
        let query_vector = encoded.into_iter().next().ok_or_else(|| {
            RagError::EmbeddingProvider("provider returned no vector for the query".to_string())
        })?;

        let neighbors = bundle
            .index()
            .search(ArrayView1::from(query_vector.as_slice()), top_k)?;
        debug!(
            top_k,
            hits = neighbors.len(),
            nearest = ?neighbors.first().map(|n| n.distance),
            "searched index"
        );

        let documents = bundle.documents();
        neighbors
            .into_iter()
            .map(|n| {
                documents
                    .get(n.id)
                    .map(|document| ScoredDocument {
                        document,
                        distance: n.distance,
                    })
                    .ok_or_else(|| {
                        RagError::BundleCorrupt(format!(
                            "index returned id {} for {} documents",
                            n.id,
                            documents.len()
                        ))
                    })
            })
            .collect()
    }

    /// Nearest documents to `query`, nearest first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<&Document>> {
        Ok(self
            .retrieve_scored(query, top_k)?
            .into_iter()
            .map(|scored| scored.document)
            .collect())
    }

    pub fn format_retrieved_context(&self, documents: &[&Document]) -> String {
        format_retrieved_context(documents.iter().copied())
    }
}

impl<P, I> Retriever<P, I>
where
    P: EmbeddingProvider,
    I: VectorIndex + Default + Serialize + DeserializeOwned,
{
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        self.bundle
            .as_ref()
            .ok_or(RagError::IndexNotBuilt)?
            .save(prefix)
    }

    /// Loads and swaps in the bundle saved under `prefix`. A bundle embedded
    /// by a different provider is reported as corrupt. On failure the
    /// current bundle is left untouched.
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let bundle: Bundle<I> = Bundle::load(prefix)?;
        let current = self.provider.fingerprint();
        if bundle.embedder() != current.as_deref() {
            return Err(RagError::BundleCorrupt(format!(
                "bundle was embedded by {}, provider is {}",
                bundle.embedder().unwrap_or("an unknown embedder"),
                current.as_deref().unwrap_or("unknown")
            )));
        }
        self.bundle = Some(bundle);
        Ok(())
    }

    /// Loads the bundle under `prefix`, falling back to a full rebuild from
    /// `source` when it is missing or corrupt. A rebuilt bundle is saved
    /// back; failing to save it only costs the next startup a rebuild.
    pub fn load_or_build<F>(&mut self, prefix: impl AsRef<Path>, source: F) -> Result<BundleSource>
    where
        F: FnOnce() -> Result<Vec<Document>>,
    {
        let prefix = prefix.as_ref();
        match self.load(prefix) {
            Ok(()) => return Ok(BundleSource::Loaded),
            Err(e) if e.requires_rebuild() => {
                warn!(prefix = %prefix.display(), error = %e, "rebuilding retrieval bundle");
            }
            Err(e) => return Err(e),
        }

        self.build(source()?)?;
        if let Err(e) = self.save(prefix) {
            warn!(prefix = %prefix.display(), error = %e, "failed to persist rebuilt bundle");
        }
        Ok(BundleSource::Rebuilt)
    }
}

/// Renders documents as the numbered context block handed to prompt assembly.
///
/// ```text
/// # RETRIEVED_SCHOOLS
/// 1. <content>
///    Phone: <phone>
///    Email: <email>
/// ```
///
/// Contact lines appear only when the field is present.
pub fn format_retrieved_context<'a>(documents: impl IntoIterator<Item = &'a Document>) -> String {
    let mut context = String::from(CONTEXT_HEADER);
    context.push('\n');

    for (i, doc) in documents.into_iter().enumerate() {
        let _ = writeln!(context, "{}. {}", i + 1, doc.content);
        if let Some(phone) = doc.metadata.phone.as_deref().filter(|p| !p.is_empty()) {
            let _ = writeln!(context, "   Phone: {phone}");
        }
        if let Some(email) = doc.metadata.email.as_deref().filter(|e| !e.is_empty()) {
            let _ = writeln!(context, "   Email: {email}");
        }
    }

    context
}
