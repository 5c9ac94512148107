//! Semantic retrieval over a catalog of schools.
//!
//! Primary school records and program flags are merged into [`Document`]s,
//! embedded by an [`EmbeddingProvider`], indexed by a [`VectorIndex`], and
//! queried through a [`Retriever`] that renders the nearest documents as a
//! context block for prompt assembly. A [`Bundle`] can be persisted and
//! reloaded instead of re-embedding the corpus on every start.

pub mod address;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod http_embedding;
pub mod merger;
pub mod persistence;
pub mod retriever;
pub mod utils;
pub mod vector_db;

pub use config::{EmbeddingBackend, EmbeddingConfig, RagConfig};
pub use document::{Document, DocumentMetadata};
pub use embedding::{EmbeddingProvider, HashingEmbedder, RetryingEmbedder};
pub use error::{RagError, Result};
pub use http_embedding::HttpEmbeddingProvider;
pub use merger::{MergeColumns, Record, merge_records};
pub use persistence::{Bundle, BundlePaths};
pub use retriever::{BundleSource, Retriever, ScoredDocument, format_retrieved_context};
pub use vector_db::{FlatIndex, Neighbor, VectorIndex};
