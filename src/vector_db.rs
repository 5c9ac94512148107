use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};

/// A search hit: position of the vector in build order and its squared
/// Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: usize,
    pub distance: f32,
}

/// k-nearest-neighbor search over a set of vectors added all at once.
///
/// Results are ordered by ascending squared Euclidean distance with ties
/// broken by lower id, so identical vectors always produce identical
/// rankings regardless of implementation.
pub trait VectorIndex {
    /// File suffix of the persisted index artifact, appended to the bundle prefix.
    const ARTIFACT_SUFFIX: &'static str;

    /// Replaces any previous state with an index over `vectors` (one row per vector).
    fn build(&mut self, vectors: ArrayView2<f32>) -> Result<()>;

    /// Returns the `min(k, len)` nearest vectors.
    fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<Neighbor>>;

    fn len(&self) -> usize;

    fn dimension(&self) -> Option<usize>;

    fn is_built(&self) -> bool {
        self.dimension().is_some()
    }

    /// Whether this index was built over exactly `embeddings`. Indexes that
    /// do not keep raw vectors can only vouch for the shape.
    fn indexes(&self, embeddings: ArrayView2<f32>) -> bool {
        self.len() == embeddings.nrows() && self.dimension() == Some(embeddings.ncols())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive linear-scan index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    vectors: Option<Array2<f32>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorIndex for FlatIndex {
    const ARTIFACT_SUFFIX: &'static str = "flat.index";

    fn build(&mut self, vectors: ArrayView2<f32>) -> Result<()> {
        if vectors.nrows() == 0 {
            return Err(RagError::EmptyIndex);
        }
        self.vectors = Some(vectors.to_owned());
        debug!(
            vectors = vectors.nrows(),
            dimension = vectors.ncols(),
            "built flat index"
        );
        Ok(())
    }

    fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<Neighbor>> {
        let vectors = self.vectors.as_ref().ok_or(RagError::IndexNotBuilt)?;
        if query.len() != vectors.ncols() {
            return Err(RagError::DimensionMismatch {
                expected: vectors.ncols(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = vectors
            .outer_iter()
            .enumerate()
            .map(|(id, row)| Neighbor {
                id,
                distance: squared_distance(row, query),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    fn len(&self) -> usize {
        self.vectors.as_ref().map_or(0, |v| v.nrows())
    }

    fn dimension(&self) -> Option<usize> {
        self.vectors.as_ref().map(|v| v.ncols())
    }

    fn indexes(&self, embeddings: ArrayView2<f32>) -> bool {
        self.vectors
            .as_ref()
            .is_some_and(|v| v.view() == embeddings)
    }
}
