//! In-memory form of one (tenant, source) partition and its exact search

use crate::error::{Result, SourcegateError};
use ndarray::{aview1, ArrayView2};
use std::cmp::Ordering;

/// Added to the L2 norm so all-zero vectors normalize to zero instead of NaN
pub const NORM_EPSILON: f32 = 1e-12;

/// Scale a vector to unit length
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    vector.iter().map(|x| x / norm).collect()
}

/// Vectors and chunk identifiers of one partition.
///
/// `vectors` is a row-major `count x dimension` matrix of unit vectors;
/// row `i` is the embedding of the chunk named by `ids[i]`.
#[derive(Debug, Clone, Default)]
pub struct IndexPartition {
    dimension: Option<usize>,
    vectors: Vec<f32>,
    ids: Vec<String>,
}

/// Partition lengths before an append, used to undo it
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppendMark {
    dimension: Option<usize>,
    vectors_len: usize,
    ids_len: usize,
}

impl IndexPartition {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuild a partition from persisted parts. The caller has checked that
    /// `vectors.len()` is a multiple of `dimension`.
    pub(crate) fn from_parts(dimension: usize, vectors: Vec<f32>, ids: Vec<String>) -> Self {
        Self {
            dimension: Some(dimension),
            vectors,
            ids,
        }
    }

    /// Dimensionality fixed by the first write, if any
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn vector_count(&self) -> usize {
        match self.dimension {
            Some(d) if d > 0 => self.vectors.len() / d,
            _ => 0,
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn is_empty(&self) -> bool {
        self.vector_count() == 0
    }

    /// Normalize and append a batch. Nothing is modified if the batch is rejected.
    pub(crate) fn append(
        &mut self,
        vectors: &[Vec<f32>],
        chunk_ids: &[String],
    ) -> Result<AppendMark> {
        let dimension = self.check_batch(vectors, chunk_ids)?;
        self.realign();

        let mark = AppendMark {
            dimension: self.dimension,
            vectors_len: self.vectors.len(),
            ids_len: self.ids.len(),
        };

        self.dimension = Some(dimension);
        self.vectors.reserve(vectors.len() * dimension);
        for vector in vectors {
            self.vectors.extend(normalize(vector));
        }
        self.ids.extend(chunk_ids.iter().cloned());

        Ok(mark)
    }

    /// Undo an append whose durable write failed
    pub(crate) fn rollback(&mut self, mark: AppendMark) {
        self.dimension = mark.dimension;
        self.vectors.truncate(mark.vectors_len);
        self.ids.truncate(mark.ids_len);
    }

    fn check_batch(&self, vectors: &[Vec<f32>], chunk_ids: &[String]) -> Result<usize> {
        if vectors.len() != chunk_ids.len() {
            return Err(SourcegateError::InvalidBatch(format!(
                "{} vectors but {} chunk ids",
                vectors.len(),
                chunk_ids.len()
            )));
        }

        let first = vectors
            .first()
            .ok_or_else(|| SourcegateError::InvalidBatch("empty batch".to_string()))?;
        if first.is_empty() {
            return Err(SourcegateError::InvalidBatch(
                "vectors must not be empty".to_string(),
            ));
        }

        let expected = self.dimension.unwrap_or(first.len());
        for vector in vectors {
            if vector.len() != expected {
                return Err(SourcegateError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        Ok(expected)
    }

    /// Drop rows that no identifier names (or identifiers with no row) so
    /// positions line up again before new rows are appended. Only an
    /// interrupted write leaves the two sequences with different lengths.
    fn realign(&mut self) {
        let Some(d) = self.dimension else {
            return;
        };
        let count = self.vector_count();
        if count == self.ids.len() {
            return;
        }

        let aligned = count.min(self.ids.len());
        tracing::warn!(
            "Partition holds {} vectors but {} ids; truncating both to {} before append",
            count,
            self.ids.len(),
            aligned
        );
        self.vectors.truncate(aligned * d);
        self.ids.truncate(aligned);
    }

    /// Exact inner-product search against every stored vector.
    ///
    /// `query` must already be normalized and match the partition's
    /// dimensionality. Returns up to `k` `(row, score)` pairs, best first, ties
    /// going to the earlier row.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let count = self.vector_count();
        let Some(d) = self.dimension else {
            return Vec::new();
        };
        if count == 0 || k == 0 || query.len() != d {
            return Vec::new();
        }

        let matrix = match ArrayView2::from_shape((count, d), &self.vectors[..count * d]) {
            Ok(matrix) => matrix,
            Err(e) => {
                tracing::error!("Partition matrix has an invalid shape: {}", e);
                return Vec::new();
            }
        };
        let scores = matrix.dot(&aview1(query));

        let mut ranked: Vec<(usize, f32)> = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .collect();

        if k < ranked.len() {
            ranked.select_nth_unstable_by(k - 1, rank_order);
            ranked.truncate(k);
        }
        ranked.sort_by(rank_order);
        ranked
    }
}

/// Higher score first; equal scores keep insertion order
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
