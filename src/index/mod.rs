//! Per-(tenant, source) vector index store
//!
//! Each tenant/source pair owns an independent partition of unit-normalized
//! vectors plus the chunk identifiers they represent. Search is an exact
//! inner-product scan, which equals cosine similarity on normalized vectors.

mod key;
mod partition;
mod persist;
mod store;

pub use key::IndexKey;
pub use partition::{normalize, IndexPartition, NORM_EPSILON};
pub use store::{IndexStore, IndexStoreStats};

use serde::{Deserialize, Serialize};

/// One search result: a chunk, its similarity to the query, and the source
/// partition it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub chunk_id: String,
    pub score: f32,
    pub source_key: String,
}
