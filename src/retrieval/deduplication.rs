//! Result deduplication by chunk ID

use crate::index::ScoredHit;
use std::collections::HashSet;

/// Deduplicate hits by chunk_id, keeping the first (highest-ranked) instance
///
/// # Arguments
/// * `hits` - Ranked hits potentially with duplicates
///
/// # Returns
/// Deduplicated hits, maintaining rank order
pub fn deduplicate_hits(hits: Vec<ScoredHit>) -> Vec<ScoredHit> {
    let mut seen: HashSet<String> = HashSet::new();

    hits.into_iter()
        .filter(|hit| seen.insert(hit.chunk_id.clone()))
        .collect()
}
