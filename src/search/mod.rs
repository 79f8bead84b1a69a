//! Federated search across a caller's sources
//!
//! Each source partition is searched independently (in parallel on the
//! blocking pool) and the per-source lists are merged into one ranking.
//! Limiting the merged list is left to the caller.

use crate::auth::SourceSet;
use crate::index::{IndexStore, ScoredHit};
use std::sync::Arc;

/// Fans a query out to every requested source of a tenant
#[derive(Clone)]
pub struct FederatedSearcher {
    store: Arc<IndexStore>,
}

impl FederatedSearcher {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Search every source in `sources` and merge the results
    ///
    /// # Returns
    /// All per-source hits, sorted by descending score. Equal scores keep the
    /// iteration order of `sources`.
    pub async fn search(
        &self,
        tenant_id: &str,
        sources: &SourceSet,
        query: &[f32],
        top_k_per_source: usize,
    ) -> Vec<ScoredHit> {
        if sources.is_empty() {
            return Vec::new();
        }

        let query: Arc<[f32]> = Arc::from(query);
        let mut tasks = Vec::with_capacity(sources.len());

        for source_key in sources {
            let store = Arc::clone(&self.store);
            let tenant_id = tenant_id.to_string();
            let source = source_key.clone();
            let query = Arc::clone(&query);

            let handle = tokio::task::spawn_blocking(move || {
                store.search(&tenant_id, &[source.as_str()], &query[..], top_k_per_source)
            });
            tasks.push((source_key, handle));
        }

        let mut per_source = Vec::with_capacity(tasks.len());
        for (source_key, handle) in tasks {
            match handle.await {
                Ok(hits) => per_source.push(hits),
                Err(e) => {
                    tracing::error!(
                        "Search of {}/{} failed, skipping source: {}",
                        tenant_id,
                        source_key,
                        e
                    );
                }
            }
        }

        let merged = merge_ranked(per_source);
        tracing::debug!(
            "Federated search over {} sources for tenant {} returned {} hits",
            sources.len(),
            tenant_id,
            merged.len()
        );
        merged
    }
}

/// Concatenate per-source hit lists and stably sort by descending score
pub fn merge_ranked(per_source: Vec<Vec<ScoredHit>>) -> Vec<ScoredHit> {
    let mut merged: Vec<ScoredHit> = per_source.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}
