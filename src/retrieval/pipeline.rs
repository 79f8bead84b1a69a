//! Authorization-filtered retrieval
//!
//! Only the caller's allowed sources are searched, and every hit is checked
//! again against the metadata of record before it leaves this module. A chunk
//! whose stored tenant or source has drifted away from what the caller may
//! read is dropped even though the index returned it.

use super::context::make_snippet;
use super::deduplication::deduplicate_hits;
use crate::auth::AuthContext;
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, SourcegateError};
use crate::metadata::{ChunkRecord, DocumentRecord, MetadataStore};
use crate::search::FederatedSearcher;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A ranked hit that passed the authorization re-check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedHit {
    pub chunk_id: String,
    pub score: f32,
    /// Source partition the hit was found in
    pub source_key: String,
    pub chunk: ChunkRecord,
}

/// Outcome of a retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// The caller may read no sources; nothing was searched
    NoSourcesAvailable,
    /// Authorized hits in rank order (possibly empty)
    Ranked(Vec<AuthorizedHit>),
}

impl Retrieval {
    pub fn is_no_sources(&self) -> bool {
        matches!(self, Retrieval::NoSourcesAvailable)
    }

    pub fn hits(&self) -> &[AuthorizedHit] {
        match self {
            Retrieval::NoSourcesAvailable => &[],
            Retrieval::Ranked(hits) => hits,
        }
    }

    pub fn into_hits(self) -> Vec<AuthorizedHit> {
        match self {
            Retrieval::NoSourcesAvailable => Vec::new(),
            Retrieval::Ranked(hits) => hits,
        }
    }
}

/// A hit joined with its document, ready for display or logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub source_key: String,
    pub score: f32,
    pub doc_id: String,
    pub doc_title: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub snippet: String,
    pub chunk_text: String,
    pub source_url: Option<String>,
}

/// Retrieval pipeline over the federated searcher and the metadata store
pub struct RetrievalPipeline {
    searcher: FederatedSearcher,
    metadata: Arc<dyn MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k_per_source: usize,
    final_top_n: usize,
    snippet_chars: usize,
}

impl RetrievalPipeline {
    pub fn new(
        searcher: FederatedSearcher,
        metadata: Arc<dyn MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            searcher,
            metadata,
            embedder,
            top_k_per_source: config.top_k_per_source,
            final_top_n: config.final_top_n,
            snippet_chars: config.snippet_chars,
        }
    }

    /// Configured per-source candidate count
    pub fn top_k_per_source(&self) -> usize {
        self.top_k_per_source
    }

    /// Embed `query_text` and retrieve for it
    ///
    /// A caller without sources is answered before the embedding service is
    /// contacted.
    pub async fn retrieve(
        &self,
        auth: &AuthContext,
        query_text: &str,
        top_k_per_source: usize,
    ) -> Result<Retrieval> {
        if auth.allowed_sources.is_empty() {
            tracing::debug!("User {} has no sources; skipping retrieval", auth.user_id);
            return Ok(Retrieval::NoSourcesAvailable);
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query_text.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| SourcegateError::Embedding(format!("Embedding task failed: {}", e)))??;

        self.retrieve_with_vector(auth, &query_vector, top_k_per_source)
            .await
    }

    /// Retrieve for an already-embedded query
    ///
    /// Searches exactly `auth.allowed_sources` of `auth.tenant_id`, keeps the
    /// best `final_top_n` hits, removes duplicate chunk ids and re-checks each
    /// remaining hit against its chunk record.
    pub async fn retrieve_with_vector(
        &self,
        auth: &AuthContext,
        query_vector: &[f32],
        top_k_per_source: usize,
    ) -> Result<Retrieval> {
        if auth.allowed_sources.is_empty() {
            tracing::debug!("User {} has no sources; skipping retrieval", auth.user_id);
            return Ok(Retrieval::NoSourcesAvailable);
        }

        let mut hits = self
            .searcher
            .search(
                &auth.tenant_id,
                &auth.allowed_sources,
                query_vector,
                top_k_per_source,
            )
            .await;
        hits.truncate(self.final_top_n);
        let hits = deduplicate_hits(hits);

        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let records = self
            .metadata
            .get_chunks_by_ids(&chunk_ids, &auth.tenant_id)?;
        let by_id: HashMap<&str, &ChunkRecord> =
            records.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut authorized = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = by_id.get(hit.chunk_id.as_str()) else {
                tracing::warn!(
                    "Dropping hit {} from {}/{}: no chunk record",
                    hit.chunk_id,
                    auth.tenant_id,
                    hit.source_key
                );
                continue;
            };

            if chunk.tenant_id != auth.tenant_id {
                tracing::warn!(
                    "Dropping hit {}: chunk belongs to tenant {}, caller is in {}",
                    hit.chunk_id,
                    chunk.tenant_id,
                    auth.tenant_id
                );
                continue;
            }

            if !auth.allowed_sources.contains(&chunk.source_key)
                || !auth.allowed_sources.contains(&hit.source_key)
            {
                tracing::warn!(
                    "Dropping hit {}: source {} (indexed under {}) is not allowed for user {}",
                    hit.chunk_id,
                    chunk.source_key,
                    hit.source_key,
                    auth.user_id
                );
                continue;
            }

            authorized.push(AuthorizedHit {
                chunk_id: hit.chunk_id,
                score: hit.score,
                source_key: hit.source_key,
                chunk: (*chunk).clone(),
            });
        }

        tracing::debug!(
            "Retrieved {} authorized hits for user {} across {} sources",
            authorized.len(),
            auth.user_id,
            auth.allowed_sources.len()
        );
        Ok(Retrieval::Ranked(authorized))
    }

    /// Join authorized hits with their documents
    ///
    /// Hits whose document no longer exists are dropped; order is kept.
    pub fn hydrate(
        &self,
        auth: &AuthContext,
        hits: &[AuthorizedHit],
    ) -> Result<Vec<RetrievedPassage>> {
        let mut seen = HashSet::new();
        let doc_ids: Vec<String> = hits
            .iter()
            .filter(|h| seen.insert(h.chunk.doc_id.as_str()))
            .map(|h| h.chunk.doc_id.clone())
            .collect();

        let documents = self
            .metadata
            .get_documents_by_ids(&doc_ids, &auth.tenant_id)?;
        let by_id: HashMap<&str, &DocumentRecord> =
            documents.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut passages = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(document) = by_id.get(hit.chunk.doc_id.as_str()) else {
                tracing::warn!(
                    "Dropping hit {}: document {} not found",
                    hit.chunk_id,
                    hit.chunk.doc_id
                );
                continue;
            };

            passages.push(RetrievedPassage {
                source_key: hit.source_key.clone(),
                score: hit.score,
                doc_id: document.id.clone(),
                doc_title: document.title.clone(),
                chunk_id: hit.chunk_id.clone(),
                chunk_index: hit.chunk.chunk_index,
                snippet: make_snippet(&hit.chunk.text, self.snippet_chars),
                chunk_text: hit.chunk.text.clone(),
                source_url: document.source_url.clone(),
            });
        }

        Ok(passages)
    }

    /// Fetch a full document the caller may read
    pub fn open_document(&self, auth: &AuthContext, doc_id: &str) -> Result<DocumentRecord> {
        open_document(self.metadata.as_ref(), auth, doc_id)
    }
}

/// Fetch a document of the caller's tenant, refusing sources outside their grant
pub fn open_document(
    metadata: &dyn MetadataStore,
    auth: &AuthContext,
    doc_id: &str,
) -> Result<DocumentRecord> {
    let document = metadata
        .get_document(doc_id, &auth.tenant_id)?
        .ok_or_else(|| SourcegateError::NotFound {
            kind: "Document",
            id: doc_id.to_string(),
        })?;

    if !auth.allowed_sources.contains(&document.source_key) {
        return Err(SourcegateError::NotAuthorized(format!(
            "source {} is not allowed for user {}",
            document.source_key, auth.user_id
        )));
    }

    Ok(document)
}
