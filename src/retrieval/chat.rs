//! Question answering over authorized passages, with audit logging

use super::context::build_context;
use super::pipeline::{Retrieval, RetrievalPipeline, RetrievedPassage};
use crate::auth::AuthContext;
use crate::error::Result;
use crate::llm::ChatProvider;
use crate::metadata::{MetadataStore, QueryLog, RetrievedRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Answer given to callers who may read no sources
pub const NO_SOURCES_ANSWER: &str = "No sources available for this user.";

/// Answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub retrieved: Vec<RetrievedPassage>,
    pub log_id: String,
    pub no_sources: bool,
}

/// Retrieval, answer generation and query logging
pub struct ChatService {
    pipeline: Arc<RetrievalPipeline>,
    provider: Arc<dyn ChatProvider>,
    metadata: Arc<dyn MetadataStore>,
}

impl ChatService {
    pub fn new(
        pipeline: Arc<RetrievalPipeline>,
        provider: Arc<dyn ChatProvider>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            pipeline,
            provider,
            metadata,
        }
    }

    pub fn pipeline(&self) -> &Arc<RetrievalPipeline> {
        &self.pipeline
    }

    /// Answer `message` from the caller's sources and log the exchange
    pub async fn ask(&self, auth: &AuthContext, message: &str) -> Result<ChatResponse> {
        let retrieval = self
            .pipeline
            .retrieve(auth, message, self.pipeline.top_k_per_source())
            .await?;

        let hits = match retrieval {
            Retrieval::NoSourcesAvailable => {
                let log_id = self.metadata.add_query_log(QueryLog {
                    tenant_id: auth.tenant_id.clone(),
                    user_id: auth.user_id.clone(),
                    message: message.to_string(),
                    answer: NO_SOURCES_ANSWER.to_string(),
                    allowed_sources: Vec::new(),
                    retrieved: Vec::new(),
                })?;
                tracing::info!("Answered query {} without sources", log_id);

                return Ok(ChatResponse {
                    answer: NO_SOURCES_ANSWER.to_string(),
                    retrieved: Vec::new(),
                    log_id,
                    no_sources: true,
                });
            }
            Retrieval::Ranked(hits) => hits,
        };

        let context = build_context(&hits);
        let answer = self.provider.complete(&context, message).await?;
        let retrieved = self.pipeline.hydrate(auth, &hits)?;

        let log_id = self.metadata.add_query_log(QueryLog {
            tenant_id: auth.tenant_id.clone(),
            user_id: auth.user_id.clone(),
            message: message.to_string(),
            answer: answer.clone(),
            allowed_sources: auth.allowed_sources.iter().cloned().collect(),
            retrieved: retrieved
                .iter()
                .map(|p| RetrievedRef {
                    source_key: p.source_key.clone(),
                    score: p.score,
                    doc_id: p.doc_id.clone(),
                    doc_title: p.doc_title.clone(),
                    chunk_id: p.chunk_id.clone(),
                    chunk_index: p.chunk_index,
                })
                .collect(),
        })?;

        tracing::info!(
            "Answered query {} with {} passages via {}",
            log_id,
            retrieved.len(),
            self.provider.name()
        );

        Ok(ChatResponse {
            answer,
            retrieved,
            log_id,
            no_sources: false,
        })
    }

    /// Record whether an answer helped
    pub fn feedback(
        &self,
        auth: &AuthContext,
        log_id: &str,
        helpful: bool,
        comment: Option<String>,
    ) -> Result<String> {
        self.metadata
            .add_feedback(log_id, &auth.user_id, helpful, comment)
    }
}
