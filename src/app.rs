//! Service wiring from a loaded configuration

use crate::auth::{AuthContext, AuthResolver, UserDirectory};
use crate::chunking::Chunker;
use crate::config::{Config, ConfigValidator};
use crate::embedding::{EmbeddingProvider, FastEmbedProvider};
use crate::error::Result;
use crate::index::IndexStore;
use crate::ingest::Ingestor;
use crate::llm::{ChatProvider, OfflineAnswerer, OpenAiChatProvider};
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::retrieval::{ChatService, RetrievalPipeline};
use crate::search::FederatedSearcher;
use std::sync::Arc;

/// Opened stores plus factories for the services built on them
///
/// The embedding model is only loaded by callers that need it.
pub struct App {
    config: Config,
    metadata: Arc<SqliteMetadataStore>,
    store: Arc<IndexStore>,
}

impl App {
    pub fn open(config: Config) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let metadata = Arc::new(SqliteMetadataStore::open(&config.metadata_db_path())?);
        let store = Arc::new(IndexStore::open(
            config.index_dir(),
            config.index.cache_capacity,
        )?);

        tracing::debug!("Opened data directory {}", config.data_dir().display());
        Ok(Self {
            config,
            metadata,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<SqliteMetadataStore> {
        &self.metadata
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    fn metadata_handle(&self) -> Arc<dyn MetadataStore> {
        self.metadata.clone()
    }

    /// Resolver granting admins the configured source catalogue
    pub fn directory(&self) -> UserDirectory {
        UserDirectory::new(self.metadata_handle(), self.config.sources.all.clone())
    }

    pub fn resolve_user(&self, user_id: &str) -> Result<AuthContext> {
        self.directory().resolve(user_id)
    }

    /// Load the configured local embedding model
    pub fn load_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(FastEmbedProvider::new(&self.config.embedding.model)?))
    }

    pub fn ingestor(&self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Ingestor> {
        Ok(Ingestor::new(
            Chunker::from_config(&self.config.chunking)?,
            embedder,
            self.metadata_handle(),
            Arc::clone(&self.store),
            self.config.embedding.batch_size,
        ))
    }

    pub fn pipeline(&self, embedder: Arc<dyn EmbeddingProvider>) -> Arc<RetrievalPipeline> {
        Arc::new(RetrievalPipeline::new(
            FederatedSearcher::new(Arc::clone(&self.store)),
            self.metadata_handle(),
            embedder,
            &self.config.retrieval,
        ))
    }

    /// Chat provider per config; `offline` forces the local answerer
    pub fn chat_provider(&self, offline: bool) -> Result<Arc<dyn ChatProvider>> {
        if offline || !self.config.llm.enabled {
            return Ok(Arc::new(OfflineAnswerer));
        }
        Ok(Arc::new(OpenAiChatProvider::from_config(&self.config.llm)?))
    }

    pub fn chat_service(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        offline: bool,
    ) -> Result<ChatService> {
        Ok(ChatService::new(
            self.pipeline(embedder),
            self.chat_provider(offline)?,
            self.metadata_handle(),
        ))
    }
}
