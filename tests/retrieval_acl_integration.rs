//! Authorization filtering across the retrieval pipeline and chat service

use chrono::Utc;
use sourcegate::auth::AuthContext;
use sourcegate::config::RetrievalConfig;
use sourcegate::embedding::EmbeddingProvider;
use sourcegate::index::IndexStore;
use sourcegate::llm::OfflineAnswerer;
use sourcegate::metadata::{
    ChunkRecord, DocumentRecord, MetadataStore, NewChunk, NewDocument, NewUser, QueryLog,
    UserRecord,
};
use sourcegate::retrieval::{open_document, ChatService, RetrievalPipeline, NO_SOURCES_ANSWER};
use sourcegate::search::FederatedSearcher;
use sourcegate::{Result, SourcegateError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Embeds every text to the same direction and counts calls
struct FixedEmbedder {
    calls: AtomicUsize,
}

impl EmbeddingProvider for FixedEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0, 0.0])
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Metadata whose chunk lookups ignore the tenant, like a backend that has
/// drifted from the index
#[derive(Default)]
struct DriftingStore {
    chunks: HashMap<String, ChunkRecord>,
    documents: HashMap<String, DocumentRecord>,
    logs: Mutex<Vec<QueryLog>>,
}

impl DriftingStore {
    fn chunk(&mut self, id: &str, tenant_id: &str, source_key: &str, doc_id: &str, text: &str) {
        self.chunks.insert(
            id.to_string(),
            ChunkRecord {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                source_key: source_key.to_string(),
                doc_id: doc_id.to_string(),
                chunk_index: 0,
                text: text.to_string(),
            },
        );
    }

    fn document(&mut self, id: &str, tenant_id: &str, source_key: &str, title: &str) {
        self.documents.insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                source_key: source_key.to_string(),
                title: title.to_string(),
                raw_text: format!("{} body", title),
                source_url: None,
                created_at: Utc::now(),
            },
        );
    }
}

impl MetadataStore for DriftingStore {
    fn get_chunks_by_ids(&self, ids: &[String], _tenant_id: &str) -> Result<Vec<ChunkRecord>> {
        Ok(ids.iter().filter_map(|id| self.chunks.get(id).cloned()).collect())
    }

    fn get_documents_by_ids(
        &self,
        ids: &[String],
        tenant_id: &str,
    ) -> Result<Vec<DocumentRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.documents.get(id))
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn get_document(&self, id: &str, tenant_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .documents
            .get(id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    fn add_document(&self, _document: NewDocument) -> Result<String> {
        unimplemented!("read-only fixture")
    }

    fn add_chunks(
        &self,
        _tenant_id: &str,
        _source_key: &str,
        _doc_id: &str,
        _chunks: &[NewChunk],
    ) -> Result<Vec<String>> {
        unimplemented!("read-only fixture")
    }

    fn delete_document(&self, _id: &str) -> Result<()> {
        unimplemented!("read-only fixture")
    }

    fn create_user(&self, _user: NewUser) -> Result<String> {
        unimplemented!("read-only fixture")
    }

    fn get_user(&self, _id: &str) -> Result<Option<UserRecord>> {
        Ok(None)
    }

    fn list_users(&self, _tenant_id: &str) -> Result<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    fn add_query_log(&self, log: QueryLog) -> Result<String> {
        let mut logs = self.logs.lock().unwrap();
        logs.push(log);
        Ok(format!("log-{}", logs.len()))
    }

    fn add_feedback(
        &self,
        log_id: &str,
        _user_id: &str,
        _helpful: bool,
        _comment: Option<String>,
    ) -> Result<String> {
        Ok(format!("feedback-{}", log_id))
    }
}

struct Fixture {
    _temp: TempDir,
    store: Arc<IndexStore>,
    metadata: Arc<DriftingStore>,
    embedder: Arc<FixedEmbedder>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open(temp.path().join("indexes"), 8).unwrap());

        let add = |tenant: &str, source: &str, vector: [f32; 3], id: &str| {
            store
                .add(tenant, source, &[vector.to_vec()], &[id.to_string()])
                .unwrap();
        };
        add("acme", "finance", [1.0, 0.0, 0.0], "c-fin");
        add("acme", "public", [1.0, 0.1, 0.0], "c-orphan");
        add("acme", "public", [1.0, 0.2, 0.0], "c-pub");
        add("acme", "public", [1.0, 0.3, 0.0], "c-foreign");
        add("acme", "public", [1.0, 0.5, 0.0], "c-moved");
        add("acme", "hr", [1.0, 0.0, 0.0], "c-hr");
        add("globex", "finance", [1.0, 0.0, 0.0], "c-globex");

        let mut metadata = DriftingStore::default();
        metadata.document("d-fin", "acme", "finance", "Budget");
        metadata.document("d-pub", "acme", "public", "Handbook");
        metadata.document("d-hr", "acme", "hr", "Salaries");
        metadata.document("d-globex", "globex", "finance", "Globex budget");
        metadata.chunk("c-fin", "acme", "finance", "d-fin", "Budget is 10k");
        metadata.chunk("c-pub", "acme", "public", "d-pub", "Vacation is 25 days");
        metadata.chunk("c-hr", "acme", "hr", "d-hr", "Salary bands");
        metadata.chunk("c-globex", "globex", "finance", "d-globex", "Globex budget");
        // Indexed under acme/public, but the record of truth says otherwise
        metadata.chunk("c-moved", "acme", "hr", "d-hr", "Moved to hr");
        metadata.chunk("c-foreign", "globex", "public", "d-globex", "Foreign tenant");

        Self {
            _temp: temp,
            store,
            metadata: Arc::new(metadata),
            embedder: Arc::new(FixedEmbedder {
                calls: AtomicUsize::new(0),
            }),
        }
    }

    fn pipeline(&self, final_top_n: usize) -> Arc<RetrievalPipeline> {
        let config = RetrievalConfig {
            top_k_per_source: 10,
            final_top_n,
            snippet_chars: 40,
        };
        Arc::new(RetrievalPipeline::new(
            FederatedSearcher::new(Arc::clone(&self.store)),
            self.metadata.clone(),
            self.embedder.clone(),
            &config,
        ))
    }

    fn embed_calls(&self) -> usize {
        self.embedder.calls.load(Ordering::SeqCst)
    }
}

fn member(sources: &[&str]) -> AuthContext {
    AuthContext::new("acme", "u-member", "member", sources.iter().copied())
}

#[tokio::test]
async fn test_no_sources_never_embeds() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(10);

    let retrieval = pipeline.retrieve(&member(&[]), "budget", 5).await.unwrap();

    assert!(retrieval.is_no_sources());
    assert!(retrieval.hits().is_empty());
    assert_eq!(fixture.embed_calls(), 0);
}

#[tokio::test]
async fn test_hits_limited_to_tenant_and_allowed_sources() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(10);
    let auth = member(&["finance", "public"]);

    let retrieval = pipeline.retrieve(&auth, "budget", 10).await.unwrap();
    assert_eq!(fixture.embed_calls(), 1);

    let ids: Vec<&str> = retrieval.hits().iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c-fin", "c-pub"]);

    for hit in retrieval.hits() {
        assert_eq!(hit.chunk.tenant_id, "acme");
        assert!(auth.allows(&hit.chunk.tenant_id, &hit.chunk.source_key));
        assert_eq!(hit.source_key, hit.chunk.source_key);
    }
}

#[tokio::test]
async fn test_source_outside_grant_is_not_searched() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(10);

    let retrieval = pipeline
        .retrieve(&member(&["finance"]), "salary", 10)
        .await
        .unwrap();

    let ids: Vec<&str> = retrieval.hits().iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c-fin"]);
}

#[tokio::test]
async fn test_final_top_n_applies_before_filtering() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(2);

    let retrieval = pipeline
        .retrieve_with_vector(&member(&["finance", "public"]), &[1.0, 0.0, 0.0], 10)
        .await
        .unwrap();

    // c-orphan took the second slot and has no record
    let ids: Vec<&str> = retrieval.hits().iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c-fin"]);
}

#[tokio::test]
async fn test_unknown_source_yields_empty_ranking() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(10);

    let retrieval = pipeline
        .retrieve(&member(&["does-not-exist"]), "budget", 10)
        .await
        .unwrap();

    assert!(!retrieval.is_no_sources());
    assert!(retrieval.hits().is_empty());
}

#[tokio::test]
async fn test_hydrate_joins_documents() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(10);
    let auth = member(&["finance", "public"]);

    let retrieval = pipeline.retrieve(&auth, "budget", 10).await.unwrap();
    let passages = pipeline.hydrate(&auth, retrieval.hits()).unwrap();

    let titles: Vec<&str> = passages.iter().map(|p| p.doc_title.as_str()).collect();
    assert_eq!(titles, vec!["Budget", "Handbook"]);
    assert_eq!(passages[0].snippet, "Budget is 10k");
    assert_eq!(passages[0].doc_id, "d-fin");
}

#[tokio::test]
async fn test_ask_answers_from_authorized_context_and_logs() {
    let fixture = Fixture::new();
    let service = ChatService::new(
        fixture.pipeline(10),
        Arc::new(OfflineAnswerer),
        fixture.metadata.clone(),
    );
    let auth = member(&["finance", "public"]);

    let response = service.ask(&auth, "What is the budget?").await.unwrap();

    assert!(!response.no_sources);
    assert!(response.answer.contains("[source=finance]"));
    assert!(response.answer.contains("Budget is 10k"));
    assert!(!response.answer.contains("Salary"));
    assert_eq!(response.retrieved.len(), 2);

    let logs = fixture.metadata.logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.message, "What is the budget?");
    assert_eq!(log.answer, response.answer);
    assert_eq!(log.allowed_sources, vec!["finance", "public"]);
    let logged: Vec<&str> = log.retrieved.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(logged, vec!["c-fin", "c-pub"]);
    drop(logs);

    let feedback = service
        .feedback(&auth, &response.log_id, true, None)
        .unwrap();
    assert_eq!(feedback, format!("feedback-{}", response.log_id));
}

#[tokio::test]
async fn test_ask_without_sources_is_logged() {
    let fixture = Fixture::new();
    let service = ChatService::new(
        fixture.pipeline(10),
        Arc::new(OfflineAnswerer),
        fixture.metadata.clone(),
    );

    let response = service.ask(&member(&[]), "Anything?").await.unwrap();

    assert!(response.no_sources);
    assert_eq!(response.answer, NO_SOURCES_ANSWER);
    assert!(response.retrieved.is_empty());
    assert_eq!(fixture.embed_calls(), 0);

    let logs = fixture.metadata.logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].answer, NO_SOURCES_ANSWER);
    assert!(logs[0].allowed_sources.is_empty());
}

#[test]
fn test_open_document_checks_grant() {
    let fixture = Fixture::new();
    let auth = member(&["finance", "public"]);

    let document = open_document(fixture.metadata.as_ref(), &auth, "d-pub").unwrap();
    assert_eq!(document.title, "Handbook");

    let err = open_document(fixture.metadata.as_ref(), &auth, "d-hr").unwrap_err();
    assert!(matches!(err, SourcegateError::NotAuthorized(_)));

    // Another tenant's document does not exist for this caller
    let err = open_document(fixture.metadata.as_ref(), &auth, "d-globex").unwrap_err();
    assert!(matches!(err, SourcegateError::NotFound { .. }));
}
