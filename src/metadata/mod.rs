//! Document, chunk and user metadata
//!
//! The index store only knows chunk identifiers; everything else about a chunk
//! (its text, document, tenant and source of record) lives here. The retrieval
//! pipeline re-checks tenant and source against these records before exposing
//! any hit.

mod sqlite;

pub use sqlite::{MetadataStats, SqliteMetadataStore};

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub tenant_id: String,
    pub source_key: String,
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub tenant_id: String,
    pub source_key: String,
    pub title: String,
    pub raw_text: String,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Document to register during ingestion
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub tenant_id: String,
    pub source_key: String,
    pub title: String,
    pub raw_text: String,
    pub source_url: Option<String>,
}

/// Chunk to register during ingestion
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: u32,
    pub text: String,
}

/// A user and the sources they may read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    pub role: String,
    pub allowed_sources: Vec<String>,
}

/// User to create
#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: String,
    pub email: String,
    pub role: String,
    pub allowed_sources: Vec<String>,
}

/// Reference to one passage that was shown for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedRef {
    pub source_key: String,
    pub score: f32,
    pub doc_id: String,
    pub doc_title: String,
    pub chunk_id: String,
    pub chunk_index: u32,
}

/// Audit record of one question and its answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLog {
    pub tenant_id: String,
    pub user_id: String,
    pub message: String,
    pub answer: String,
    pub allowed_sources: Vec<String>,
    pub retrieved: Vec<RetrievedRef>,
}

/// Metadata backend consumed by ingestion and retrieval
pub trait MetadataStore: Send + Sync {
    /// Chunks with the given ids that belong to `tenant_id`; missing ids are skipped
    fn get_chunks_by_ids(&self, ids: &[String], tenant_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Documents with the given ids that belong to `tenant_id`
    fn get_documents_by_ids(&self, ids: &[String], tenant_id: &str)
        -> Result<Vec<DocumentRecord>>;

    fn get_document(&self, id: &str, tenant_id: &str) -> Result<Option<DocumentRecord>>;

    /// Register a document, returning its generated id
    fn add_document(&self, document: NewDocument) -> Result<String>;

    /// Register chunks of a document, returning generated ids in input order
    fn add_chunks(
        &self,
        tenant_id: &str,
        source_key: &str,
        doc_id: &str,
        chunks: &[NewChunk],
    ) -> Result<Vec<String>>;

    /// Remove a document and its chunks
    fn delete_document(&self, id: &str) -> Result<()>;

    /// Create a user; an existing (tenant, email) pair returns the existing id
    fn create_user(&self, user: NewUser) -> Result<String>;

    fn get_user(&self, id: &str) -> Result<Option<UserRecord>>;

    fn list_users(&self, tenant_id: &str) -> Result<Vec<UserRecord>>;

    /// Record a question/answer pair, returning the log id
    fn add_query_log(&self, log: QueryLog) -> Result<String>;

    /// Attach feedback to a query log. Only the asking user or an admin of the
    /// same tenant may do so.
    fn add_feedback(
        &self,
        log_id: &str,
        user_id: &str,
        helpful: bool,
        comment: Option<String>,
    ) -> Result<String>;
}
