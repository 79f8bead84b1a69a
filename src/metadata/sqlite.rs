//! SQLite-backed metadata store with migrations

use super::{
    ChunkRecord, DocumentRecord, MetadataStore, NewChunk, NewDocument, NewUser, QueryLog,
    RetrievedRef, UserRecord,
};
use crate::auth::ADMIN_ROLE;
use crate::error::{Result, SourcegateError};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Metadata store on a pooled SQLite database
pub struct SqliteMetadataStore {
    pool: DbPool,
}

/// Row counts per table
#[derive(Debug, Clone, Default)]
pub struct MetadataStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub user_count: usize,
    pub query_log_count: usize,
    pub feedback_count: usize,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `db_path` and apply pending migrations
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SourcegateError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Pragmas are per connection, so every pooled connection runs them.
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(16).build(manager)?;

        let store = Self { pool };
        store.migrate()?;

        tracing::debug!("Opened metadata store at {}", db_path.display());
        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying metadata migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Row counts for every table
    pub fn stats(&self) -> Result<MetadataStats> {
        let conn = self.get_conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(MetadataStats {
            document_count: count("documents")?,
            chunk_count: count("chunks")?,
            user_count: count("users")?,
            query_log_count: count("query_logs")?,
            feedback_count: count("feedback")?,
        })
    }
}

/// `?2, ?3, ...` for `n` parameters following the tenant parameter
fn id_placeholders(n: usize) -> String {
    (0..n)
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SourcegateError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| SourcegateError::Json {
        source: e,
        context: format!("Failed to parse stored {}", what),
    })
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

type UserRow = (String, String, String, String, String);

fn user_from_row(row: UserRow) -> Result<UserRecord> {
    let (id, tenant_id, email, role, sources) = row;
    Ok(UserRecord {
        id,
        tenant_id,
        email,
        role,
        allowed_sources: from_json(&sources, "allowed sources")?,
    })
}

fn map_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        source_key: row.get(2)?,
        title: row.get(3)?,
        raw_text: row.get(4)?,
        source_url: row.get(5)?,
        created_at: timestamp_to_datetime(row.get(6)?),
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn get_chunks_by_ids(&self, ids: &[String], tenant_id: &str) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT id, tenant_id, source_key, doc_id, chunk_index, text
             FROM chunks WHERE tenant_id = ?1 AND id IN ({})",
            id_placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = std::iter::once(tenant_id).chain(ids.iter().map(String::as_str));
        let chunks = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(ChunkRecord {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    source_key: row.get(2)?,
                    doc_id: row.get(3)?,
                    chunk_index: row.get(4)?,
                    text: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    fn get_documents_by_ids(
        &self,
        ids: &[String],
        tenant_id: &str,
    ) -> Result<Vec<DocumentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT id, tenant_id, source_key, title, raw_text, source_url, created_at
             FROM documents WHERE tenant_id = ?1 AND id IN ({})",
            id_placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = std::iter::once(tenant_id).chain(ids.iter().map(String::as_str));
        let documents = stmt
            .query_map(params_from_iter(params), map_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(documents)
    }

    fn get_document(&self, id: &str, tenant_id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.get_conn()?;
        let document = conn
            .query_row(
                "SELECT id, tenant_id, source_key, title, raw_text, source_url, created_at
                 FROM documents WHERE id = ?1 AND tenant_id = ?2",
                params![id, tenant_id],
                map_document,
            )
            .optional()?;
        Ok(document)
    }

    fn add_document(&self, document: NewDocument) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO documents (id, tenant_id, source_key, title, raw_text, source_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                document.tenant_id,
                document.source_key,
                document.title,
                document.raw_text,
                document.source_url,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(id)
    }

    fn add_chunks(
        &self,
        tenant_id: &str,
        source_key: &str,
        doc_id: &str,
        chunks: &[NewChunk],
    ) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, tenant_id, source_key, doc_id, chunk_index, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                let id = uuid::Uuid::new_v4().to_string();
                stmt.execute(params![
                    id,
                    tenant_id,
                    source_key,
                    doc_id,
                    chunk.chunk_index,
                    chunk.text
                ])?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn delete_document(&self, id: &str) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE doc_id = ?1", params![id])?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn create_user(&self, user: NewUser) -> Result<String> {
        let conn = self.get_conn()?;
        let sources = to_json(&user.allowed_sources, "allowed sources")?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id, tenant_id, email, role, allowed_sources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                user.tenant_id,
                user.email,
                user.role,
                sources,
                Utc::now().timestamp(),
            ],
        )?;

        let id: String = conn.query_row(
            "SELECT id FROM users WHERE tenant_id = ?1 AND email = ?2",
            params![user.tenant_id, user.email],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        let conn = self.get_conn()?;
        let row: Option<UserRow> = conn
            .query_row(
                "SELECT id, tenant_id, email, role, allowed_sources FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        row.map(user_from_row).transpose()
    }

    fn list_users(&self, tenant_id: &str) -> Result<Vec<UserRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, email, role, allowed_sources FROM users
             WHERE tenant_id = ?1 ORDER BY email",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<UserRow>>>()?;
        rows.into_iter().map(user_from_row).collect()
    }

    fn add_query_log(&self, log: QueryLog) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO query_logs
                (id, tenant_id, user_id, message, answer, allowed_sources, retrieved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                log.tenant_id,
                log.user_id,
                log.message,
                log.answer,
                to_json(&log.allowed_sources, "allowed sources")?,
                to_json::<[RetrievedRef]>(&log.retrieved, "retrieved passages")?,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(id)
    }

    fn add_feedback(
        &self,
        log_id: &str,
        user_id: &str,
        helpful: bool,
        comment: Option<String>,
    ) -> Result<String> {
        let conn = self.get_conn()?;
        let (log_tenant, log_user): (String, String) = conn
            .query_row(
                "SELECT tenant_id, user_id FROM query_logs WHERE id = ?1",
                params![log_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| SourcegateError::NotFound {
                kind: "Query log",
                id: log_id.to_string(),
            })?;

        let user = self
            .get_user(user_id)?
            .ok_or_else(|| SourcegateError::UserNotFound {
                id: user_id.to_string(),
            })?;

        let is_owner = log_user == user.id;
        let is_tenant_admin = user.role == ADMIN_ROLE && user.tenant_id == log_tenant;
        if !is_owner && !is_tenant_admin {
            return Err(SourcegateError::NotAuthorized(format!(
                "user {} may not leave feedback on query {}",
                user_id, log_id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO feedback (id, log_id, user_id, helpful, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, log_id, user_id, helpful, comment, Utc::now().timestamp()],
        )?;
        Ok(id)
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE users (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        email TEXT NOT NULL,
        role TEXT NOT NULL,
        allowed_sources TEXT NOT NULL,  -- JSON array
        created_at INTEGER NOT NULL,
        UNIQUE (tenant_id, email)
    );

    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        source_key TEXT NOT NULL,
        title TEXT NOT NULL,
        raw_text TEXT NOT NULL,
        source_url TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_documents_tenant_source ON documents(tenant_id, source_key);

    CREATE TABLE chunks (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        source_key TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_doc ON chunks(doc_id);
    CREATE INDEX idx_chunks_tenant_source ON chunks(tenant_id, source_key);

    CREATE TABLE query_logs (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        message TEXT NOT NULL,
        answer TEXT NOT NULL,
        allowed_sources TEXT NOT NULL,  -- JSON array
        retrieved TEXT NOT NULL,        -- JSON array
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_query_logs_tenant_user ON query_logs(tenant_id, user_id);

    CREATE TABLE feedback (
        id TEXT PRIMARY KEY,
        log_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        helpful BOOLEAN NOT NULL,
        comment TEXT,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (log_id) REFERENCES query_logs(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_feedback_log ON feedback(log_id);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> SqliteMetadataStore {
        SqliteMetadataStore::open(&temp_dir.path().join("metadata.sqlite")).unwrap()
    }

    fn new_user(tenant: &str, email: &str, role: &str, sources: &[&str]) -> NewUser {
        NewUser {
            tenant_id: tenant.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            allowed_sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn add_doc(store: &SqliteMetadataStore, tenant: &str, source: &str) -> String {
        store
            .add_document(NewDocument {
                tenant_id: tenant.to_string(),
                source_key: source.to_string(),
                title: "Q3 budget".to_string(),
                raw_text: "Budget text".to_string(),
                source_url: None,
            })
            .unwrap()
    }

    fn log_for(user: &UserRecord) -> QueryLog {
        QueryLog {
            tenant_id: user.tenant_id.clone(),
            user_id: user.id.clone(),
            message: "what is the budget?".to_string(),
            answer: "I don't know.".to_string(),
            allowed_sources: user.allowed_sources.clone(),
            retrieved: Vec::new(),
        }
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);

        // Reopening does not re-apply
        drop(conn);
        drop(store);
        let _store = open_store(&temp_dir);
    }

    #[test]
    fn test_foreign_keys_enabled_on_every_connection() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = store.get_conn().unwrap();
        let b = store.get_conn().unwrap();
        for conn in [&a, &b] {
            let fk_enabled: i32 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(fk_enabled, 1);
        }
    }

    #[test]
    fn test_chunks_keep_input_order_and_tenant_scope() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let doc_id = add_doc(&store, "acme", "finance");

        let chunks: Vec<NewChunk> = (0..3)
            .map(|i| NewChunk {
                chunk_index: i,
                text: format!("chunk {}", i),
            })
            .collect();
        let ids = store.add_chunks("acme", "finance", &doc_id, &chunks).unwrap();
        assert_eq!(ids.len(), 3);

        let mut found = store.get_chunks_by_ids(&ids, "acme").unwrap();
        found.sort_by_key(|c| c.chunk_index);
        for (i, chunk) in found.iter().enumerate() {
            assert_eq!(chunk.id, ids[i]);
            assert_eq!(chunk.text, format!("chunk {}", i));
            assert_eq!(chunk.source_key, "finance");
            assert_eq!(chunk.doc_id, doc_id);
        }

        assert!(store.get_chunks_by_ids(&ids, "globex").unwrap().is_empty());
        assert!(store.get_chunks_by_ids(&[], "acme").unwrap().is_empty());
    }

    #[test]
    fn test_delete_document_removes_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let doc_id = add_doc(&store, "acme", "finance");
        let ids = store
            .add_chunks(
                "acme",
                "finance",
                &doc_id,
                &[NewChunk {
                    chunk_index: 0,
                    text: "x".to_string(),
                }],
            )
            .unwrap();

        store.delete_document(&doc_id).unwrap();

        assert!(store.get_document(&doc_id, "acme").unwrap().is_none());
        assert!(store.get_chunks_by_ids(&ids, "acme").unwrap().is_empty());
    }

    #[test]
    fn test_documents_by_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let a = add_doc(&store, "acme", "finance");
        let b = add_doc(&store, "acme", "public");

        let docs = store
            .get_documents_by_ids(&[a.clone(), b.clone(), "missing".to_string()], "acme")
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(store.get_document(&a, "acme").unwrap().unwrap().title, "Q3 budget");
        assert!(store.get_document(&a, "globex").unwrap().is_none());
    }

    #[test]
    fn test_create_user_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let first = store
            .create_user(new_user("acme", "ana@acme.test", "member", &["public"]))
            .unwrap();
        let second = store
            .create_user(new_user("acme", "ana@acme.test", "member", &["public"]))
            .unwrap();
        assert_eq!(first, second);

        let other_tenant = store
            .create_user(new_user("globex", "ana@acme.test", "member", &["public"]))
            .unwrap();
        assert_ne!(first, other_tenant);

        let users = store.list_users("acme").unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].allowed_sources, vec!["public".to_string()]);
    }

    #[test]
    fn test_feedback_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let owner_id = store
            .create_user(new_user("acme", "ana@acme.test", "member", &["public"]))
            .unwrap();
        let other_id = store
            .create_user(new_user("acme", "bo@acme.test", "member", &["public"]))
            .unwrap();
        let admin_id = store
            .create_user(new_user("acme", "root@acme.test", ADMIN_ROLE, &[]))
            .unwrap();
        let foreign_admin_id = store
            .create_user(new_user("globex", "root@globex.test", ADMIN_ROLE, &[]))
            .unwrap();

        let owner = store.get_user(&owner_id).unwrap().unwrap();
        let log_id = store.add_query_log(log_for(&owner)).unwrap();

        assert!(store.add_feedback(&log_id, &owner_id, true, None).is_ok());
        assert!(store
            .add_feedback(&log_id, &admin_id, false, Some("stale".to_string()))
            .is_ok());
        assert!(matches!(
            store.add_feedback(&log_id, &other_id, true, None),
            Err(SourcegateError::NotAuthorized(_))
        ));
        assert!(matches!(
            store.add_feedback(&log_id, &foreign_admin_id, true, None),
            Err(SourcegateError::NotAuthorized(_))
        ));
        assert!(matches!(
            store.add_feedback("missing", &owner_id, true, None),
            Err(SourcegateError::NotFound { .. })
        ));
        assert!(matches!(
            store.add_feedback(&log_id, "nobody", true, None),
            Err(SourcegateError::UserNotFound { .. })
        ));

        let stats = store.stats().unwrap();
        assert_eq!(stats.feedback_count, 2);
        assert_eq!(stats.query_log_count, 1);
        assert_eq!(stats.user_count, 4);
    }
}
