//! Document ingestion
//!
//! A document is chunked, embedded, registered in the metadata store and
//! appended to its (tenant, source) partition. The metadata rows are removed
//! again when indexing fails, so no chunk record exists without a vector.

pub mod parser;

pub use parser::{parse_file, ParsedDocument};

use crate::chunking::Chunker;
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::error::{Result, SourcegateError};
use crate::index::IndexStore;
use crate::metadata::{MetadataStore, NewChunk, NewDocument};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedDocument {
    /// None when the text produced no chunks and nothing was registered
    pub doc_id: Option<String>,
    pub chunk_count: usize,
}

/// Totals of a folder ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Chunk, embed, register and index documents
pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    metadata: Arc<dyn MetadataStore>,
    store: Arc<IndexStore>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        metadata: Arc<dyn MetadataStore>,
        store: Arc<IndexStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            metadata,
            store,
            batch_size,
        }
    }

    /// Ingest one document into `source_key` of `tenant_id`
    pub fn ingest_document(
        &self,
        tenant_id: &str,
        source_key: &str,
        title: &str,
        raw_text: &str,
        source_url: Option<&str>,
    ) -> Result<IngestedDocument> {
        let pieces = self.chunker.chunk(raw_text);
        if pieces.is_empty() {
            tracing::info!("Skipped [{}] {} (no content)", source_key, title);
            return Ok(IngestedDocument {
                doc_id: None,
                chunk_count: 0,
            });
        }

        let vectors = embed_in_batches(self.embedder.as_ref(), &pieces, self.batch_size)?;

        let doc_id = self.metadata.add_document(NewDocument {
            tenant_id: tenant_id.to_string(),
            source_key: source_key.to_string(),
            title: title.to_string(),
            raw_text: raw_text.to_string(),
            source_url: source_url.map(str::to_string),
        })?;

        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| NewChunk {
                chunk_index: i as u32,
                text,
            })
            .collect();

        let indexed = self
            .metadata
            .add_chunks(tenant_id, source_key, &doc_id, &chunks)
            .and_then(|chunk_ids| {
                self.store
                    .add(tenant_id, source_key, &vectors, &chunk_ids)
                    .map(|_| chunk_ids.len())
            });

        match indexed {
            Ok(chunk_count) => {
                tracing::info!(
                    "Ingested [{}] {} chunks={}",
                    source_key,
                    title,
                    chunk_count
                );
                Ok(IngestedDocument {
                    doc_id: Some(doc_id),
                    chunk_count,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "Indexing [{}] {} failed, removing document {}: {}",
                    source_key,
                    title,
                    doc_id,
                    e
                );
                if let Err(cleanup) = self.metadata.delete_document(&doc_id) {
                    tracing::error!("Failed to remove document {}: {}", doc_id, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Ingest every supported file below `dir`
    ///
    /// Each immediate subdirectory of `dir` is a source key. Symbolic links
    /// are never followed, so a source only ever holds files that live under
    /// its own directory. Hidden entries, unsupported formats and empty
    /// documents are skipped; an unreadable entry or failing document is
    /// counted and the walk continues.
    pub fn ingest_folder(&self, dir: &Path, tenant_id: &str) -> Result<IngestReport> {
        if !dir.is_dir() {
            return Err(SourcegateError::NotFound {
                kind: "Directory",
                id: dir.display().to_string(),
            });
        }

        let mut report = IngestReport::default();

        let sources = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));

        for source in sources {
            let source = match source {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if !source.file_type().is_dir() {
                continue;
            }

            let source_key = source.file_name().to_string_lossy().to_string();
            tracing::info!("Processing source: {}", source_key);

            for file in collect_files(source.path(), &mut report) {
                self.ingest_file(&file, tenant_id, &source_key, &mut report);
            }
        }

        tracing::info!(
            "Ingestion complete: {} documents, {} chunks, {} skipped, {} failed",
            report.documents,
            report.chunks,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    fn ingest_file(
        &self,
        path: &Path,
        tenant_id: &str,
        source_key: &str,
        report: &mut IngestReport,
    ) {
        let parsed = match parse_file(path) {
            Ok(parsed) => parsed,
            Err(SourcegateError::UnsupportedDocumentFormat { extension, .. }) => {
                tracing::info!(
                    "Skipping {} (unsupported file type: {})",
                    path.display(),
                    extension
                );
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                report.failed += 1;
                return;
            }
        };

        if parsed.text.trim().is_empty() {
            tracing::info!("Skipping {} (empty content)", path.display());
            report.skipped += 1;
            return;
        }

        match self.ingest_document(tenant_id, source_key, &parsed.title, &parsed.text, None) {
            Ok(IngestedDocument {
                doc_id: Some(_),
                chunk_count,
            }) => {
                report.documents += 1;
                report.chunks += chunk_count;
            }
            Ok(_) => report.skipped += 1,
            Err(e) => {
                tracing::error!("Failed to ingest {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
}

/// Dot-prefixed entries below the walk root
fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Regular files below `dir` in file-name order, without following links
fn collect_files(dir: &Path, report: &mut IngestReport) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(entry) if entry.path_is_symlink() => {
                tracing::info!("Skipping symbolic link {}", entry.path().display());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                report.failed += 1;
            }
        }
    }
    files
}
