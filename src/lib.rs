//! Sourcegate - tenant- and source-scoped retrieval
//!
//! Documents are chunked, embedded and stored in one vector index per
//! (tenant, source). Queries search only the sources the caller is allowed to
//! read, and every hit is checked again against the metadata of record before
//! it is returned or used as context for an answer.

pub mod app;
pub mod auth;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod metadata;
pub mod retrieval;
pub mod search;

pub use error::{Result, SourcegateError};
