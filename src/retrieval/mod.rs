//! Retrieval, hydration and question answering
//!
//! `RetrievalPipeline` turns a query into authorized, ranked hits;
//! `ChatService` answers from them and keeps an audit log.

mod chat;
mod context;
mod deduplication;
mod pipeline;

pub use chat::{ChatResponse, ChatService, NO_SOURCES_ANSWER};
pub use context::{build_context, make_snippet};
pub use deduplication::deduplicate_hits;
pub use pipeline::{
    open_document, AuthorizedHit, Retrieval, RetrievalPipeline, RetrievedPassage,
};
