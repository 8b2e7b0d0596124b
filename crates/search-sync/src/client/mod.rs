//! Index Client: the transport to the search engine.
//!
//! All writes are upserts keyed by record id. Writes become visible to search
//! only after the index is refreshed (near-real-time semantics). Clients are
//! stateless apart from their connection and safe to share across tasks.
//!
//! Two implementations are provided:
//!
//! - [`MemoryIndexClient`]: an in-process engine with explicit refresh,
//!   failure injection and call recording.
//! - `ElasticsearchIndexClient` (feature `elasticsearch`): the HTTP transport.

mod memory;
mod request;
mod response;

#[cfg(feature = "elasticsearch")]
mod elasticsearch;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportResult;
use crate::registry::IndexDescriptor;
use crate::types::{Document, RecordId};

pub use memory::{BulkCall, MemoryIndexClient};
pub use request::{FieldSelection, SearchQuery, SearchRequest, SortField, SortOrder, TextMatch};
pub use response::{BulkSummary, SearchHit, SearchResponse};

#[cfg(feature = "elasticsearch")]
pub use self::elasticsearch::{ElasticsearchAuth, ElasticsearchConfig, ElasticsearchIndexClient};

/// Transport to a search engine.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Short engine name used in logs and errors.
    fn engine_name(&self) -> &'static str;

    /// Upserts one document.
    async fn index_document(&self, index: &str, id: RecordId, body: &Value) -> TransportResult<()>;

    /// Removes one document. Removing a missing document succeeds.
    async fn delete_document(&self, index: &str, id: RecordId) -> TransportResult<()>;

    /// Upserts many documents in one request.
    ///
    /// Fails as a whole if the request or any of its items is rejected.
    async fn bulk_write(&self, index: &str, documents: &[Document]) -> TransportResult<BulkSummary>;

    /// Runs a search. A missing index yields an empty response.
    async fn search(&self, index: &str, request: &SearchRequest) -> TransportResult<SearchResponse>;

    /// Makes all prior writes to the index visible to search.
    async fn refresh_index(&self, index: &str) -> TransportResult<()>;

    /// Returns true if the index exists.
    async fn index_exists(&self, index: &str) -> TransportResult<bool>;

    /// Creates the index, applying the descriptor when given.
    async fn create_index(
        &self,
        index: &str,
        descriptor: Option<&IndexDescriptor>,
    ) -> TransportResult<()>;
}
