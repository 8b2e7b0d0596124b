//! Query/Pagination Façade.
//!
//! Turns page-number parameters into the engine's `from`/`size` window and
//! wraps the hits in a [`PaginatedCollection`], the same shape callers get
//! from primary-store pagination. Search errors are returned to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{FieldSelection, IndexClient, SearchHit, SearchQuery, SearchRequest, SearchResponse, SortField};
use crate::error::SyncResult;
use crate::registry::TypeRegistry;
use crate::types::{PageRequest, PaginatedCollection};

/// Options for [`SearchFacade::paginate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginateOptions {
    /// Filters.
    #[serde(default)]
    pub query: SearchQuery,
    /// Page number (default 1).
    #[serde(default)]
    pub page: Option<u64>,
    /// Page size (default from configuration, normally 20).
    #[serde(default)]
    pub per_page: Option<u64>,
    /// Source fields to return. `None` returns ids only.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Sort keys (default `id` ascending).
    #[serde(default)]
    pub sort: Vec<SortField>,
}

impl PaginateOptions {
    /// Options matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filters.
    pub fn with_query(mut self, query: SearchQuery) -> Self {
        self.query = query;
        self
    }

    /// Sets the page number.
    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the page size.
    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Sets the returned source fields.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the sort keys.
    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }
}

/// Read access to the indices of registered types.
pub struct SearchFacade {
    registry: Arc<TypeRegistry>,
    client: Arc<dyn IndexClient>,
    default_per_page: u64,
    max_per_page: u64,
}

impl std::fmt::Debug for SearchFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchFacade")
            .field("engine", &self.client.engine_name())
            .field("default_per_page", &self.default_per_page)
            .field("max_per_page", &self.max_per_page)
            .finish_non_exhaustive()
    }
}

impl SearchFacade {
    /// Creates a façade with the default page sizes (20, capped at 1000).
    pub fn new(registry: Arc<TypeRegistry>, client: Arc<dyn IndexClient>) -> Self {
        Self {
            registry,
            client,
            default_per_page: 20,
            max_per_page: 1000,
        }
    }

    /// Sets the default and maximum page sizes.
    pub fn with_page_sizes(mut self, default_per_page: u64, max_per_page: u64) -> Self {
        self.max_per_page = max_per_page.max(1);
        self.default_per_page = default_per_page.clamp(1, self.max_per_page);
        self
    }

    /// Runs a raw search against a type's index.
    pub async fn search(&self, record_type: &str, request: &SearchRequest) -> SyncResult<SearchResponse> {
        let binding = self.registry.require(record_type)?;
        let response = self.client.search(binding.index_name(), request).await?;

        tracing::trace!(
            index = %binding.index_name(),
            total = response.total,
            hits = response.hits.len(),
            "Search executed"
        );
        Ok(response)
    }

    /// Returns one page of a type's matching documents.
    pub async fn paginate(
        &self,
        record_type: &str,
        options: PaginateOptions,
    ) -> SyncResult<PaginatedCollection<SearchHit>> {
        let page = self.page_request(&options);

        let request = SearchRequest::new(options.query, page.per_page)
            .with_from(page.offset())
            .with_fields(FieldSelection::from_fields(options.fields))
            .with_sort(options.sort);

        let response = self.search(record_type, &request).await?;
        Ok(PaginatedCollection::new(response.hits, response.total, page))
    }

    /// Resolves the page parameters against the configured defaults.
    pub fn page_request(&self, options: &PaginateOptions) -> PageRequest {
        let per_page = options
            .per_page
            .unwrap_or(self.default_per_page)
            .min(self.max_per_page);
        PageRequest::new(options.page.unwrap_or(1), per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DefaultDocumentAdapter, IndexedType};
    use crate::client::MemoryIndexClient;
    use crate::error::{RegistrationError, SyncError};
    use crate::registry::DescriptorRegistry;
    use crate::types::{Document, RecordId};
    use serde_json::json;

    const INDEX: &str = "test_observations";

    async fn facade_with(n: i64) -> (Arc<MemoryIndexClient>, SearchFacade) {
        let registry = Arc::new(
            TypeRegistry::build(
                "test",
                vec![IndexedType::new("Observation", DefaultDocumentAdapter)],
                &DescriptorRegistry::new(),
            )
            .unwrap(),
        );
        let client = Arc::new(MemoryIndexClient::new());
        let documents: Vec<Document> = (1..=n)
            .map(|id| Document::new(id, json!({"id": id, "taxon": if id % 2 == 0 { "owl" } else { "hawk" }})))
            .collect();
        client.bulk_write(INDEX, &documents).await.unwrap();
        client.refresh_index(INDEX).await.unwrap();

        let facade = SearchFacade::new(registry, client.clone());
        (client, facade)
    }

    #[test]
    fn test_page_request_defaults_and_clamps() {
        let registry = Arc::new(TypeRegistry::default());
        let facade = SearchFacade::new(registry, Arc::new(MemoryIndexClient::new()))
            .with_page_sizes(20, 100);

        let page = facade.page_request(&PaginateOptions::new());
        assert_eq!((page.page, page.per_page), (1, 20));

        let page = facade.page_request(&PaginateOptions::new().page(0).per_page(500));
        assert_eq!((page.page, page.per_page), (1, 100));
    }

    #[tokio::test]
    async fn test_paginate_second_page() {
        let (_client, facade) = facade_with(45).await;
        let page = facade
            .paginate("Observation", PaginateOptions::new().page(2).per_page(20))
            .await
            .unwrap();

        assert_eq!(page.total_entries, 45);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.per_page, 20);
        let ids: Vec<i64> = page.items.iter().map(|hit| hit.id.value()).collect();
        assert_eq!(ids, (21..=40).collect::<Vec<_>>());
        assert!(page.items.iter().all(|hit| hit.source.is_none()));
    }

    #[tokio::test]
    async fn test_paginate_with_filter_and_fields() {
        let (_client, facade) = facade_with(10).await;
        let page = facade
            .paginate(
                "Observation",
                PaginateOptions::new()
                    .with_query(SearchQuery::match_all().with_term("taxon", "owl"))
                    .fields(["taxon"]),
            )
            .await
            .unwrap();

        assert_eq!(page.total_entries, 5);
        assert_eq!(page.items[0].id, RecordId::new(2));
        assert_eq!(page.items[0].source, Some(json!({"taxon": "owl"})));
    }

    #[tokio::test]
    async fn test_search_unknown_type() {
        let (_client, facade) = facade_with(1).await;
        let result = facade
            .search("Comment", &SearchRequest::new(SearchQuery::match_all(), 10))
            .await;
        assert!(matches!(
            result,
            Err(SyncError::Registration(RegistrationError::UnknownType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_search_error_is_returned() {
        let (client, facade) = facade_with(3).await;
        client.set_unavailable(true);
        let result = facade.paginate("Observation", PaginateOptions::new()).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }
}
