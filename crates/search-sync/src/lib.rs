//! Search Sync
//!
//! Keeps a full-text search index consistent with a relational primary store.
//! The primary store stays the system of record; the index is a derived,
//! eventually-consistent projection that can always be rebuilt from it.
//!
//! # Architecture
//!
//! - [`registry`] - Descriptor Registry (per-type index settings and mappings)
//!   and the bindings of registered types to their index names
//! - [`adapter`] - Document Adapter contract with optional preload and
//!   batch-preparation hooks
//! - [`client`] - Index Client trait with an in-memory engine and an
//!   Elasticsearch transport (feature `elasticsearch`)
//! - [`propagator`] - Change Propagator, run after every primary-store commit
//! - [`reindex`] - Bulk Reindexer and background reindex jobs
//! - [`query`] - Query/Pagination Façade
//! - [`store`] - Primary store contract with in-memory and SQLite stores
//!
//! Writes to the primary store are never rolled back because of the index.
//! Index failures are logged (see [`failure`]) and repaired by reindexing.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use search_sync::{SearchSync, SyncConfig};
//! use search_sync::adapter::{DefaultDocumentAdapter, IndexedType};
//! use search_sync::client::MemoryIndexClient;
//! use search_sync::store::{ChangeSet, InMemoryRecordStore, RecordStore};
//! use search_sync::query::PaginateOptions;
//! use search_sync::types::Record;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(InMemoryRecordStore::new());
//! let sync = SearchSync::builder(
//!     SyncConfig::for_environment("test").with_synchronous_consistency(true),
//!     Arc::new(MemoryIndexClient::new()),
//!     store.clone(),
//! )
//! .register(IndexedType::new("Observation", DefaultDocumentAdapter))
//! .build()
//! .unwrap();
//!
//! store
//!     .commit(ChangeSet::new().insert(Record::new("Observation", 1, json!({"taxon": "owl"}))))
//!     .await
//!     .unwrap();
//!
//! let page = sync.paginate("Observation", PaginateOptions::new()).await.unwrap();
//! assert_eq!(page.total_entries, 1);
//! assert_eq!(sync.index_name("Observation").unwrap(), "test_observations");
//! # }
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod failure;
pub mod propagator;
pub mod query;
pub mod registry;
pub mod reindex;
pub mod store;
pub mod types;

use std::sync::{Arc, Weak};

use async_trait::async_trait;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};

use adapter::IndexedType;
use client::{IndexClient, SearchHit, SearchRequest, SearchResponse};
use failure::{FailureSink, TracingFailureSink};
use propagator::{ChangePropagator, SyncStatus};
use query::{PaginateOptions, SearchFacade};
use registry::{DescriptorRegistry, TypeRegistry};
use reindex::{BulkReindexer, ReindexJobs, ReindexOptions, ReindexReport};
use store::{CommitObserver, RecordStore};
use types::{CommitEvent, PaginatedCollection, Record, RecordId, RecordScope};

/// The synchronization layer, wired to one index client and one primary store.
///
/// Built with [`SearchSync::builder`]. On build it subscribes itself to the
/// store's commits, so every committed change of a registered type is
/// propagated to the index.
pub struct SearchSync {
    config: SyncConfig,
    registry: Arc<TypeRegistry>,
    client: Arc<dyn IndexClient>,
    propagator: ChangePropagator,
    reindexer: Arc<BulkReindexer>,
    facade: SearchFacade,
    jobs: ReindexJobs,
}

impl std::fmt::Debug for SearchSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSync")
            .field("environment", &self.config.environment)
            .field("engine", &self.client.engine_name())
            .field("types", &self.registry.record_types())
            .finish_non_exhaustive()
    }
}

impl SearchSync {
    /// Starts building a sync layer.
    pub fn builder(
        config: SyncConfig,
        client: Arc<dyn IndexClient>,
        store: Arc<dyn RecordStore>,
    ) -> SearchSyncBuilder {
        SearchSyncBuilder::new(config, client, store)
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The registered types.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The index name of a registered type.
    pub fn index_name(&self, record_type: &str) -> SyncResult<&str> {
        Ok(self.registry.require(record_type)?.index_name())
    }

    /// Propagates one commit. Returns `None` for unregistered types.
    pub async fn on_committed(&self, event: &CommitEvent) -> Option<SyncStatus> {
        self.propagator.on_committed(event).await
    }

    /// Indexes one record outside the commit path.
    pub async fn index(&self, record: &Record) -> SyncStatus {
        self.propagator.index(record).await
    }

    /// Deletes one record's document outside the commit path.
    pub async fn delete(&self, record_type: &str, id: RecordId) -> SyncStatus {
        self.propagator.delete(record_type, id).await
    }

    /// Reindex options with the configured batch size.
    pub fn reindex_options(&self) -> ReindexOptions {
        ReindexOptions::default().with_batch_size(self.config.batch_size)
    }

    /// Rebuilds a scope of a type's documents in the foreground.
    pub async fn reindex(
        &self,
        record_type: &str,
        scope: RecordScope,
        options: ReindexOptions,
    ) -> SyncResult<ReindexReport> {
        self.reindexer.reindex(record_type, scope, options).await
    }

    /// Background reindex jobs.
    pub fn jobs(&self) -> &ReindexJobs {
        &self.jobs
    }

    /// Runs a raw search against a type's index.
    pub async fn search(&self, record_type: &str, request: &SearchRequest) -> SyncResult<SearchResponse> {
        self.facade.search(record_type, request).await
    }

    /// Returns one page of a type's matching documents.
    pub async fn paginate(
        &self,
        record_type: &str,
        options: PaginateOptions,
    ) -> SyncResult<PaginatedCollection<SearchHit>> {
        self.facade.paginate(record_type, options).await
    }

    /// Creates a type's index from its descriptor if the engine lacks it.
    ///
    /// Returns true if the index was created.
    pub async fn ensure_index(&self, record_type: &str) -> SyncResult<bool> {
        let binding = self.registry.require(record_type)?;
        if self.client.index_exists(binding.index_name()).await? {
            return Ok(false);
        }

        self.client
            .create_index(binding.index_name(), binding.descriptor())
            .await?;
        tracing::debug!(
            index = %binding.index_name(),
            has_descriptor = binding.descriptor().is_some(),
            "Index created"
        );
        Ok(true)
    }

    /// Ensures the index of every registered type. Returns the names of the
    /// indices created.
    pub async fn create_indices(&self) -> SyncResult<Vec<String>> {
        let mut created = Vec::new();
        for binding in self.registry.iter() {
            if self.ensure_index(binding.record_type()).await? {
                created.push(binding.index_name().to_string());
            }
        }
        Ok(created)
    }
}

#[async_trait]
impl CommitObserver for SearchSync {
    async fn on_committed(&self, event: &CommitEvent) {
        self.propagator.on_committed(event).await;
    }
}

/// Builder for [`SearchSync`].
pub struct SearchSyncBuilder {
    config: SyncConfig,
    client: Arc<dyn IndexClient>,
    store: Arc<dyn RecordStore>,
    types: Vec<IndexedType>,
    descriptors: Option<DescriptorRegistry>,
    failures: Option<Arc<dyn FailureSink>>,
}

impl SearchSyncBuilder {
    /// Creates a builder.
    pub fn new(config: SyncConfig, client: Arc<dyn IndexClient>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config,
            client,
            store,
            types: Vec::new(),
            descriptors: None,
            failures: None,
        }
    }

    /// Uses an explicit descriptor registry instead of scanning
    /// `descriptor_dir`.
    pub fn descriptors(mut self, descriptors: DescriptorRegistry) -> Self {
        self.descriptors = Some(descriptors);
        self
    }

    /// Registers an indexed type.
    pub fn register(mut self, indexed: IndexedType) -> Self {
        self.types.push(indexed);
        self
    }

    /// Routes failure logs to a custom sink (default: `tracing` at error level).
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failures = Some(sink);
        self
    }

    /// Validates the configuration, loads descriptors, resolves every type's
    /// index and subscribes to the store's commits.
    pub fn build(self) -> SyncResult<Arc<SearchSync>> {
        self.config.validate()?;

        let descriptors = match (self.descriptors, &self.config.descriptor_dir) {
            (Some(descriptors), _) => descriptors,
            (None, Some(dir)) => DescriptorRegistry::discover(
                dir,
                self.types.iter().map(IndexedType::record_type),
            )?,
            (None, None) => DescriptorRegistry::new(),
        };

        let registry = Arc::new(TypeRegistry::build(
            &self.config.environment,
            self.types,
            &descriptors,
        )?);
        let failures = self
            .failures
            .unwrap_or_else(|| Arc::new(TracingFailureSink));

        let propagator = ChangePropagator::new(
            registry.clone(),
            self.client.clone(),
            self.store.clone(),
            failures.clone(),
        )
        .with_synchronous_consistency(self.config.synchronous_consistency)
        .with_max_trace_frames(self.config.max_trace_frames);

        let reindexer = Arc::new(
            BulkReindexer::new(registry.clone(), self.client.clone(), self.store.clone(), failures)
                .with_synchronous_consistency(self.config.synchronous_consistency)
                .with_max_trace_frames(self.config.max_trace_frames),
        );

        let facade = SearchFacade::new(registry.clone(), self.client.clone())
            .with_page_sizes(self.config.default_per_page, self.config.max_per_page);

        let sync = Arc::new(SearchSync {
            config: self.config,
            registry,
            client: self.client,
            propagator,
            jobs: ReindexJobs::new(reindexer.clone()),
            reindexer,
            facade,
        });

        let observer: Weak<SearchSync> = Arc::downgrade(&sync);
        self.store.subscribe(observer);

        tracing::debug!(
            environment = %sync.config.environment,
            engine = sync.client.engine_name(),
            store = self.store.store_name(),
            types = sync.registry.len(),
            "Search sync initialized"
        );

        Ok(sync)
    }
}
