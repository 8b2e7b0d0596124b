//! Test harness shared by the integration tests.
//!
//! Wires a [`SearchSync`] to the in-memory engine, the in-memory primary
//! store and a recording failure sink, all reachable from the test.

#![allow(dead_code)]

use std::sync::Arc;

use search_sync::adapter::{DefaultDocumentAdapter, IndexedType};
use search_sync::client::MemoryIndexClient;
use search_sync::failure::MemoryFailureSink;
use search_sync::registry::DescriptorRegistry;
use search_sync::store::InMemoryRecordStore;
use search_sync::types::Record;
use search_sync::{SearchSync, SyncConfig};
use serde_json::{Value, json};

/// Index of `Observation` in the `test` environment.
pub const OBSERVATIONS: &str = "test_observations";

/// Everything a test needs to drive and inspect the sync layer.
pub struct TestContext {
    pub sync: Arc<SearchSync>,
    pub client: Arc<MemoryIndexClient>,
    pub store: Arc<InMemoryRecordStore>,
    pub failures: Arc<MemoryFailureSink>,
}

/// Builder for [`TestContext`].
pub struct TestContextBuilder {
    config: SyncConfig,
    types: Vec<IndexedType>,
    descriptors: Option<DescriptorRegistry>,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::for_environment("test"),
            types: Vec::new(),
            descriptors: None,
        }
    }

    pub fn synchronous(mut self) -> Self {
        self.config.synchronous_consistency = true;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut SyncConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn register(mut self, indexed: IndexedType) -> Self {
        self.types.push(indexed);
        self
    }

    pub fn descriptors(mut self, descriptors: DescriptorRegistry) -> Self {
        self.descriptors = Some(descriptors);
        self
    }

    pub fn build(self) -> TestContext {
        let client = Arc::new(MemoryIndexClient::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let failures = Arc::new(MemoryFailureSink::new());

        let mut builder = SearchSync::builder(self.config, client.clone(), store.clone())
            .failure_sink(failures.clone());
        if let Some(descriptors) = self.descriptors {
            builder = builder.descriptors(descriptors);
        }
        let types = if self.types.is_empty() {
            vec![observations()]
        } else {
            self.types
        };
        for indexed in types {
            builder = builder.register(indexed);
        }

        TestContext {
            sync: builder.build().expect("Failed to build sync layer"),
            client,
            store,
            failures,
        }
    }
}

/// The `Observation` registration with the default adapter.
pub fn observations() -> IndexedType {
    IndexedType::new("Observation", DefaultDocumentAdapter)
}

/// Context with `Observation` registered and read-after-write refreshes.
pub fn synchronous_context() -> TestContext {
    TestContextBuilder::new().synchronous().build()
}

/// An observation record.
pub fn observation(id: i64, attributes: Value) -> Record {
    Record::new("Observation", id, attributes)
}

/// Observations `1..=n` with a description and a parity flag.
pub fn observations_range(n: i64) -> Vec<Record> {
    (1..=n)
        .map(|id| {
            observation(
                id,
                json!({"description": format!("observation {}", id), "even": id % 2 == 0}),
            )
        })
        .collect()
}

/// Ids of bulk calls, one entry per call.
pub fn bulk_batches(client: &MemoryIndexClient) -> Vec<Vec<i64>> {
    client
        .bulk_calls()
        .into_iter()
        .map(|call| call.ids.into_iter().map(|id| id.value()).collect())
        .collect()
}
