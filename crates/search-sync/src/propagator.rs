//! Change Propagator: single-record index and delete on commit.
//!
//! Runs inline on the committing caller's task. Create and update commits
//! index the record, destroy commits delete its document. Failures are turned
//! into [`FailureRecord`]s and swallowed; nothing here fails a commit.
//!
//! With `synchronous_consistency` on, every write is followed by a refresh of
//! the target index so verification code can read its own writes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::IndexClient;
use crate::error::SyncResult;
use crate::failure::{FailureRecord, FailureSink};
use crate::registry::{IndexBinding, TypeRegistry};
use crate::store::RecordStore;
use crate::types::{CommitEvent, CommitOperation, Record, RecordId, RecordQuery, RecordScope, SyncEvent};

/// Outcome of one propagated change.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// The change applied.
    pub event: SyncEvent,
    /// Whether the index accepted it.
    pub success: bool,
    /// Error message if it failed.
    pub error: Option<String>,
    /// Duration of the operation.
    pub duration: Duration,
}

/// Propagates committed changes to the search index.
pub struct ChangePropagator {
    registry: Arc<TypeRegistry>,
    client: Arc<dyn IndexClient>,
    store: Arc<dyn RecordStore>,
    failures: Arc<dyn FailureSink>,
    synchronous_consistency: bool,
    max_trace_frames: usize,
}

impl std::fmt::Debug for ChangePropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePropagator")
            .field("engine", &self.client.engine_name())
            .field("store", &self.store.store_name())
            .field("synchronous_consistency", &self.synchronous_consistency)
            .finish_non_exhaustive()
    }
}

impl ChangePropagator {
    /// Creates a propagator.
    pub fn new(
        registry: Arc<TypeRegistry>,
        client: Arc<dyn IndexClient>,
        store: Arc<dyn RecordStore>,
        failures: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            registry,
            client,
            store,
            failures,
            synchronous_consistency: false,
            max_trace_frames: 30,
        }
    }

    /// Refresh after every write.
    pub fn with_synchronous_consistency(mut self, enabled: bool) -> Self {
        self.synchronous_consistency = enabled;
        self
    }

    /// Bounds logged traces.
    pub fn with_max_trace_frames(mut self, frames: usize) -> Self {
        self.max_trace_frames = frames;
        self
    }

    /// Handles a commit notification.
    ///
    /// Returns `None` for record types that are not indexed.
    pub async fn on_committed(&self, event: &CommitEvent) -> Option<SyncStatus> {
        let record_type = event.record.record_type();
        if self.registry.get(record_type).is_none() {
            tracing::trace!(record_type = %record_type, "Commit for unindexed type ignored");
            return None;
        }

        let status = match event.operation {
            CommitOperation::Create | CommitOperation::Update => self.index(&event.record).await,
            CommitOperation::Destroy => self.delete(record_type, event.record.id()).await,
        };
        Some(status)
    }

    /// Indexes one record. Failures are logged and reported in the status.
    pub async fn index(&self, record: &Record) -> SyncStatus {
        let start = Instant::now();
        let event = SyncEvent::index(record.record_type(), record.id());
        let result = self.try_index(record).await;
        self.finish(event, "index", result, start)
    }

    /// Deletes one record's document. Failures are logged and reported in
    /// the status.
    pub async fn delete(&self, record_type: &str, id: RecordId) -> SyncStatus {
        let start = Instant::now();
        let event = SyncEvent::delete(record_type, id);
        let result = self.try_delete(record_type, id).await;
        self.finish(event, "delete", result, start)
    }

    /// Indexes one record, returning any failure.
    pub async fn try_index(&self, record: &Record) -> SyncResult<()> {
        let binding = self.registry.require(record.record_type())?;
        let mut batch = vec![self.materialize(binding, record).await?];
        let documents = binding.indexed().to_documents(&mut batch)?;

        for document in &documents {
            self.client
                .index_document(binding.index_name(), document.id, &document.body)
                .await?;
        }
        self.refresh_if_consistent(binding.index_name()).await
    }

    /// Deletes one record's document, returning any failure.
    pub async fn try_delete(&self, record_type: &str, id: RecordId) -> SyncResult<()> {
        let binding = self.registry.require(record_type)?;
        self.client.delete_document(binding.index_name(), id).await?;
        self.refresh_if_consistent(binding.index_name()).await
    }

    /// Preloads the type's associations onto a copy of the record so the
    /// single path serializes the same shape as a reindex batch. The record's
    /// own attributes are kept; a record missing from the store is used as
    /// given.
    async fn materialize(&self, binding: &IndexBinding, record: &Record) -> SyncResult<Record> {
        let mut materialized = record.clone();
        if binding.indexed().association_preload().is_none() {
            return Ok(materialized);
        }

        let query = binding.indexed().load_query(
            RecordQuery::new(record.record_type()).with_scope(RecordScope::ids([record.id()])),
        );
        let loaded = self.store.load(&query, &[record.id()]).await?;

        if let Some(stored) = loaded.into_iter().next() {
            for (name, records) in stored.associations() {
                materialized.set_association(name.clone(), records.clone());
            }
        }
        Ok(materialized)
    }

    async fn refresh_if_consistent(&self, index: &str) -> SyncResult<()> {
        if self.synchronous_consistency {
            self.client.refresh_index(index).await?;
        }
        Ok(())
    }

    fn finish(
        &self,
        event: SyncEvent,
        operation: &str,
        result: SyncResult<()>,
        start: Instant,
    ) -> SyncStatus {
        match result {
            Ok(()) => {
                tracing::debug!(
                    record_type = %event.record_type,
                    record_id = %event.record_id,
                    operation,
                    "Index write applied"
                );
                SyncStatus {
                    event,
                    success: true,
                    error: None,
                    duration: start.elapsed(),
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.failures.record(FailureRecord::from_error(
                    operation,
                    event.record_type.clone(),
                    &e,
                    self.max_trace_frames,
                ));
                SyncStatus {
                    event,
                    success: false,
                    error: Some(message),
                    duration: start.elapsed(),
                }
            }
        }
    }
}
