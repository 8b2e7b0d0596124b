//! Bulk Reindexer and background reindex jobs.
//!
//! A reindex walks a scope of one type's records in id order, `batch_size`
//! records at a time, without ever holding more than one batch in memory:
//!
//! 1. Page the scope by keyset (`id > last id of previous page`) using a
//!    cheap projection, id only by default.
//! 2. Materialize the page's ids through the type's preload query, so every
//!    association the adapter needs arrives with the batch.
//! 3. Run the type's batch preparation once, serialize every record.
//! 4. Upsert the batch with one bulk write.
//!
//! A failing batch is logged with a bounded trace and the run moves on to
//! the next page. Failed batches are not retried; the [`ReindexReport`]
//! names their id ranges so an operator can rerun exactly those. A failure
//! to read the next page ends the run with an error, since the cursor
//! cannot advance past it.
//!
//! The index is never cleared first. Runs can be cancelled between batches;
//! batches already written stay valid.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::IndexClient;
use crate::error::{ReindexError, SyncResult};
use crate::failure::{FailureRecord, FailureSink};
use crate::registry::{IndexBinding, TypeRegistry};
use crate::store::RecordStore;
use crate::types::{Projection, Record, RecordId, RecordQuery, RecordScope};

fn default_batch_size() -> usize {
    1000
}

/// Options for one reindex run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexOptions {
    /// Records per batch (and per bulk write).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attributes fetched while paging the scope.
    #[serde(default)]
    pub projection: Projection,

    /// Refresh the index after the run so reads observe it immediately.
    #[serde(default)]
    pub verify: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            projection: Projection::IdOnly,
            verify: false,
        }
    }
}

impl ReindexOptions {
    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the paging projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Enables the final refresh.
    pub fn verify(mut self) -> Self {
        self.verify = true;
        self
    }
}

/// A batch whose write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    /// Batch number, starting at 1.
    pub batch: usize,
    /// Smallest id in the batch.
    pub first_id: RecordId,
    /// Largest id in the batch.
    pub last_id: RecordId,
    /// Records in the batch.
    pub records: usize,
    /// Error message.
    pub error: String,
}

impl FailedBatch {
    /// Scope covering exactly this batch's id range.
    pub fn scope(&self) -> RecordScope {
        RecordScope::id_range(Some(self.first_id), Some(self.last_id))
    }
}

/// Outcome of a reindex run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    /// Record type reindexed.
    pub record_type: String,
    /// Target index.
    pub index: String,
    /// Batches attempted.
    pub batches: usize,
    /// Records loaded and serialized. For a failed batch, the paged ids.
    pub records_processed: usize,
    /// Paged ids whose record was gone by the time its batch loaded.
    #[serde(default)]
    pub records_skipped: usize,
    /// Documents accepted by the engine.
    pub documents_written: usize,
    /// Batches that failed, in run order.
    pub failed_batches: Vec<FailedBatch>,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
    /// Whether the index was refreshed after the run.
    pub refreshed: bool,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
}

impl ReindexReport {
    fn new(record_type: &str, index: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            index: index.to_string(),
            batches: 0,
            records_processed: 0,
            records_skipped: 0,
            documents_written: 0,
            failed_batches: Vec::new(),
            cancelled: false,
            refreshed: false,
            duration_ms: 0,
        }
    }

    /// True if the run finished and every batch was written.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed_batches.is_empty()
    }

    /// Scopes to rerun to fill the gaps left by failed batches.
    pub fn retry_scopes(&self) -> Vec<RecordScope> {
        self.failed_batches.iter().map(FailedBatch::scope).collect()
    }
}

/// Progress notification for one finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Batch number, starting at 1.
    pub batch: usize,
    /// Records loaded for the batch (paged ids when it failed).
    pub records: usize,
    /// Documents written (0 when the batch failed).
    pub written: usize,
    /// Failure, if any.
    pub failure: Option<FailedBatch>,
}

/// Pages a scope and rebuilds its documents with bulk writes.
pub struct BulkReindexer {
    registry: Arc<TypeRegistry>,
    client: Arc<dyn IndexClient>,
    store: Arc<dyn RecordStore>,
    failures: Arc<dyn FailureSink>,
    synchronous_consistency: bool,
    max_trace_frames: usize,
}

impl std::fmt::Debug for BulkReindexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkReindexer")
            .field("engine", &self.client.engine_name())
            .field("store", &self.store.store_name())
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl BulkReindexer {
    /// Creates a reindexer.
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

    /// Always refresh after a completed run.
    pub fn with_synchronous_consistency(mut self, enabled: bool) -> Self {
        self.synchronous_consistency = enabled;
        self
    }

    /// Bounds logged traces.
    pub fn with_max_trace_frames(mut self, frames: usize) -> Self {
        self.max_trace_frames = frames;
        self
    }

    /// The type registry.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Rebuilds the documents of `record_type` within `scope`.
    pub async fn reindex(
        &self,
        record_type: &str,
        scope: RecordScope,
        options: ReindexOptions,
    ) -> SyncResult<ReindexReport> {
        self.run(record_type, scope, &options, None, |_| {}).await
    }

    /// Runs a reindex, checking `cancel` before every batch and reporting
    /// each finished batch to `on_batch`.
    pub(crate) async fn run<F>(
        &self,
        record_type: &str,
        scope: RecordScope,
        options: &ReindexOptions,
        mut cancel: Option<&mut mpsc::Receiver<()>>,
        mut on_batch: F,
    ) -> SyncResult<ReindexReport>
    where
        F: FnMut(&BatchOutcome) + Send,
    {
        let start = Instant::now();
        let binding = self.registry.require(record_type)?.clone();
        let batch_size = options.batch_size.max(1);
        let mut report = ReindexReport::new(record_type, binding.index_name());

        let page_query = RecordQuery::new(record_type)
            .with_scope(scope)
            .with_projection(options.projection.clone());
        let mut after: Option<RecordId> = None;

        loop {
            if let Some(receiver) = cancel.as_deref_mut()
                && receiver.try_recv().is_ok()
            {
                tracing::debug!(record_type, batches = report.batches, "Reindex cancelled");
                report.cancelled = true;
                break;
            }

            let page = self.store.page(&page_query, after, batch_size).await?;
            let ids: Vec<RecordId> = page.iter().map(Record::id).collect();
            let (Some(&first_id), Some(&last_id)) = (ids.first(), ids.last()) else {
                break;
            };
            after = Some(last_id);
            report.batches += 1;

            let outcome = match self.write_batch(&binding, &ids).await {
                Ok((loaded, written)) => {
                    report.records_processed += loaded;
                    report.records_skipped += ids.len().saturating_sub(loaded);
                    report.documents_written += written;
                    tracing::debug!(
                        index = %binding.index_name(),
                        batch = report.batches,
                        written,
                        skipped = ids.len().saturating_sub(loaded),
                        "Reindex batch written"
                    );
                    BatchOutcome {
                        batch: report.batches,
                        records: loaded,
                        written,
                        failure: None,
                    }
                }
                Err(e) => {
                    report.records_processed += ids.len();
                    self.failures.record(FailureRecord::from_error(
                        "bulk_index",
                        record_type,
                        &e,
                        self.max_trace_frames,
                    ));
                    let failed = FailedBatch {
                        batch: report.batches,
                        first_id,
                        last_id,
                        records: ids.len(),
                        error: e.to_string(),
                    };
                    report.failed_batches.push(failed.clone());
                    BatchOutcome {
                        batch: report.batches,
                        records: ids.len(),
                        written: 0,
                        failure: Some(failed),
                    }
                }
            };
            on_batch(&outcome);

            if ids.len() < batch_size {
                break;
            }
        }

        if !report.cancelled && (options.verify || self.synchronous_consistency) {
            match self.client.refresh_index(binding.index_name()).await {
                Ok(()) => report.refreshed = true,
                Err(e) => {
                    let e = crate::error::SyncError::from(e);
                    self.failures.record(FailureRecord::from_error(
                        "refresh",
                        record_type,
                        &e,
                        self.max_trace_frames,
                    ));
                }
            }
        }

        report.duration_ms = duration_ms(start.elapsed());
        Ok(report)
    }

    /// Loads, serializes and writes one batch. Returns the records loaded
    /// and the documents written.
    async fn write_batch(
        &self,
        binding: &IndexBinding,
        ids: &[RecordId],
    ) -> SyncResult<(usize, usize)> {
        let indexed = binding.indexed();
        let query = indexed.load_query(
            RecordQuery::new(indexed.record_type())
                .with_scope(RecordScope::ids(ids.iter().copied())),
        );

        let mut records = self.store.load(&query, ids).await?;
        let documents = indexed.to_documents(&mut records)?;
        let summary = self
            .client
            .bulk_write(binding.index_name(), &documents)
            .await?;
        Ok((records.len(), summary.written))
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// A reindex to run in the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Record type to rebuild.
    pub record_type: String,
    /// Records to rebuild.
    #[serde(default)]
    pub scope: RecordScope,
    /// Run options.
    #[serde(default)]
    pub options: ReindexOptions,
}

impl ReindexRequest {
    /// Rebuilds every record of a type.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            scope: RecordScope::All,
            options: ReindexOptions::default(),
        }
    }

    /// Restricts the scope.
    pub fn with_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the run options.
    pub fn with_options(mut self, options: ReindexOptions) -> Self {
        self.options = options;
        self
    }
}

/// Status of a reindex job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexStatus {
    /// Job is queued but not started.
    Queued,
    /// Job is currently running.
    InProgress,
    /// Job finished (failed batches are reported in the progress).
    Completed,
    /// Job stopped on an error.
    Failed,
    /// Job was cancelled.
    Cancelled,
}

impl ReindexStatus {
    /// Returns true if the job is still running.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::Queued | ReindexStatus::InProgress)
    }

    /// Returns true if the job has finished (success, failure, or cancelled).
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ReindexStatus::Completed | ReindexStatus::Failed | ReindexStatus::Cancelled
        )
    }
}

/// Progress information for a reindex job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexProgress {
    /// Unique job identifier.
    pub job_id: String,
    /// Record type being rebuilt.
    pub record_type: String,
    /// Current status.
    pub status: ReindexStatus,
    /// Batches finished so far.
    pub batches: usize,
    /// Records read so far.
    pub processed_records: usize,
    /// Documents written so far.
    pub documents_written: usize,
    /// Batches that failed so far.
    pub failed_batches: Vec<FailedBatch>,
    /// When the job started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if status is Failed.
    pub error_message: Option<String>,
    /// Final report once the run returns.
    pub report: Option<ReindexReport>,
}

impl ReindexProgress {
    /// Creates a queued job.
    pub fn new(job_id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            record_type: record_type.into(),
            status: ReindexStatus::Queued,
            batches: 0,
            processed_records: 0,
            documents_written: 0,
            failed_batches: Vec::new(),
            started_at: None,
            completed_at: None,
            error_message: None,
            report: None,
        }
    }

    /// Returns true if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.failed_batches.is_empty() || self.error_message.is_some()
    }

    fn apply(&mut self, outcome: &BatchOutcome) {
        self.batches = outcome.batch;
        self.processed_records += outcome.records;
        self.documents_written += outcome.written;
        if let Some(failure) = &outcome.failure {
            self.failed_batches.push(failure.clone());
        }
    }

    fn finish(&mut self, result: SyncResult<ReindexReport>) {
        self.completed_at = Some(Utc::now());
        match result {
            Ok(report) => {
                self.status = if report.cancelled {
                    ReindexStatus::Cancelled
                } else {
                    ReindexStatus::Completed
                };
                self.report = Some(report);
            }
            Err(e) => {
                self.status = ReindexStatus::Failed;
                self.error_message = Some(e.to_string());
            }
        }
    }
}

type JobTable = Arc<RwLock<HashMap<String, ReindexProgress>>>;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs reindexes as background tasks and tracks their progress.
pub struct ReindexJobs {
    reindexer: Arc<BulkReindexer>,
    jobs: JobTable,
    cancel_channels: Arc<RwLock<HashMap<String, mpsc::Sender<()>>>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReindexJobs {
    /// Creates a job manager over a reindexer.
    pub fn new(reindexer: Arc<BulkReindexer>) -> Self {
        Self {
            reindexer,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancel_channels: Arc::new(RwLock::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a reindex in the background and returns its job id.
    ///
    /// Must be called within a tokio runtime. Unknown types are rejected
    /// before a job is created.
    pub async fn start(&self, request: ReindexRequest) -> SyncResult<String> {
        self.reindexer.registry().require(&request.record_type)?;

        let job_id = Uuid::new_v4().to_string();
        self.jobs.write().insert(
            job_id.clone(),
            ReindexProgress::new(&job_id, &request.record_type),
        );

        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.cancel_channels.write().insert(job_id.clone(), tx);

        let reindexer = self.reindexer.clone();
        let jobs = self.jobs.clone();
        let id = job_id.clone();

        let handle = tokio::spawn(async move {
            update(&jobs, &id, |progress| {
                progress.status = ReindexStatus::InProgress;
                progress.started_at = Some(Utc::now());
            });

            let result = reindexer
                .run(
                    &request.record_type,
                    request.scope,
                    &request.options,
                    Some(&mut rx),
                    |outcome| update(&jobs, &id, |progress| progress.apply(outcome)),
                )
                .await;

            if let Err(e) = &result {
                tracing::error!(job_id = %id, error = %e, "Reindex job failed");
            }
            update(&jobs, &id, |progress| progress.finish(result));
        });

        self.handles.lock().insert(job_id.clone(), handle);
        Ok(job_id)
    }

    /// Gets the progress of a job.
    pub fn progress(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Asks a running job to stop before its next batch.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ReindexError> {
        {
            let jobs = self.jobs.read();
            let progress = jobs.get(job_id).ok_or_else(|| ReindexError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

            if !progress.status.is_running() {
                return Ok(());
            }
        }

        // A full channel already holds a pending cancel; a closed one means
        // the run has returned.
        if let Some(tx) = self.cancel_channels.read().get(job_id)
            && tx.try_send(()).is_err()
        {
            tracing::debug!(job_id, "Reindex job already stopping");
        }
        Ok(())
    }

    /// Waits for a job to finish and returns its final progress.
    pub async fn wait(&self, job_id: &str) -> Result<ReindexProgress, ReindexError> {
        let handle = self.handles.lock().remove(job_id);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(job_id, error = %e, "Reindex task panicked");
            update(&self.jobs, job_id, |progress| {
                progress.status = ReindexStatus::Failed;
                progress.error_message = Some(e.to_string());
                progress.completed_at = Some(Utc::now());
            });
        }

        // Another waiter may own the task handle.
        loop {
            let progress = self.progress(job_id).ok_or_else(|| ReindexError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
            if progress.status.is_finished() {
                return Ok(progress);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Lists all jobs (active and recent).
    pub fn list_jobs(&self) -> Vec<ReindexProgress> {
        self.jobs.read().values().cloned().collect()
    }

    /// Removes finished jobs that completed more than `max_age` ago.
    pub fn cleanup_old_jobs(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;

        let mut jobs = self.jobs.write();
        let mut channels = self.cancel_channels.write();
        let mut handles = self.handles.lock();

        jobs.retain(|job_id, progress| {
            let expired = progress.status.is_finished()
                && progress.completed_at.is_some_and(|done| done < cutoff);
            if expired {
                channels.remove(job_id);
                handles.remove(job_id);
            }
            !expired
        });
    }
}

impl std::fmt::Debug for ReindexJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReindexJobs")
            .field("jobs", &self.jobs.read().len())
            .finish()
    }
}

fn update(jobs: &JobTable, job_id: &str, f: impl FnOnce(&mut ReindexProgress)) {
    if let Some(progress) = jobs.write().get_mut(job_id) {
        f(progress);
    }
}
