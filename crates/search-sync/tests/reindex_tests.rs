//! Tests for the Bulk Reindexer and background reindex jobs.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use search_sync::adapter::{DefaultDocumentAdapter, IncludeAssociations, IndexedType};
use search_sync::error::{AdapterError, RegistrationError, ReindexError, SyncError};
use search_sync::reindex::{ReindexOptions, ReindexRequest, ReindexStatus};
use search_sync::types::{Record, RecordId, RecordScope};

use common::*;

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_batches_of_two_over_five_records() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    assert_eq!(bulk_batches(&ctx.client), vec![vec![1, 2], vec![3, 4], vec![5]]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.records_processed, 5);
    assert_eq!(report.documents_written, 5);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_exact_multiple_of_batch_size() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(4));

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    assert_eq!(bulk_batches(&ctx.client), vec![vec![1, 2], vec![3, 4]]);
    assert_eq!(report.batches, 2);
}

#[tokio::test]
async fn test_empty_scope_issues_no_bulk_calls() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(3));

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::ids([100, 200]),
            ReindexOptions::default(),
        )
        .await
        .unwrap();

    assert!(ctx.client.bulk_calls().is_empty());
    assert_eq!(report.batches, 0);
    assert_eq!(report.documents_written, 0);
}

#[tokio::test]
async fn test_scoped_reindex() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(10));

    ctx.sync
        .reindex(
            "Observation",
            RecordScope::id_range(Some(RecordId::new(4)), Some(RecordId::new(6))),
            ReindexOptions::default(),
        )
        .await
        .unwrap();
    ctx.sync
        .reindex(
            "Observation",
            RecordScope::attribute_equals("even", true).and(RecordScope::ids([8, 9, 10])),
            ReindexOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(bulk_batches(&ctx.client), vec![vec![4, 5, 6], vec![8, 10]]);
}

#[tokio::test]
async fn test_configured_batch_size_is_the_default() {
    let ctx = TestContextBuilder::new()
        .config(|config| config.batch_size = 3)
        .build();
    ctx.store.seed(observations_range(7));

    let options = ctx.sync.reindex_options();
    assert_eq!(options.batch_size, 3);

    ctx.sync
        .reindex("Observation", RecordScope::All, options)
        .await
        .unwrap();
    assert_eq!(
        bulk_batches(&ctx.client),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
    );
}

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test]
async fn test_failed_batch_is_logged_and_run_continues() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));
    ctx.client.fail_bulk_call(2);

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2).verify(),
        )
        .await
        .unwrap();

    assert_eq!(ctx.client.bulk_calls().len(), 3);
    assert_eq!(
        ctx.client.searchable_ids(OBSERVATIONS),
        vec![RecordId::new(1), RecordId::new(2), RecordId::new(5)]
    );

    let failures = ctx.failures.records();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, "bulk_index");
    assert_eq!(failures[0].record_type, "Observation");
    assert!(failures[0].trace.len() <= 31);

    assert_eq!(report.documents_written, 3);
    assert_eq!(report.failed_batches.len(), 1);
    let failed = &report.failed_batches[0];
    assert_eq!((failed.batch, failed.records), (2, 2));
    assert_eq!((failed.first_id, failed.last_id), (RecordId::new(3), RecordId::new(4)));
    assert!(!report.is_complete());
}

#[tokio::test]
async fn test_retry_scopes_fill_the_gap() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));
    ctx.client.fail_bulk_call(2);

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    for scope in report.retry_scopes() {
        let retry = ctx
            .sync
            .reindex("Observation", scope, ReindexOptions::default().verify())
            .await
            .unwrap();
        assert!(retry.is_complete());
    }

    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 5);
    assert_eq!(bulk_batches(&ctx.client)[3], vec![3, 4]);
}

#[tokio::test]
async fn test_adapter_failure_fails_only_its_batch() {
    let ctx = TestContextBuilder::new()
        .register(IndexedType::new(
            "Observation",
            |record: &Record| -> Result<serde_json::Value, AdapterError> {
                if record.id().value() == 3 {
                    return Err(AdapterError::Serialization {
                        record_type: "Observation".to_string(),
                        id: 3,
                        message: "bad record".to_string(),
                    });
                }
                Ok(json!({"id": record.id().value()}))
            },
        ))
        .build();
    ctx.store.seed(observations_range(6));

    let report = ctx
        .sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    assert_eq!(bulk_batches(&ctx.client), vec![vec![1, 2], vec![5, 6]]);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(ctx.failures.len(), 1);
}

#[tokio::test]
async fn test_unknown_type_is_an_error() {
    let ctx = TestContextBuilder::new().build();
    let result = ctx
        .sync
        .reindex("Comment", RecordScope::All, ReindexOptions::default())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Registration(RegistrationError::UnknownType { .. }))
    ));
}

// ============================================================================
// Hooks and visibility
// ============================================================================

#[tokio::test]
async fn test_hooks_run_once_per_batch() {
    let preparations = Arc::new(AtomicUsize::new(0));
    let counter = preparations.clone();

    let ctx = TestContextBuilder::new()
        .register(
            IndexedType::new("Observation", DefaultDocumentAdapter)
                .with_association_preload(IncludeAssociations::new(["photos"]))
                .with_batch_preparation(move |batch: &mut [Record]| -> Result<(), AdapterError> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    for record in batch.iter_mut() {
                        let photos = record.association("photos").map(<[Record]>::len).unwrap_or(0);
                        record
                            .attributes_mut()
                            .insert("photo_count".to_string(), json!(photos));
                    }
                    Ok(())
                }),
        )
        .build();

    ctx.store
        .define_association("Observation", "photos", "Photo", "observation_id");
    ctx.store.seed(observations_range(5));
    ctx.store.seed([
        Record::new("Photo", 100, json!({"observation_id": 1})),
        Record::new("Photo", 101, json!({"observation_id": 1})),
        Record::new("Photo", 102, json!({"observation_id": 4})),
    ]);

    ctx.sync
        .reindex(
            "Observation",
            RecordScope::All,
            ReindexOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    assert_eq!(preparations.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.store.load_call_count(), 3);
    assert_eq!(ctx.store.page_call_count(), 3);

    let first = ctx.client.get_document(OBSERVATIONS, RecordId::new(1)).unwrap();
    assert_eq!(first["photo_count"], json!(2));
    assert_eq!(first["photos"].as_array().map(Vec::len), Some(2));
    let fourth = ctx.client.get_document(OBSERVATIONS, RecordId::new(4)).unwrap();
    assert_eq!(fourth["photo_count"], json!(1));
}

#[tokio::test]
async fn test_refresh_only_when_verifying() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(3));

    let report = ctx
        .sync
        .reindex("Observation", RecordScope::All, ReindexOptions::default())
        .await
        .unwrap();
    assert!(!report.refreshed);
    assert!(ctx.client.refresh_calls().is_empty());
    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 0);

    let report = ctx
        .sync
        .reindex("Observation", RecordScope::All, ReindexOptions::default().verify())
        .await
        .unwrap();
    assert!(report.refreshed);
    assert_eq!(ctx.client.refresh_calls(), vec![OBSERVATIONS]);
    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 3);
}

#[tokio::test]
async fn test_reindex_does_not_clear_index() {
    let ctx = synchronous_context();
    ctx.sync.index(&observation(99, json!({"description": "stale"}))).await;
    ctx.store.seed(observations_range(2));

    ctx.sync
        .reindex("Observation", RecordScope::All, ReindexOptions::default())
        .await
        .unwrap();

    assert_eq!(
        ctx.client.searchable_ids(OBSERVATIONS),
        vec![RecordId::new(1), RecordId::new(2), RecordId::new(99)]
    );
}

// ============================================================================
// Background jobs
// ============================================================================

#[tokio::test]
async fn test_job_runs_to_completion() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));

    let job_id = ctx
        .sync
        .jobs()
        .start(
            ReindexRequest::new("Observation")
                .with_options(ReindexOptions::default().with_batch_size(2)),
        )
        .await
        .unwrap();

    let progress = ctx.sync.jobs().wait(&job_id).await.unwrap();
    assert_eq!(progress.status, ReindexStatus::Completed);
    assert_eq!(progress.batches, 3);
    assert_eq!(progress.processed_records, 5);
    assert_eq!(progress.documents_written, 5);
    assert!(progress.started_at.is_some());
    assert!(progress.completed_at.is_some());
    assert!(!progress.has_errors());
    assert_eq!(progress.report.map(|r| r.batches), Some(3));
}

#[tokio::test]
async fn test_job_records_failed_batches() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));
    ctx.client.fail_bulk_call(3);

    let job_id = ctx
        .sync
        .jobs()
        .start(
            ReindexRequest::new("Observation")
                .with_options(ReindexOptions::default().with_batch_size(2)),
        )
        .await
        .unwrap();

    let progress = ctx.sync.jobs().wait(&job_id).await.unwrap();
    assert_eq!(progress.status, ReindexStatus::Completed);
    assert_eq!(progress.failed_batches.len(), 1);
    assert_eq!(progress.failed_batches[0].first_id, RecordId::new(5));
    assert!(progress.has_errors());
}

#[tokio::test]
async fn test_job_cancelled_before_first_batch() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(5));

    let jobs = ctx.sync.jobs();
    let job_id = jobs
        .start(
            ReindexRequest::new("Observation")
                .with_options(ReindexOptions::default().with_batch_size(1)),
        )
        .await
        .unwrap();
    jobs.cancel(&job_id).await.unwrap();

    let progress = jobs.wait(&job_id).await.unwrap();
    assert_eq!(progress.status, ReindexStatus::Cancelled);
    assert_eq!(progress.batches, 0);
    assert!(ctx.client.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_repeated_cancel_does_not_wait_for_the_run() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(3));

    let jobs = ctx.sync.jobs();
    let job_id = jobs.start(ReindexRequest::new("Observation")).await.unwrap();
    jobs.cancel(&job_id).await.unwrap();
    jobs.cancel(&job_id).await.unwrap();

    // Neither cancel yielded to the job task.
    assert_eq!(jobs.progress(&job_id).unwrap().status, ReindexStatus::Queued);

    let progress = jobs.wait(&job_id).await.unwrap();
    assert_eq!(progress.status, ReindexStatus::Cancelled);
    assert!(ctx.client.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_job_for_unknown_type_is_rejected() {
    let ctx = TestContextBuilder::new().build();
    let result = ctx.sync.jobs().start(ReindexRequest::new("Comment")).await;

    assert!(result.is_err());
    assert!(ctx.sync.jobs().list_jobs().is_empty());
}

#[tokio::test]
async fn test_unknown_job_id() {
    let ctx = TestContextBuilder::new().build();
    let jobs = ctx.sync.jobs();

    assert!(jobs.progress("missing").is_none());
    assert!(matches!(
        jobs.cancel("missing").await,
        Err(ReindexError::JobNotFound { .. })
    ));
    assert!(matches!(
        jobs.wait("missing").await,
        Err(ReindexError::JobNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cleanup_removes_finished_jobs() {
    let ctx = TestContextBuilder::new().build();
    ctx.store.seed(observations_range(2));

    let jobs = ctx.sync.jobs();
    let job_id = jobs.start(ReindexRequest::new("Observation")).await.unwrap();
    jobs.wait(&job_id).await.unwrap();
    assert_eq!(jobs.list_jobs().len(), 1);

    jobs.cleanup_old_jobs(chrono::Duration::hours(1));
    assert_eq!(jobs.list_jobs().len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    jobs.cleanup_old_jobs(chrono::Duration::zero());
    assert!(jobs.list_jobs().is_empty());
}
