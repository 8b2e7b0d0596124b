//! Tests for commit-driven index propagation.
//!
//! Commits go through the primary store; the sync layer observes them and
//! keeps the index in step.

mod common;

use serde_json::json;

use search_sync::adapter::{DefaultDocumentAdapter, DocumentAdapter, IndexedType};
use search_sync::client::{FieldSelection, SearchQuery, SearchRequest};
use search_sync::error::AdapterError;
use search_sync::store::{ChangeSet, RecordStore};
use search_sync::types::{Record, RecordId};

use common::*;

#[tokio::test]
async fn test_create_then_search_with_synchronous_consistency() {
    let ctx = synchronous_context();

    ctx.store
        .commit(ChangeSet::new().insert(observation(1, json!({"description": "owl"}))))
        .await
        .unwrap();

    assert_eq!(ctx.client.searchable_ids(OBSERVATIONS), vec![RecordId::new(1)]);
    assert_eq!(
        ctx.client.get_document(OBSERVATIONS, RecordId::new(1)),
        Some(json!({"id": 1, "description": "owl"}))
    );
    assert!(ctx.failures.is_empty());
}

#[tokio::test]
async fn test_committed_record_is_returned_by_search() {
    let ctx = synchronous_context();
    let record = observation(1, json!({"description": "owl", "quality": "research"}));

    ctx.store
        .commit(ChangeSet::new().insert(record.clone()))
        .await
        .unwrap();

    let response = ctx
        .sync
        .search(
            "Observation",
            &SearchRequest::new(SearchQuery::match_all().with_ids([RecordId::new(1)]), 10)
                .with_fields(FieldSelection::All),
        )
        .await
        .unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].id, RecordId::new(1));
    assert_eq!(
        response.hits[0].source,
        Some(DefaultDocumentAdapter.as_index_document(&record).unwrap())
    );
}

#[tokio::test]
async fn test_update_replaces_document() {
    let ctx = synchronous_context();

    ctx.store
        .commit(ChangeSet::new().insert(observation(1, json!({"description": "owl"}))))
        .await
        .unwrap();
    ctx.store
        .commit(ChangeSet::new().update(observation(1, json!({"description": "barn owl"}))))
        .await
        .unwrap();

    let doc = ctx.client.get_document(OBSERVATIONS, RecordId::new(1)).unwrap();
    assert_eq!(doc["description"], json!("barn owl"));
    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 1);
}

#[tokio::test]
async fn test_destroy_removes_document() {
    let ctx = synchronous_context();

    ctx.store
        .commit(ChangeSet::new().insert(observation(1, json!({}))))
        .await
        .unwrap();
    ctx.store
        .commit(ChangeSet::new().destroy("Observation", 1))
        .await
        .unwrap();

    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 0);
    assert!(ctx.client.get_document(OBSERVATIONS, RecordId::new(1)).is_none());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let ctx = synchronous_context();

    let first = ctx.sync.delete("Observation", RecordId::new(42)).await;
    let second = ctx.sync.delete("Observation", RecordId::new(42)).await;

    assert!(first.success);
    assert!(second.success);
    assert!(ctx.failures.is_empty());
}

#[tokio::test]
async fn test_reindexing_same_record_is_idempotent() {
    let ctx = synchronous_context();
    let record = observation(7, json!({"description": "heron"}));

    ctx.sync.index(&record).await;
    let before = ctx.client.get_document(OBSERVATIONS, RecordId::new(7));
    ctx.sync.index(&record).await;

    assert_eq!(ctx.client.get_document(OBSERVATIONS, RecordId::new(7)), before);
    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 1);
}

#[tokio::test]
async fn test_engine_outage_does_not_fail_commit() {
    let ctx = synchronous_context();
    ctx.client.set_unavailable(true);

    let events = ctx
        .store
        .commit(ChangeSet::new().insert(observation(1, json!({}))))
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    assert!(ctx.store.get("Observation", RecordId::new(1)).is_some());

    let failures = ctx.failures.records();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, "index");
    assert!(failures[0].message.contains("unavailable"));
}

#[tokio::test]
async fn test_adapter_error_is_logged() {
    let ctx = TestContextBuilder::new()
        .synchronous()
        .register(IndexedType::new(
            "Observation",
            |record: &Record| -> Result<serde_json::Value, AdapterError> {
                Err(AdapterError::Serialization {
                    record_type: record.record_type().to_string(),
                    id: record.id().value(),
                    message: "missing taxon".to_string(),
                })
            },
        ))
        .build();

    ctx.store
        .commit(ChangeSet::new().insert(observation(1, json!({}))))
        .await
        .unwrap();

    assert_eq!(ctx.client.index_call_count(), 0);
    assert_eq!(ctx.failures.len(), 1);
}

#[tokio::test]
async fn test_unregistered_types_are_not_indexed() {
    let ctx = synchronous_context();

    ctx.store
        .commit(ChangeSet::new().insert(Record::new("Comment", 1, json!({"body": "nice"}))))
        .await
        .unwrap();

    assert_eq!(ctx.client.index_call_count(), 0);
    assert!(ctx.client.index_names().is_empty());
}

#[tokio::test]
async fn test_without_synchronous_consistency_writes_are_buffered() {
    let ctx = TestContextBuilder::new().build();

    ctx.store
        .commit(ChangeSet::new().insert(observation(1, json!({}))))
        .await
        .unwrap();

    assert_eq!(ctx.client.buffered_count(OBSERVATIONS), 1);
    assert_eq!(ctx.client.searchable_count(OBSERVATIONS), 0);
    assert!(ctx.client.refresh_calls().is_empty());
}

#[tokio::test]
async fn test_dropped_sync_layer_stops_observing() {
    let ctx = synchronous_context();
    let client = ctx.client.clone();
    let store = ctx.store.clone();
    drop(ctx);

    store
        .commit(ChangeSet::new().insert(observation(1, json!({}))))
        .await
        .unwrap();

    assert_eq!(client.index_call_count(), 0);
}
