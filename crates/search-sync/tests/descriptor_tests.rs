//! Tests for descriptor discovery and index creation.

mod common;

use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use search_sync::adapter::{DefaultDocumentAdapter, IndexedType};
use search_sync::client::{IndexClient, MemoryIndexClient};
use search_sync::error::{DescriptorError, RegistrationError, SyncError};
use search_sync::registry::{DescriptorBinding, DescriptorRegistry};
use search_sync::store::InMemoryRecordStore;
use search_sync::{SearchSync, SyncConfig};

use common::*;

fn write_descriptor(dir: &TempDir, file: &str, body: serde_json::Value) {
    fs::write(dir.path().join(file), body.to_string()).expect("Failed to write descriptor");
}

fn build(config: SyncConfig, types: Vec<IndexedType>) -> Result<Arc<SearchSync>, SyncError> {
    types
        .into_iter()
        .fold(
            SearchSync::builder(
                config,
                Arc::new(MemoryIndexClient::new()),
                Arc::new(InMemoryRecordStore::new()),
            ),
            |builder, indexed| builder.register(indexed),
        )
        .build()
}

#[tokio::test]
async fn test_discovered_descriptor_is_applied_on_create() {
    let dir = TempDir::new().unwrap();
    write_descriptor(
        &dir,
        "observation_photo_index.json",
        json!({
            "settings": {"number_of_shards": 1},
            "mappings": {"properties": {"url": {"type": "keyword"}}}
        }),
    );

    let ctx = TestContextBuilder::new()
        .config(|config| config.descriptor_dir = Some(dir.path().to_path_buf()))
        .register(observations())
        .register(IndexedType::new("ObservationPhoto", DefaultDocumentAdapter))
        .build();

    let binding = ctx.sync.registry().require("ObservationPhoto").unwrap();
    assert_eq!(binding.index_name(), "test_observation_photos");
    assert!(binding.descriptor().is_some());
    assert!(ctx.sync.registry().require("Observation").unwrap().descriptor().is_none());

    let created = ctx.sync.create_indices().await.unwrap();
    assert_eq!(created, vec!["test_observations", "test_observation_photos"]);

    let descriptor = ctx.client.index_descriptor("test_observation_photos").unwrap();
    assert_eq!(
        descriptor.mappings.unwrap()["properties"]["url"]["type"],
        json!("keyword")
    );
    assert!(ctx.client.index_descriptor(OBSERVATIONS).is_none());
}

#[tokio::test]
async fn test_ensure_index_is_idempotent() {
    let ctx = TestContextBuilder::new().build();

    assert!(ctx.sync.ensure_index("Observation").await.unwrap());
    assert!(!ctx.sync.ensure_index("Observation").await.unwrap());
    assert!(ctx.sync.create_indices().await.unwrap().is_empty());
    assert!(ctx.client.index_exists(OBSERVATIONS).await.unwrap());
}

#[test]
fn test_malformed_descriptor_aborts_build() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("observation_index.json"), "{not json").unwrap();

    let result = build(
        SyncConfig::for_environment("test").with_descriptor_dir(dir.path()),
        vec![observations()],
    );

    assert!(matches!(
        result,
        Err(SyncError::Descriptor(DescriptorError::Malformed { .. }))
    ));
}

#[test]
fn test_unknown_descriptor_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    write_descriptor(&dir, "observation_index.json", json!({"setting": {}}));

    let result = build(
        SyncConfig::for_environment("test").with_descriptor_dir(dir.path()),
        vec![observations()],
    );

    assert!(matches!(result, Err(SyncError::Descriptor(_))));
}

#[test]
fn test_missing_descriptor_dir_entries_use_defaults() {
    let dir = TempDir::new().unwrap();

    let sync = build(
        SyncConfig::for_environment("test").with_descriptor_dir(dir.path()),
        vec![observations()],
    )
    .unwrap();

    assert!(sync.registry().require("Observation").unwrap().descriptor().is_none());
}

#[test]
fn test_explicit_descriptors_override_discovery() {
    let descriptors = DescriptorRegistry::load([DescriptorBinding::inline(
        "Observation",
        json!({"settings": {"number_of_replicas": 0}}),
    )])
    .unwrap();

    let ctx = TestContextBuilder::new().descriptors(descriptors).build();
    let binding = ctx.sync.registry().require("Observation").unwrap();
    assert_eq!(
        binding.descriptor().and_then(|d| d.settings.clone()).unwrap()["number_of_replicas"],
        json!(0)
    );
}

#[test]
fn test_index_name_collision_is_rejected() {
    let result = build(
        SyncConfig::for_environment("test"),
        vec![
            observations(),
            IndexedType::new("Sighting", DefaultDocumentAdapter).with_collection_name("observations"),
        ],
    );

    assert!(matches!(
        result,
        Err(SyncError::Registration(RegistrationError::IndexNameCollision { .. }))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = build(SyncConfig::for_environment(""), vec![observations()]);
    assert!(matches!(result, Err(SyncError::Config(_))));
}
