//! Primary store abstraction.
//!
//! The primary store is the system of record. The sync layer reads from it in
//! two shapes:
//!
//! - [`RecordStore::page`]: keyset pages (`id > after`, ascending, limited)
//!   with the query's projection applied, used to walk a scope cheaply.
//! - [`RecordStore::load`]: full records for a set of ids with the query's
//!   includes pre-fetched, used to materialize a batch for serialization.
//!
//! Writes go through [`RecordStore::commit`], which applies a [`ChangeSet`]
//! atomically and then notifies every [`CommitObserver`] in order.

mod dispatch;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::types::{CommitEvent, Record, RecordId, RecordQuery};

pub use dispatch::{CommitDispatcher, CommitObserver};
pub use memory::InMemoryRecordStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteRecordStore, SqliteStoreConfig};

/// A has-many association: children of `target_type` whose `foreign_key`
/// attribute holds the parent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDef {
    /// Child record type.
    pub target_type: String,
    /// Child attribute referencing the parent id.
    pub foreign_key: String,
}

/// One write in a change set.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new record.
    Insert(Record),
    /// Replace an existing record's attributes.
    Update(Record),
    /// Remove a record.
    Destroy {
        /// Record type.
        record_type: String,
        /// Record id.
        id: RecordId,
    },
}

/// Writes applied in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an insert.
    pub fn insert(mut self, record: Record) -> Self {
        self.changes.push(Change::Insert(record));
        self
    }

    /// Adds an update.
    pub fn update(mut self, record: Record) -> Self {
        self.changes.push(Change::Update(record));
        self
    }

    /// Adds a destroy.
    pub fn destroy(mut self, record_type: impl Into<String>, id: impl Into<RecordId>) -> Self {
        self.changes.push(Change::Destroy {
            record_type: record_type.into(),
            id: id.into(),
        });
        self
    }

    /// The changes, in order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Consumes the set.
    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The primary store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short store name used in logs and errors.
    fn store_name(&self) -> &'static str;

    /// Returns up to `limit` records in scope with id greater than `after`,
    /// ascending by id, with the query's projection applied.
    async fn page(
        &self,
        query: &RecordQuery,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>>;

    /// Loads full records for `ids` (ascending, missing ids skipped) with the
    /// query's includes pre-fetched. The query's scope is ignored.
    async fn load(&self, query: &RecordQuery, ids: &[RecordId]) -> StoreResult<Vec<Record>>;

    /// Applies the changes atomically, then notifies observers in order.
    ///
    /// Returns the committed events. Nothing is notified if the transaction
    /// fails.
    async fn commit(&self, changes: ChangeSet) -> StoreResult<Vec<CommitEvent>>;

    /// Subscribes an observer to future commits.
    fn subscribe(&self, observer: Weak<dyn CommitObserver>);
}

/// Returns true if a child's foreign key holds `parent`.
pub(crate) fn references(child: &Record, foreign_key: &str, parent: RecordId) -> bool {
    match child.attribute(foreign_key) {
        Some(Value::Number(n)) => n.as_i64() == Some(parent.value()),
        Some(Value::String(s)) => s.parse::<i64>().ok() == Some(parent.value()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_set_builder() {
        let changes = ChangeSet::new()
            .insert(Record::new("Observation", 1, json!({})))
            .update(Record::new("Observation", 2, json!({})))
            .destroy("Observation", 3);

        assert_eq!(changes.len(), 3);
        assert!(matches!(
            changes.changes()[2],
            Change::Destroy { id, .. } if id == RecordId::new(3)
        ));
    }

    #[test]
    fn test_references() {
        let photo = Record::new("Photo", 10, json!({"observation_id": 1}));
        assert!(references(&photo, "observation_id", RecordId::new(1)));
        assert!(!references(&photo, "observation_id", RecordId::new(2)));

        let legacy = Record::new("Photo", 11, json!({"observation_id": "1"}));
        assert!(references(&legacy, "observation_id", RecordId::new(1)));
    }
}
