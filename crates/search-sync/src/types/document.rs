//! Index documents and the change events that produce them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{Record, RecordId};

/// The serialized form of a record in its type's index.
///
/// Keyed by the record id: a later write for the same id replaces the
/// earlier document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Id of the record the document was derived from.
    pub id: RecordId,
    /// Document body.
    pub body: Value,
}

impl Document {
    /// Creates a document.
    pub fn new(id: impl Into<RecordId>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Kind of primary-store change that was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    /// A record was inserted.
    Create,
    /// A record was updated.
    Update,
    /// A record was destroyed.
    Destroy,
}

impl fmt::Display for CommitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOperation::Create => write!(f, "create"),
            CommitOperation::Update => write!(f, "update"),
            CommitOperation::Destroy => write!(f, "destroy"),
        }
    }
}

/// Notification fired by the primary store after a transaction finalizes.
///
/// For destroys the record carries the last committed content.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// What happened.
    pub operation: CommitOperation,
    /// The record as committed.
    pub record: Record,
}

impl CommitEvent {
    /// Event for a committed insert.
    pub fn created(record: Record) -> Self {
        Self {
            operation: CommitOperation::Create,
            record,
        }
    }

    /// Event for a committed update.
    pub fn updated(record: Record) -> Self {
        Self {
            operation: CommitOperation::Update,
            record,
        }
    }

    /// Event for a committed destroy.
    pub fn destroyed(record: Record) -> Self {
        Self {
            operation: CommitOperation::Destroy,
            record,
        }
    }
}

/// What the index must do in response to a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// Upsert the record's document.
    Index,
    /// Remove the record's document.
    Delete,
}

/// A single unit of index work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Index or delete.
    pub operation: SyncOperation,
    /// Record type.
    pub record_type: String,
    /// Record id.
    pub record_id: RecordId,
}

impl SyncEvent {
    /// An index event for a record.
    pub fn index(record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            operation: SyncOperation::Index,
            record_type: record_type.into(),
            record_id,
        }
    }

    /// A delete event for a record.
    pub fn delete(record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            operation: SyncOperation::Delete,
            record_type: record_type.into(),
            record_id,
        }
    }
}

impl From<&CommitEvent> for SyncEvent {
    fn from(event: &CommitEvent) -> Self {
        let record_type = event.record.record_type().to_string();
        let record_id = event.record.id();
        match event.operation {
            CommitOperation::Create | CommitOperation::Update => {
                SyncEvent::index(record_type, record_id)
            }
            CommitOperation::Destroy => SyncEvent::delete(record_type, record_id),
        }
    }
}
