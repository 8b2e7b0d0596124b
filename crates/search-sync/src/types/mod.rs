//! Core types for records, scopes, documents and pagination.

mod document;
mod pagination;
mod record;
mod scope;

pub use document::{CommitEvent, CommitOperation, Document, SyncEvent, SyncOperation};
pub use pagination::{PageRequest, PaginatedCollection};
pub use record::{Record, RecordId};
pub use scope::{Projection, RecordQuery, RecordScope};
