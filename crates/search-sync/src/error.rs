//! Error types for the synchronization layer.
//!
//! Errors are grouped by the collaborator they originate from: descriptor
//! loading, the search engine transport, the primary store, per-type document
//! adapters, and type registration. All of them roll up into [`SyncError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The top-level error type for all synchronization operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Descriptor loading errors (fatal at startup)
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Search engine transport errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Primary store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document adapter errors
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Type registration errors
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reindex job errors
    #[error(transparent)]
    Reindex(#[from] ReindexError),
}

/// Errors raised while loading index descriptors.
///
/// A descriptor problem is a deployment defect, so these abort initialization.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// The descriptor file could not be read.
    #[error("cannot read index descriptor for {record_type} at {path}: {source}")]
    Unreadable {
        record_type: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The descriptor content is not a valid descriptor.
    #[error("malformed index descriptor for {record_type} at {path}: {message}")]
    Malformed {
        record_type: String,
        path: String,
        message: String,
    },

    /// More than one descriptor was bound to the same type.
    #[error("duplicate index descriptor for {record_type}")]
    Duplicate { record_type: String },
}

/// Errors returned by the search engine transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The engine could not be reached.
    #[error("search engine {engine} unavailable: {message}")]
    Unavailable { engine: String, message: String },

    /// The engine answered with a non-success status.
    #[error("request to index {index} rejected with status {status}: {body}")]
    Rejected {
        index: String,
        status: u16,
        body: String,
    },

    /// A bulk request was accepted but some of its items failed.
    #[error("bulk write to {index} failed for {failed} of {total} documents: {first_error}")]
    BulkItemsFailed {
        index: String,
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// The engine's reply could not be interpreted.
    #[error("invalid response from index {index}: {message}")]
    InvalidResponse { index: String, message: String },

    /// The client could not be configured.
    #[error("invalid transport configuration: {message}")]
    Configuration { message: String },
}

/// Errors originating from the primary store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist.
    #[error("record not found: {record_type}/{id}")]
    NotFound { record_type: String, id: i64 },

    /// A record with this id already exists.
    #[error("record already exists: {record_type}/{id}")]
    AlreadyExists { record_type: String, id: i64 },

    /// The query named an association the type does not define.
    #[error("unknown association '{association}' on {record_type}")]
    UnknownAssociation {
        record_type: String,
        association: String,
    },

    /// The query could not be translated or executed.
    #[error("query failed: {message}")]
    Query { message: String },

    /// Internal store error.
    #[error("internal error in {store_name}: {message}")]
    Internal {
        store_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors raised by per-type document adapters.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// A record could not be turned into a document.
    #[error("cannot serialize {record_type}/{id} for indexing: {message}")]
    Serialization {
        record_type: String,
        id: i64,
        message: String,
    },

    /// Batch preparation failed.
    #[error("batch preparation failed for {record_type}: {message}")]
    Preparation {
        record_type: String,
        message: String,
    },
}

/// Errors raised while registering indexed types.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The type is not registered for indexing.
    #[error("record type {record_type} is not registered for indexing")]
    UnknownType { record_type: String },

    /// The type was registered twice.
    #[error("record type {record_type} registered more than once")]
    DuplicateType { record_type: String },

    /// Two types resolved to the same index name.
    #[error("index name {index} is shared by {first} and {second}")]
    IndexNameCollision {
        index: String,
        first: String,
        second: String,
    },
}

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// One or more settings are invalid.
    #[error("invalid configuration: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

/// Errors related to background reindex jobs.
#[derive(Error, Debug)]
pub enum ReindexError {
    /// The job id is unknown.
    #[error("reindex job not found: {job_id}")]
    JobNotFound { job_id: String },
}

/// Result type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type alias for primary store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Internal {
            store_name: "serde_json".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Internal {
            store_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Internal {
            store_name: "sqlite".to_string(),
            message: format!("connection pool: {}", err),
            source: None,
        }
    }
}

#[cfg(feature = "elasticsearch")]
impl From<elasticsearch::Error> for TransportError {
    fn from(err: elasticsearch::Error) -> Self {
        TransportError::Unavailable {
            engine: "elasticsearch".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Rejected {
            index: "test_observations".to_string(),
            status: 400,
            body: "mapper_parsing_exception".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request to index test_observations rejected with status 400: mapper_parsing_exception"
        );
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound {
            record_type: "Observation".to_string(),
            id: 7,
        };
        assert_eq!(err.to_string(), "record not found: Observation/7");
    }

    #[test]
    fn test_config_error_joins_messages() {
        let err = ConfigError::Invalid {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "invalid configuration: a; b");
    }

    #[test]
    fn test_sync_error_from_variants() {
        let err: SyncError = RegistrationError::UnknownType {
            record_type: "Place".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Registration(_)));

        let err: SyncError = TransportError::Unavailable {
            engine: "memory".to_string(),
            message: "down".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Transport(_)));
    }
}
