//! Document Adapter contract and per-type registration.
//!
//! Every indexed type supplies a [`DocumentAdapter`] that turns a record into
//! its document body. Two optional hooks reduce primary-store round-trips
//! during bulk work:
//!
//! - [`AssociationPreload`] augments the retrieval query so each batch
//!   arrives with its associations already fetched.
//! - [`BatchPreparation`] runs once per batch before serialization, e.g. to
//!   warm a cache shared by every record in the batch.
//!
//! Hooks are declared when the type is registered through [`IndexedType`];
//! nothing is probed at call time. A type without hooks is still indexable.
//!
//! # Example
//!
//! ```
//! use search_sync::adapter::{IncludeAssociations, IndexedType, DefaultDocumentAdapter};
//!
//! let observations = IndexedType::new("Observation", DefaultDocumentAdapter)
//!     .with_association_preload(IncludeAssociations::new(["photos"]));
//! assert!(observations.association_preload().is_some());
//! assert!(observations.batch_preparation().is_none());
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::AdapterError;
use crate::types::{Document, Record, RecordQuery};

/// Produces the document body for a record.
pub trait DocumentAdapter: Send + Sync {
    /// Serializes a record into its index document body.
    fn as_index_document(&self, record: &Record) -> Result<Value, AdapterError>;
}

impl<F> DocumentAdapter for F
where
    F: Fn(&Record) -> Result<Value, AdapterError> + Send + Sync,
{
    fn as_index_document(&self, record: &Record) -> Result<Value, AdapterError> {
        self(record)
    }
}

/// Augments a retrieval query with the associations serialization needs.
pub trait AssociationPreload: Send + Sync {
    /// Returns the query with associations to pre-fetch added.
    fn load_associations_for_index(&self, query: RecordQuery) -> RecordQuery;
}

impl<F> AssociationPreload for F
where
    F: Fn(RecordQuery) -> RecordQuery + Send + Sync,
{
    fn load_associations_for_index(&self, query: RecordQuery) -> RecordQuery {
        self(query)
    }
}

/// Bulk precomputation over a batch about to be serialized.
pub trait BatchPreparation: Send + Sync {
    /// Prepares the batch in place.
    fn prepare_batch_for_index(&self, batch: &mut [Record]) -> Result<(), AdapterError>;
}

impl<F> BatchPreparation for F
where
    F: Fn(&mut [Record]) -> Result<(), AdapterError> + Send + Sync,
{
    fn prepare_batch_for_index(&self, batch: &mut [Record]) -> Result<(), AdapterError> {
        self(batch)
    }
}

/// Preload hook that includes a fixed list of associations.
#[derive(Debug, Clone)]
pub struct IncludeAssociations {
    associations: Vec<String>,
}

impl IncludeAssociations {
    /// Includes the named associations.
    pub fn new<I, S>(associations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            associations: associations.into_iter().map(Into::into).collect(),
        }
    }
}

impl AssociationPreload for IncludeAssociations {
    fn load_associations_for_index(&self, query: RecordQuery) -> RecordQuery {
        self.associations
            .iter()
            .fold(query, |query, name| query.include(name.clone()))
    }
}

/// Default document shape: the record's attributes and `id`, with every
/// loaded association embedded as an array of the same shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDocumentAdapter;

impl DocumentAdapter for DefaultDocumentAdapter {
    fn as_index_document(&self, record: &Record) -> Result<Value, AdapterError> {
        Ok(default_document(record))
    }
}

fn default_document(record: &Record) -> Value {
    let mut body = match record.to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (name, children) in record.associations() {
        body.insert(
            name.clone(),
            Value::Array(children.iter().map(default_document).collect()),
        );
    }
    Value::Object(body)
}

/// Registration of one indexed record type.
#[derive(Clone)]
pub struct IndexedType {
    record_type: String,
    collection: Option<String>,
    adapter: Arc<dyn DocumentAdapter>,
    preload: Option<Arc<dyn AssociationPreload>>,
    preparation: Option<Arc<dyn BatchPreparation>>,
}

impl fmt::Debug for IndexedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedType")
            .field("record_type", &self.record_type)
            .field("collection", &self.collection)
            .field("has_preload", &self.preload.is_some())
            .field("has_preparation", &self.preparation.is_some())
            .finish_non_exhaustive()
    }
}

impl IndexedType {
    /// Registers a type with its document adapter.
    pub fn new(record_type: impl Into<String>, adapter: impl DocumentAdapter + 'static) -> Self {
        Self::with_shared_adapter(record_type, Arc::new(adapter))
    }

    /// Registers a type with an adapter shared with other registrations.
    pub fn with_shared_adapter(
        record_type: impl Into<String>,
        adapter: Arc<dyn DocumentAdapter>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            collection: None,
            adapter,
            preload: None,
            preparation: None,
        }
    }

    /// Declares the association-preload hook.
    pub fn with_association_preload(mut self, preload: impl AssociationPreload + 'static) -> Self {
        self.preload = Some(Arc::new(preload));
        self
    }

    /// Declares the batch-preparation hook.
    pub fn with_batch_preparation(mut self, preparation: impl BatchPreparation + 'static) -> Self {
        self.preparation = Some(Arc::new(preparation));
        self
    }

    /// Overrides the derived collection name.
    pub fn with_collection_name(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// The record type.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// The explicit collection name, if one was set.
    pub fn collection_override(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// The association-preload hook, if declared.
    pub fn association_preload(&self) -> Option<&dyn AssociationPreload> {
        self.preload.as_deref()
    }

    /// The batch-preparation hook, if declared.
    pub fn batch_preparation(&self) -> Option<&dyn BatchPreparation> {
        self.preparation.as_deref()
    }

    /// The query used to materialize records of this type for indexing.
    pub fn load_query(&self, query: RecordQuery) -> RecordQuery {
        match self.association_preload() {
            Some(preload) => preload.load_associations_for_index(query),
            None => query,
        }
    }

    /// Serializes a record into a document keyed by its id.
    pub fn to_document(&self, record: &Record) -> Result<Document, AdapterError> {
        let body = self.adapter.as_index_document(record)?;
        Ok(Document::new(record.id(), body))
    }

    /// Runs batch preparation (if declared) and serializes every record.
    pub fn to_documents(&self, batch: &mut [Record]) -> Result<Vec<Document>, AdapterError> {
        if let Some(preparation) = self.batch_preparation() {
            preparation.prepare_batch_for_index(batch)?;
        }
        batch.iter().map(|record| self.to_document(record)).collect()
    }
}
