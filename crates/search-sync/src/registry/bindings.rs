//! Registered types resolved to their index names and descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::IndexedType;
use crate::error::RegistrationError;

use super::DescriptorRegistry;
use super::descriptor::IndexDescriptor;
use super::naming;

/// One registered type, bound to its index.
#[derive(Debug, Clone)]
pub struct IndexBinding {
    indexed: IndexedType,
    index_name: String,
    descriptor: Option<Arc<IndexDescriptor>>,
}

impl IndexBinding {
    /// The type registration.
    pub fn indexed(&self) -> &IndexedType {
        &self.indexed
    }

    /// The record type.
    pub fn record_type(&self) -> &str {
        self.indexed.record_type()
    }

    /// The index name (`{environment}_{collection}`).
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// The type's descriptor, if it has one.
    pub fn descriptor(&self) -> Option<&IndexDescriptor> {
        self.descriptor.as_deref()
    }
}

/// Every indexed type, keyed by record type. Fixed after construction.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    bindings: HashMap<String, Arc<IndexBinding>>,
    order: Vec<String>,
}

impl TypeRegistry {
    /// Resolves registrations against the descriptors for an environment.
    pub fn build(
        environment: &str,
        types: Vec<IndexedType>,
        descriptors: &DescriptorRegistry,
    ) -> Result<Self, RegistrationError> {
        let mut bindings: HashMap<String, Arc<IndexBinding>> = HashMap::new();
        let mut by_index: HashMap<String, String> = HashMap::new();
        let mut order = Vec::with_capacity(types.len());

        for indexed in types {
            let record_type = indexed.record_type().to_string();
            if bindings.contains_key(&record_type) {
                return Err(RegistrationError::DuplicateType { record_type });
            }

            let collection = indexed
                .collection_override()
                .map(str::to_string)
                .unwrap_or_else(|| naming::collection_name(&record_type));
            let index_name = naming::index_name(environment, &collection);

            if let Some(first) = by_index.insert(index_name.clone(), record_type.clone()) {
                return Err(RegistrationError::IndexNameCollision {
                    index: index_name,
                    first,
                    second: record_type,
                });
            }

            let descriptor = descriptors.lookup(&record_type).cloned();
            if descriptor.is_none() {
                tracing::debug!(record_type = %record_type, "No index descriptor, using defaults");
            }

            order.push(record_type.clone());
            bindings.insert(
                record_type,
                Arc::new(IndexBinding {
                    indexed,
                    index_name,
                    descriptor,
                }),
            );
        }

        Ok(Self { bindings, order })
    }

    /// Returns the binding for a type, if registered.
    pub fn get(&self, record_type: &str) -> Option<&Arc<IndexBinding>> {
        self.bindings.get(record_type)
    }

    /// Returns the binding for a type or an `UnknownType` error.
    pub fn require(&self, record_type: &str) -> Result<&Arc<IndexBinding>, RegistrationError> {
        self.get(record_type)
            .ok_or_else(|| RegistrationError::UnknownType {
                record_type: record_type.to_string(),
            })
    }

    /// Bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexBinding>> {
        self.order.iter().filter_map(|t| self.bindings.get(t))
    }

    /// Registered record types in registration order.
    pub fn record_types(&self) -> &[String] {
        &self.order
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
