//! Descriptor Registry and index bindings.
//!
//! The [`DescriptorRegistry`] resolves the optional [`IndexDescriptor`] of
//! each record type. It is populated once at startup from an explicit list of
//! [`DescriptorBinding`]s, or by checking the fixed location
//! `{dir}/{snake_type}_index.json` for each known type. A type without a
//! descriptor uses the engine's defaults. A descriptor that fails to load
//! aborts initialization.
//!
//! [`TypeRegistry`] joins the registered document adapters with their index
//! names and descriptors.

mod bindings;
mod descriptor;
pub mod naming;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub use bindings::{IndexBinding, TypeRegistry};
pub use descriptor::{DescriptorBinding, DescriptorSource, IndexDescriptor};

use crate::error::DescriptorError;

/// Read-only map from record type to index descriptor.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, Arc<IndexDescriptor>>,
}

impl DescriptorRegistry {
    /// Creates an empty registry (every type uses defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every binding. Any failure is returned and nothing is registered.
    pub fn load<I>(bindings: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = DescriptorBinding>,
    {
        let mut descriptors = HashMap::new();

        for binding in bindings {
            if descriptors.contains_key(&binding.record_type) {
                return Err(DescriptorError::Duplicate {
                    record_type: binding.record_type,
                });
            }
            let descriptor = binding.load()?;
            descriptors.insert(binding.record_type, Arc::new(descriptor));
        }

        tracing::debug!(descriptors = descriptors.len(), "Descriptor registry loaded");

        Ok(Self { descriptors })
    }

    /// Builds bindings for every type whose `{snake_type}_index.json` exists
    /// in `dir`, then loads them.
    pub fn discover<I, S>(dir: &Path, record_types: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bindings: Vec<DescriptorBinding> = record_types
            .into_iter()
            .filter_map(|record_type| {
                let record_type = record_type.as_ref();
                let path = Self::descriptor_path(dir, record_type);
                path.is_file()
                    .then(|| DescriptorBinding::file(record_type, path))
            })
            .collect();

        Self::load(bindings)
    }

    /// The fixed location of a type's descriptor under `dir`.
    pub fn descriptor_path(dir: &Path, record_type: &str) -> std::path::PathBuf {
        dir.join(format!("{}_index.json", naming::snake_case(record_type)))
    }

    /// Returns the descriptor for a type, if one was registered.
    pub fn lookup(&self, record_type: &str) -> Option<&Arc<IndexDescriptor>> {
        self.descriptors.get(record_type)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no descriptors are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_missing_is_none() {
        let registry = DescriptorRegistry::new();
        assert!(registry.lookup("Observation").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_inline() {
        let registry = DescriptorRegistry::load([DescriptorBinding::inline(
            "Observation",
            json!({"settings": {"number_of_shards": 2}}),
        )])
        .unwrap();

        assert_eq!(registry.len(), 1);
        let descriptor = registry.lookup("Observation").unwrap();
        assert_eq!(
            descriptor.settings.as_ref().unwrap()["number_of_shards"],
            json!(2)
        );
    }

    #[test]
    fn test_load_duplicate_fails() {
        let result = DescriptorRegistry::load([
            DescriptorBinding::inline("Observation", json!({})),
            DescriptorBinding::inline("Observation", json!({})),
        ]);
        assert!(matches!(result, Err(DescriptorError::Duplicate { .. })));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = DescriptorRegistry::load([DescriptorBinding::file(
            "Observation",
            "/nonexistent/observation_index.json",
        )]);
        assert!(matches!(result, Err(DescriptorError::Unreadable { .. })));
    }

    #[test]
    fn test_descriptor_path() {
        let path = DescriptorRegistry::descriptor_path(Path::new("/etc/indices"), "ObservationPhoto");
        assert_eq!(path, Path::new("/etc/indices/observation_photo_index.json"));
    }
}
