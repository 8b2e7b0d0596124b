//! Index descriptors: per-type settings and mappings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::DescriptorError;

/// Optional index configuration for one record type.
///
/// Loaded once at startup and immutable afterwards. A descriptor file is a
/// JSON object with optional `settings` and `mappings` objects:
///
/// ```json
/// {
///   "settings": { "number_of_shards": 1 },
///   "mappings": { "properties": { "description": { "type": "text" } } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct IndexDescriptor {
    /// Index settings (shards, analyzers, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,

    /// Field mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Map<String, Value>>,
}

impl IndexDescriptor {
    /// Creates a descriptor with only mappings.
    pub fn with_mappings(mappings: Map<String, Value>) -> Self {
        Self {
            settings: None,
            mappings: Some(mappings),
        }
    }

    /// Parses a descriptor from a JSON value.
    pub fn from_value(record_type: &str, origin: &str, value: Value) -> Result<Self, DescriptorError> {
        serde_json::from_value(value).map_err(|e| DescriptorError::Malformed {
            record_type: record_type.to_string(),
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Reads and parses a descriptor file.
    pub fn from_file(record_type: &str, path: &Path) -> Result<Self, DescriptorError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| DescriptorError::Unreadable {
                record_type: record_type.to_string(),
                path: path.display().to_string(),
                source,
            })?;

        let value: Value =
            serde_json::from_str(&content).map_err(|e| DescriptorError::Malformed {
                record_type: record_type.to_string(),
                path: path.display().to_string(),
                message: format!("invalid JSON: {}", e),
            })?;

        Self::from_value(record_type, &path.display().to_string(), value)
    }

    /// Body of an index-creation request for this descriptor.
    pub fn create_index_body(&self) -> Value {
        let mut body = Map::new();
        if let Some(settings) = &self.settings {
            body.insert("settings".to_string(), Value::Object(settings.clone()));
        }
        if let Some(mappings) = &self.mappings {
            body.insert("mappings".to_string(), Value::Object(mappings.clone()));
        }
        if body.is_empty() {
            json!({})
        } else {
            Value::Object(body)
        }
    }
}

/// Where a type's descriptor comes from.
#[derive(Debug, Clone)]
pub enum DescriptorSource {
    /// A JSON file on disk.
    File(PathBuf),
    /// A descriptor given in code.
    Inline(Value),
}

/// Binds a record type to its descriptor source.
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    /// Record type.
    pub record_type: String,
    /// Descriptor source.
    pub source: DescriptorSource,
}

impl DescriptorBinding {
    /// Binds a type to a descriptor file.
    pub fn file(record_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            record_type: record_type.into(),
            source: DescriptorSource::File(path.into()),
        }
    }

    /// Binds a type to an inline descriptor.
    pub fn inline(record_type: impl Into<String>, descriptor: Value) -> Self {
        Self {
            record_type: record_type.into(),
            source: DescriptorSource::Inline(descriptor),
        }
    }

    /// Loads the bound descriptor.
    pub fn load(&self) -> Result<IndexDescriptor, DescriptorError> {
        match &self.source {
            DescriptorSource::File(path) => IndexDescriptor::from_file(&self.record_type, path),
            DescriptorSource::Inline(value) => {
                IndexDescriptor::from_value(&self.record_type, "<inline>", value.clone())
            }
        }
    }
}
