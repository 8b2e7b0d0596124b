//! Configuration for the synchronization layer.
//!
//! # Example
//!
//! ```
//! use search_sync::SyncConfig;
//!
//! let config = SyncConfig {
//!     environment: "test".to_string(),
//!     synchronous_consistency: true,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings shared by the propagator, the reindexer and the query facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deployment environment, used as the index name prefix (default: `"development"`).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Force an index refresh after every write (default: false).
    ///
    /// Lets verification code read its own writes. Adds an engine round-trip
    /// per write, so it stays off in the serving path.
    #[serde(default)]
    pub synchronous_consistency: bool,

    /// Records per bulk request during a reindex (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Page size used when a paginate call does not ask for one (default: 20).
    #[serde(default = "default_per_page")]
    pub default_per_page: u64,

    /// Upper bound for a requested page size (default: 1000).
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u64,

    /// Trace lines kept when logging a failure (default: 30).
    #[serde(default = "default_max_trace_frames")]
    pub max_trace_frames: usize,

    /// Directory scanned once at startup for `{type}_index.json` descriptors.
    #[serde(default)]
    pub descriptor_dir: Option<PathBuf>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_per_page() -> u64 {
    20
}

fn default_max_per_page() -> u64 {
    1000
}

fn default_max_trace_frames() -> usize {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            synchronous_consistency: false,
            batch_size: default_batch_size(),
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
            max_trace_frames: default_max_trace_frames(),
            descriptor_dir: None,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration for the given environment with default settings.
    pub fn for_environment(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Enables or disables read-after-write refreshes.
    pub fn with_synchronous_consistency(mut self, enabled: bool) -> Self {
        self.synchronous_consistency = enabled;
        self
    }

    /// Sets the default reindex batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the descriptor directory.
    pub fn with_descriptor_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.descriptor_dir = Some(dir.into());
        self
    }

    /// Validates the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.environment.trim().is_empty() {
            errors.push("environment cannot be empty".to_string());
        }

        if self.batch_size == 0 {
            errors.push("batch size cannot be 0".to_string());
        }

        if self.default_per_page == 0 {
            errors.push("default page size cannot be 0".to_string());
        }

        if self.default_per_page > self.max_per_page {
            errors.push("default page size cannot exceed max page size".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.environment, "development");
        assert!(!config.synchronous_consistency);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.default_per_page, 20);
        assert_eq!(config.max_trace_frames, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"environment": "test", "synchronous_consistency": true}"#)
                .unwrap();
        assert_eq!(config.environment, "test");
        assert!(config.synchronous_consistency);
        assert_eq!(config.batch_size, 1000);
        assert!(config.descriptor_dir.is_none());
    }

    #[test]
    fn test_config_validation_collects_errors() {
        let config = SyncConfig {
            environment: " ".to_string(),
            batch_size: 0,
            default_per_page: 50,
            max_per_page: 10,
            ..Default::default()
        };

        match config.validate() {
            Err(ConfigError::Invalid { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }
}
