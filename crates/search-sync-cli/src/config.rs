//! Command-line configuration for the `search-sync` tool.
//!
//! Every global option can also be set through the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SEARCH_SYNC_ENVIRONMENT` | development | Index name prefix |
//! | `SEARCH_SYNC_DATABASE` | search_sync.db | SQLite primary store path |
//! | `SEARCH_SYNC_ELASTICSEARCH_NODES` | http://localhost:9200 | Comma-separated node URLs |
//! | `SEARCH_SYNC_ELASTICSEARCH_USERNAME` | | Basic auth username |
//! | `SEARCH_SYNC_ELASTICSEARCH_PASSWORD` | | Basic auth password |
//! | `SEARCH_SYNC_REQUEST_TIMEOUT_MS` | 30000 | Engine request timeout |
//! | `SEARCH_SYNC_DESCRIPTOR_DIR` | | Directory holding `{type}_index.json` descriptors |
//! | `SEARCH_SYNC_TYPES` | | Comma-separated indexed record types |
//! | `SEARCH_SYNC_BATCH_SIZE` | 1000 | Reindex batch size |
//! | `SEARCH_SYNC_DEFAULT_PER_PAGE` | 20 | Search page size |
//! | `SEARCH_SYNC_SYNCHRONOUS_CONSISTENCY` | false | Refresh after every write |
//! | `SEARCH_SYNC_LOG_LEVEL` | info | Log level |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use search_sync::SyncConfig;
use search_sync::client::{ElasticsearchAuth, ElasticsearchConfig};
use search_sync::types::{RecordId, RecordScope};

/// Administrative tool for search indices backed by a SQLite primary store.
#[derive(Debug, Clone, Parser)]
#[command(name = "search-sync")]
#[command(about = "Rebuild and query search indices")]
pub struct CliConfig {
    /// Deployment environment, used as the index name prefix.
    #[arg(long, env = "SEARCH_SYNC_ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// Path to the SQLite primary store.
    #[arg(long, env = "SEARCH_SYNC_DATABASE", default_value = "search_sync.db")]
    pub database: String,

    /// Elasticsearch node URLs (comma-separated).
    #[arg(
        long,
        env = "SEARCH_SYNC_ELASTICSEARCH_NODES",
        default_value = "http://localhost:9200"
    )]
    pub elasticsearch_nodes: String,

    /// Elasticsearch username for basic auth.
    #[arg(long, env = "SEARCH_SYNC_ELASTICSEARCH_USERNAME")]
    pub elasticsearch_username: Option<String>,

    /// Elasticsearch password for basic auth.
    #[arg(long, env = "SEARCH_SYNC_ELASTICSEARCH_PASSWORD")]
    pub elasticsearch_password: Option<String>,

    /// Engine request timeout in milliseconds.
    #[arg(long, env = "SEARCH_SYNC_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Directory holding `{type}_index.json` descriptors.
    #[arg(long, env = "SEARCH_SYNC_DESCRIPTOR_DIR")]
    pub descriptor_dir: Option<PathBuf>,

    /// Indexed record types (comma-separated).
    #[arg(long, env = "SEARCH_SYNC_TYPES", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Records per bulk request during a reindex.
    #[arg(long, env = "SEARCH_SYNC_BATCH_SIZE", default_value = "1000")]
    pub batch_size: usize,

    /// Search page size when `--per-page` is not given.
    #[arg(long, env = "SEARCH_SYNC_DEFAULT_PER_PAGE", default_value = "20")]
    pub default_per_page: u64,

    /// Refresh the index after every write.
    #[arg(long, env = "SEARCH_SYNC_SYNCHRONOUS_CONSISTENCY", default_value = "false")]
    pub synchronous_consistency: bool,

    /// Log level (RUST_LOG overrides).
    #[arg(long, env = "SEARCH_SYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the index of every indexed type that does not exist yet.
    CreateIndices,

    /// Rebuild a type's documents from the primary store.
    Reindex {
        /// Record type to rebuild.
        #[arg(long = "type")]
        record_type: String,

        /// Only these ids (comma-separated).
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["from_id", "to_id"])]
        ids: Vec<i64>,

        /// Smallest id to rebuild (inclusive).
        #[arg(long)]
        from_id: Option<i64>,

        /// Largest id to rebuild (inclusive).
        #[arg(long)]
        to_id: Option<i64>,

        /// Records per batch (defaults to the global batch size).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Refresh the index once the run completes.
        #[arg(long)]
        verify: bool,
    },

    /// Run a paginated search against a type's index.
    Search {
        /// Record type to search.
        #[arg(long = "type")]
        record_type: String,

        /// Full-text query.
        #[arg(long)]
        query: Option<String>,

        /// Field the full-text query matches against.
        #[arg(long, default_value = "description")]
        field: String,

        /// Page number.
        #[arg(long, default_value = "1")]
        page: u64,

        /// Page size.
        #[arg(long)]
        per_page: Option<u64>,

        /// Source fields to return (comma-separated, ids only when empty).
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
}

impl CliConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.elasticsearch_nodes().is_empty() {
            errors.push("At least one Elasticsearch node is required".to_string());
        }

        if self.elasticsearch_username.is_some() != self.elasticsearch_password.is_some() {
            errors.push("Elasticsearch username and password must be set together".to_string());
        }

        if self.request_timeout_ms == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if let Command::Reindex {
            from_id: Some(from),
            to_id: Some(to),
            ..
        } = &self.command
            && from > to
        {
            errors.push(format!("--from-id {} is greater than --to-id {}", from, to));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The configured Elasticsearch nodes.
    pub fn elasticsearch_nodes(&self) -> Vec<String> {
        self.elasticsearch_nodes
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Settings for the sync layer.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            environment: self.environment.clone(),
            synchronous_consistency: self.synchronous_consistency,
            batch_size: self.batch_size,
            default_per_page: self.default_per_page,
            descriptor_dir: self.descriptor_dir.clone(),
            ..Default::default()
        }
    }

    /// Settings for the Elasticsearch transport.
    pub fn elasticsearch_config(&self) -> ElasticsearchConfig {
        let auth = match (&self.elasticsearch_username, &self.elasticsearch_password) {
            (Some(username), Some(password)) => Some(ElasticsearchAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        ElasticsearchConfig {
            nodes: self.elasticsearch_nodes(),
            auth,
            ..Default::default()
        }
        .with_request_timeout_ms(self.request_timeout_ms)
    }

    /// Record types to register: `--types` plus the type the command targets.
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .types
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let target = match &self.command {
            Command::Reindex { record_type, .. } | Command::Search { record_type, .. } => {
                Some(record_type)
            }
            Command::CreateIndices => None,
        };
        if let Some(target) = target
            && !types.contains(target)
        {
            types.push(target.clone());
        }
        types
    }
}

/// Builds the reindex scope from the id options.
pub fn reindex_scope(ids: &[i64], from_id: Option<i64>, to_id: Option<i64>) -> RecordScope {
    if !ids.is_empty() {
        return RecordScope::ids(ids.iter().copied());
    }
    match (from_id, to_id) {
        (None, None) => RecordScope::All,
        (start, end) => RecordScope::id_range(start.map(RecordId::new), end.map(RecordId::new)),
    }
}
