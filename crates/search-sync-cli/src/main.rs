//! Search Sync administrative tool.
//!
//! Rebuilds Elasticsearch indices from a SQLite primary store, creates
//! indices from descriptors and runs paginated searches.

mod config;

use std::sync::Arc;

use clap::Parser;
use search_sync::SearchSync;
use search_sync::adapter::{DefaultDocumentAdapter, IndexedType};
use search_sync::client::{ElasticsearchIndexClient, SearchQuery};
use search_sync::query::PaginateOptions;
use search_sync::reindex::{ReindexRequest, ReindexStatus};
use search_sync::store::SqliteRecordStore;
use tracing::info;

use crate::config::{CliConfig, Command, reindex_scope};

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("search_sync={},search_sync_cli={}", level, level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Opens the primary store and the engine, and registers every type.
fn connect(config: &CliConfig) -> anyhow::Result<Arc<SearchSync>> {
    info!(database = %config.database, "Opening SQLite primary store");
    let store = Arc::new(SqliteRecordStore::open(&config.database)?);

    let es_config = config.elasticsearch_config();
    info!(nodes = ?es_config.nodes, "Connecting to Elasticsearch");
    let client = Arc::new(ElasticsearchIndexClient::new(es_config)?);

    let sync = config
        .record_types()
        .into_iter()
        .fold(
            SearchSync::builder(config.sync_config(), client, store),
            |builder, record_type| {
                builder.register(IndexedType::new(record_type, DefaultDocumentAdapter))
            },
        )
        .build()?;

    Ok(sync)
}

async fn create_indices(sync: &SearchSync) -> anyhow::Result<()> {
    if sync.registry().is_empty() {
        anyhow::bail!("No record types given; pass --types or set SEARCH_SYNC_TYPES");
    }

    let created = sync.create_indices().await?;
    for binding in sync.registry().iter() {
        let status = if created.iter().any(|name| name == binding.index_name()) {
            "created"
        } else {
            "exists"
        };
        println!("{}\t{}", binding.index_name(), status);
    }
    Ok(())
}

/// Runs the reindex as a job so Ctrl-C stops it between batches.
async fn reindex(sync: &SearchSync, request: ReindexRequest) -> anyhow::Result<()> {
    info!(
        record_type = %request.record_type,
        batch_size = request.options.batch_size,
        "Starting reindex"
    );

    let job_id = sync.jobs().start(request).await?;
    let jobs = sync.jobs();

    let progress = tokio::select! {
        progress = jobs.wait(&job_id) => progress?,
        _ = tokio::signal::ctrl_c() => {
            info!(job_id = %job_id, "Interrupted, stopping after the current batch");
            jobs.cancel(&job_id).await?;
            jobs.wait(&job_id).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&progress)?);

    match progress.status {
        ReindexStatus::Failed => anyhow::bail!(
            "Reindex failed: {}",
            progress.error_message.as_deref().unwrap_or("unknown error")
        ),
        _ if !progress.failed_batches.is_empty() => anyhow::bail!(
            "{} batch(es) failed; rerun with --from-id/--to-id for the listed ranges",
            progress.failed_batches.len()
        ),
        _ => Ok(()),
    }
}

async fn search(sync: &SearchSync, record_type: &str, options: PaginateOptions) -> anyhow::Result<()> {
    let page = sync.paginate(record_type, options).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let sync = connect(&config)?;

    match config.command.clone() {
        Command::CreateIndices => create_indices(&sync).await,
        Command::Reindex {
            record_type,
            ids,
            from_id,
            to_id,
            batch_size,
            verify,
        } => {
            let mut options = sync.reindex_options();
            if let Some(batch_size) = batch_size {
                options = options.with_batch_size(batch_size);
            }
            if verify {
                options = options.verify();
            }
            let request = ReindexRequest::new(record_type)
                .with_scope(reindex_scope(&ids, from_id, to_id))
                .with_options(options);
            reindex(&sync, request).await
        }
        Command::Search {
            record_type,
            query,
            field,
            page,
            per_page,
            fields,
        } => {
            let mut search_query = SearchQuery::match_all();
            if let Some(text) = query {
                search_query = search_query.with_text(field, text);
            }
            let mut options = PaginateOptions::new().with_query(search_query).page(page);
            if let Some(per_page) = per_page {
                options = options.per_page(per_page);
            }
            if !fields.is_empty() {
                options = options.fields(fields);
            }
            search(&sync, &record_type, options).await
        }
    }
}
