//! # index-sync CLI (`isync`)
//!
//! The `isync` binary drives the models declared in the configuration file
//! against the hosted search service.
//!
//! ## Usage
//!
//! ```bash
//! isync --config ./config/isync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `isync models` | List models and their resolved index names |
//! | `isync index-name --model M` | Print the resolved primary index name |
//! | `isync reindex` | Push every record, optionally through a temporary index |
//! | `isync clear` | Remove every object from the models' indexes |
//! | `isync push-settings` | Push declared settings unconditionally |
//! | `isync search "<query>" --model M` | Search a model's index |
//! | `isync facets <facet> "<text>" --model M` | Search facet values |
//! | `isync work` | Replay jobs spooled by enqueueing models |
//!
//! ## Examples
//!
//! ```bash
//! # Zero-downtime rebuild of one model, waiting for completion
//! isync reindex --model Contact --temp-index --sync
//!
//! # Second page of results from a replica
//! isync search "jobs" --model Contact --index Contact_by_name --page 2
//! ```
//!
//! Logs go to stderr, filtered by `ISYNC_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use index_sync::config;
use index_sync::http_client::HttpSearchClient;
use index_sync::models::{load_fleet, Fleet};
use index_sync::progress::ProgressMode;
use index_sync::spool;
use index_sync_core::catalog::{ManagedModel, ModelCatalog};
use index_sync_core::models::SearchParams;
use index_sync_core::reindex::ReindexOptions;

/// index-sync CLI: keep a hosted search index in sync with your records.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "isync",
    about = "index-sync: keep a hosted search index in sync with your records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/isync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List configured models and the resolved names of their indexes.
    Models,

    /// Print the resolved primary index name of a model.
    IndexName {
        #[arg(long)]
        model: String,
    },

    /// Reindex every record of one model, or of all models.
    ///
    /// Records failing a model's conditions are removed from the index.
    /// With `--temp-index` the model is rebuilt into `<index>.tmp` and
    /// swapped in with a single move, so searches never see a partial index.
    Reindex {
        #[arg(long)]
        model: Option<String>,

        /// Records per batch (defaults to `indexing.batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Wait until the last write of each index is applied.
        #[arg(long)]
        sync: bool,

        /// Rebuild through a temporary index.
        #[arg(long)]
        temp_index: bool,

        /// With `--temp-index`, copy settings, synonyms and rules from the
        /// live index instead of pushing the declared settings.
        #[arg(long, requires = "temp_index")]
        copy_settings: bool,

        /// Progress output on stderr (defaults to human on a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Remove every object from the model's indexes (settings are kept).
    Clear {
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        sync: bool,
    },

    /// Push declared settings to every index, changed or not.
    PushSettings {
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        sync: bool,
    },

    /// Search a model's index and print the page as JSON.
    Search {
        /// Query text.
        query: String,

        #[arg(long)]
        model: String,

        /// Search a secondary index of the model instead of the primary.
        #[arg(long)]
        index: Option<String>,

        /// Page number, starting at 1.
        #[arg(long, default_value = "1")]
        page: u64,

        #[arg(long)]
        hits_per_page: Option<u64>,
    },

    /// Search the values of a facet.
    Facets {
        facet: String,

        text: String,

        #[arg(long)]
        model: String,

        #[arg(long)]
        index: Option<String>,
    },

    /// Replay every job waiting in the spool.
    Work,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ISYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;
    let client = Arc::new(HttpSearchClient::new(&cfg.remote)?);
    let fleet = load_fleet(&cfg, client)?;

    match cli.command {
        Commands::Models => {
            for model in fleet.catalog.iter() {
                println!("{}\t{}", model.model_name(), model.index_names().join(", "));
            }
        }
        Commands::IndexName { model } => {
            println!("{}", fleet.catalog.get(&model)?.index_name());
        }
        Commands::Reindex {
            model,
            batch_size,
            sync,
            temp_index,
            copy_settings,
            progress,
        } => {
            let options = ReindexOptions {
                batch_size: batch_size.unwrap_or(cfg.indexing.batch_size),
                synchronous: sync,
                use_temp_index: temp_index,
                copy_from_primary: copy_settings,
            };
            let observer = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .observer();
            let mut aborted = Vec::new();
            for m in selected(&fleet.catalog, model.as_deref())? {
                let report = m.reindex(&options, Some(&observer)).await?;
                println!(
                    "{}\tindexes={} batches={} indexed={} removed={}",
                    m.model_name(),
                    report.indexes,
                    report.batches,
                    report.indexed,
                    report.removed
                );
                aborted.extend(report.aborted);
            }
            if !aborted.is_empty() {
                anyhow::bail!(
                    "rebuild failed, live index kept for: {}",
                    aborted.join(", ")
                );
            }
        }
        Commands::Clear { model, sync } => {
            for m in selected(&fleet.catalog, model.as_deref())? {
                m.clear_index(sync).await?;
                println!("cleared {}", m.index_name());
            }
        }
        Commands::PushSettings { model, sync } => {
            for m in selected(&fleet.catalog, model.as_deref())? {
                m.push_settings(sync).await?;
                println!("pushed settings for {}", m.index_names().join(", "));
            }
        }
        Commands::Search {
            query,
            model,
            index,
            page,
            hits_per_page,
        } => {
            let mut params = SearchParams::new().page(page);
            if let Some(index) = index {
                params = params.index(index);
            }
            if let Some(n) = hits_per_page {
                params = params.hits_per_page(n);
            }
            let results = fleet.catalog.get(&model)?.search(&query, &params).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Facets {
            facet,
            text,
            model,
            index,
        } => {
            let mut params = SearchParams::new();
            if let Some(index) = index {
                params = params.index(index);
            }
            let hits = fleet
                .catalog
                .get(&model)?
                .search_for_facet_values(&facet, &text, &params)
                .await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Work => run_work(&fleet).await?,
    }

    Ok(())
}

fn selected<'a>(
    catalog: &'a ModelCatalog,
    model: Option<&str>,
) -> Result<Vec<&'a Arc<dyn ManagedModel>>> {
    match model {
        Some(name) => Ok(vec![catalog.get(name)?]),
        None => Ok(catalog.iter().collect()),
    }
}

async fn run_work(fleet: &Fleet) -> Result<()> {
    let spool = match &fleet.spool {
        Some(s) => s,
        None => anyhow::bail!("no [queue] spool is configured"),
    };
    let report = spool::work(&fleet.catalog, spool).await?;
    println!("performed={} failed={}", report.performed, report.failed);
    if report.failed > 0 {
        anyhow::bail!("{} job(s) failed and were requeued", report.failed);
    }
    Ok(())
}
