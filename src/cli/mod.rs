//! Command-line interface for datacrawl.
//!
//! This module contains the CLI parser and dispatches to the crawler,
//! the admin API server, and one-shot maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Settings;
use crate::crawl::Crawler;
use crate::models::parse_http_date;
use crate::monitor::Monitor;
use crate::notifier::Notifier;
use crate::repository::Db;
use crate::server::{self, AppState};

#[derive(Parser)]
#[command(name = "datacrawl")]
#[command(about = "Continuous crawler and CSV analyzer for open-data catalogs")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop
    Crawl {
        /// Stop after N iterations (0 = run forever)
        #[arg(short, long, default_value = "0")]
        iterations: u64,
    },

    /// Run the admin API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Force an immediate check of one resource
    Check {
        /// Resource UUID
        resource_id: Uuid,
        /// Re-analyze even when the content is unchanged
        #[arg(long)]
        force_analysis: bool,
    },

    /// Load resources into the catalog from a CSV export
    /// (dataset_id,resource_id,url[,harvest_modified_at])
    LoadCatalog {
        /// Path to the catalog CSV
        path: PathBuf,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Arc::new(Settings::load()?);
    let db = Db::open(&settings.database_path())?;
    let notifier = Arc::new(Notifier::from_settings(&settings)?);
    let monitor = Monitor::new();

    match cli.command {
        Commands::Crawl { iterations } => {
            let crawler = Crawler::new(db, settings.clone(), notifier, monitor)?;
            let iterations = (iterations > 0).then_some(iterations);
            let stop = crawler.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutting down after in-flight checks");
                    stop.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            });
            crawler.run(iterations).await
        }
        Commands::Serve { host, port } => {
            let state = AppState::new(db, settings.clone(), notifier, monitor)?;
            server::serve(state, &host, port).await
        }
        Commands::Check {
            resource_id,
            force_analysis,
        } => {
            let crawler = Crawler::new(db.clone(), settings.clone(), notifier, monitor)?;
            let resource = db
                .catalog()
                .get(&resource_id)?
                .ok_or_else(|| anyhow::anyhow!("resource {resource_id} not found"))?;
            let check = crawler.check_resource(&resource, force_analysis).await?;
            println!("{}", serde_json::to_string_pretty(&check)?);
            Ok(())
        }
        Commands::LoadCatalog { path } => load_catalog(&db, &path),
    }
}

/// Bootstrap the catalog from a CSV export. Known `(dataset_id,
/// resource_id)` pairs are left untouched.
fn load_catalog(db: &Db, path: &std::path::Path) -> anyhow::Result<()> {
    let catalog = db.catalog();
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let index_of = |name: &str| headers.iter().position(|h| h == name);
    let dataset_idx = index_of("dataset_id")
        .ok_or_else(|| anyhow::anyhow!("catalog CSV is missing a 'dataset_id' column"))?;
    let resource_idx = index_of("resource_id")
        .ok_or_else(|| anyhow::anyhow!("catalog CSV is missing a 'resource_id' column"))?;
    let url_idx = index_of("url")
        .ok_or_else(|| anyhow::anyhow!("catalog CSV is missing a 'url' column"))?;
    let harvest_idx = index_of("harvest_modified_at");

    let mut loaded = 0usize;
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let resource_id: Uuid = match record.get(resource_idx).unwrap_or("").parse() {
            Ok(id) => id,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let url = record.get(url_idx).unwrap_or("");
        if url::Url::parse(url).is_err() {
            skipped += 1;
            continue;
        }
        let harvest_modified_at = harvest_idx
            .and_then(|i| record.get(i))
            .and_then(parse_http_date);

        if catalog.insert_if_absent(
            record.get(dataset_idx).unwrap_or(""),
            &resource_id,
            url,
            harvest_modified_at,
        )? {
            loaded += 1;
        }
    }
    println!("loaded {loaded} resources ({skipped} skipped)");
    Ok(())
}
