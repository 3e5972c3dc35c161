use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use catalog_sync::artifact::ArtifactWriter;
use catalog_sync::config::{self, Config, Importer};
use catalog_sync::db;
use catalog_sync::import::{CatalogImporter, CommandImporter, SqliteCatalogImporter};
use catalog_sync::model::PurchaseEvent;
use catalog_sync::remote::RemoteCatalogClient;
use catalog_sync::worker::SyncWorker;
use catalog_sync::{PurchaseRelay, RelayOutcome, SyncOrchestrator, SyncOutcome};

#[derive(Debug, Parser)]
#[command(author, version, about = "Synchronise the local catalog with the marketplace feed")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one full catalog sync and exit
    Sync,
    /// Relay a completed order (JSON file) to the marketplace, then run the resulting resync
    Relay {
        /// Path to a JSON-encoded purchase event
        #[arg(long)]
        event: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let api = Arc::new(RemoteCatalogClient::new(&cfg.remote_config())?);
    let importer = build_importer(&cfg).await?;
    let orchestrator = Arc::new(
        SyncOrchestrator::new(api.clone(), ArtifactWriter::new(&cfg.app.artifact_dir), importer)
            .with_retry(cfg.retry_policy()),
    );

    match args.command {
        Command::Sync => match orchestrator.run_sync().await? {
            SyncOutcome::Imported { run_id, pages, rows, .. } => {
                info!(%run_id, pages, rows, "sync finished");
            }
            SyncOutcome::NoOp { run_id, pages } => {
                info!(%run_id, pages, "sync finished without changes");
            }
        },
        Command::Relay { event } => {
            let raw = tokio::fs::read_to_string(&event)
                .await
                .with_context(|| format!("failed to read {}", event.display()))?;
            let event: PurchaseEvent =
                serde_json::from_str(&raw).context("invalid purchase event JSON")?;

            let (worker, handle) = SyncWorker::new(orchestrator, cfg.sync_debounce());
            let worker = worker.spawn();
            let relay = Arc::new(PurchaseRelay::new(api, Arc::new(handle)));

            match relay.dispatch(event).await {
                Ok(RelayOutcome::Delivered { order_id, .. }) => {
                    info!(%order_id, "purchase delivered; waiting for resync");
                }
                Ok(RelayOutcome::Failed { order_id, error }) => {
                    error!(%order_id, ?error, "purchase was not delivered");
                }
                Err(err) => error!(?err, "relay task aborted"),
            }
            // The relay (and with it the last handle) is gone; the worker drains and stops.
            worker.await.context("sync worker panicked")?;
        }
    }

    Ok(())
}

async fn build_importer(cfg: &Config) -> Result<Arc<dyn CatalogImporter>> {
    Ok(match &cfg.importer {
        Importer::Sqlite { database_url } => {
            let database_url =
                std::env::var("DATABASE_URL").unwrap_or_else(|_| database_url.clone());
            let pool = db::init_pool(&database_url).await?;
            db::run_migrations(&pool).await?;
            Arc::new(SqliteCatalogImporter::new(pool))
        }
        Importer::Command { program, args } => {
            Arc::new(CommandImporter::new(program.clone(), args.clone()))
        }
    })
}
