use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catalog_storage::{PgProductStore, ProductQueryService};
use catalog_sync::{CatalogConfig, Scheduler, SyncOutcome};
use catalog_web::AppState;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "catalog-cli")]
#[command(about = "Product catalog sync and query service")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Flags that take precedence over the environment.
#[derive(Debug, Args)]
struct Overrides {
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    feed_url: Option<String>,
    #[arg(long, global = true)]
    max_products: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation cycle and exit.
    Sync,
    /// Apply the products schema.
    Migrate,
    /// Serve the JSON API, with the scheduled sync running in the background.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        no_scheduler: bool,
    },
}

impl Overrides {
    fn apply(self, config: &mut CatalogConfig) {
        if let Some(url) = self.database_url {
            config.database_url = Some(url);
        }
        if let Some(url) = self.feed_url {
            config.feed_base_url = url;
        }
        if let Some(max) = self.max_products {
            config.sync_max_products = max;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = CatalogConfig::from_env();
    cli.overrides.apply(&mut config);

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => sync(&config).await,
        Commands::Migrate => migrate(&config).await,
        Commands::Serve {
            port,
            interval_secs,
            no_scheduler,
        } => {
            if let Some(port) = port {
                config.web_port = port;
            }
            if let Some(secs) = interval_secs {
                config.sync_interval_secs = secs;
            }
            if no_scheduler {
                config.scheduler_enabled = false;
            }
            serve(config).await
        }
    }
}

async fn sync(config: &CatalogConfig) -> Result<()> {
    let store = catalog_sync::connect_store(config).await?;
    let reconciler = catalog_sync::build_reconciler(config, store)?;
    match reconciler.run_cycle().await {
        SyncOutcome::Completed(report) => {
            println!(
                "sync complete: run_id={} entries={} upserted={} skipped={} failed={} truncated={}",
                report.run_id,
                report.feed_entries,
                report.upserted,
                report.skipped_without_id,
                report.failed_upserts,
                report.truncated
            );
            Ok(())
        }
        SyncOutcome::Failed { run_id, error } => bail!("sync {run_id} failed: {error}"),
        SyncOutcome::Skipped => bail!("sync skipped: another cycle is running"),
    }
}

async fn migrate(config: &CatalogConfig) -> Result<()> {
    let store_config = config
        .store_config()
        .context("DATABASE_URL (or --database-url) is required for migrate")?;
    let store = PgProductStore::connect(&store_config).await?;
    store.migrate().await.context("applying products schema")?;
    println!("products schema applied");
    Ok(())
}

async fn serve(config: CatalogConfig) -> Result<()> {
    let store = catalog_sync::connect_store(&config).await?;
    let reconciler = Arc::new(catalog_sync::build_reconciler(&config, store.clone())?);
    let queries = ProductQueryService::with_defaults(store, config.query_defaults());

    let scheduler = if config.scheduler_enabled {
        Some(Scheduler::start(reconciler.clone(), config.scheduler_config()))
    } else {
        info!("scheduled sync disabled");
        None
    };

    let served = catalog_web::serve(
        AppState::new(queries, reconciler),
        config.web_port,
        shutdown_signal(),
    )
    .await;

    if let Some(handle) = scheduler {
        handle.stop().await;
    }
    info!("catalog stopped");
    served
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
