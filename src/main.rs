//! Snapkeeper
//!
//! Single-process scheduler for the snapshot lifecycle engine: evaluates
//! retention policies and tier rules on a fixed interval, drains tier
//! transitions, advances cold restores and writes daily cost reports.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::clock::SystemClock;
use common::config::Configuration;
use common::store::{InMemoryStore, SqlStore, Store};
use lifecycle::{LifecycleService, ObjectStoreBackend};
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "snapkeeper")]
#[command(about = "Snapshot lifecycle, immutability and storage-tiering engine")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<SnapkeeperCommands>,

    #[arg(long, value_enum, help = "Persistence backend", default_value = "sql")]
    store: StoreKind,
}

#[derive(Subcommand)]
enum SnapkeeperCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Run a single tick and exit
    RunOnce {
        #[arg(long, help = "Print the tick report as JSON")]
        json: bool,
    },
}

impl Default for SnapkeeperCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    /// Database from `database.dsn`
    Sql,
    /// Volatile in-process store
    Memory,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn open_store(kind: StoreKind, config: &Configuration) -> Result<Arc<dyn Store>> {
    Ok(match kind {
        StoreKind::Sql => Arc::new(
            SqlStore::connect(&config.database)
                .await
                .context("Failed to open lifecycle database")?,
        ),
        StoreKind::Memory => {
            log::warn!("Using the in-memory store, state is lost on exit");
            Arc::new(InMemoryStore::new())
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let command = cli.command.unwrap_or_default();
    if let SnapkeeperCommands::Common(ref common_cmd) = command {
        if utils::handle_common_command(common_cmd, &config).await? {
            return Ok(());
        }
    }

    utils::validate_config(&config)?;

    let store = open_store(cli.store, &config).await?;
    let backend = Arc::new(
        ObjectStoreBackend::from_url(&config.storage.url)
            .context("Failed to open snapshot object store")?,
    );
    let service = Arc::new(LifecycleService::new(
        store,
        backend,
        Arc::new(SystemClock),
        config.clone(),
    ));

    if let SnapkeeperCommands::RunOnce { json } = command {
        let report = service.run_tick().await.context("Lifecycle tick failed")?;
        if json {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize tick report")?;
            println!("{json}");
        }
        return Ok(());
    }

    if !config.scheduler.enabled {
        log::info!("Scheduler is disabled in configuration (scheduler.enabled = false)");
        log::info!("Use `snapkeeper run-once` or enable the scheduler to run ticks");
        return Ok(());
    }

    if config.lifecycle.dry_run {
        log::info!("Lifecycle policies run in dry-run mode, nothing will be deleted");
    }
    log::info!(
        "Starting Snapkeeper with tick interval: {:?}",
        config.scheduler.tick_interval
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let tick_interval = config.scheduler.tick_interval;
    let tick_task = {
        let service = service.clone();
        tokio::spawn(async move { service.run_until_shutdown(tick_interval, shutdown_rx).await })
    };

    log::info!("Snapkeeper running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Shutting down Snapkeeper, letting the current tick finish");
    let _ = shutdown_tx.send(());
    match tick_task.await {
        Ok(ticks) => log::info!("Scheduler ran {ticks} ticks"),
        Err(e) => log::error!("Scheduler task failed: {e}"),
    }

    log::info!("Snapkeeper stopped");
    Ok(())
}
