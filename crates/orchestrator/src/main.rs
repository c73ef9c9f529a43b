//! Round Orchestrator
//!
//! Main entry point for the round lifecycle orchestrator.
//! Agent mode ends expired rounds and records the ledger's events; observer
//! mode only serves the read-side view. History is persisted to disk and
//! survives restarts.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ledger_client::{JsonRpcLedgerClient, LedgerClient};
use round_runtime::{
    EventIngestor, HistoryStore, Shutdown, TriggerCoordinator, ViewAggregator, ViewHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use view_server::ViewServer;

mod config;

use config::{ConfigOverrides, OrchestratorConfig};

/// Orchestrator mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Automation agent - ends expired rounds and records events
    Agent,
    /// Read-only backend for interactive clients, never submits
    Observer,
    /// Print the stored history and exit
    History,
}

/// Round Lifecycle Orchestrator
#[derive(Parser, Debug)]
#[command(name = "round-orchestrator")]
#[command(about = "Keeps a timed on-ledger round moving and records its history", long_about = None)]
struct Args {
    /// Run mode (agent, observer or history)
    #[arg(long, value_enum, default_value = "agent")]
    mode: Mode,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = OrchestratorConfig::load(args.config.as_deref())?;
    config.apply(&args.overrides);

    match args.mode {
        Mode::Agent => run_agent(config).await,
        Mode::Observer => run_observer(config).await,
        Mode::History => print_history(&config),
    }
}

/// Build the ledger client and make sure the ledger answers
async fn connect(config: &OrchestratorConfig) -> Result<Arc<JsonRpcLedgerClient>> {
    config.validate()?;

    let client = Arc::new(JsonRpcLedgerClient::new(config.ledger_config())?);

    let state = client
        .read_round_state()
        .await
        .context("initial round state read failed")?;
    tracing::info!(
        "Connected to ledger: round {}, {} participants, pool {} ETH",
        state.round_id,
        state.participant_count,
        state.pool_balance.format_ether()
    );

    Ok(client)
}

/// Run in agent mode - coordinator, ingestor, aggregator and view server
async fn run_agent(config: OrchestratorConfig) -> Result<()> {
    tracing::info!("Starting Round Orchestrator - AGENT MODE");
    tracing::info!("  Ledger RPC: {}", config.rpc_url);
    tracing::info!("  Ledger WS: {}", config.ws_url);
    tracing::info!("  Contract: {}", config.contract_address);
    tracing::info!("  Caller: {}", config.caller_address);
    tracing::info!("  Trigger interval: {}ms", config.trigger_interval_ms);
    tracing::info!("  View server: {}", config.view_addr);
    tracing::info!("  Data directory: {:?}", config.data_dir);

    let client = connect(&config).await?;

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&config.data_dir)?;
    let history = Arc::new(HistoryStore::open(config.history_dir())?);

    let (shutdown_tx, shutdown) = watch::channel(false);
    let view = ViewHandle::new();

    let coordinator = TriggerCoordinator::new(client.clone(), config.coordinator_config());
    let ingestor = EventIngestor::new(client.clone(), history.clone(), config.ingestor_config());
    let aggregator = ViewAggregator::new(client.clone(), view.clone(), config.view_interval());

    let mut tasks = vec![
        tokio::spawn(coordinator.run(shutdown.clone())),
        tokio::spawn(aggregator.run(shutdown.clone())),
    ];

    let ingest_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        let stats = ingestor.run(ingest_shutdown).await;
        tracing::info!(
            "Ingested {} events ({} duplicates, {} persist retries)",
            stats.appended,
            stats.duplicates,
            stats.persist_failures
        );
    }));

    tasks.push(spawn_view_server(
        view,
        Some(history.clone()),
        config.view_addr.clone(),
        shutdown,
    ));

    tracing::info!("Agent running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    join_with_grace(tasks, &config).await;

    // Flush history before exit
    match history.flush() {
        Ok(()) => tracing::info!("History flushed: {} records", history.len()),
        Err(e) => tracing::error!("Failed to flush history: {}", e),
    }

    tracing::info!("Agent stopped");

    Ok(())
}

/// Run in observer mode - aggregator and view server only
async fn run_observer(config: OrchestratorConfig) -> Result<()> {
    tracing::info!("Starting Round Orchestrator - OBSERVER MODE");
    tracing::info!("  Ledger RPC: {}", config.rpc_url);
    tracing::info!("  View interval: {}ms", config.view_interval_ms);
    tracing::info!("  View server: {}", config.view_addr);

    let client = connect(&config).await?;

    let (shutdown_tx, shutdown) = watch::channel(false);
    let view = ViewHandle::new();
    let aggregator = ViewAggregator::new(client, view.clone(), config.view_interval());

    let tasks = vec![
        tokio::spawn(aggregator.run(shutdown.clone())),
        spawn_view_server(view, None, config.view_addr.clone(), shutdown),
    ];

    tracing::info!("Observer running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    join_with_grace(tasks, &config).await;

    tracing::info!("Observer stopped");

    Ok(())
}

/// Print the stored history as pretty JSON
fn print_history(config: &OrchestratorConfig) -> Result<()> {
    let history = HistoryStore::open(config.history_dir())?;
    let records = history.read_all()?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn spawn_view_server(
    view: ViewHandle,
    history: Option<Arc<HistoryStore>>,
    addr: String,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let server = ViewServer::new(view, history);
        if let Err(e) = server.run(&addr, shutdown).await {
            tracing::error!("View server error: {}", e);
        }
    })
}

/// Wait for every task, bounded by the shutdown grace period
async fn join_with_grace(tasks: Vec<JoinHandle<()>>, config: &OrchestratorConfig) {
    let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

    let joined = tokio::time::timeout(config.shutdown_grace(), async {
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Task failed during shutdown: {}", e);
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!(
            "Tasks still running after {}ms grace period, aborting",
            config.shutdown_grace_ms
        );
        for abort in aborts {
            abort.abort();
        }
    }
}
