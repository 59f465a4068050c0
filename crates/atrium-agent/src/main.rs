//! # atrium-agent
//!
//! `atriumd` — wires every crate together and serves HTTP + WebSocket.

#![deny(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use atrium_core::logging::init_logging;
use atrium_llm::ModelRegistry;
use atrium_llm::remote::RemoteBackend;
use atrium_resilience::ResilienceRegistry;
use atrium_runtime::{EventEmitter, Orchestrator, OrchestratorConfig};
use atrium_server::sync::{EventBridge, HEARTBEAT_WINDOW, SyncBroker};
use atrium_server::{AppState, router};
use atrium_store::{CircuitRepo, ConnectionConfig, SessionStore};
use atrium_tools::{DispatcherConfig, ToolDispatcher, ToolRegistry};

use crate::config::AtriumConfig;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Durable circuit snapshot cadence.
const CIRCUIT_PERSIST_INTERVAL: Duration = Duration::from_secs(30);
/// Provider health-probe cadence.
const PROBE_INTERVAL: Duration = Duration::from_secs(300);
/// Idle-connection reaper cadence.
const REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Atrium assistant daemon.
#[derive(Parser, Debug)]
#[command(name = "atriumd", about = "Atrium assistant daemon")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Path to the SQLite database.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Default tracing filter (`RUST_LOG` overrides).
    #[arg(long, default_value = "info")]
    log_filter: String,

    /// Path to the provider/model config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn home_dir() -> PathBuf {
        PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
    }

    fn default_db_path() -> PathBuf {
        Self::home_dir().join(".atrium").join("atrium.db")
    }

    fn default_config_path() -> PathBuf {
        Self::home_dir().join(".atrium").join("config.json")
    }
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_filter);

    // Database.
    let db_path = args.db.unwrap_or_else(Cli::default_db_path);
    ensure_parent_dir(&db_path)?;
    let db_str = db_path.to_string_lossy();
    let pool = atrium_store::new_file(&db_str, &ConnectionConfig::default())
        .context("failed to open database")?;
    {
        let conn = pool.get().context("failed to get a connection")?;
        let version = atrium_store::migrations::run_migrations(&conn)
            .context("failed to run migrations")?;
        tracing::info!(version, db = %db_path.display(), "database ready");
    }
    let store = Arc::new(SessionStore::new(pool.clone()));
    let circuit_repo = Arc::new(CircuitRepo::new(pool));

    // Circuits survive restarts; an open circuit restarts its cooldown.
    let resilience = Arc::new(ResilienceRegistry::with_defaults());
    let restored = circuit_repo
        .load_all()
        .context("failed to load circuit snapshots")?;
    if !restored.is_empty() {
        resilience.restore(&restored);
        tracing::info!(circuits = restored.len(), "restored circuit state");
    }

    // Model catalog and backends.
    let config_path = args.config.unwrap_or_else(Cli::default_config_path);
    let config = AtriumConfig::load(&config_path)?;
    let models = Arc::new(ModelRegistry::new(Arc::clone(&resilience)));
    for provider in &config.providers {
        let backend = RemoteBackend::new(
            provider.name.as_str(),
            provider.base_url.as_str(),
            provider.api_key(),
        )
            .with_context(|| format!("failed to build backend for {}", provider.name))?;
        models.register_backend(Arc::new(backend));
    }
    for descriptor in config.models {
        models.register_model(descriptor);
    }
    tracing::info!(
        providers = config.providers.len(),
        models = models.list_available().len(),
        "model registry wired"
    );

    // Tools are deployment-specific; registration is the integration point.
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(ToolRegistry::new()),
        Arc::clone(&resilience),
        DispatcherConfig::default(),
    ));

    let emitter = Arc::new(EventEmitter::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&models),
        dispatcher,
        Arc::clone(&resilience),
        Arc::clone(&emitter),
        OrchestratorConfig::default(),
    ));

    // Surface fan-out, fed by the emitter.
    let broker = Arc::new(SyncBroker::new());
    let bridge = EventBridge::new(emitter.subscribe(), Arc::clone(&broker));
    drop(tokio::spawn(bridge.run()));

    let metrics = atrium_server::metrics::install_recorder();
    let state = AppState {
        orchestrator,
        store,
        models: Arc::clone(&models),
        resilience: Arc::clone(&resilience),
        broker: Arc::clone(&broker),
        emitter,
        metrics,
        start_time: Instant::now(),
    };

    spawn_circuit_persist(Arc::clone(&resilience), Arc::clone(&circuit_repo));
    spawn_probe_sweep(models, Arc::clone(&resilience));
    spawn_reaper(broker);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let addr = listener.local_addr()?;
    tracing::info!("atriumd listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // One last snapshot so open circuits survive the restart.
    circuit_repo
        .upsert_all(&resilience.snapshot())
        .context("failed to persist circuit snapshots on shutdown")?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Periodically persist circuit state for restart recovery.
fn spawn_circuit_persist(resilience: Arc<ResilienceRegistry>, repo: Arc<CircuitRepo>) {
    drop(tokio::spawn(async move {
        let mut tick = tokio::time::interval(CIRCUIT_PERSIST_INTERVAL);
        loop {
            let _ = tick.tick().await;
            if let Err(e) = repo.upsert_all(&resilience.snapshot()) {
                tracing::warn!(error = %e, "failed to persist circuit snapshots");
            }
        }
    }));
}

/// Periodically probe providers and give open circuits a recovery chance.
fn spawn_probe_sweep(models: Arc<ModelRegistry>, resilience: Arc<ResilienceRegistry>) {
    drop(tokio::spawn(async move {
        let mut tick = tokio::time::interval(PROBE_INTERVAL);
        loop {
            let _ = tick.tick().await;
            models.run_health_probes().await;
            let recovered = resilience.run_recovery_sweep().await;
            if !recovered.is_empty() {
                tracing::info!(?recovered, "circuits recovered by probe");
            }
        }
    }));
}

/// Periodically drop surface connections that stopped pinging.
fn spawn_reaper(broker: Arc<SyncBroker>) {
    drop(tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAPER_INTERVAL);
        loop {
            let _ = tick.tick().await;
            let reaped = broker.reap_idle(HEARTBEAT_WINDOW).await;
            if !reaped.is_empty() {
                tracing::debug!(count = reaped.len(), "reaped idle surface connections");
            }
        }
    }));
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown signal received");
}
