//! `vigil serve`: wires storage, producer, orchestrator, scheduler, and API.

use crate::config::ServerConfig;
use crate::producer::HttpAggregationProducer;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use vigil_api::{AppState, build_app};
use vigil_builder::{Orchestrator, RefreshScheduler};
use vigil_core::SystemClock;
use vigil_core::ports::{CacheRegistry, PayloadStore};
use vigil_db::{Database, MemoryPayloadStore, MemoryRegistry};

async fn stores(
    config: &ServerConfig,
) -> anyhow::Result<(Arc<dyn CacheRegistry>, Arc<dyn PayloadStore>)> {
    match &config.database_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("connecting to the registry database")?;
            db.migrate().await.context("running migrations")?;
            info!("Using PostgreSQL registry");
            let registry: Arc<dyn CacheRegistry> = Arc::new(db.registry());
            let payloads: Arc<dyn PayloadStore> = Arc::new(db.payloads());
            Ok((registry, payloads))
        }
        None => {
            warn!("No database_url configured; registry state will not survive a restart");
            let registry: Arc<dyn CacheRegistry> = Arc::new(MemoryRegistry::new());
            let payloads: Arc<dyn PayloadStore> = Arc::new(MemoryPayloadStore::new());
            Ok((registry, payloads))
        }
    }
}

/// Build the orchestrator from `config` and run it through its startup sweep.
pub async fn build_orchestrator(config: &ServerConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let (registry, payloads) = stores(config).await?;
    let producer = HttpAggregationProducer::new(
        &config.producer_url,
        Duration::from_secs(config.producer_timeout_secs),
    )?;

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        payloads,
        Arc::new(producer),
        Arc::new(SystemClock),
        config.orchestrator.clone(),
    ));

    orchestrator
        .initialize_defaults(&config.caches, true)
        .await
        .context("registering configured caches")?;
    orchestrator.startup().await?;
    Ok(orchestrator)
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = RefreshScheduler::new(Arc::clone(&orchestrator));
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator), config.caches.clone()));
    let app = build_app(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Vigil API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("serving the API")?;

    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Refresh scheduler task ended abnormally");
    }

    let running = orchestrator.runner().running().await;
    if !running.is_empty() {
        warn!(builds = ?running, "Exiting with builds in flight; they will be recovered on next start");
    }
    Ok(())
}
