use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod jobs;
mod router;

use appointment_sync_cell::handlers::SyncState;
use appointment_sync_cell::{
    notifier_from_config, FailedOperationStore, HttpSchedulingProvider, IdempotencyLedger,
    InMemoryFailedOperationStore, InMemoryIdempotencyLedger, InMemoryProfileDirectory, InMemoryRecordStore,
    InMemorySchedulingProvider, JobLock, LocalJobLock, ProfileDirectory, RecordStore, RecoveryLedger,
    RedisIdempotencyLedger, RedisJobLock, RestFailedOperationStore, RestProfileDirectory, RestRecordStore,
    SchedulingProvider, SyncOrchestrator,
};
use office_assignment_cell::CatalogHandle;
use shared_config::AppConfig;
use webhook_queue_cell::{DispatcherConfig, EntityQueueDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting office sync service");

    let config = Arc::new(AppConfig::from_env());

    // a broken catalog or rule file is fatal at startup; later reloads keep the old snapshot
    let catalog = Arc::new(
        CatalogHandle::new(&config).context("Failed to load office catalog or assignment rules")?,
    );

    let (ledger, lock) = coordination(&config).await;

    let (store, directory, failed_operations): (
        Arc<dyn RecordStore>,
        Arc<dyn ProfileDirectory>,
        Arc<dyn FailedOperationStore>,
    ) = if config.is_record_store_configured() {
        (
            Arc::new(RestRecordStore::new(&config)),
            Arc::new(RestProfileDirectory::new(&config)),
            Arc::new(RestFailedOperationStore::new(&config)),
        )
    } else {
        warn!("Record store not configured, records live in memory and are lost on restart");
        (
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryProfileDirectory::new()),
            Arc::new(InMemoryFailedOperationStore::new()),
        )
    };

    let provider: Arc<dyn SchedulingProvider> = if config.is_provider_configured() {
        Arc::new(HttpSchedulingProvider::new(&config))
    } else {
        warn!("Scheduling provider not configured, body-less events and resync will find nothing");
        Arc::new(InMemorySchedulingProvider::new())
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store,
        ledger.clone(),
        provider,
        directory,
        catalog,
        &config,
    ));
    let recovery = Arc::new(RecoveryLedger::new(
        failed_operations,
        notifier_from_config(&config),
        &config,
    ));
    let dispatcher = EntityQueueDispatcher::with_failure_sink(
        DispatcherConfig::from_app_config(&config),
        orchestrator.clone(),
        recovery.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job_handles = jobs::spawn_jobs(
        &config,
        orchestrator.clone(),
        dispatcher.clone(),
        recovery.clone(),
        ledger,
        lock,
        shutdown_rx,
    );

    let state = Arc::new(SyncState {
        config: config.clone(),
        dispatcher,
        orchestrator,
        recovery,
    });

    // Build the application router
    let app = router::create_router(state.clone());

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining webhook queues");
    let _ = shutdown_tx.send(true);
    if !state.dispatcher.shutdown().await {
        warn!("Webhook queues did not drain before the shutdown timeout");
    }
    for handle in job_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("A scheduled job did not stop in time");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Redis-backed ledger and job lock when `REDIS_URL` is set and reachable,
/// process-local ones otherwise.
async fn coordination(config: &AppConfig) -> (Arc<dyn IdempotencyLedger>, Arc<dyn JobLock>) {
    if let Some(url) = &config.redis_url {
        match RedisIdempotencyLedger::new(url, config.ledger_retention_days).await {
            Ok(ledger) => match RedisJobLock::new(url) {
                Ok(lock) => {
                    info!("Using Redis idempotency ledger and job lock");
                    return (Arc::new(ledger), Arc::new(lock));
                }
                Err(e) => warn!("Redis job lock unavailable: {}", e),
            },
            Err(e) => warn!("Redis idempotency ledger unavailable: {}", e),
        }
    }

    warn!("Using in-memory idempotency ledger; duplicates are only caught within this process");
    (
        Arc::new(InMemoryIdempotencyLedger::new(config.ledger_retention_days)),
        Arc::new(LocalJobLock::new()),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
