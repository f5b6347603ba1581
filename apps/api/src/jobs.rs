use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use appointment_sync_cell::{
    spawn_periodic, IdempotencyLedger, JobLock, LocalJobLock, QueuedReplayer, RecoveryLedger, SyncOrchestrator,
};
use shared_config::AppConfig;
use webhook_queue_cell::EntityQueueDispatcher;

/// Start the recovery, resync and catalog-refresh timers.
pub fn spawn_jobs(
    config: &AppConfig,
    orchestrator: Arc<SyncOrchestrator>,
    dispatcher: EntityQueueDispatcher,
    recovery: Arc<RecoveryLedger>,
    ledger: Arc<dyn IdempotencyLedger>,
    lock: Arc<dyn JobLock>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let replayer = Arc::new(QueuedReplayer::new(dispatcher));
    handles.push(spawn_periodic(
        "recovery",
        Duration::from_secs(config.recovery_interval_seconds),
        lock.clone(),
        shutdown.clone(),
        move || {
            let recovery = recovery.clone();
            let replayer = replayer.clone();
            async move {
                match recovery.run_scheduled_recovery(replayer.as_ref()).await {
                    Ok(report) if report.attempted > 0 => info!(
                        "Recovery: {} recovered, {} rescheduled, {} abandoned",
                        report.recovered, report.rescheduled, report.abandoned
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Scheduled recovery failed: {}", e),
                }
            }
        },
    ));

    let days_ahead = config.resync_days_ahead;
    let resync = orchestrator.clone();
    handles.push(spawn_periodic(
        "resync",
        Duration::from_secs(config.resync_interval_hours.saturating_mul(3600)),
        lock.clone(),
        shutdown.clone(),
        move || {
            let orchestrator = resync.clone();
            async move {
                if let Err(e) = orchestrator.run_resync(days_ahead).await {
                    error!("Scheduled resync failed: {}", e);
                }
            }
        },
    ));

    // per-instance state, so no cross-instance lock
    let catalog = orchestrator.catalog().clone();
    handles.push(spawn_periodic(
        "catalog-refresh",
        Duration::from_secs(config.catalog_refresh_seconds),
        Arc::new(LocalJobLock::new()),
        shutdown,
        move || {
            let catalog = catalog.clone();
            let ledger = ledger.clone();
            async move {
                if let Err(e) = catalog.reload().await {
                    warn!("Catalog refresh failed, keeping previous rules: {}", e);
                }
                match ledger.sweep_expired().await {
                    Ok(0) => {}
                    Ok(swept) => info!("Swept {} expired idempotency entries", swept),
                    Err(e) => warn!("Idempotency ledger sweep failed: {}", e),
                }
            }
        },
    ));

    handles
}
