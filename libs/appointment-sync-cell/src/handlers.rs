use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use shared_config::AppConfig;
use shared_models::error::AppError;
use webhook_queue_cell::{parse_webhook, EntityQueueDispatcher, QueueError};

use crate::services::{
    orchestrator::SyncOrchestrator,
    recovery::{QueuedReplayer, RecoveryLedger},
};

/// Everything the HTTP surface needs. Built once in `main`.
pub struct SyncState {
    pub config: Arc<AppConfig>,
    pub dispatcher: EntityQueueDispatcher,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub recovery: Arc<RecoveryLedger>,
}

/// Accept a signed provider webhook and queue it for its entity.
///
/// The signature was already checked by the middleware. Responds 202 as soon
/// as the event is queued; processing happens in the background.
pub async fn receive_webhook(
    State(state): State<Arc<SyncState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let event = parse_webhook(&body).map_err(|e| {
        warn!("Rejected webhook payload: {}", e);
        AppError::BadRequest(e.to_string())
    })?;

    let fingerprint = event.fingerprint.clone();
    let event_type = event.event_type;

    let receipt = state.dispatcher.enqueue(event).await.map_err(|e| match e {
        QueueError::ShuttingDown => AppError::Unavailable("Service is shutting down".to_string()),
        other => {
            error!("Failed to enqueue webhook: {}", other);
            AppError::Internal("Failed to enqueue webhook".to_string())
        }
    })?;

    info!(
        entity_key = %receipt.entity_key,
        fingerprint = %fingerprint,
        "Accepted {} webhook at queue position {}",
        event_type.as_str(),
        receipt.position
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "event_id": receipt.event_id,
            "entity_key": receipt.entity_key,
            "fingerprint": fingerprint,
            "queue_position": receipt.position
        })),
    ))
}

pub async fn webhook_stats(State(state): State<Arc<SyncState>>) -> Result<Json<Value>, AppError> {
    let stats = state.dispatcher.stats().await;
    Ok(Json(json!({
        "queue": stats,
        "shutting_down": state.dispatcher.is_shutting_down()
    })))
}

pub async fn list_failed_operations(State(state): State<Arc<SyncState>>) -> Result<Json<Value>, AppError> {
    let operations = state.recovery.operations().await?;
    Ok(Json(json!({
        "count": operations.len(),
        "operations": operations
    })))
}

/// Trigger a recovery pass now instead of waiting for the timer.
pub async fn run_recovery(State(state): State<Arc<SyncState>>) -> Result<Json<Value>, AppError> {
    info!("Manual recovery run requested");
    let replayer = QueuedReplayer::new(state.dispatcher.clone());
    let report = state.recovery.run_scheduled_recovery(&replayer).await?;
    Ok(Json(json!({ "report": report })))
}

pub async fn health(State(state): State<Arc<SyncState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "office-sync",
        "record_store_configured": state.config.is_record_store_configured(),
        "shutting_down": state.dispatcher.is_shutting_down()
    }))
}
