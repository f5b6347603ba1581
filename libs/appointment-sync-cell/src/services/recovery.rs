use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::RestClient;
use webhook_queue_cell::{parse_webhook, EntityQueueDispatcher, FailureSink, HandlerError, WebhookEvent, WebhookEventType};

use crate::services::notification::Notifier;
use crate::{FailedOperation, FailedOperationStatus, OperationKind, RecoveryReport, SyncError};

#[async_trait]
pub trait FailedOperationStore: Send + Sync {
    async fn save(&self, operation: &FailedOperation) -> Result<(), SyncError>;

    async fn remove(&self, id: Uuid) -> Result<(), SyncError>;

    /// Oldest first.
    async fn list(&self) -> Result<Vec<FailedOperation>, SyncError>;
}

/// Re-runs a stored operation through the normal processing entry point.
#[async_trait]
pub trait OperationReplayer: Send + Sync {
    async fn replay(&self, operation: &FailedOperation) -> Result<(), SyncError>;
}

/// Replays through the per-entity queue so a recovered operation is
/// ordered behind any live event for the same entity.
#[derive(Clone)]
pub struct QueuedReplayer {
    dispatcher: EntityQueueDispatcher,
}

impl QueuedReplayer {
    pub fn new(dispatcher: EntityQueueDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl OperationReplayer for QueuedReplayer {
    async fn replay(&self, operation: &FailedOperation) -> Result<(), SyncError> {
        let body = serde_json::to_vec(&operation.payload).map_err(|e| SyncError::Validation(e.to_string()))?;
        let mut event = parse_webhook(&body).map_err(|e| SyncError::Validation(e.to_string()))?;
        event.replay_recorded_at = Some(operation.created_at);
        self.dispatcher.submit(event).await?;
        Ok(())
    }
}

// ==============================================================================
// STORES
// ==============================================================================

#[derive(Default)]
pub struct InMemoryFailedOperationStore {
    operations: RwLock<HashMap<Uuid, FailedOperation>>,
}

impl InMemoryFailedOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedOperationStore for InMemoryFailedOperationStore {
    async fn save(&self, operation: &FailedOperation) -> Result<(), SyncError> {
        self.operations.write().await.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), SyncError> {
        self.operations.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FailedOperation>, SyncError> {
        let mut operations: Vec<FailedOperation> = self.operations.read().await.values().cloned().collect();
        operations.sort_by_key(|op| (op.created_at, op.id));
        Ok(operations)
    }
}

const FAILED_OPERATIONS_PATH: &str = "/rest/v1/failed_operations";

pub struct RestFailedOperationStore {
    client: RestClient,
}

impl RestFailedOperationStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::for_record_store(config),
        }
    }
}

#[async_trait]
impl FailedOperationStore for RestFailedOperationStore {
    async fn save(&self, operation: &FailedOperation) -> Result<(), SyncError> {
        let body = serde_json::to_value(operation).map_err(|e| SyncError::Store(e.to_string()))?;
        self.client
            .send(
                Method::POST,
                FAILED_OPERATIONS_PATH,
                Some(body),
                Some("resolution=merge-duplicates,return=minimal"),
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), SyncError> {
        let path = format!("{}?id=eq.{}", FAILED_OPERATIONS_PATH, id);
        self.client.send(Method::DELETE, &path, None, Some("return=minimal")).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FailedOperation>, SyncError> {
        let path = format!("{}?order=created_at.asc", FAILED_OPERATIONS_PATH);
        Ok(self.client.request(Method::GET, &path, None).await?)
    }
}

// ==============================================================================
// RECOVERY LEDGER
// ==============================================================================

pub struct RecoveryLedger {
    store: Arc<dyn FailedOperationStore>,
    notifier: Arc<dyn Notifier>,
    recipients: Vec<String>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RecoveryLedger {
    pub fn new(store: Arc<dyn FailedOperationStore>, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        let base_backoff = Duration::seconds(config.recovery_interval_seconds.max(1) as i64);
        Self {
            store,
            notifier,
            recipients: config.alert_recipients.clone(),
            max_attempts: config.recovery_max_attempts.max(1),
            base_backoff,
            max_backoff: Duration::hours(24).max(base_backoff),
        }
    }

    pub async fn operations(&self) -> Result<Vec<FailedOperation>, SyncError> {
        self.store.list().await
    }

    /// Store an operation that exhausted its inline retries.
    ///
    /// A pending record for the same entity and payload is refreshed
    /// instead of duplicated.
    pub async fn record_failed_operation(
        &self,
        kind: OperationKind,
        entity_key: &str,
        payload: Value,
        error: &str,
    ) -> Result<FailedOperation, SyncError> {
        let now = Utc::now();
        let existing = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|op| op.status == FailedOperationStatus::Pending && op.entity_key == entity_key && op.payload == payload);

        let operation = match existing {
            Some(mut op) => {
                op.last_error = error.to_string();
                op.updated_at = now;
                op
            }
            None => FailedOperation {
                id: Uuid::new_v4(),
                kind,
                entity_key: entity_key.to_string(),
                payload,
                last_error: error.to_string(),
                attempts: 0,
                next_retry_at: now,
                status: FailedOperationStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        };

        self.store.save(&operation).await?;
        warn!(
            entity_key = %entity_key,
            operation_id = %operation.id,
            "Recorded failed {:?} operation for scheduled recovery: {}",
            kind, error
        );
        Ok(operation)
    }

    /// Replay every due operation once.
    #[instrument(skip_all)]
    pub async fn run_scheduled_recovery(&self, replayer: &dyn OperationReplayer) -> Result<RecoveryReport, SyncError> {
        let now = Utc::now();
        let due: Vec<FailedOperation> = self.store.list().await?.into_iter().filter(|op| op.is_due(now)).collect();

        let mut report = RecoveryReport::default();
        if due.is_empty() {
            debug!("No failed operations due for recovery");
            return Ok(report);
        }

        info!("Replaying {} failed operations", due.len());

        for mut operation in due {
            report.attempted += 1;

            match replayer.replay(&operation).await {
                Ok(()) => {
                    self.store.remove(operation.id).await?;
                    report.recovered += 1;
                    info!(entity_key = %operation.entity_key, "Recovered failed operation {}", operation.id);
                }
                Err(e) => {
                    operation.attempts += 1;
                    operation.last_error = e.to_string();
                    operation.updated_at = Utc::now();

                    let hopeless = matches!(e, SyncError::Validation(_));
                    if hopeless || operation.attempts >= self.max_attempts {
                        operation.status = FailedOperationStatus::Abandoned;
                        self.store.save(&operation).await?;
                        report.abandoned += 1;
                        self.alert(&operation).await;
                    } else {
                        operation.next_retry_at = operation.updated_at + self.backoff(operation.attempts);
                        self.store.save(&operation).await?;
                        report.rescheduled += 1;
                        debug!(
                            entity_key = %operation.entity_key,
                            "Replay {} failed, next attempt at {}",
                            operation.attempts, operation.next_retry_at
                        );
                    }
                }
            }
        }

        info!(
            "Recovery run: {} recovered, {} rescheduled, {} abandoned",
            report.recovered, report.rescheduled, report.abandoned
        );
        Ok(report)
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1i32 << attempts.saturating_sub(1).min(16);
        (self.base_backoff * factor).min(self.max_backoff)
    }

    async fn alert(&self, operation: &FailedOperation) {
        error!(
            entity_key = %operation.entity_key,
            operation_id = %operation.id,
            "Abandoned {:?} operation after {} attempts: {}",
            operation.kind, operation.attempts, operation.last_error
        );

        let subject = format!("Office sync: abandoned operation for {}", operation.entity_key);
        let text = format!(
            "Operation {} ({:?}) for {} was abandoned after {} attempts.\nLast error: {}\nFirst failed: {}",
            operation.id,
            operation.kind,
            operation.entity_key,
            operation.attempts,
            operation.last_error,
            operation.created_at.to_rfc3339()
        );
        let html = format!(
            "<p>Operation <code>{}</code> ({:?}) for <strong>{}</strong> was abandoned after {} attempts.</p>\
             <p>Last error: {}</p><p>First failed: {}</p>",
            operation.id,
            operation.kind,
            operation.entity_key,
            operation.attempts,
            operation.last_error,
            operation.created_at.to_rfc3339()
        );

        if !self.notifier.send(&self.recipients, &subject, &html, &text).await {
            warn!("Alert for abandoned operation {} was not delivered", operation.id);
        }
    }
}

pub fn operation_kind(event_type: WebhookEventType) -> OperationKind {
    match event_type {
        WebhookEventType::Created => OperationKind::Create,
        WebhookEventType::Cancelled | WebhookEventType::Deleted => OperationKind::Delete,
        WebhookEventType::Updated | WebhookEventType::Rescheduled | WebhookEventType::FormSubmitted => {
            OperationKind::Update
        }
    }
}

#[async_trait]
impl FailureSink for RecoveryLedger {
    async fn record_failure(&self, event: &WebhookEvent, error: &HandlerError, attempts: u32) {
        let detail = format!("{} (after {} attempts)", error.message, attempts);
        if let Err(e) = self
            .record_failed_operation(operation_kind(event.event_type), &event.entity_key, event.raw.clone(), &detail)
            .await
        {
            error!(
                entity_key = %event.entity_key,
                fingerprint = %event.fingerprint,
                "Could not record failed operation, event is lost: {}",
                e
            );
        }
    }
}
