use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use appointment_sync_cell::*;
use office_assignment_cell::{AssignmentSnapshot, CatalogHandle};
use shared_config::AppConfig;
use shared_utils::test_utils::{payload_bytes, MockProviderPayloads, TestConfig};
use webhook_queue_cell::{
    parse_webhook, DispatcherConfig, EntityQueueDispatcher, FailureSink, HandlerError, WebhookEvent,
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<String>, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipients: &[String], subject: &str, _html: &str, _text: &str) -> bool {
        self.sent.lock().await.push((recipients.to_vec(), subject.to_string()));
        true
    }
}

/// Replayer that fails with the scripted errors in order, then succeeds.
#[derive(Default)]
struct ScriptedReplayer {
    failures: Mutex<Vec<SyncError>>,
    calls: AtomicUsize,
}

impl ScriptedReplayer {
    fn failing_with(errors: Vec<SyncError>) -> Self {
        Self {
            failures: Mutex::new(errors),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OperationReplayer for ScriptedReplayer {
    async fn replay(&self, _operation: &FailedOperation) -> Result<(), SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

fn config(max_attempts: u32) -> AppConfig {
    AppConfig {
        recovery_max_attempts: max_attempts,
        alert_recipients: vec!["ops@example.org".to_string()],
        ..TestConfig::default().to_app_config()
    }
}

fn ledger(config: &AppConfig) -> (RecoveryLedger, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let ledger = RecoveryLedger::new(Arc::new(InMemoryFailedOperationStore::new()), notifier.clone(), config);
    (ledger, notifier)
}

fn created_body(id: &str) -> serde_json::Value {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    MockProviderPayloads::webhook(
        "AppointmentCreated",
        MockProviderPayloads::appointment(id, "c-1", "t-1", start, 50),
    )
}

#[tokio::test]
async fn test_recorded_operation_is_replayed_and_removed() {
    let (ledger, notifier) = ledger(&config(3));
    ledger
        .record_failed_operation(OperationKind::Create, "appointment:a1", created_body("a1"), "upstream 503")
        .await
        .expect("Failed to record operation");

    let replayer = ScriptedReplayer::default();
    let report = ledger.run_scheduled_recovery(&replayer).await.expect("Recovery run failed");

    assert_eq!(report.attempted, 1);
    assert_eq!(report.recovered, 1);
    assert!(ledger.operations().await.unwrap().is_empty());
    assert!(notifier.sent.lock().await.is_empty());
}

#[tokio::test]
async fn test_same_failure_is_recorded_once() {
    let (ledger, _) = ledger(&config(3));
    let body = created_body("a1");

    let first = ledger
        .record_failed_operation(OperationKind::Create, "appointment:a1", body.clone(), "timeout")
        .await
        .unwrap();
    let second = ledger
        .record_failed_operation(OperationKind::Create, "appointment:a1", body, "timeout again")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let operations = ledger.operations().await.unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].last_error, "timeout again");
}

#[tokio::test]
async fn test_transient_failure_is_rescheduled_with_backoff() {
    let (ledger, _) = ledger(&config(3));
    ledger
        .record_failed_operation(OperationKind::Update, "appointment:a1", created_body("a1"), "timeout")
        .await
        .unwrap();

    let replayer = ScriptedReplayer::failing_with(vec![SyncError::TransientInfra("still down".to_string())]);
    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let operation = &ledger.operations().await.unwrap()[0];
    assert_eq!(operation.attempts, 1);
    assert_eq!(operation.status, FailedOperationStatus::Pending);
    assert!(operation.next_retry_at > Utc::now());

    // not due yet
    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(replayer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_operation_is_abandoned_and_alerted() {
    let (ledger, notifier) = ledger(&config(1));
    ledger
        .record_failed_operation(OperationKind::Delete, "appointment:a1", created_body("a1"), "timeout")
        .await
        .unwrap();

    let replayer = ScriptedReplayer::failing_with(vec![SyncError::TransientInfra("still down".to_string())]);
    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();

    assert_eq!(report.abandoned, 1);
    let operation = &ledger.operations().await.unwrap()[0];
    assert_eq!(operation.status, FailedOperationStatus::Abandoned);

    let sent = notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, vec!["ops@example.org".to_string()]);
    assert!(sent[0].1.contains("appointment:a1"));
    drop(sent);

    // abandoned operations are kept for inspection but never replayed
    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_validation_failure_is_abandoned_immediately() {
    let (ledger, notifier) = ledger(&config(5));
    ledger
        .record_failed_operation(OperationKind::Create, "appointment:a1", json!({"EventType": "AppointmentCreated"}), "bad")
        .await
        .unwrap();

    let replayer = ScriptedReplayer::failing_with(vec![SyncError::Validation("missing appointment id".to_string())]);
    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(ledger.operations().await.unwrap()[0].attempts, 1);
    assert_eq!(notifier.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn test_dispatcher_failures_land_in_the_ledger() {
    let (ledger, _) = ledger(&config(3));
    let event = parse_webhook(&payload_bytes(&created_body("a7"))).expect("Failed to parse webhook");

    ledger
        .record_failure(&event, &HandlerError::permanent("store rejected row"), 3)
        .await;

    let operations = ledger.operations().await.unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].kind, OperationKind::Create);
    assert_eq!(operations[0].entity_key, event.entity_key);
    assert_eq!(operations[0].payload, event.raw);
    assert!(operations[0].last_error.contains("after 3 attempts"));
}

fn orchestrator(config: &AppConfig, store: Arc<InMemoryRecordStore>) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        store,
        Arc::new(InMemoryIdempotencyLedger::default()),
        Arc::new(InMemorySchedulingProvider::new()),
        Arc::new(InMemoryProfileDirectory::new()),
        Arc::new(CatalogHandle::from_snapshot(
            AssignmentSnapshot::builtin().expect("Failed to build default rules"),
        )),
        config,
    ))
}

fn event(body: serde_json::Value) -> WebhookEvent {
    parse_webhook(&payload_bytes(&body)).expect("Failed to parse webhook")
}

fn queued_replayer(orchestrator: Arc<SyncOrchestrator>) -> QueuedReplayer {
    QueuedReplayer::new(EntityQueueDispatcher::new(DispatcherConfig::default(), orchestrator))
}

#[tokio::test]
async fn test_replay_goes_through_the_orchestrator() {
    let config = config(3);
    let store = Arc::new(InMemoryRecordStore::new());
    let replayer = queued_replayer(orchestrator(&config, store.clone()));
    let (ledger, _) = ledger(&config);

    ledger
        .record_failed_operation(OperationKind::Create, "appointment:a9", created_body("a9"), "upstream 503")
        .await
        .unwrap();
    ledger
        .record_failed_operation(OperationKind::Create, "appointment:?", json!({"EventType": "Nonsense"}), "bad")
        .await
        .unwrap();

    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.abandoned, 1);
    assert!(store.get_appointment("a9").await.unwrap().is_some());
    assert_matches!(
        ledger.operations().await.unwrap().as_slice(),
        [op] if op.status == FailedOperationStatus::Abandoned
    );
}

#[tokio::test]
async fn test_stale_update_does_not_revive_a_cancelled_appointment() {
    let config = config(3);
    let store = Arc::new(InMemoryRecordStore::new());
    let orchestrator = orchestrator(&config, store.clone());
    let replayer = queued_replayer(orchestrator.clone());
    let (ledger, _) = ledger(&config);

    let start = (Utc::now() + Duration::days(1)).date_naive().and_hms_opt(9, 0, 0).unwrap().and_utc();
    let booked = MockProviderPayloads::appointment("apt-1", "c-1", "t-1", start, 50);
    let moved = MockProviderPayloads::appointment("apt-1", "c-1", "t-1", start + Duration::hours(2), 50);

    orchestrator
        .process_event(&event(MockProviderPayloads::webhook("AppointmentCreated", booked.clone())))
        .await
        .expect("Create should succeed");

    ledger
        .record_failed_operation(
            OperationKind::Update,
            "appointment:apt-1",
            MockProviderPayloads::webhook("AppointmentUpdated", moved),
            "upstream 503",
        )
        .await
        .expect("Failed to record operation");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let cancelled = orchestrator
        .process_event(&event(MockProviderPayloads::webhook("AppointmentCancelled", booked)))
        .await
        .expect("Cancel should succeed");
    assert_eq!(cancelled.outcome, SyncOutcome::Deleted);

    let report = ledger.run_scheduled_recovery(&replayer).await.expect("Recovery run failed");

    assert_eq!(report.recovered, 1);
    assert!(store.get_appointment("apt-1").await.unwrap().is_none());
    assert!(ledger.operations().await.unwrap().is_empty());

    let audit = store.audit_entries().await;
    assert_eq!(audit.last().map(|e| e.outcome), Some(AuditOutcome::NoOp));
}

#[tokio::test]
async fn test_replay_without_newer_event_still_applies() {
    let config = config(3);
    let store = Arc::new(InMemoryRecordStore::new());
    let orchestrator = orchestrator(&config, store.clone());
    let replayer = queued_replayer(orchestrator.clone());
    let (ledger, _) = ledger(&config);

    orchestrator
        .process_event(&event(created_body("a2")))
        .await
        .expect("Create should succeed");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let start = Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
    ledger
        .record_failed_operation(
            OperationKind::Update,
            "appointment:a2",
            MockProviderPayloads::webhook(
                "AppointmentRescheduled",
                MockProviderPayloads::appointment("a2", "c-1", "t-1", start, 50),
            ),
            "upstream 503",
        )
        .await
        .unwrap();

    let report = ledger.run_scheduled_recovery(&replayer).await.unwrap();

    assert_eq!(report.recovered, 1);
    let record = store.get_appointment("a2").await.unwrap().expect("record kept");
    assert_eq!(record.start_time, start);
}
