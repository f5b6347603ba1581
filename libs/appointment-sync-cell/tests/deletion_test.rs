use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use appointment_sync_cell::*;
use office_assignment_cell::{AssignmentSnapshot, CatalogHandle};
use shared_database::ApiError;
use shared_models::{Appointment, AppointmentSource, AppointmentStatus, OfficeCode, SessionType};
use shared_utils::test_utils::{payload_bytes, TestConfig};
use webhook_queue_cell::parse_webhook;

/// Store whose plain deletes report success without removing anything.
#[derive(Default)]
struct StubbornStore {
    inner: InMemoryRecordStore,
    fail_remediation: bool,
    fail_upserts: AtomicBool,
    applied: Mutex<Vec<&'static str>>,
}

impl StubbornStore {
    async fn remediate(&self, name: &'static str) -> Result<(), ApiError> {
        self.applied.lock().await.push(name);
        if self.fail_remediation {
            Err(ApiError::Timeout("remediation timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for StubbornStore {
    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, ApiError> {
        self.inner.get_appointment(id).await
    }

    async fn upsert_appointment(&self, record: &Appointment) -> Result<(), ApiError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                status: 500,
                body: "write failed".to_string(),
            });
        }
        self.inner.upsert_appointment(record).await
    }

    async fn delete_appointment(&self, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_appointments(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>, ApiError> {
        self.inner.list_appointments(from, to).await
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), ApiError> {
        self.inner.append_audit_entry(entry).await
    }

    async fn clear_appointment(&self, _id: &str) -> Result<(), ApiError> {
        // accepted but has no visible effect
        self.remediate("value-clear").await
    }

    async fn delete_appointment_at(&self, id: &str, start: DateTime<Utc>) -> Result<(), ApiError> {
        self.remediate("coordinate-delete").await?;
        self.inner.delete_appointment_at(id, start).await
    }

    async fn purge_range(&self, id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ApiError> {
        self.remediate("range-clear").await?;
        self.inner.purge_range(id, from, to).await
    }

    async fn series_appointments(&self, series_id: &str) -> Result<Vec<Appointment>, ApiError> {
        self.inner.series_appointments(series_id).await
    }
}

fn stored(id: &str) -> Appointment {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    Appointment {
        id: id.to_string(),
        client_id: "c-1".to_string(),
        client_name: String::new(),
        clinician_id: "t-1".to_string(),
        clinician_name: String::new(),
        start_time: start,
        end_time: start + Duration::minutes(50),
        session_type: SessionType::InPerson,
        status: AppointmentStatus::Scheduled,
        office: OfficeCode::from("B-3"),
        assignment: None,
        needs_assignment: false,
        conflicts: vec![],
        source: AppointmentSource::Provider,
        series_id: None,
        notes: None,
        created_at: start,
        last_modified: start,
    }
}

fn verifier(store: Arc<StubbornStore>) -> DeletionVerifier {
    DeletionVerifier::with_budget(store, 2, StdDuration::from_millis(1))
}

#[tokio::test]
async fn test_absent_record_counts_as_deleted() {
    let store = Arc::new(StubbornStore::default());
    assert!(verifier(store).verify_deletion("never-existed").await);
}

#[tokio::test]
async fn test_escalates_until_a_strategy_sticks() {
    let store = Arc::new(StubbornStore::default());
    store.inner.insert(stored("a1")).await;

    let outcome = verifier(store.clone()).delete_verified(&stored("a1")).await;

    assert_eq!(
        outcome,
        DeletionOutcome::Confirmed {
            strategy: Some(RemediationStrategy::CoordinateDelete)
        }
    );
    // value-clear is retried within its budget before escalating
    assert_eq!(
        *store.applied.lock().await,
        vec!["value-clear", "value-clear", "coordinate-delete"]
    );
    assert!(store.get_appointment("a1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_exhausted_strategies_degrade_to_cancelled() {
    let store = Arc::new(StubbornStore {
        fail_remediation: true,
        ..StubbornStore::default()
    });
    store.inner.insert(stored("a1")).await;

    let outcome = verifier(store.clone()).delete_verified(&stored("a1")).await;

    assert_matches!(outcome, DeletionOutcome::Cancelled { ref attempted } if attempted.len() == 3);
    assert!(outcome.is_degraded());
    assert_eq!(store.applied.lock().await.len(), 6);

    let record = store.get_appointment("a1").await.unwrap().expect("kept as cancelled");
    assert_eq!(record.status, AppointmentStatus::Cancelled);
    assert_eq!(record.office, OfficeCode::Unresolved);
}

#[tokio::test]
async fn test_unreachable_store_fails_the_event() {
    let store = Arc::new(StubbornStore {
        fail_remediation: true,
        ..StubbornStore::default()
    });
    store.inner.insert(stored("a1")).await;
    store.fail_upserts.store(true, Ordering::SeqCst);

    let config = TestConfig::default().to_app_config();
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(InMemoryIdempotencyLedger::default()),
        Arc::new(InMemorySchedulingProvider::new()),
        Arc::new(InMemoryProfileDirectory::new()),
        Arc::new(CatalogHandle::from_snapshot(
            AssignmentSnapshot::builtin().expect("Failed to build default rules"),
        )),
        &config,
    )
    .with_deletion_verifier(DeletionVerifier::with_budget(store.clone(), 1, StdDuration::ZERO));

    let event = parse_webhook(&payload_bytes(&json!({"EventType": "AppointmentDeleted", "AppointmentId": "a1"})))
        .expect("Failed to parse webhook");
    let result = orchestrator.process_event(&event).await;

    assert_matches!(result, Err(SyncError::ReconciliationFailure(_)));
    assert_eq!(
        store.inner.audit_entries().await.last().map(|e| e.outcome),
        Some(AuditOutcome::Failed)
    );
}
