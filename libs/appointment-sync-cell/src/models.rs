use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use office_assignment_cell::Reassignment;
use shared_models::OfficeCode;
use webhook_queue_cell::EventStatus;

// ==============================================================================
// IDEMPOTENCY LEDGER
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub status: EventStatus,
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// ERROR-RECOVERY LEDGER
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailedOperationStatus {
    Pending,
    Abandoned,
}

/// An operation that exhausted its inline retries.
///
/// `payload` is the raw webhook body so a replay goes through the same
/// parse and processing path as the original delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub entity_key: String,
    pub payload: Value,
    pub last_error: String,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: FailedOperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedOperation {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == FailedOperationStatus::Pending && self.next_retry_at <= now
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecoveryReport {
    pub attempted: usize,
    pub recovered: usize,
    pub rescheduled: usize,
    pub abandoned: usize,
}

// ==============================================================================
// ORCHESTRATOR
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStage {
    Received,
    Normalized,
    Assigned,
    ConflictChecked,
    Persisted,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    Persisted { office: OfficeCode, needs_assignment: bool },
    Duplicate,
    NoOp { reason: String },
    Deleted,
    Cancelled { degraded: bool },
    SeriesPersisted { occurrences: usize, needs_assignment: usize },
    ProfileUpdated { client_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entity_key: String,
    pub appointment_id: Option<String>,
    pub fingerprint: String,
    pub stage: SyncStage,
    pub outcome: SyncOutcome,
    pub reassignments: Vec<Reassignment>,
}

// ==============================================================================
// DELETION VERIFIER
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationStrategy {
    /// Blank the row's values in place.
    ValueClear,
    /// Delete by the record's full coordinates (id and start time).
    CoordinateDelete,
    /// Delete everything stored for the id across the surrounding day.
    RangeClear,
}

impl RemediationStrategy {
    pub const ESCALATION: [RemediationStrategy; 3] = [
        RemediationStrategy::ValueClear,
        RemediationStrategy::CoordinateDelete,
        RemediationStrategy::RangeClear,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum DeletionOutcome {
    /// The record is gone. `strategy` is `None` when the plain delete worked.
    Confirmed { strategy: Option<RemediationStrategy> },
    /// Deletion never converged; the record was marked cancelled instead.
    Cancelled { attempted: Vec<RemediationStrategy> },
    /// Neither deletion nor the cancelled fallback could be written.
    Unreachable { error: String },
}

impl DeletionOutcome {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, DeletionOutcome::Confirmed { .. })
    }
}

// ==============================================================================
// AUDIT TRAIL
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuditOutcome {
    Persisted,
    NoOp,
    Deleted,
    Cancelled,
    DegradedCancellation,
    Unresolved,
    ProfileUpdated,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_key: String,
    pub appointment_id: Option<String>,
    pub event_type: String,
    pub fingerprint: String,
    pub outcome: AuditOutcome,
    pub office: Option<OfficeCode>,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ==============================================================================
// RESYNC
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResyncReport {
    pub fetched: usize,
    pub persisted: usize,
    pub released: usize,
    pub skipped: usize,
    pub reassignments: usize,
    pub days_resolved: usize,
}
