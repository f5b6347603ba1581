use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::ApiError;
use shared_models::{Appointment, AppointmentStatus};

use crate::services::store::RecordStore;
use crate::{DeletionOutcome, RemediationStrategy};

/// Confirms deletions against the record store and escalates when a delete
/// did not take.
pub struct DeletionVerifier {
    store: Arc<dyn RecordStore>,
    attempts_per_strategy: u32,
    retry_delay: StdDuration,
}

impl DeletionVerifier {
    pub fn new(store: Arc<dyn RecordStore>, config: &AppConfig) -> Self {
        Self::with_budget(
            store,
            config.retry_max_attempts,
            StdDuration::from_millis(config.retry_base_delay_ms),
        )
    }

    pub fn with_budget(store: Arc<dyn RecordStore>, attempts_per_strategy: u32, retry_delay: StdDuration) -> Self {
        Self {
            store,
            attempts_per_strategy: attempts_per_strategy.max(1),
            retry_delay,
        }
    }

    /// Absent means deleted. A failed read counts as not verified.
    #[instrument(skip(self))]
    pub async fn verify_deletion(&self, appointment_id: &str) -> bool {
        match self.store.get_appointment(appointment_id).await {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(appointment_id = %appointment_id, "Could not verify deletion: {}", e);
                false
            }
        }
    }

    /// Delete, verify, escalate through the remediation strategies, and as a
    /// last resort mark the record cancelled.
    #[instrument(skip(self, record), fields(appointment_id = %record.id))]
    pub async fn delete_verified(&self, record: &Appointment) -> DeletionOutcome {
        match self.store.delete_appointment(&record.id).await {
            Ok(()) if self.verify_deletion(&record.id).await => {
                debug!("Deletion confirmed");
                return DeletionOutcome::Confirmed { strategy: None };
            }
            Ok(()) => warn!("Record still present after delete, escalating"),
            Err(e) => warn!("Delete request failed, escalating: {}", e),
        }

        let mut attempted = Vec::new();
        for strategy in RemediationStrategy::ESCALATION {
            attempted.push(strategy);

            for attempt in 1..=self.attempts_per_strategy {
                match self.apply(strategy, record).await {
                    Ok(()) if self.verify_deletion(&record.id).await => {
                        info!("Deletion confirmed via {:?} on attempt {}", strategy, attempt);
                        return DeletionOutcome::Confirmed { strategy: Some(strategy) };
                    }
                    Ok(()) => debug!("{:?} attempt {} left the record in place", strategy, attempt),
                    Err(e) => debug!("{:?} attempt {} failed: {}", strategy, attempt, e),
                }

                if attempt < self.attempts_per_strategy {
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        }

        let mut cancelled = record.clone();
        cancelled.release(AppointmentStatus::Cancelled);

        match self.store.upsert_appointment(&cancelled).await {
            Ok(()) => {
                warn!("Deletion could not be verified; record marked cancelled instead");
                DeletionOutcome::Cancelled { attempted }
            }
            Err(e) => {
                error!("Deletion and cancelled fallback both failed: {}", e);
                DeletionOutcome::Unreachable { error: e.to_string() }
            }
        }
    }

    async fn apply(&self, strategy: RemediationStrategy, record: &Appointment) -> Result<(), ApiError> {
        match strategy {
            RemediationStrategy::ValueClear => self.store.clear_appointment(&record.id).await,
            RemediationStrategy::CoordinateDelete => {
                self.store.delete_appointment_at(&record.id, record.start_time).await
            }
            RemediationStrategy::RangeClear => {
                let from = record.start_time - Duration::days(1);
                let to = record.end_time + Duration::days(1);
                self.store.purge_range(&record.id, from, to).await
            }
        }
    }
}
