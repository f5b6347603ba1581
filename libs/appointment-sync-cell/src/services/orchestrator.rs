// libs/appointment-sync-cell/src/services/orchestrator.rs
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use office_assignment_cell::{
    AssignmentEngine, AssignmentSnapshot, CatalogHandle, ClientProfile, ClinicianProfile, ConflictResolver,
    ProfileSnapshot, Reassignment,
};
use shared_config::AppConfig;
use shared_models::{Appointment, AppointmentSource, AppointmentStatus, OfficeCode};
use webhook_queue_cell::{
    AppointmentEvent, EventHandler, EventStatus, HandlerError, IntakeEvent, ProviderEvent, RecurrenceSpec,
    WebhookEvent,
};

use crate::services::deletion::DeletionVerifier;
use crate::services::directory::{profile_from_intake, ProfileDirectory};
use crate::services::idempotency::IdempotencyLedger;
use crate::services::provider::{to_appointment, SchedulingProvider};
use crate::services::recurring::{expand_series, infer_recurrence};
use crate::services::store::RecordStore;
use crate::{
    AuditEntry, AuditOutcome, DeletionOutcome, ResyncReport, SyncError, SyncOutcome, SyncReport, SyncStage,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Cancellations remove the record instead of keeping a cancelled row.
    pub hard_delete_cancellations: bool,
    pub recurring_horizon_weeks: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hard_delete_cancellations: config.hard_delete_cancellations,
            recurring_horizon_weeks: config.recurring_horizon_weeks,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Drives provider events through normalize, assign, conflict-check and
/// persist. The only component that mutates appointment records.
pub struct SyncOrchestrator {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    provider: Arc<dyn SchedulingProvider>,
    directory: Arc<dyn ProfileDirectory>,
    catalog: Arc<CatalogHandle>,
    deletion: DeletionVerifier,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        provider: Arc<dyn SchedulingProvider>,
        directory: Arc<dyn ProfileDirectory>,
        catalog: Arc<CatalogHandle>,
        config: &AppConfig,
    ) -> Self {
        Self {
            deletion: DeletionVerifier::new(store.clone(), config),
            store,
            ledger,
            provider,
            directory,
            catalog,
            settings: OrchestratorSettings::from_config(config),
        }
    }

    pub fn with_deletion_verifier(mut self, deletion: DeletionVerifier) -> Self {
        self.deletion = deletion;
        self
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    /// Process one webhook event at most once per fingerprint.
    #[instrument(skip(self, event), fields(entity_key = %event.entity_key, fingerprint = %event.fingerprint))]
    pub async fn process_event(&self, event: &WebhookEvent) -> Result<SyncReport, SyncError> {
        if self.ledger.is_processed(&event.fingerprint).await {
            info!("Duplicate {} event, already processed", event.event_type.as_str());
            let report = self.report(event, None, SyncOutcome::Duplicate, Vec::new());
            self.audit(event, &report).await;
            return Ok(report);
        }

        if let Some(recorded_at) = event.replay_recorded_at {
            if self.superseded(event, recorded_at).await? {
                info!("Dropping replayed {} event, a newer event has been applied", event.event_type.as_str());
                let outcome = SyncOutcome::NoOp {
                    reason: "superseded by a newer event".to_string(),
                };
                let report = self.report(event, None, outcome, Vec::new());
                self.audit(event, &report).await;
                return Ok(report);
            }
        }

        if let Err(e) = self.ledger.mark_status(&event.fingerprint, EventStatus::Processing, None).await {
            warn!("Could not mark event as processing, continuing: {}", e);
        }
        debug!(stage = ?SyncStage::Received, "Processing {} event", event.event_type.as_str());

        match self.dispatch(event).await {
            Ok(report) => {
                if let Err(e) = self.ledger.mark_status(&event.fingerprint, EventStatus::Completed, None).await {
                    warn!("Could not mark event as completed: {}", e);
                }
                if let Err(e) = self.ledger.record_applied(&event.entity_key, Utc::now()).await {
                    warn!("Could not record applied event: {}", e);
                }
                debug!(stage = ?SyncStage::Acknowledged, "Event acknowledged");
                self.audit(event, &report).await;
                Ok(report)
            }
            Err(e) => {
                let detail = e.to_string();
                if let Err(ledger_err) = self
                    .ledger
                    .mark_status(&event.fingerprint, EventStatus::Failed, Some(&detail))
                    .await
                {
                    warn!("Could not mark event as failed: {}", ledger_err);
                }
                warn!(stage = ?SyncStage::Failed, "Event processing failed: {}", e);
                // transient failures are retried; only final-looking ones are audited
                if !e.is_transient() {
                    self.audit_failure(event, &detail).await;
                }
                Err(e)
            }
        }
    }

    /// Whether an event for the same entity was applied after the failure
    /// this replay stands for. Without an answer the replay waits.
    async fn superseded(&self, event: &WebhookEvent, recorded_at: DateTime<Utc>) -> Result<bool, SyncError> {
        let last_applied = self.ledger.last_applied(&event.entity_key).await?;
        Ok(last_applied.is_some_and(|applied| applied > recorded_at))
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<SyncReport, SyncError> {
        match &event.payload {
            ProviderEvent::AppointmentCreated(e)
            | ProviderEvent::AppointmentUpdated(e)
            | ProviderEvent::AppointmentRescheduled(e) => self.upsert_from_event(event, e).await,
            ProviderEvent::AppointmentCancelled(e) => {
                self.remove(event, &e.appointment_id, AppointmentStatus::Cancelled).await
            }
            ProviderEvent::AppointmentDeleted(e) => self.remove(event, &e.appointment_id, AppointmentStatus::Deleted).await,
            ProviderEvent::FormSubmitted(intake) => self.apply_intake(event, intake).await,
        }
    }

    // ==========================================================================
    // CREATE / UPDATE / RESCHEDULE
    // ==========================================================================

    async fn upsert_from_event(&self, event: &WebhookEvent, e: &AppointmentEvent) -> Result<SyncReport, SyncError> {
        let provider_appt = match &e.appointment {
            Some(appt) => appt.clone(),
            None => self
                .provider
                .fetch_appointment(&e.appointment_id)
                .await?
                .ok_or_else(|| {
                    SyncError::Validation(format!("appointment {} not found at provider", e.appointment_id))
                })?,
        };

        let incoming = to_appointment(&provider_appt, e.client_id.as_deref())?;
        debug!(stage = ?SyncStage::Normalized, appointment_id = %incoming.id, "Normalized appointment");

        if incoming.status.is_terminal() {
            info!(appointment_id = %incoming.id, "Provider reports {:?}, routing to removal", incoming.status);
            return self.remove(event, &incoming.id, incoming.status).await;
        }

        if let Some(spec) = infer_recurrence(&provider_appt) {
            return self.persist_series(event, incoming, &spec).await;
        }

        let snapshot = self.catalog.snapshot().await;
        let (record, reassignments) = self.persist_one(incoming, &snapshot).await?;

        let outcome = SyncOutcome::Persisted {
            office: record.office.clone(),
            needs_assignment: record.needs_assignment,
        };
        Ok(self.report(event, Some(record.id), outcome, reassignments))
    }

    /// Place, conflict-check and upsert a single record.
    async fn persist_one(
        &self,
        incoming: Appointment,
        snapshot: &AssignmentSnapshot,
    ) -> Result<(Appointment, Vec<Reassignment>), SyncError> {
        let existing = self.store.get_appointment(&incoming.id).await?;
        let placed = self.place(incoming, existing.as_ref(), snapshot).await?;
        debug!(stage = ?SyncStage::Assigned, appointment_id = %placed.id, "Office {}", placed.office);

        let (record, reassignments) = self.check_conflicts(placed, snapshot).await?;
        debug!(
            stage = ?SyncStage::Persisted,
            appointment_id = %record.id,
            "Persisted in {} with {} reassignments",
            record.office,
            reassignments.len()
        );
        Ok((record, reassignments))
    }

    async fn place(
        &self,
        mut incoming: Appointment,
        existing: Option<&Appointment>,
        snapshot: &AssignmentSnapshot,
    ) -> Result<Appointment, SyncError> {
        if let Some(current) = existing {
            incoming.created_at = current.created_at;
            if incoming.series_id.is_none() {
                incoming.series_id = current.series_id.clone();
            }

            if keeps_office(current, &incoming) {
                debug!(appointment_id = %incoming.id, "Keeping office {} ({:?})", current.office, current.source);
                incoming.office = current.office.clone();
                incoming.assignment = current.assignment.clone();
                incoming.source = current.source;
                return Ok(incoming);
            }
        }

        let (client, clinician) = self.profiles_for(&incoming).await?;
        let result = AssignmentEngine::new(&snapshot.catalog, &snapshot.rules).assign(&incoming, &client, &clinician);

        if result.is_resolved() {
            incoming.office = result.office.clone();
            incoming.assignment = result.reason();
            incoming.needs_assignment = false;
        } else {
            warn!(appointment_id = %incoming.id, "No office could be assigned; flagged for manual assignment");
            incoming.office = OfficeCode::Unresolved;
            incoming.assignment = None;
            incoming.needs_assignment = true;
        }
        incoming.source = AppointmentSource::Provider;
        Ok(incoming)
    }

    /// Resolve the record's UTC day with the record merged in, then upsert
    /// the record and everything the resolver moved.
    async fn check_conflicts(
        &self,
        record: Appointment,
        snapshot: &AssignmentSnapshot,
    ) -> Result<(Appointment, Vec<Reassignment>), SyncError> {
        if !record.holds_office() {
            self.store.upsert_appointment(&record).await?;
            return Ok((record, Vec::new()));
        }

        let (from, to) = day_bounds(record.day());
        let mut day: Vec<Appointment> = self
            .store
            .list_appointments(from, to)
            .await?
            .into_iter()
            .filter(|a| a.id != record.id)
            .collect();
        day.push(record.clone());

        let reassignments = self.resolve_in_place(&mut day, snapshot).await?;
        debug!(stage = ?SyncStage::ConflictChecked, appointment_id = %record.id, "Day {} checked", record.day());

        let moved: HashSet<String> = reassignments.iter().map(|r| r.appointment_id.clone()).collect();
        for other in day.iter().filter(|a| a.id != record.id && moved.contains(&a.id)) {
            self.store.upsert_appointment(other).await?;
        }

        let record = day.into_iter().find(|a| a.id == record.id).unwrap_or(record);
        self.store.upsert_appointment(&record).await?;
        Ok((record, reassignments))
    }

    async fn resolve_in_place(
        &self,
        day: &mut [Appointment],
        snapshot: &AssignmentSnapshot,
    ) -> Result<Vec<Reassignment>, SyncError> {
        let profiles = self.profile_snapshot(day).await?;
        let resolver = ConflictResolver::new(AssignmentEngine::new(&snapshot.catalog, &snapshot.rules));
        Ok(resolver.resolve(day, &profiles))
    }

    // ==========================================================================
    // RECURRING SERIES
    // ==========================================================================

    async fn persist_series(
        &self,
        event: &WebhookEvent,
        base: Appointment,
        spec: &RecurrenceSpec,
    ) -> Result<SyncReport, SyncError> {
        let occurrences = expand_series(&base, spec, self.settings.recurring_horizon_weeks);
        info!(
            appointment_id = %base.id,
            "Materializing {:?} series with {} occurrences",
            spec.frequency,
            occurrences.len()
        );

        let snapshot = self.catalog.snapshot().await;
        let wanted: HashSet<String> = occurrences.iter().map(|o| o.id.clone()).collect();

        let mut reassignments = Vec::new();
        let mut flagged = 0;
        let count = occurrences.len();
        for occurrence in occurrences {
            let (record, mut moved) = self.persist_one(occurrence, &snapshot).await?;
            if record.needs_assignment {
                flagged += 1;
            }
            reassignments.append(&mut moved);
        }

        // future occurrences no longer produced by the series
        let now = Utc::now();
        for stale in self.store.series_appointments(&base.id).await? {
            if !wanted.contains(&stale.id) && stale.start_time > now {
                debug!(appointment_id = %stale.id, "Removing stale series occurrence");
                self.store.delete_appointment(&stale.id).await?;
            }
        }

        let outcome = SyncOutcome::SeriesPersisted {
            occurrences: count,
            needs_assignment: flagged,
        };
        Ok(self.report(event, Some(base.id), outcome, reassignments))
    }

    // ==========================================================================
    // CANCEL / DELETE
    // ==========================================================================

    /// Cancel or delete an appointment together with the not-yet-finished
    /// occurrences of the series it heads.
    async fn remove(
        &self,
        event: &WebhookEvent,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<SyncReport, SyncError> {
        let id = Some(appointment_id.to_string());

        let now = Utc::now();
        let mut targets: Vec<Appointment> = self.store.get_appointment(appointment_id).await?.into_iter().collect();
        targets.extend(
            self.store
                .series_appointments(appointment_id)
                .await?
                .into_iter()
                .filter(|o| o.id != appointment_id && o.end_time > now),
        );

        if targets.is_empty() {
            info!(appointment_id = %appointment_id, "Nothing stored to remove; no-op");
            let outcome = SyncOutcome::NoOp {
                reason: "appointment not found".to_string(),
            };
            return Ok(self.report(event, id, outcome, Vec::new()));
        }
        if targets.len() > 1 {
            info!(appointment_id = %appointment_id, "Removing {} records of the series", targets.len());
        }

        let hard_delete = status == AppointmentStatus::Deleted || self.settings.hard_delete_cancellations;
        let mut changed = false;
        let mut degraded = false;

        for mut record in targets {
            if !hard_delete {
                if record.status != status {
                    record.release(status);
                    self.store.upsert_appointment(&record).await?;
                    changed = true;
                }
                continue;
            }

            match self.deletion.delete_verified(&record).await {
                DeletionOutcome::Confirmed { .. } => {
                    debug!(appointment_id = %record.id, "Appointment deleted");
                }
                DeletionOutcome::Cancelled { attempted } => {
                    warn!(
                        appointment_id = %record.id,
                        "Degraded cancellation after {} remediation strategies",
                        attempted.len()
                    );
                    degraded = true;
                }
                DeletionOutcome::Unreachable { error } => {
                    return Err(SyncError::ReconciliationFailure(format!(
                        "appointment {} could be neither deleted nor cancelled: {}",
                        record.id, error
                    )));
                }
            }
            changed = true;
        }

        let outcome = if !changed {
            SyncOutcome::NoOp {
                reason: format!("already {:?}", status).to_lowercase(),
            }
        } else if hard_delete && !degraded {
            info!(appointment_id = %appointment_id, "Appointment deleted");
            SyncOutcome::Deleted
        } else {
            info!(appointment_id = %appointment_id, "Appointment marked {:?}", status);
            SyncOutcome::Cancelled { degraded }
        };

        Ok(self.report(event, id, outcome, Vec::new()))
    }

    // ==========================================================================
    // INTAKE FORMS
    // ==========================================================================

    async fn apply_intake(&self, event: &WebhookEvent, intake: &IntakeEvent) -> Result<SyncReport, SyncError> {
        let form = self
            .provider
            .fetch_intake(&intake.intake_id)
            .await?
            .ok_or_else(|| SyncError::Validation(format!("intake {} not found at provider", intake.intake_id)))?;

        let client_id = form
            .client_id
            .clone()
            .or_else(|| intake.client_id.clone())
            .ok_or_else(|| SyncError::Validation(format!("intake {} has no client", intake.intake_id)))?;

        let existing = self.directory.client_profile(&client_id).await?;
        let profile = profile_from_intake(&form, &client_id, existing);
        self.directory.upsert_client_profile(&profile).await?;

        info!(client_id = %client_id, "Client profile updated from intake {}", intake.intake_id);
        Ok(self.report(event, None, SyncOutcome::ProfileUpdated { client_id }, Vec::new()))
    }

    // ==========================================================================
    // SCHEDULED ENTRY POINTS
    // ==========================================================================

    /// Pull the provider's next `days_ahead` days through the same
    /// normalize/assign/persist path, then resolve every touched day.
    #[instrument(skip(self))]
    pub async fn run_resync(&self, days_ahead: i64) -> Result<ResyncReport, SyncError> {
        let today = Utc::now().date_naive();
        let until = today + Duration::days(days_ahead.max(0));
        let appointments = self.provider.list_appointments(today, until).await?;
        let snapshot = self.catalog.snapshot().await;

        let mut report = ResyncReport {
            fetched: appointments.len(),
            ..ResyncReport::default()
        };
        let mut touched = BTreeSet::new();

        for provider_appt in &appointments {
            let incoming = match to_appointment(provider_appt, None) {
                Ok(appt) => appt,
                Err(e) => {
                    warn!(appointment_id = %provider_appt.id, "Skipping provider appointment: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };

            let existing = self.store.get_appointment(&incoming.id).await?;

            if incoming.status.is_terminal() {
                if let Some(mut current) = existing.filter(|a| a.is_active()) {
                    current.release(incoming.status);
                    self.store.upsert_appointment(&current).await?;
                    report.released += 1;
                }
                continue;
            }

            let placed = self.place(incoming, existing.as_ref(), &snapshot).await?;
            touched.insert(placed.day());
            self.store.upsert_appointment(&placed).await?;
            report.persisted += 1;
        }

        for day in touched {
            report.reassignments += self.resolve_day(day).await?.len();
            report.days_resolved += 1;
        }

        info!(
            "Resync complete: {} fetched, {} persisted, {} released, {} skipped, {} reassignments",
            report.fetched, report.persisted, report.released, report.skipped, report.reassignments
        );
        Ok(report)
    }

    /// Run the conflict resolver over one stored UTC day.
    #[instrument(skip(self))]
    pub async fn resolve_day(&self, day: NaiveDate) -> Result<Vec<Reassignment>, SyncError> {
        let (from, to) = day_bounds(day);
        let mut appointments = self.store.list_appointments(from, to).await?;
        let snapshot = self.catalog.snapshot().await;

        let reassignments = self.resolve_in_place(&mut appointments, &snapshot).await?;
        let moved: HashSet<&str> = reassignments.iter().map(|r| r.appointment_id.as_str()).collect();
        for appt in appointments.iter().filter(|a| moved.contains(a.id.as_str())) {
            self.store.upsert_appointment(appt).await?;
        }
        Ok(reassignments)
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn profiles_for(&self, appt: &Appointment) -> Result<(ClientProfile, ClinicianProfile), SyncError> {
        let client = self
            .directory
            .client_profile(&appt.client_id)
            .await?
            .unwrap_or_else(|| ClientProfile::unknown(&appt.client_id));
        let clinician = self
            .directory
            .clinician_profile(&appt.clinician_id)
            .await?
            .unwrap_or_else(|| ClinicianProfile::unknown(&appt.clinician_id));
        Ok((client, clinician))
    }

    async fn profile_snapshot(&self, day: &[Appointment]) -> Result<ProfileSnapshot, SyncError> {
        let client_ids: BTreeSet<&str> = day.iter().map(|a| a.client_id.as_str()).collect();
        let clinician_ids: BTreeSet<&str> = day.iter().map(|a| a.clinician_id.as_str()).collect();

        let clients = try_join_all(client_ids.iter().map(|id| self.directory.client_profile(id))).await?;
        let clinicians = try_join_all(clinician_ids.iter().map(|id| self.directory.clinician_profile(id))).await?;

        let mut snapshot = ProfileSnapshot::new();
        clients.into_iter().flatten().for_each(|p| snapshot.insert_client(p));
        clinicians.into_iter().flatten().for_each(|p| snapshot.insert_clinician(p));
        Ok(snapshot)
    }

    fn report(
        &self,
        event: &WebhookEvent,
        appointment_id: Option<String>,
        outcome: SyncOutcome,
        reassignments: Vec<Reassignment>,
    ) -> SyncReport {
        SyncReport {
            entity_key: event.entity_key.clone(),
            appointment_id,
            fingerprint: event.fingerprint.clone(),
            stage: SyncStage::Acknowledged,
            outcome,
            reassignments,
        }
    }

    async fn audit(&self, event: &WebhookEvent, report: &SyncReport) {
        let (outcome, office, detail) = match &report.outcome {
            SyncOutcome::Persisted { office, needs_assignment: true } => (
                AuditOutcome::Unresolved,
                Some(office.clone()),
                Some(SyncError::UnresolvedAssignment("flagged for manual assignment".to_string()).to_string()),
            ),
            SyncOutcome::Persisted { office, .. } => (AuditOutcome::Persisted, Some(office.clone()), None),
            SyncOutcome::Duplicate => (AuditOutcome::NoOp, None, Some("duplicate event".to_string())),
            SyncOutcome::NoOp { reason } => (AuditOutcome::NoOp, None, Some(reason.clone())),
            SyncOutcome::Deleted => (AuditOutcome::Deleted, None, None),
            SyncOutcome::Cancelled { degraded: true } => (
                AuditOutcome::DegradedCancellation,
                None,
                Some("deletion not verified; marked cancelled".to_string()),
            ),
            SyncOutcome::Cancelled { degraded: false } => (AuditOutcome::Cancelled, None, None),
            SyncOutcome::SeriesPersisted { occurrences, needs_assignment } => {
                let outcome = if *needs_assignment > 0 {
                    AuditOutcome::Unresolved
                } else {
                    AuditOutcome::Persisted
                };
                let detail = format!("{} occurrences, {} need assignment", occurrences, needs_assignment);
                (outcome, None, Some(detail))
            }
            SyncOutcome::ProfileUpdated { client_id } => {
                (AuditOutcome::ProfileUpdated, None, Some(format!("client {}", client_id)))
            }
        };

        self.write_audit(event, report.appointment_id.clone(), outcome, office, detail).await;
    }

    async fn audit_failure(&self, event: &WebhookEvent, detail: &str) {
        let appointment_id = event.payload.appointment_event().map(|e| e.appointment_id.clone());
        self.write_audit(event, appointment_id, AuditOutcome::Failed, None, Some(detail.to_string()))
            .await;
    }

    async fn write_audit(
        &self,
        event: &WebhookEvent,
        appointment_id: Option<String>,
        outcome: AuditOutcome,
        office: Option<OfficeCode>,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            entity_key: event.entity_key.clone(),
            appointment_id,
            event_type: event.event_type.as_str().to_string(),
            fingerprint: event.fingerprint.clone(),
            outcome,
            office,
            detail,
            recorded_at: Utc::now(),
        };

        if let Err(e) = self.store.append_audit_entry(&entry).await {
            warn!("Failed to write audit entry ({:?}): {}", outcome, e);
        }
    }
}

/// Whether an existing placement survives an update.
///
/// Manual placements survive anything that leaves time, clinician and
/// modality alone; rule placements need every scheduling input unchanged.
fn keeps_office(current: &Appointment, incoming: &Appointment) -> bool {
    if !current.office.is_resolved() || current.needs_assignment {
        return false;
    }
    match current.source {
        AppointmentSource::Manual => {
            current.start_time == incoming.start_time
                && current.end_time == incoming.end_time
                && current.clinician_id == incoming.clinician_id
                && current.session_type == incoming.session_type
        }
        AppointmentSource::Provider => !current.scheduling_inputs_changed(incoming),
    }
}

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = day.and_time(NaiveTime::MIN).and_utc();
    (from, from + Duration::days(1))
}

#[async_trait]
impl EventHandler for SyncOrchestrator {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let report = self.process_event(event).await.map_err(HandlerError::from)?;
        debug!(entity_key = %report.entity_key, "Handled: {:?}", report.outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared_models::{AssignmentReason, SessionType};

    fn stored(source: AppointmentSource) -> Appointment {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Appointment {
            id: "a1".to_string(),
            client_id: "c".to_string(),
            client_name: String::new(),
            clinician_id: "t".to_string(),
            clinician_name: String::new(),
            start_time: start,
            end_time: start + Duration::minutes(50),
            session_type: SessionType::InPerson,
            status: AppointmentStatus::Scheduled,
            office: OfficeCode::from("C-3"),
            assignment: Some(AssignmentReason {
                rule: "manual".to_string(),
                priority: 0,
            }),
            needs_assignment: false,
            conflicts: vec![],
            source,
            series_id: None,
            notes: None,
            created_at: start,
            last_modified: start,
        }
    }

    #[test]
    fn test_manual_placement_survives_client_change_but_not_reschedule() {
        let current = stored(AppointmentSource::Manual);

        let mut renamed = current.clone();
        renamed.client_id = "other".to_string();
        assert!(keeps_office(&current, &renamed));

        let mut moved = current.clone();
        moved.start_time = moved.start_time + Duration::hours(1);
        moved.end_time = moved.end_time + Duration::hours(1);
        assert!(!keeps_office(&current, &moved));
    }

    #[test]
    fn test_rule_placement_needs_unchanged_inputs() {
        let current = stored(AppointmentSource::Provider);
        assert!(keeps_office(&current, &current.clone()));

        let mut reassigned_client = current.clone();
        reassigned_client.client_id = "other".to_string();
        assert!(!keeps_office(&current, &reassigned_client));
    }

    #[test]
    fn test_day_bounds_are_utc_midnights() {
        let (from, to) = day_bounds(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(to - from, Duration::days(1));
    }
}
