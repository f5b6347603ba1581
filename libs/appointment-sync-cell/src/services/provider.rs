use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::{ApiError, RestClient};
use shared_models::{Appointment, AppointmentSource, AppointmentStatus, OfficeCode, SessionType};
use webhook_queue_cell::{ProviderAppointment, ProviderIntake};

use crate::SyncError;

#[async_trait]
pub trait SchedulingProvider: Send + Sync {
    async fn fetch_appointment(&self, id: &str) -> Result<Option<ProviderAppointment>, ApiError>;

    /// Appointments on the dates `from..=to`.
    async fn list_appointments(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ProviderAppointment>, ApiError>;

    async fn fetch_intake(&self, intake_id: &str) -> Result<Option<ProviderIntake>, ApiError>;
}

pub struct HttpSchedulingProvider {
    client: RestClient,
}

impl HttpSchedulingProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::for_provider(config),
        }
    }

    pub fn with_client(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchedulingProvider for HttpSchedulingProvider {
    async fn fetch_appointment(&self, id: &str) -> Result<Option<ProviderAppointment>, ApiError> {
        let path = format!("/appointments/{}", urlencoding::encode(id));
        self.client.request_optional(Method::GET, &path).await
    }

    async fn list_appointments(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ProviderAppointment>, ApiError> {
        let path = format!(
            "/appointments?startDate={}&endDate={}",
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let appointments: Vec<ProviderAppointment> = self.client.request(Method::GET, &path, None).await?;
        debug!("Provider returned {} appointments for {} to {}", appointments.len(), from, to);
        Ok(appointments)
    }

    async fn fetch_intake(&self, intake_id: &str) -> Result<Option<ProviderIntake>, ApiError> {
        let path = format!("/intakes/{}", urlencoding::encode(intake_id));
        self.client.request_optional(Method::GET, &path).await
    }
}

/// Canned provider for tests and unconfigured deployments.
#[derive(Default)]
pub struct InMemorySchedulingProvider {
    appointments: RwLock<HashMap<String, ProviderAppointment>>,
    intakes: RwLock<HashMap<String, ProviderIntake>>,
}

impl InMemorySchedulingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_appointment(&self, appointment: ProviderAppointment) {
        self.appointments.write().await.insert(appointment.id.clone(), appointment);
    }

    pub async fn add_intake(&self, intake: ProviderIntake) {
        self.intakes.write().await.insert(intake.id.clone(), intake);
    }
}

#[async_trait]
impl SchedulingProvider for InMemorySchedulingProvider {
    async fn fetch_appointment(&self, id: &str) -> Result<Option<ProviderAppointment>, ApiError> {
        Ok(self.appointments.read().await.get(id).cloned())
    }

    async fn list_appointments(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ProviderAppointment>, ApiError> {
        let mut found: Vec<ProviderAppointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.start().is_some_and(|s| s.date_naive() >= from && s.date_naive() <= to))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn fetch_intake(&self, intake_id: &str) -> Result<Option<ProviderIntake>, ApiError> {
        Ok(self.intakes.read().await.get(intake_id).cloned())
    }
}

// ==============================================================================
// NORMALIZATION
// ==============================================================================

/// Turn a provider appointment into a local record with no office yet.
///
/// Missing identity or timing fields are validation errors; the provider's
/// location label only feeds modality inference, never the office.
pub fn to_appointment(provider: &ProviderAppointment, fallback_client: Option<&str>) -> Result<Appointment, SyncError> {
    let client_id = provider
        .client_id
        .clone()
        .or_else(|| fallback_client.map(str::to_string))
        .ok_or_else(|| SyncError::Validation(format!("appointment {} has no client id", provider.id)))?;

    let clinician_id = provider
        .practitioner_id
        .clone()
        .ok_or_else(|| SyncError::Validation(format!("appointment {} has no practitioner id", provider.id)))?;

    let start_time = provider
        .start()
        .ok_or_else(|| SyncError::Validation(format!("appointment {} has no start time", provider.id)))?;
    let end_time = provider
        .end()
        .ok_or_else(|| SyncError::Validation(format!("appointment {} has no end time or duration", provider.id)))?;

    let session_type = provider
        .session_type
        .as_deref()
        .and_then(SessionType::parse)
        .unwrap_or_else(|| SessionType::infer(provider.service_name.as_deref(), provider.location_name.as_deref()));

    let status = match provider.status.as_deref() {
        None => AppointmentStatus::Scheduled,
        Some(raw) => AppointmentStatus::from_provider(raw).unwrap_or_else(|| {
            warn!(appointment_id = %provider.id, "Unknown provider status '{}', treating as scheduled", raw);
            AppointmentStatus::Scheduled
        }),
    };

    let now = Utc::now();
    let appointment = Appointment {
        id: provider.id.clone(),
        client_id,
        client_name: provider.client_name.clone().unwrap_or_default(),
        clinician_id,
        clinician_name: provider.practitioner_name.clone().unwrap_or_default(),
        start_time,
        end_time,
        session_type,
        status,
        office: OfficeCode::Unresolved,
        assignment: None,
        needs_assignment: false,
        conflicts: Vec::new(),
        source: AppointmentSource::Provider,
        series_id: None,
        notes: provider.notes.clone(),
        created_at: provider.created_at().unwrap_or(now),
        last_modified: now,
    };

    appointment.validate().map_err(SyncError::Validation)?;
    Ok(appointment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn provider(id: &str) -> ProviderAppointment {
        ProviderAppointment {
            id: id.to_string(),
            client_id: Some("c-1".to_string()),
            practitioner_id: Some("t-1".to_string()),
            start_date_iso: Some("2026-03-02T09:00:00Z".to_string()),
            duration: Some(50),
            service_name: Some("Individual Therapy".to_string()),
            location_name: Some("Office B4".to_string()),
            ..ProviderAppointment::default()
        }
    }

    #[test]
    fn test_normalized_record_has_no_office() {
        let appt = to_appointment(&provider("a1"), None).unwrap();
        assert_eq!(appt.office, OfficeCode::Unresolved);
        assert_eq!(appt.session_type, SessionType::InPerson);
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
        assert_eq!(appt.duration(), chrono::Duration::minutes(50));
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let mut no_clinician = provider("a1");
        no_clinician.practitioner_id = None;
        assert_matches!(to_appointment(&no_clinician, None), Err(SyncError::Validation(_)));

        let mut no_start = provider("a2");
        no_start.start_date_iso = None;
        assert_matches!(to_appointment(&no_start, None), Err(SyncError::Validation(_)));

        let mut no_client = provider("a3");
        no_client.client_id = None;
        assert_matches!(to_appointment(&no_client, None), Err(SyncError::Validation(_)));
        assert_eq!(to_appointment(&no_client, Some("c-9")).unwrap().client_id, "c-9");
    }

    #[test]
    fn test_telehealth_location_sets_modality() {
        let mut virtual_visit = provider("a1");
        virtual_visit.location_name = Some("Telehealth".to_string());
        assert_eq!(to_appointment(&virtual_visit, None).unwrap().session_type, SessionType::Telehealth);
    }
}
