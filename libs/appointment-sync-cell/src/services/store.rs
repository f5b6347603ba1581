use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::{ApiError, RestClient};
use shared_models::{Appointment, AppointmentStatus};

use crate::AuditEntry;

/// The external record store. Every write is an upsert or delete keyed by
/// appointment id so it can be applied more than once.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, ApiError>;

    async fn upsert_appointment(&self, record: &Appointment) -> Result<(), ApiError>;

    async fn delete_appointment(&self, id: &str) -> Result<(), ApiError>;

    /// Appointments starting in `[from, to)`.
    async fn list_appointments(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>, ApiError>;

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), ApiError>;

    /// Blank the record's values in place so readers no longer see it.
    async fn clear_appointment(&self, id: &str) -> Result<(), ApiError>;

    /// Delete addressed by id and start time together.
    async fn delete_appointment_at(&self, id: &str, start: DateTime<Utc>) -> Result<(), ApiError>;

    /// Delete every row for `id` starting in `[from, to)`.
    async fn purge_range(&self, id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ApiError>;

    async fn series_appointments(&self, series_id: &str) -> Result<Vec<Appointment>, ApiError>;
}

// ==============================================================================
// REST (PostgREST) STORE
// ==============================================================================

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const AUDIT_PATH: &str = "/rest/v1/appointment_audit";
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=minimal";

pub struct RestRecordStore {
    client: RestClient,
}

impl RestRecordStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::for_record_store(config),
        }
    }

    pub fn with_client(client: RestClient) -> Self {
        Self { client }
    }
}

fn ts(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

fn eq(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, ApiError> {
        // tombstoned rows are invisible
        let path = format!("{}?id=eq.{}&status=neq.deleted&limit=1", APPOINTMENTS_PATH, eq(id));
        let rows: Vec<Appointment> = self.client.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_appointment(&self, record: &Appointment) -> Result<(), ApiError> {
        let body = serde_json::to_value(record).map_err(|e| ApiError::Decode(e.to_string()))?;
        debug!(appointment_id = %record.id, "Upserting appointment in {}", record.office);
        self.client
            .send(Method::POST, APPOINTMENTS_PATH, Some(body), Some(UPSERT_PREFER))
            .await
    }

    async fn delete_appointment(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, eq(id));
        self.client.send(Method::DELETE, &path, None, Some("return=minimal")).await
    }

    async fn list_appointments(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>, ApiError> {
        let path = format!(
            "{}?start_time=gte.{}&start_time=lt.{}&status=neq.deleted&order=start_time.asc",
            APPOINTMENTS_PATH,
            ts(from),
            ts(to)
        );
        self.client.request(Method::GET, &path, None).await
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), ApiError> {
        let body = serde_json::to_value(entry).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.client
            .send(Method::POST, AUDIT_PATH, Some(body), Some("return=minimal"))
            .await
    }

    async fn clear_appointment(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, eq(id));
        let body = json!({
            "status": AppointmentStatus::Deleted,
            "office": null,
            "assignment": null,
            "needs_assignment": false,
            "conflicts": [],
            "notes": null,
            "last_modified": Utc::now(),
        });
        self.client.send(Method::PATCH, &path, Some(body), Some("return=minimal")).await
    }

    async fn delete_appointment_at(&self, id: &str, start: DateTime<Utc>) -> Result<(), ApiError> {
        let path = format!("{}?id=eq.{}&start_time=eq.{}", APPOINTMENTS_PATH, eq(id), ts(start));
        self.client.send(Method::DELETE, &path, None, Some("return=minimal")).await
    }

    async fn purge_range(&self, id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ApiError> {
        let path = format!(
            "{}?id=eq.{}&start_time=gte.{}&start_time=lt.{}",
            APPOINTMENTS_PATH,
            eq(id),
            ts(from),
            ts(to)
        );
        self.client.send(Method::DELETE, &path, None, Some("return=minimal")).await
    }

    async fn series_appointments(&self, series_id: &str) -> Result<Vec<Appointment>, ApiError> {
        let path = format!(
            "{}?series_id=eq.{}&status=neq.deleted&order=start_time.asc",
            APPOINTMENTS_PATH,
            eq(series_id)
        );
        self.client.request(Method::GET, &path, None).await
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Process-local store used when no record store is configured, and in tests.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    appointments: Arc<RwLock<HashMap<String, Appointment>>>,
    audit: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: Appointment) {
        self.appointments.write().await.insert(record.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, ApiError> {
        Ok(self.appointments.read().await.get(id).cloned())
    }

    async fn upsert_appointment(&self, record: &Appointment) -> Result<(), ApiError> {
        self.appointments.write().await.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_appointment(&self, id: &str) -> Result<(), ApiError> {
        self.appointments.write().await.remove(id);
        Ok(())
    }

    async fn list_appointments(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>, ApiError> {
        let mut found: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.start_time >= from && a.start_time < to)
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
        Ok(found)
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), ApiError> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn clear_appointment(&self, id: &str) -> Result<(), ApiError> {
        self.appointments.write().await.remove(id);
        Ok(())
    }

    async fn delete_appointment_at(&self, id: &str, start: DateTime<Utc>) -> Result<(), ApiError> {
        let mut appointments = self.appointments.write().await;
        if appointments.get(id).is_some_and(|a| a.start_time == start) {
            appointments.remove(id);
        }
        Ok(())
    }

    async fn purge_range(&self, id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ApiError> {
        let mut appointments = self.appointments.write().await;
        if appointments.get(id).is_some_and(|a| a.start_time >= from && a.start_time < to) {
            appointments.remove(id);
        }
        Ok(())
    }

    async fn series_appointments(&self, series_id: &str) -> Result<Vec<Appointment>, ApiError> {
        let mut found: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.series_id.as_deref() == Some(series_id))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.start_time);
        Ok(found)
    }
}
