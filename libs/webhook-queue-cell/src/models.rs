use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_config::AppConfig;

// ==============================================================================
// PROVIDER PAYLOADS
// ==============================================================================

/// Appointment as the scheduling provider sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderAppointment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub practitioner_id: Option<String>,
    #[serde(default)]
    pub practitioner_name: Option<String>,
    #[serde(default)]
    pub start_date_iso: Option<String>,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub start_date: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub end_date: Option<i64>,
    /// Minutes.
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub date_created: Option<i64>,
    #[serde(default)]
    pub is_recurring: Option<bool>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceSpec>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ProviderAppointment {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        parse_instant(self.start_date_iso.as_deref(), self.start_date)
    }

    /// Explicit end, else start plus `Duration`. A duration that does not
    /// fit the calendar yields `None`.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        parse_instant(self.end_date_iso.as_deref(), self.end_date).or_else(|| {
            let minutes = Duration::try_minutes(self.duration.filter(|d| *d > 0)?)?;
            self.start()?.checked_add_signed(minutes)
        })
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.date_created.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl RecurrenceFrequency {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "").as_str() {
            "weekly" | "everyweek" => Some(RecurrenceFrequency::Weekly),
            "biweekly" | "everyotherweek" | "fortnightly" => Some(RecurrenceFrequency::Biweekly),
            "monthly" | "everymonth" => Some(RecurrenceFrequency::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RecurrenceSpec {
    pub frequency: RecurrenceFrequency,
    #[serde(default)]
    pub occurrences: Option<u32>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

/// Intake form answers relevant to office assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderIntake {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub questions: Vec<IntakeAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct IntakeAnswer {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub answer: Option<String>,
}

// ==============================================================================
// TAGGED EVENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    Created,
    Updated,
    Rescheduled,
    Cancelled,
    Deleted,
    FormSubmitted,
}

impl WebhookEventType {
    /// Match the provider's event names regardless of case, spacing and spelling of "cancelled".
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "appointmentcreated" | "created" | "appointmentbooked" => Some(WebhookEventType::Created),
            "appointmentupdated" | "updated" | "appointmentconfirmed" => Some(WebhookEventType::Updated),
            "appointmentrescheduled" | "rescheduled" => Some(WebhookEventType::Rescheduled),
            "appointmentcancelled" | "appointmentcanceled" | "cancelled" | "canceled" => {
                Some(WebhookEventType::Cancelled)
            }
            "appointmentdeleted" | "deleted" => Some(WebhookEventType::Deleted),
            "formsubmitted" | "intakesubmitted" | "intakeformsubmitted" => Some(WebhookEventType::FormSubmitted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::Created => "created",
            WebhookEventType::Updated => "updated",
            WebhookEventType::Rescheduled => "rescheduled",
            WebhookEventType::Cancelled => "cancelled",
            WebhookEventType::Deleted => "deleted",
            WebhookEventType::FormSubmitted => "form_submitted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentEvent {
    pub appointment_id: String,
    pub client_id: Option<String>,
    pub appointment: Option<ProviderAppointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntakeEvent {
    pub intake_id: String,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum ProviderEvent {
    AppointmentCreated(AppointmentEvent),
    AppointmentUpdated(AppointmentEvent),
    AppointmentRescheduled(AppointmentEvent),
    AppointmentCancelled(AppointmentEvent),
    AppointmentDeleted(AppointmentEvent),
    FormSubmitted(IntakeEvent),
}

impl ProviderEvent {
    pub fn event_type(&self) -> WebhookEventType {
        match self {
            ProviderEvent::AppointmentCreated(_) => WebhookEventType::Created,
            ProviderEvent::AppointmentUpdated(_) => WebhookEventType::Updated,
            ProviderEvent::AppointmentRescheduled(_) => WebhookEventType::Rescheduled,
            ProviderEvent::AppointmentCancelled(_) => WebhookEventType::Cancelled,
            ProviderEvent::AppointmentDeleted(_) => WebhookEventType::Deleted,
            ProviderEvent::FormSubmitted(_) => WebhookEventType::FormSubmitted,
        }
    }

    pub fn appointment_event(&self) -> Option<&AppointmentEvent> {
        match self {
            ProviderEvent::AppointmentCreated(e)
            | ProviderEvent::AppointmentUpdated(e)
            | ProviderEvent::AppointmentRescheduled(e)
            | ProviderEvent::AppointmentCancelled(e)
            | ProviderEvent::AppointmentDeleted(e) => Some(e),
            ProviderEvent::FormSubmitted(_) => None,
        }
    }

    /// Key used to serialize processing: all events of one appointment share it.
    pub fn entity_key(&self) -> String {
        match self {
            ProviderEvent::FormSubmitted(intake) => match &intake.client_id {
                Some(client_id) => format!("client:{}", client_id),
                None => format!("intake:{}", intake.intake_id),
            },
            other => match other.appointment_event() {
                Some(e) => format!("appointment:{}", e.appointment_id),
                None => String::new(),
            },
        }
    }
}

/// A verified, parsed webhook travelling through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub fingerprint: String,
    pub event_type: WebhookEventType,
    pub entity_key: String,
    pub payload: ProviderEvent,
    pub raw: Value,
    pub received_at: DateTime<Utc>,
    /// When re-submitted from the recovery ledger: the time the original
    /// failure was recorded.
    #[serde(default)]
    pub replay_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processing,
    Completed,
    Failed,
}

// ==============================================================================
// DISPATCHER CONFIGURATION & STATS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(8),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_pending_per_entity: usize,
    /// Entities drained at the same time; 0 means unbounded.
    pub max_concurrent_entities: usize,
    pub event_timeout: StdDuration,
    pub shutdown_timeout: StdDuration,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_pending_per_entity: 32,
            max_concurrent_entities: 0,
            event_timeout: StdDuration::from_secs(60),
            shutdown_timeout: StdDuration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_pending_per_entity: config.queue_max_pending_per_entity.max(1),
            max_concurrent_entities: config.queue_max_concurrent_entities,
            event_timeout: StdDuration::from_secs(config.event_timeout_seconds),
            shutdown_timeout: StdDuration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts.max(1),
                base_delay: StdDuration::from_millis(config.retry_base_delay_ms),
                max_delay: StdDuration::from_millis(config.retry_max_delay_ms),
                jitter: true,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub processed: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
    pub active_entities: usize,
    pub pending_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub event_id: Uuid,
    pub entity_key: String,
    pub position: usize,
    pub dropped_event: Option<Uuid>,
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn parse_instant(iso: Option<&str>, epoch_ms: Option<i64>) -> Option<DateTime<Utc>> {
    iso.and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| epoch_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
}

fn value_to_id(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_to_id(value).ok_or_else(|| serde::de::Error::custom("expected a non-empty string or number id"))
}

pub(crate) fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_id))
}
