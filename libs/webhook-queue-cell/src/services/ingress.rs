use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::models::opt_string_or_number;
use crate::{
    AppointmentEvent, IntakeEvent, ProviderAppointment, ProviderEvent, QueueError, WebhookEvent,
    WebhookEventType,
};

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "EventType", default)]
    event_type: Option<String>,
    #[serde(rename = "Type", default)]
    type_name: Option<String>,
    #[serde(rename = "ClientId", default, deserialize_with = "opt_string_or_number")]
    client_id: Option<String>,
    #[serde(rename = "AppointmentId", default, deserialize_with = "opt_string_or_number")]
    appointment_id: Option<String>,
    #[serde(rename = "IntakeId", default, deserialize_with = "opt_string_or_number")]
    intake_id: Option<String>,
    #[serde(rename = "Appointment", default)]
    appointment: Option<Value>,
}

/// Parse a verified webhook body into a tagged event.
///
/// Unknown event names and payloads missing their identity fields are
/// rejected here rather than discovered by the workers.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookEvent, QueueError> {
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| QueueError::InvalidPayload(format!("body is not JSON: {}", e)))?;

    if !raw.is_object() {
        return Err(QueueError::InvalidPayload("body must be a JSON object".to_string()));
    }

    let envelope: RawEnvelope = serde_json::from_value(raw.clone())
        .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

    let type_name = envelope
        .event_type
        .clone()
        .or_else(|| envelope.type_name.clone())
        .ok_or_else(|| QueueError::InvalidPayload("missing EventType".to_string()))?;

    let event_type = WebhookEventType::parse(&type_name)
        .ok_or_else(|| QueueError::UnknownEventType(type_name.clone()))?;

    let payload = build_payload(event_type, envelope)?;
    let entity_key = payload.entity_key();
    let fingerprint = fingerprint(&payload, &raw);

    debug!("Parsed {} webhook for {} ({})", event_type.as_str(), entity_key, fingerprint);

    Ok(WebhookEvent {
        event_id: Uuid::new_v4(),
        fingerprint,
        event_type,
        entity_key,
        payload,
        raw,
        received_at: Utc::now(),
        replay_recorded_at: None,
    })
}

fn build_payload(event_type: WebhookEventType, envelope: RawEnvelope) -> Result<ProviderEvent, QueueError> {
    let wrap: fn(AppointmentEvent) -> ProviderEvent = match event_type {
        WebhookEventType::Created => ProviderEvent::AppointmentCreated,
        WebhookEventType::Updated => ProviderEvent::AppointmentUpdated,
        WebhookEventType::Rescheduled => ProviderEvent::AppointmentRescheduled,
        WebhookEventType::Cancelled => ProviderEvent::AppointmentCancelled,
        WebhookEventType::Deleted => ProviderEvent::AppointmentDeleted,
        WebhookEventType::FormSubmitted => {
            let intake_id = envelope
                .intake_id
                .ok_or_else(|| QueueError::InvalidPayload("form submission without IntakeId".to_string()))?;
            return Ok(ProviderEvent::FormSubmitted(IntakeEvent {
                intake_id,
                client_id: envelope.client_id,
            }));
        }
    };

    let appointment = match envelope.appointment {
        Some(Value::Null) | None => None,
        Some(value) => Some(
            serde_json::from_value::<ProviderAppointment>(value)
                .map_err(|e| QueueError::InvalidPayload(format!("malformed Appointment: {}", e)))?,
        ),
    };

    let appointment_id = appointment
        .as_ref()
        .map(|a| a.id.clone())
        .or(envelope.appointment_id)
        .ok_or_else(|| QueueError::InvalidPayload("appointment event without an appointment id".to_string()))?;

    let client_id = envelope
        .client_id
        .or_else(|| appointment.as_ref().and_then(|a| a.client_id.clone()));

    Ok(wrap(AppointmentEvent {
        appointment_id,
        client_id,
        appointment,
    }))
}

/// Deterministic fingerprint of a logical provider event.
///
/// Updates and reschedules hash every field that changes where and when the
/// session happens, so two different material changes never share a
/// fingerprint. Creates, cancels and deletes hash the provider's creation
/// timestamp. Receipt time is never part of the hash.
pub fn fingerprint(payload: &ProviderEvent, raw: &Value) -> String {
    let event_type = payload.event_type();

    let (entity, material) = match payload {
        ProviderEvent::FormSubmitted(intake) => (intake.intake_id.clone(), intake.intake_id.clone()),
        other => {
            // appointment_event() is Some for every non-form variant
            let event = other.appointment_event();
            let entity = event.map(|e| e.appointment_id.clone()).unwrap_or_default();
            let material = match (event_type, event.and_then(|e| e.appointment.as_ref())) {
                (WebhookEventType::Updated | WebhookEventType::Rescheduled, Some(appt)) => {
                    scheduling_material(appt)
                }
                (_, Some(appt)) => match appt.date_created {
                    Some(created) => format!("created:{}", created),
                    None => content_hash(raw),
                },
                (_, None) => content_hash(raw),
            };
            (entity, material)
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(event_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(entity.as_bytes());
    hasher.update(b"|");
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

fn scheduling_material(appt: &ProviderAppointment) -> String {
    let fields = [
        appt.start().map(|t| t.to_rfc3339()).unwrap_or_default(),
        appt.end().map(|t| t.to_rfc3339()).unwrap_or_default(),
        appt.status.clone().unwrap_or_default().to_lowercase(),
        appt.location_name.clone().unwrap_or_default().to_lowercase(),
        appt.practitioner_id.clone().unwrap_or_default(),
        appt.client_id.clone().unwrap_or_default(),
        appt.service_name.clone().unwrap_or_default().to_lowercase(),
        appt.session_type.clone().unwrap_or_default().to_lowercase(),
    ];
    fields.join("\u{1f}")
}

fn content_hash(raw: &Value) -> String {
    // serde_json maps are ordered, so the serialization is canonical
    let canonical = serde_json::to_string(raw).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
