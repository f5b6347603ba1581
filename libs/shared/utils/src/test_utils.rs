use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use shared_config::AppConfig;

use crate::signature::compute_signature;

pub struct TestConfig {
    pub webhook_secret: String,
    pub record_store_url: String,
    pub record_store_key: String,
    pub provider_api_url: String,
    pub provider_api_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            webhook_secret: "test-webhook-secret".to_string(),
            record_store_url: String::new(),
            record_store_key: "test-service-key".to_string(),
            provider_api_url: String::new(),
            provider_api_key: "test-provider-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_record_store(mut self, url: &str) -> Self {
        self.record_store_url = url.to_string();
        self
    }

    pub fn with_provider(mut self, url: &str) -> Self {
        self.provider_api_url = url.to_string();
        self
    }

    /// App config with millisecond retry delays so failure paths finish quickly.
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            webhook_secret: self.webhook_secret.clone(),
            record_store_url: self.record_store_url.clone(),
            record_store_key: self.record_store_key.clone(),
            provider_api_url: self.provider_api_url.clone(),
            provider_api_key: self.provider_api_key.clone(),
            request_timeout_seconds: 2,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 4,
            event_timeout_seconds: 5,
            recovery_max_attempts: 3,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Hex HMAC of `body`, as the provider would send it.
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    compute_signature(body, secret).unwrap_or_default()
}

pub fn payload_bytes(payload: &Value) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap_or_default()
}

/// Provider-shaped JSON fixtures.
pub struct MockProviderPayloads;

impl MockProviderPayloads {
    pub fn appointment(id: &str, client_id: &str, clinician_id: &str, start: DateTime<Utc>, minutes: i64) -> Value {
        json!({
            "Id": id,
            "ClientId": client_id,
            "ClientName": format!("Client {}", client_id),
            "PractitionerId": clinician_id,
            "PractitionerName": format!("Clinician {}", clinician_id),
            "StartDateIso": start.to_rfc3339(),
            "EndDateIso": (start + Duration::minutes(minutes)).to_rfc3339(),
            "Duration": minutes,
            "ServiceName": "Individual Therapy",
            "Status": "Confirmed",
            "DateCreated": start.timestamp_millis() - 86_400_000,
        })
    }

    pub fn webhook(event_type: &str, appointment: Value) -> Value {
        json!({
            "EventType": event_type,
            "ClientId": appointment.get("ClientId").cloned().unwrap_or(Value::Null),
            "Appointment": appointment,
        })
    }

    pub fn form_submitted(intake_id: &str, client_id: &str) -> Value {
        json!({
            "EventType": "Form Submitted",
            "IntakeId": intake_id,
            "ClientId": client_id,
        })
    }

    pub fn intake(intake_id: &str, client_id: &str, answers: &[(&str, &str)]) -> Value {
        let questions: Vec<Value> = answers
            .iter()
            .map(|(text, answer)| json!({"Text": text, "Answer": answer}))
            .collect();

        json!({
            "Id": intake_id,
            "ClientId": client_id,
            "ClientName": format!("Client {}", client_id),
            "Questions": questions,
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "error": message,
            "code": code,
        })
    }
}
