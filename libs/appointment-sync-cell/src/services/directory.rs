use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::debug;

use office_assignment_cell::{ClientProfile, ClinicianProfile};
use shared_config::AppConfig;
use shared_database::{ApiError, RestClient};
use shared_models::normalize_office_id;
use webhook_queue_cell::ProviderIntake;

/// Where assignment-relevant client and clinician attributes live.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn client_profile(&self, client_id: &str) -> Result<Option<ClientProfile>, ApiError>;

    async fn clinician_profile(&self, clinician_id: &str) -> Result<Option<ClinicianProfile>, ApiError>;

    async fn upsert_client_profile(&self, profile: &ClientProfile) -> Result<(), ApiError>;
}

const CLIENT_PROFILES_PATH: &str = "/rest/v1/client_profiles";
const CLINICIAN_PROFILES_PATH: &str = "/rest/v1/clinician_profiles";

pub struct RestProfileDirectory {
    client: RestClient,
}

impl RestProfileDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: RestClient::for_record_store(config),
        }
    }
}

#[async_trait]
impl ProfileDirectory for RestProfileDirectory {
    async fn client_profile(&self, client_id: &str) -> Result<Option<ClientProfile>, ApiError> {
        let path = format!("{}?id=eq.{}&limit=1", CLIENT_PROFILES_PATH, urlencoding::encode(client_id));
        let rows: Vec<ClientProfile> = self.client.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn clinician_profile(&self, clinician_id: &str) -> Result<Option<ClinicianProfile>, ApiError> {
        let path = format!("{}?id=eq.{}&limit=1", CLINICIAN_PROFILES_PATH, urlencoding::encode(clinician_id));
        let rows: Vec<ClinicianProfile> = self.client.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_client_profile(&self, profile: &ClientProfile) -> Result<(), ApiError> {
        let body = serde_json::to_value(profile).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.client
            .send(
                Method::POST,
                CLIENT_PROFILES_PATH,
                Some(body),
                Some("resolution=merge-duplicates,return=minimal"),
            )
            .await
    }
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    clients: RwLock<HashMap<String, ClientProfile>>,
    clinicians: RwLock<HashMap<String, ClinicianProfile>>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_clinician(&self, profile: ClinicianProfile) {
        self.clinicians.write().await.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn client_profile(&self, client_id: &str) -> Result<Option<ClientProfile>, ApiError> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn clinician_profile(&self, clinician_id: &str) -> Result<Option<ClinicianProfile>, ApiError> {
        Ok(self.clinicians.read().await.get(clinician_id).cloned())
    }

    async fn upsert_client_profile(&self, profile: &ClientProfile) -> Result<(), ApiError> {
        self.clients.write().await.insert(profile.id.clone(), profile.clone());
        Ok(())
    }
}

// ==============================================================================
// INTAKE PARSING
// ==============================================================================

/// Fold intake answers into the client's profile.
///
/// Questions are matched by keyword; unanswered or unrecognised questions
/// leave the existing value alone.
pub fn profile_from_intake(intake: &ProviderIntake, client_id: &str, existing: Option<ClientProfile>) -> ClientProfile {
    let mut profile = existing.unwrap_or_else(|| ClientProfile::unknown(client_id));
    let today = Utc::now().date_naive();

    for question in &intake.questions {
        let Some(answer) = question.answer.as_deref().map(str::trim).filter(|a| !a.is_empty()) else {
            continue;
        };
        let text = question.text.to_lowercase();
        let lowered = answer.to_lowercase();

        if ["mobility", "wheelchair", "accessib", "stairs"].iter().any(|k| text.contains(k)) {
            profile.mobility_needs = is_affirmative(&lowered);
        } else if text.contains("date of birth") || text.contains("birth date") || text.contains("dob") {
            if let Some(age) = parse_birth_date(answer).and_then(|dob| age_on(dob, today)) {
                profile.age = Some(age);
            }
        } else if text.split(|c: char| !c.is_alphanumeric()).any(|w| w == "age") {
            if let Ok(age) = lowered.parse::<u32>() {
                profile.age = Some(age);
            }
        } else if text.contains("office") && (text.contains("prefer") || text.contains("request")) {
            let office = normalize_office_id(answer);
            if office.is_resolved() {
                profile.office_override = Some(office);
            }
        } else if text.contains("feature") || text.contains("room requirement") {
            profile.required_features = lowered
                .split([',', ';'])
                .map(|f| f.trim().replace(' ', "-"))
                .filter(|f| !f.is_empty() && f != "none")
                .collect();
        }
    }

    debug!(
        client_id = %client_id,
        "Intake {} parsed: age={:?} mobility={} features={}",
        intake.id,
        profile.age,
        profile.mobility_needs,
        profile.required_features.len()
    );
    profile
}

fn is_affirmative(answer: &str) -> bool {
    answer.starts_with("yes")
        || answer == "y"
        || answer == "true"
        || ["wheelchair", "walker", "cane", "crutches", "step-free"].iter().any(|k| answer.contains(k))
}

fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

fn age_on(dob: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut years = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}
