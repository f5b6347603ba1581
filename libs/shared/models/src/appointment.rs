// libs/shared/models/src/appointment.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::office_id::OfficeCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    InPerson,
    Telehealth,
    Group,
    Family,
}

impl SessionType {
    /// Infer the session modality from the provider's service and location labels.
    pub fn infer(service_name: Option<&str>, location_name: Option<&str>) -> Self {
        let haystack = format!(
            "{} {}",
            service_name.unwrap_or_default(),
            location_name.unwrap_or_default()
        )
        .to_lowercase();

        if ["telehealth", "virtual", "video", "online", "remote"]
            .iter()
            .any(|k| haystack.contains(k))
        {
            SessionType::Telehealth
        } else if haystack.contains("group") {
            SessionType::Group
        } else if ["family", "couple", "parent"].iter().any(|k| haystack.contains(k)) {
            SessionType::Family
        } else {
            SessionType::InPerson
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::InPerson => "in-person",
            SessionType::Telehealth => "telehealth",
            SessionType::Group => "group",
            SessionType::Family => "family",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['_', ' '], "-").as_str() {
            "in-person" | "inperson" | "office" => Some(SessionType::InPerson),
            "telehealth" | "virtual" | "video" => Some(SessionType::Telehealth),
            "group" => Some(SessionType::Group),
            "family" | "couples" => Some(SessionType::Family),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    Deleted,
}

impl AppointmentStatus {
    /// Map the provider's status vocabulary onto the local lifecycle.
    pub fn from_provider(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace([' ', '_', '-'], "").as_str() {
            "scheduled" | "confirmed" | "booked" | "waitingconfirmation" | "pending" => {
                Some(AppointmentStatus::Scheduled)
            }
            "completed" | "attended" | "checkedin" => Some(AppointmentStatus::Completed),
            "cancelled" | "canceled" | "noshow" | "latecancel" | "latecancellation" => {
                Some(AppointmentStatus::Cancelled)
            }
            "deleted" | "removed" => Some(AppointmentStatus::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Deleted)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentSource {
    Provider,
    Manual,
}

/// Why an office was chosen: the winning rule and its priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentReason {
    pub rule: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    pub clinician_id: String,
    pub clinician_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub session_type: SessionType,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub office: OfficeCode,
    #[serde(default)]
    pub assignment: Option<AssignmentReason>,
    #[serde(default)]
    pub needs_assignment: bool,
    #[serde(default)]
    pub conflicts: Vec<String>,
    pub source: AppointmentSource,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Appointment {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("appointment id is required".to_string());
        }
        if self.client_id.trim().is_empty() {
            return Err(format!("appointment {} has no client id", self.id));
        }
        if self.clinician_id.trim().is_empty() {
            return Err(format!("appointment {} has no clinician id", self.id));
        }
        if self.start_time >= self.end_time {
            return Err(format!(
                "appointment {} starts at {} which is not before its end {}",
                self.id, self.start_time, self.end_time
            ));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }

    /// An active appointment with a physical room blocks that room.
    pub fn holds_office(&self) -> bool {
        self.is_active() && self.office.is_resolved() && !self.office.is_virtual()
    }

    /// Half-open interval overlap; touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Appointment) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    pub fn day(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn assignment_priority(&self) -> i32 {
        self.assignment.as_ref().map(|a| a.priority).unwrap_or(i32::MIN)
    }

    /// Move into a terminal status and drop any office hold.
    pub fn release(&mut self, status: AppointmentStatus) {
        self.status = status;
        self.office = OfficeCode::Unresolved;
        self.needs_assignment = false;
        self.conflicts.clear();
        self.last_modified = Utc::now();
    }

    /// Whether `other` differs in anything that feeds office assignment.
    pub fn scheduling_inputs_changed(&self, other: &Appointment) -> bool {
        self.start_time != other.start_time
            || self.end_time != other.end_time
            || self.clinician_id != other.clinician_id
            || self.client_id != other.client_id
            || self.session_type != other.session_type
            || self.status != other.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment(id: &str, start_hour: u32, start_min: u32, minutes: i64) -> Appointment {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, start_hour, start_min, 0).unwrap();
        Appointment {
            id: id.to_string(),
            client_id: "c1".to_string(),
            client_name: "Client".to_string(),
            clinician_id: "t1".to_string(),
            clinician_name: "Clinician".to_string(),
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            session_type: SessionType::InPerson,
            status: AppointmentStatus::Scheduled,
            office: OfficeCode::room('B', "4"),
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

    #[test]
    fn test_overlap_is_half_open() {
        let a = appointment("a", 9, 0, 50);
        let b = appointment("b", 9, 30, 50);
        let c = appointment("c", 9, 50, 50);

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_validate_rejects_inverted_interval() {
        let mut a = appointment("a", 9, 0, 50);
        a.end_time = a.start_time;
        assert!(a.validate().is_err());
    }

    #[test]
    fn test_release_drops_office_hold() {
        let mut a = appointment("a", 9, 0, 50);
        assert!(a.holds_office());
        a.release(AppointmentStatus::Cancelled);
        assert!(!a.holds_office());
        assert_eq!(a.office, OfficeCode::Unresolved);
    }

    #[test]
    fn test_session_type_inference() {
        assert_eq!(SessionType::infer(Some("Individual Telehealth"), None), SessionType::Telehealth);
        assert_eq!(SessionType::infer(Some("DBT Group"), None), SessionType::Group);
        assert_eq!(SessionType::infer(Some("Family Therapy"), Some("Main")), SessionType::Family);
        assert_eq!(SessionType::infer(None, None), SessionType::InPerson);
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(AppointmentStatus::from_provider("Confirmed"), Some(AppointmentStatus::Scheduled));
        assert_eq!(AppointmentStatus::from_provider("Canceled"), Some(AppointmentStatus::Cancelled));
        assert_eq!(AppointmentStatus::from_provider("No Show"), Some(AppointmentStatus::Cancelled));
        assert_eq!(AppointmentStatus::from_provider("mystery"), None);
    }
}
