use serde::{Deserialize, Serialize};

use shared_models::{AssignmentReason, OfficeCode, SessionType};

// ==============================================================================
// OFFICES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum OfficeSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Office {
    pub code: OfficeCode,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub accessible: bool,
    #[serde(default)]
    pub size: OfficeSize,
    #[serde(default)]
    pub age_groups: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    /// Clinicians who treat this room as their home office.
    #[serde(default)]
    pub primary_clinicians: Vec<String>,
    #[serde(default)]
    pub alternate_clinicians: Vec<String>,
}

impl Office {
    pub fn new(code: OfficeCode) -> Self {
        Self {
            code,
            in_service: true,
            accessible: false,
            size: OfficeSize::Medium,
            age_groups: Vec::new(),
            features: Vec::new(),
            primary_clinicians: Vec::new(),
            alternate_clinicians: Vec::new(),
        }
    }

    pub fn floor(&self) -> Option<char> {
        self.code.floor()
    }

    pub fn is_virtual(&self) -> bool {
        self.code.is_virtual()
    }

    pub fn is_primary_for(&self, clinician_id: &str) -> bool {
        self.primary_clinicians.iter().any(|c| c == clinician_id)
    }

    pub fn is_associated_with(&self, clinician_id: &str) -> bool {
        self.is_primary_for(clinician_id) || self.alternate_clinicians.iter().any(|c| c == clinician_id)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f.eq_ignore_ascii_case(feature))
    }

    pub fn serves_age_group(&self, group: &str) -> bool {
        self.age_groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

fn default_true() -> bool {
    true
}

// ==============================================================================
// PROFILES
// ==============================================================================

/// Client attributes that influence office selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientProfile {
    pub id: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub mobility_needs: bool,
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub office_override: Option<OfficeCode>,
}

impl ClientProfile {
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClinicianProfile {
    pub id: String,
    #[serde(default)]
    pub primary_office: Option<OfficeCode>,
    #[serde(default)]
    pub preferred_offices: Vec<OfficeCode>,
}

impl ClinicianProfile {
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn has_preferences(&self) -> bool {
        self.primary_office.as_ref().is_some_and(|o| o.is_resolved()) || !self.preferred_offices.is_empty()
    }
}

// ==============================================================================
// RULES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStrength {
    Hard,
    Medium,
    /// Winner is kept but evaluation continues to collect alternates.
    Soft,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleKind {
    ClientOverride,
    Accessibility,
    AgeBand {
        #[serde(default)]
        min_age: Option<u32>,
        #[serde(default)]
        max_age: Option<u32>,
        #[serde(default)]
        age_group: Option<String>,
    },
    ClinicianPreference,
    Modality {
        session_types: Vec<SessionType>,
        #[serde(default)]
        size: Option<OfficeSize>,
    },
    FeatureMatch {
        #[serde(default)]
        features: Vec<String>,
    },
    Fallback,
}

impl RuleKind {
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::ClientOverride => "client-override",
            RuleKind::Accessibility => "accessibility",
            RuleKind::AgeBand { .. } => "age-band",
            RuleKind::ClinicianPreference => "clinician-preference",
            RuleKind::Modality { .. } => "modality",
            RuleKind::FeatureMatch { .. } => "feature-match",
            RuleKind::Fallback => "fallback",
        }
    }
}

/// One rule as written in the rules file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub priority: i32,
    pub name: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub strength: OverrideStrength,
    /// Extra applicability predicate, e.g. `client.age >= 65 && session_type == in-person`.
    #[serde(default)]
    pub condition: Option<String>,
    /// Restricts candidates to these offices when non-empty.
    #[serde(default)]
    pub offices: Vec<OfficeCode>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl RuleConfig {
    pub fn new(priority: i32, name: &str, kind: RuleKind, strength: OverrideStrength) -> Self {
        Self {
            priority,
            name: name.to_string(),
            kind,
            strength,
            condition: None,
            offices: Vec::new(),
            active: true,
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_offices(mut self, offices: &[&str]) -> Self {
        self.offices = offices.iter().map(|o| OfficeCode::from(*o)).collect();
        self
    }
}

// ==============================================================================
// RESULTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfficeAssignment {
    pub office: OfficeCode,
    pub rule_name: String,
    pub priority: i32,
    pub strength: OverrideStrength,
    /// Other acceptable offices, best first.
    pub alternates: Vec<OfficeCode>,
}

impl OfficeAssignment {
    pub fn unresolved() -> Self {
        Self {
            office: OfficeCode::Unresolved,
            rule_name: "unresolved".to_string(),
            priority: i32::MIN,
            strength: OverrideStrength::None,
            alternates: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.office.is_resolved()
    }

    pub fn reason(&self) -> Option<AssignmentReason> {
        self.is_resolved().then(|| AssignmentReason {
            rule: self.rule_name.clone(),
            priority: self.priority,
        })
    }
}

/// Outcome of one conflict-resolution step for a single appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reassignment {
    pub appointment_id: String,
    pub previous_office: OfficeCode,
    pub new_office: OfficeCode,
    pub reason: Option<AssignmentReason>,
    pub needs_assignment: bool,
    pub conflicts_with: Vec<String>,
}
