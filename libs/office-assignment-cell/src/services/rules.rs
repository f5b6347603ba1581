use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use shared_models::SessionType;

use crate::services::catalog::OfficeCatalog;
use crate::services::condition::{AssignmentContext, Condition};
use crate::{AssignmentError, OfficeSize, OverrideStrength, RuleConfig, RuleKind};

/// A validated rule with its condition compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRule {
    pub config: RuleConfig,
    condition: Option<Condition>,
}

impl AssignmentRule {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn kind(&self) -> &RuleKind {
        &self.config.kind
    }

    pub fn strength(&self) -> OverrideStrength {
        self.config.strength
    }

    pub fn condition_holds(&self, ctx: &AssignmentContext<'_>) -> bool {
        self.condition.as_ref().map_or(true, |c| c.evaluate(ctx))
    }
}

/// Active rules, highest priority first.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<AssignmentRule>,
}

impl RuleSet {
    /// Validate and order a rule list against the catalog it will run on.
    ///
    /// Duplicate priorities among active rules, unparseable conditions and
    /// offices missing from the catalog are configuration errors.
    pub fn from_configs(configs: Vec<RuleConfig>, catalog: &OfficeCatalog) -> Result<Self, AssignmentError> {
        let mut by_priority: HashMap<i32, String> = HashMap::new();
        let mut rules = Vec::new();

        for config in configs.into_iter().filter(|c| c.active) {
            if config.name.trim().is_empty() {
                return Err(AssignmentError::Configuration(format!(
                    "rule with priority {} has no name",
                    config.priority
                )));
            }

            if let Some(existing) = by_priority.insert(config.priority, config.name.clone()) {
                return Err(AssignmentError::Configuration(format!(
                    "rules '{}' and '{}' share priority {}",
                    existing, config.name, config.priority
                )));
            }

            if let Some(unknown) = config.offices.iter().find(|o| !catalog.contains(o)) {
                return Err(AssignmentError::Configuration(format!(
                    "rule '{}' references office {} which is not in the catalog",
                    config.name, unknown
                )));
            }

            if let RuleKind::AgeBand { min_age: Some(min), max_age: Some(max), .. } = &config.kind {
                if min > max {
                    return Err(AssignmentError::Configuration(format!(
                        "rule '{}' has an empty age band {}..{}",
                        config.name, min, max
                    )));
                }
            }

            if let RuleKind::Modality { session_types, .. } = &config.kind {
                if session_types.is_empty() {
                    return Err(AssignmentError::Configuration(format!(
                        "modality rule '{}' lists no session types",
                        config.name
                    )));
                }
            }

            let condition = config.condition.as_deref().map(Condition::parse).transpose()?;
            rules.push(AssignmentRule { config, condition });
        }

        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));

        if !rules.iter().any(|r| matches!(r.kind(), RuleKind::Fallback)) {
            warn!("Assignment rule set has no fallback rule; some appointments may stay unresolved");
        }

        Ok(Self { rules })
    }

    pub fn from_json(raw: &str, catalog: &OfficeCatalog) -> Result<Self, AssignmentError> {
        Self::from_configs(serde_json::from_str(raw)?, catalog)
    }

    pub fn load(path: &Path, catalog: &OfficeCatalog) -> Result<Self, AssignmentError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw, catalog)
    }

    pub fn builtin(catalog: &OfficeCatalog) -> Result<Self, AssignmentError> {
        Self::from_configs(default_rules(), catalog)
    }

    pub fn rules(&self) -> &[AssignmentRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The clinic's standard cascade.
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new(100, "client-override", RuleKind::ClientOverride, OverrideStrength::Hard)
            .with_condition("session_type != telehealth"),
        RuleConfig::new(
            98,
            "telehealth",
            RuleKind::Modality { session_types: vec![SessionType::Telehealth], size: None },
            OverrideStrength::Hard,
        )
        .with_offices(&["A-v"]),
        RuleConfig::new(90, "accessibility", RuleKind::Accessibility, OverrideStrength::Hard),
        RuleConfig::new(
            80,
            "children",
            RuleKind::AgeBand { min_age: None, max_age: Some(12), age_group: Some("child".to_string()) },
            OverrideStrength::Medium,
        ),
        RuleConfig::new(
            75,
            "teens",
            RuleKind::AgeBand { min_age: Some(13), max_age: Some(17), age_group: Some("teen".to_string()) },
            OverrideStrength::Medium,
        ),
        RuleConfig::new(
            70,
            "group-sessions",
            RuleKind::Modality { session_types: vec![SessionType::Group], size: Some(OfficeSize::Large) },
            OverrideStrength::Medium,
        ),
        RuleConfig::new(
            68,
            "family-sessions",
            RuleKind::Modality { session_types: vec![SessionType::Family], size: Some(OfficeSize::Large) },
            OverrideStrength::Medium,
        ),
        RuleConfig::new(65, "clinician-preference", RuleKind::ClinicianPreference, OverrideStrength::Medium),
        RuleConfig::new(40, "feature-match", RuleKind::FeatureMatch { features: Vec::new() }, OverrideStrength::Soft),
        RuleConfig::new(10, "fallback", RuleKind::Fallback, OverrideStrength::None),
    ]
}
