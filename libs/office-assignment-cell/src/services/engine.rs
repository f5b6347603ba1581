// libs/office-assignment-cell/src/services/engine.rs
use std::collections::HashSet;

use tracing::{debug, warn};

use shared_models::{Appointment, OfficeCode, SessionType};

use crate::services::catalog::OfficeCatalog;
use crate::services::condition::AssignmentContext;
use crate::services::rules::{AssignmentRule, RuleSet};
use crate::{ClientProfile, ClinicianProfile, Office, OfficeAssignment, OverrideStrength, RuleKind};

/// Priority cascade over a catalog and rule set.
///
/// Pure and deterministic: the same appointment, profiles, catalog, rules
/// and exclusions always produce the same assignment.
pub struct AssignmentEngine<'a> {
    catalog: &'a OfficeCatalog,
    rules: &'a RuleSet,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(catalog: &'a OfficeCatalog, rules: &'a RuleSet) -> Self {
        Self { catalog, rules }
    }

    pub fn catalog(&self) -> &OfficeCatalog {
        self.catalog
    }

    pub fn assign(&self, appointment: &Appointment, client: &ClientProfile, clinician: &ClinicianProfile) -> OfficeAssignment {
        self.assign_excluding(appointment, client, clinician, &HashSet::new())
    }

    /// Same cascade with some offices removed from every candidate set.
    pub fn assign_excluding(
        &self,
        appointment: &Appointment,
        client: &ClientProfile,
        clinician: &ClinicianProfile,
        excluded: &HashSet<OfficeCode>,
    ) -> OfficeAssignment {
        let ctx = AssignmentContext {
            appointment,
            client,
            clinician,
        };

        let mut winner: Option<OfficeAssignment> = None;

        for rule in self.rules.rules() {
            if !self.applies(rule, &ctx) {
                continue;
            }

            let candidates = self.candidates(rule, &ctx, excluded);
            let Some(best) = pick(&candidates, clinician) else {
                debug!("Rule {} applied to {} but had no free office", rule.name(), appointment.id);
                continue;
            };

            match winner.as_mut() {
                None => {
                    let alternates = candidates
                        .iter()
                        .map(|o| o.code.clone())
                        .filter(|c| c != &best.code)
                        .collect();

                    let assignment = OfficeAssignment {
                        office: best.code.clone(),
                        rule_name: rule.name().to_string(),
                        priority: rule.priority(),
                        strength: rule.strength(),
                        alternates,
                    };

                    if rule.strength() != OverrideStrength::Soft {
                        return assignment;
                    }
                    winner = Some(assignment);
                }
                // A soft winner keeps collecting what lower rules would have picked
                Some(current) => {
                    if best.code != current.office && !current.alternates.contains(&best.code) {
                        current.alternates.push(best.code.clone());
                    }
                }
            }
        }

        winner.unwrap_or_else(|| {
            warn!(
                appointment_id = %appointment.id,
                "No assignment rule produced an office; leaving unresolved"
            );
            OfficeAssignment::unresolved()
        })
    }

    fn applies(&self, rule: &AssignmentRule, ctx: &AssignmentContext<'_>) -> bool {
        if !rule.condition_holds(ctx) {
            return false;
        }

        match rule.kind() {
            RuleKind::ClientOverride => ctx.client.office_override.as_ref().is_some_and(|o| o.is_resolved()),
            RuleKind::Accessibility => ctx.client.mobility_needs,
            RuleKind::AgeBand { min_age, max_age, .. } => match ctx.client.age {
                Some(age) => min_age.map_or(true, |min| age >= min) && max_age.map_or(true, |max| age <= max),
                None => false,
            },
            RuleKind::ClinicianPreference => {
                ctx.clinician.has_preferences()
                    || self.catalog.offices().iter().any(|o| o.is_associated_with(&ctx.clinician.id))
            }
            RuleKind::Modality { session_types, .. } => session_types.contains(&ctx.appointment.session_type),
            RuleKind::FeatureMatch { features } => !features.is_empty() || !ctx.client.required_features.is_empty(),
            RuleKind::Fallback => true,
        }
    }

    /// Offices the rule would accept, in catalog order unless the rule ranks them itself.
    fn candidates(&self, rule: &AssignmentRule, ctx: &AssignmentContext<'_>, excluded: &HashSet<OfficeCode>) -> Vec<&'a Office> {
        let restricted = &rule.config.offices;
        let telehealth = ctx.appointment.session_type == SessionType::Telehealth;

        let usable = |office: &&'a Office| {
            office.in_service
                && !excluded.contains(&office.code)
                && (restricted.is_empty() || restricted.contains(&office.code))
                // explicit lists may name the virtual office; catalog-wide picks match the modality
                && (!restricted.is_empty() || office.is_virtual() == telehealth)
        };

        let catalog_order = |filter: &dyn Fn(&Office) -> bool| -> Vec<&'a Office> {
            self.catalog
                .offices()
                .iter()
                .filter(usable)
                .filter(|o| filter(o))
                .collect()
        };

        match rule.kind() {
            RuleKind::ClientOverride => ctx
                .client
                .office_override
                .as_ref()
                .and_then(|code| self.catalog.get(code))
                .filter(|o| o.in_service && !excluded.contains(&o.code))
                .into_iter()
                .collect(),
            RuleKind::Accessibility => catalog_order(&|o| o.accessible),
            RuleKind::AgeBand { age_group, .. } => match age_group {
                Some(group) if restricted.is_empty() => catalog_order(&|o| o.serves_age_group(group)),
                _ => catalog_order(&|_| true),
            },
            RuleKind::ClinicianPreference => {
                let mut ranked: Vec<&'a Office> = Vec::new();
                let preferred = ctx
                    .clinician
                    .primary_office
                    .iter()
                    .chain(ctx.clinician.preferred_offices.iter())
                    .filter_map(|code| self.catalog.get(code));
                for office in preferred.chain(
                    self.catalog
                        .offices()
                        .iter()
                        .filter(|o| o.is_associated_with(&ctx.clinician.id)),
                ) {
                    if usable(&office) && !ranked.iter().any(|r| r.code == office.code) {
                        ranked.push(office);
                    }
                }
                ranked
            }
            RuleKind::Modality { size, .. } => match size {
                Some(size) if restricted.is_empty() => catalog_order(&|o| o.size >= *size),
                _ => catalog_order(&|_| true),
            },
            RuleKind::FeatureMatch { features } => {
                let wanted: Vec<&String> = features.iter().chain(ctx.client.required_features.iter()).collect();
                catalog_order(&|o| wanted.iter().all(|f| o.has_feature(f)))
            }
            RuleKind::Fallback => catalog_order(&|_| true),
        }
    }
}

/// Tie-break: the clinician's own primary office first, then candidate order.
fn pick<'o>(candidates: &[&'o Office], clinician: &ClinicianProfile) -> Option<&'o Office> {
    candidates
        .iter()
        .find(|o| o.is_primary_for(&clinician.id) || clinician.primary_office.as_ref() == Some(&o.code))
        .or_else(|| candidates.first())
        .copied()
}

/// Convenience wrapper for one-off assignments.
pub fn assign(
    appointment: &Appointment,
    client: &ClientProfile,
    clinician: &ClinicianProfile,
    catalog: &OfficeCatalog,
    rules: &RuleSet,
) -> OfficeAssignment {
    AssignmentEngine::new(catalog, rules).assign(appointment, client, clinician)
}
