use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use shared_models::{Appointment, SessionType};

use crate::{AssignmentError, ClientProfile, ClinicianProfile};

/// What a rule predicate is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentContext<'a> {
    pub appointment: &'a Appointment,
    pub client: &'a ClientProfile,
    pub clinician: &'a ClinicianProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionField {
    ClientAge,
    ClientMobilityNeeds,
    ClientId,
    ClinicianId,
    SessionType,
}

impl ConditionField {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "client.age" => Some(ConditionField::ClientAge),
            "client.mobility_needs" => Some(ConditionField::ClientMobilityNeeds),
            "client.id" => Some(ConditionField::ClientId),
            "clinician.id" => Some(ConditionField::ClinicianId),
            "session_type" => Some(ConditionField::SessionType),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn holds<T: PartialOrd>(&self, left: &T, right: &T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(u32),
    Flag(bool),
    Text(String),
    Session(SessionType),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: ConditionField,
    op: CompareOp,
    operand: Operand,
}

impl Clause {
    fn evaluate(&self, ctx: &AssignmentContext<'_>) -> bool {
        match (&self.field, &self.operand) {
            (ConditionField::ClientAge, Operand::Number(expected)) => ctx
                .client
                .age
                .is_some_and(|age| self.op.holds(&age, expected)),
            (ConditionField::ClientMobilityNeeds, Operand::Flag(expected)) => {
                self.op.holds(&ctx.client.mobility_needs, expected)
            }
            (ConditionField::ClientId, Operand::Text(expected)) => self.op.holds(&ctx.client.id, expected),
            (ConditionField::ClinicianId, Operand::Text(expected)) => self.op.holds(&ctx.clinician.id, expected),
            (ConditionField::SessionType, Operand::Session(expected)) => {
                self.op.holds(&ctx.appointment.session_type.as_str(), &expected.as_str())
            }
            // parse() only builds the pairs above
            _ => false,
        }
    }
}

/// A conjunction of `field op value` clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    clauses: Vec<Clause>,
}

fn clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z_.]+)\s*(==|!=|<=|>=|<|>)\s*(.+)$").expect("static clause pattern")
    })
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, AssignmentError> {
        let source = raw.trim().to_string();
        if source.is_empty() {
            return Err(AssignmentError::Configuration("empty condition".to_string()));
        }

        let clauses = source
            .split("&&")
            .map(|part| parse_clause(part.trim(), &source))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { source, clauses })
    }

    pub fn evaluate(&self, ctx: &AssignmentContext<'_>) -> bool {
        self.clauses.iter().all(|clause| clause.evaluate(ctx))
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Condition {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_clause(part: &str, source: &str) -> Result<Clause, AssignmentError> {
    let invalid = |reason: &str| {
        AssignmentError::Configuration(format!("invalid condition '{}': {} in '{}'", source, reason, part))
    };

    let captures = clause_pattern()
        .captures(part)
        .ok_or_else(|| invalid("expected `field op value`"))?;

    let field = ConditionField::parse(&captures[1]).ok_or_else(|| invalid("unknown field"))?;
    let op = CompareOp::parse(&captures[2]).ok_or_else(|| invalid("unknown operator"))?;
    let value = captures[3].trim().trim_matches(|c| c == '"' || c == '\'');

    let operand = match field {
        ConditionField::ClientAge => Operand::Number(value.parse().map_err(|_| invalid("age must be a whole number"))?),
        ConditionField::ClientMobilityNeeds => Operand::Flag(match value {
            "true" => true,
            "false" => false,
            _ => return Err(invalid("mobility_needs must be true or false")),
        }),
        ConditionField::ClientId | ConditionField::ClinicianId => {
            if value.is_empty() {
                return Err(invalid("missing id"));
            }
            Operand::Text(value.to_string())
        }
        ConditionField::SessionType => {
            Operand::Session(SessionType::parse(value).ok_or_else(|| invalid("unknown session type"))?)
        }
    };

    if !op.is_equality() && field != ConditionField::ClientAge {
        return Err(invalid("ordering operators only apply to client.age"));
    }

    Ok(Clause { field, op, operand })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};
    use shared_models::{AppointmentSource, AppointmentStatus, OfficeCode};

    fn appointment(session_type: SessionType) -> Appointment {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Appointment {
            id: "a1".to_string(),
            client_id: "c1".to_string(),
            client_name: "Client".to_string(),
            clinician_id: "t1".to_string(),
            clinician_name: "Clinician".to_string(),
            start_time: start,
            end_time: start + Duration::minutes(50),
            session_type,
            status: AppointmentStatus::Scheduled,
            office: OfficeCode::Unresolved,
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
    fn test_conjunction_evaluates_every_clause() {
        let appt = appointment(SessionType::InPerson);
        let client = ClientProfile {
            id: "c1".to_string(),
            age: Some(70),
            ..ClientProfile::default()
        };
        let clinician = ClinicianProfile::unknown("t1");
        let ctx = AssignmentContext { appointment: &appt, client: &client, clinician: &clinician };

        assert!(Condition::parse("client.age >= 65 && session_type == in-person").unwrap().evaluate(&ctx));
        assert!(!Condition::parse("client.age >= 65 && session_type == telehealth").unwrap().evaluate(&ctx));
        assert!(Condition::parse("clinician.id == \"t1\"").unwrap().evaluate(&ctx));
        assert!(Condition::parse("client.mobility_needs == false").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_missing_age_never_matches() {
        let appt = appointment(SessionType::InPerson);
        let client = ClientProfile::unknown("c1");
        let clinician = ClinicianProfile::unknown("t1");
        let ctx = AssignmentContext { appointment: &appt, client: &client, clinician: &clinician };

        assert!(!Condition::parse("client.age < 200").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_rejects_malformed_conditions() {
        assert_matches!(Condition::parse(""), Err(AssignmentError::Configuration(_)));
        assert_matches!(Condition::parse("client.height > 3"), Err(AssignmentError::Configuration(_)));
        assert_matches!(Condition::parse("client.age >= old"), Err(AssignmentError::Configuration(_)));
        assert_matches!(Condition::parse("session_type > group"), Err(AssignmentError::Configuration(_)));
        assert_matches!(Condition::parse("session_type == hologram"), Err(AssignmentError::Configuration(_)));
        assert_matches!(Condition::parse("client.age >= 3 &&"), Err(AssignmentError::Configuration(_)));
    }
}
