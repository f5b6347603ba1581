use chrono::{DateTime, Duration, Months, Utc};

use shared_models::Appointment;
use webhook_queue_cell::{ProviderAppointment, RecurrenceFrequency, RecurrenceSpec};

const RECURRING_KEYWORDS: [&str; 7] = [
    "recurring",
    "recurrence",
    "weekly",
    "biweekly",
    "every week",
    "every other week",
    "monthly",
];

/// Upper bound on generated occurrences regardless of horizon.
const MAX_OCCURRENCES: u32 = 260;

fn keyword_text(provider: &ProviderAppointment) -> String {
    let mut text = provider.tags.join(" ");
    if let Some(notes) = &provider.notes {
        text.push(' ');
        text.push_str(notes);
    }
    text.to_lowercase()
}

/// Explicit recurrence field, the provider's flag, or a keyword in tags/notes.
pub fn is_recurring(provider: &ProviderAppointment) -> bool {
    if provider.recurrence.is_some() || provider.is_recurring == Some(true) {
        return true;
    }
    let text = keyword_text(provider);
    RECURRING_KEYWORDS.iter().any(|k| text.contains(k))
}

pub fn infer_recurrence(provider: &ProviderAppointment) -> Option<RecurrenceSpec> {
    if let Some(spec) = &provider.recurrence {
        return Some(spec.clone());
    }
    if !is_recurring(provider) {
        return None;
    }

    let text = keyword_text(provider);
    let frequency = if text.contains("biweekly") || text.contains("every other week") || text.contains("fortnight") {
        RecurrenceFrequency::Biweekly
    } else if text.contains("monthly") {
        RecurrenceFrequency::Monthly
    } else {
        RecurrenceFrequency::Weekly
    };

    Some(RecurrenceSpec {
        frequency,
        occurrences: None,
        until: None,
    })
}

fn occurrence_start(first: DateTime<Utc>, frequency: RecurrenceFrequency, n: u32) -> Option<DateTime<Utc>> {
    match frequency {
        RecurrenceFrequency::Weekly => first.checked_add_signed(Duration::weeks(n as i64)),
        RecurrenceFrequency::Biweekly => first.checked_add_signed(Duration::weeks(2 * n as i64)),
        RecurrenceFrequency::Monthly => first.checked_add_months(Months::new(n)),
    }
}

/// Materialize a series from its first occurrence.
///
/// The first occurrence keeps the base id; later ones are `{id}-r{n}`. All
/// share `series_id = base.id`. Generation stops at the horizon, the
/// occurrence count or the `until` date, whichever comes first.
pub fn expand_series(base: &Appointment, spec: &RecurrenceSpec, horizon_weeks: u32) -> Vec<Appointment> {
    let horizon_end = base
        .start_time
        .checked_add_signed(Duration::weeks(horizon_weeks.max(1) as i64))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let limit = spec.occurrences.unwrap_or(MAX_OCCURRENCES).clamp(1, MAX_OCCURRENCES);
    let duration = base.duration();

    let mut series = Vec::new();
    for n in 0..limit {
        let Some((start, end)) = occurrence_start(base.start_time, spec.frequency, n)
            .and_then(|start| Some((start, start.checked_add_signed(duration)?)))
        else {
            break;
        };
        if n > 0 && (start > horizon_end || spec.until.is_some_and(|until| start > until)) {
            break;
        }

        let mut occurrence = base.clone();
        if n > 0 {
            occurrence.id = format!("{}-r{}", base.id, n);
        }
        occurrence.series_id = Some(base.id.clone());
        occurrence.start_time = start;
        occurrence.end_time = end;
        series.push(occurrence);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared_models::{AppointmentSource, AppointmentStatus, OfficeCode, SessionType};

    fn base() -> Appointment {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 15, 0, 0).unwrap();
        Appointment {
            id: "apt-7".to_string(),
            client_id: "c".to_string(),
            client_name: String::new(),
            clinician_id: "t".to_string(),
            clinician_name: String::new(),
            start_time: start,
            end_time: start + Duration::minutes(50),
            session_type: SessionType::InPerson,
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
    fn test_detection_sources() {
        let flagged = ProviderAppointment {
            is_recurring: Some(true),
            ..ProviderAppointment::default()
        };
        assert!(is_recurring(&flagged));

        let tagged = ProviderAppointment {
            tags: vec!["Every other week".to_string()],
            ..ProviderAppointment::default()
        };
        assert_eq!(infer_recurrence(&tagged).unwrap().frequency, RecurrenceFrequency::Biweekly);

        let noted = ProviderAppointment {
            notes: Some("Standing weekly session".to_string()),
            ..ProviderAppointment::default()
        };
        assert_eq!(infer_recurrence(&noted).unwrap().frequency, RecurrenceFrequency::Weekly);

        assert!(!is_recurring(&ProviderAppointment::default()));
    }

    #[test]
    fn test_weekly_series_respects_horizon() {
        let spec = RecurrenceSpec {
            frequency: RecurrenceFrequency::Weekly,
            occurrences: None,
            until: None,
        };
        let series = expand_series(&base(), &spec, 4);

        assert_eq!(series.len(), 5);
        assert_eq!(series[0].id, "apt-7");
        assert_eq!(series[3].id, "apt-7-r3");
        assert!(series.iter().all(|a| a.series_id.as_deref() == Some("apt-7")));
        assert!(series.iter().all(|a| a.duration() == Duration::minutes(50)));
    }

    #[test]
    fn test_occurrence_count_and_month_ends() {
        let spec = RecurrenceSpec {
            frequency: RecurrenceFrequency::Monthly,
            occurrences: Some(3),
            until: None,
        };
        let series = expand_series(&base(), &spec, 52);

        assert_eq!(series.len(), 3);
        // Jan 31 + 1 month clamps to the last day of February
        assert_eq!(series[1].start_time, Utc.with_ymd_and_hms(2026, 2, 28, 15, 0, 0).unwrap());
    }
}
