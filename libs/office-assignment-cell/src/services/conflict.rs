use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use shared_models::{Appointment, AppointmentSource, OfficeCode};

use crate::services::engine::AssignmentEngine;
use crate::{ClientProfile, ClinicianProfile, Reassignment};

/// Profiles for every client and clinician on the day being resolved.
#[derive(Debug, Clone, Default)]
pub struct ProfileSnapshot {
    clients: HashMap<String, ClientProfile>,
    clinicians: HashMap<String, ClinicianProfile>,
}

impl ProfileSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(&mut self, profile: ClientProfile) {
        self.clients.insert(profile.id.clone(), profile);
    }

    pub fn insert_clinician(&mut self, profile: ClinicianProfile) {
        self.clinicians.insert(profile.id.clone(), profile);
    }

    pub fn client(&self, id: &str) -> ClientProfile {
        self.clients.get(id).cloned().unwrap_or_else(|| ClientProfile::unknown(id))
    }

    pub fn clinician(&self, id: &str) -> ClinicianProfile {
        self.clinicians.get(id).cloned().unwrap_or_else(|| ClinicianProfile::unknown(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictPair {
    pub office: OfficeCode,
    pub first: String,
    pub second: String,
}

/// Every pair of office-holding appointments that share a room and overlap.
pub fn detect_conflicts(appointments: &[Appointment]) -> Vec<ConflictPair> {
    conflicting_indices(appointments)
        .into_iter()
        .map(|(i, j)| ConflictPair {
            office: appointments[i].office.clone(),
            first: appointments[i].id.clone(),
            second: appointments[j].id.clone(),
        })
        .collect()
}

fn conflicting_indices(appointments: &[Appointment]) -> Vec<(usize, usize)> {
    let mut holders: Vec<usize> = (0..appointments.len())
        .filter(|&i| appointments[i].holds_office())
        .collect();
    holders.sort_by(|&a, &b| {
        let (x, y) = (&appointments[a], &appointments[b]);
        (&x.office, x.start_time, &x.id).cmp(&(&y.office, y.start_time, &y.id))
    });

    let mut pairs = Vec::new();
    for (n, &i) in holders.iter().enumerate() {
        for &j in &holders[n + 1..] {
            if appointments[j].office != appointments[i].office {
                break;
            }
            if appointments[i].overlaps(&appointments[j]) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Ordering key for who keeps a contested office; the larger key wins.
///
/// Manual placements beat provider ones, then higher rule priority, then the
/// earlier-created appointment, then the smaller id.
fn keep_rank(appt: &Appointment) -> (bool, i32, Reverse<chrono::DateTime<Utc>>, Reverse<&str>) {
    (
        appt.source == AppointmentSource::Manual,
        appt.assignment_priority(),
        Reverse(appt.created_at),
        Reverse(appt.id.as_str()),
    )
}

pub struct ConflictResolver<'a> {
    engine: AssignmentEngine<'a>,
    max_passes: usize,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(engine: AssignmentEngine<'a>) -> Self {
        let max_passes = engine.catalog().physical_offices().count().max(1);
        Self { engine, max_passes }
    }

    /// Remove double bookings from one day's appointments in place.
    ///
    /// The loser of each overlapping pair is re-run through the engine with
    /// its current office and every office busy during its slot excluded.
    /// When nothing is free it loses its office and is flagged for manual
    /// assignment. Runs at most one pass per physical office.
    pub fn resolve(&self, appointments: &mut [Appointment], profiles: &ProfileSnapshot) -> Vec<Reassignment> {
        let mut changes = Vec::new();

        for pass in 0..self.max_passes {
            let pairs = conflicting_indices(appointments);
            if pairs.is_empty() {
                break;
            }
            debug!("Conflict pass {}: {} overlapping pairs", pass + 1, pairs.len());

            let mut handled = HashSet::new();
            for (i, j) in pairs {
                if handled.contains(&i) || handled.contains(&j) {
                    continue;
                }
                let (a, b) = (&appointments[i], &appointments[j]);
                if !(a.holds_office() && b.holds_office() && a.office == b.office && a.overlaps(b)) {
                    continue;
                }

                let (loser, winner) = if keep_rank(a) >= keep_rank(b) { (j, i) } else { (i, j) };
                changes.push(self.reassign(appointments, loser, winner, profiles));
                handled.insert(loser);
            }
        }

        // Anything still double-booked after the pass budget is handed to a human
        for (i, j) in conflicting_indices(appointments) {
            let (loser, winner) = if keep_rank(&appointments[i]) >= keep_rank(&appointments[j]) { (j, i) } else { (i, j) };
            if appointments[loser].holds_office() {
                changes.push(flag_for_review(appointments, loser, winner));
            }
        }

        if !changes.is_empty() {
            info!("Resolved {} office conflicts", changes.len());
        }
        changes
    }

    fn reassign(&self, appointments: &mut [Appointment], loser: usize, winner: usize, profiles: &ProfileSnapshot) -> Reassignment {
        let appt = &appointments[loser];

        let mut excluded: HashSet<OfficeCode> = appointments
            .iter()
            .enumerate()
            .filter(|(k, other)| *k != loser && other.holds_office() && other.overlaps(appt))
            .map(|(_, other)| other.office.clone())
            .collect();
        excluded.insert(appt.office.clone());

        let client = profiles.client(&appt.client_id);
        let clinician = profiles.clinician(&appt.clinician_id);
        let result = self.engine.assign_excluding(appt, &client, &clinician, &excluded);

        if !result.is_resolved() {
            return flag_for_review(appointments, loser, winner);
        }

        let winner_id = appointments[winner].id.clone();
        let appt = &mut appointments[loser];
        let previous = std::mem::replace(&mut appt.office, result.office.clone());
        appt.assignment = result.reason();
        appt.needs_assignment = false;
        appt.conflicts.retain(|c| c != &winner_id);
        appt.last_modified = Utc::now();

        debug!(
            appointment_id = %appt.id,
            "Moved from {} to {} (conflict with {})",
            previous, appt.office, winner_id
        );

        Reassignment {
            appointment_id: appt.id.clone(),
            previous_office: previous,
            new_office: appt.office.clone(),
            reason: appt.assignment.clone(),
            needs_assignment: false,
            conflicts_with: vec![winner_id],
        }
    }
}

fn flag_for_review(appointments: &mut [Appointment], loser: usize, winner: usize) -> Reassignment {
    let winner_id = appointments[winner].id.clone();
    let appt = &mut appointments[loser];
    let previous = std::mem::take(&mut appt.office);

    warn!(
        appointment_id = %appt.id,
        "No free office instead of {} (conflict with {}); flagged for manual assignment",
        previous, winner_id
    );

    appt.assignment = None;
    appt.needs_assignment = true;
    if !appt.conflicts.contains(&winner_id) {
        appt.conflicts.push(winner_id.clone());
    }
    appt.last_modified = Utc::now();

    Reassignment {
        appointment_id: appt.id.clone(),
        previous_office: previous,
        new_office: OfficeCode::Unresolved,
        reason: None,
        needs_assignment: true,
        conflicts_with: vec![winner_id],
    }
}
