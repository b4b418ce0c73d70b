//! Safety window validator: the dose-logging state machine.
//!
//! Classification is a pure function of the attempt and the log history; the
//! caller owns applying the resulting transition under its own write guard
//! (the store's optimistic version check, see `state`). Timing here is
//! advisory, never enforced: a late dose warns, it is not blocked.

use crate::{DoseEvent, DoseStatus, Medication, MedicationLogEntry, StatusChange};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Default safety window: a dose logged within this much of its due instant
/// is on time. The boundary itself is on the safe side.
pub const DEFAULT_SAFETY_WINDOW_HOURS: i64 = 12;

/// Outcome of a dose-logging attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutcome {
    /// The dose may be logged. `was_late` is recorded for audit/adherence
    /// when the attempt came after the safety window and the user confirmed.
    Taken { was_late: bool },
    /// The attempt is past the safety window. Not a rejection: the caller
    /// should advise waiting for the next dose, and may retry with
    /// `confirm_late` to log anyway.
    LateWarning { elapsed: Duration },
    /// A `Taken` dose already exists for this due date. Waived for PRN
    /// medications.
    DuplicateDoseForDay,
}

/// One dose-logging attempt, ready for classification
pub struct LogAttempt<'a> {
    pub medication: &'a Medication,
    /// The due event being logged against; `None` for an unscheduled/PRN dose
    pub due_event: Option<&'a DoseEvent>,
    pub attempt_at: DateTime<Utc>,
    /// User explicitly confirmed logging past the safety window
    pub confirm_late: bool,
    /// Existing log entries for the medication (duplicate guard input)
    pub history: &'a [MedicationLogEntry],
    pub safety_window: Duration,
}

/// Classify a dose-logging attempt.
///
/// Order matters: the duplicate guard runs before the timing check, so a
/// second same-day attempt is reported as a duplicate rather than late.
pub fn classify_attempt(attempt: &LogAttempt<'_>) -> LogOutcome {
    let due_event = match attempt.due_event {
        Some(event) => event,
        // PRN or ad-hoc dose: no window, no duplicate constraint
        None => return LogOutcome::Taken { was_late: false },
    };

    if !attempt.medication.as_needed && has_taken_dose_for(attempt.history, due_event) {
        tracing::info!(
            "Duplicate dose attempt for {} on {}",
            attempt.medication.name,
            due_event.local_date
        );
        return LogOutcome::DuplicateDoseForDay;
    }

    let elapsed = attempt.attempt_at - due_event.due;

    // Early doses and anything up to and including the window boundary are
    // on time. Exactly 12h00m00s is still safe.
    if elapsed <= attempt.safety_window {
        return LogOutcome::Taken { was_late: false };
    }

    if attempt.confirm_late {
        tracing::info!(
            "Late dose confirmed for {} ({}m past due)",
            attempt.medication.name,
            elapsed.num_minutes()
        );
        return LogOutcome::Taken { was_late: true };
    }

    LogOutcome::LateWarning { elapsed }
}

/// Whether the most recent non-deleted `Taken` entry shares the attempt's
/// due date
fn has_taken_dose_for(history: &[MedicationLogEntry], due_event: &DoseEvent) -> bool {
    history
        .iter()
        .filter(|e| {
            !e.deleted
                && e.medication_id == due_event.medication_id
                && e.status == DoseStatus::Taken
        })
        .max_by_key(|e| e.modified_at)
        .map_or(false, |latest| latest.due_date == Some(due_event.local_date))
}

/// Materialize a `Scheduled` log entry for a due event
pub fn entry_for_event(event: &DoseEvent, device_id: &str, now: DateTime<Utc>) -> MedicationLogEntry {
    MedicationLogEntry {
        id: Uuid::new_v4(),
        medication_id: event.medication_id,
        due_at: Some(event.due),
        due_date: Some(event.local_date),
        taken_at: None,
        status: DoseStatus::Scheduled,
        // Frozen here; later pattern edits must not rewrite history
        expected_dosage: Some(event.expected_dosage.amount()),
        actual_dosage: None,
        was_late: false,
        device_id: device_id.to_string(),
        created_at: now,
        modified_at: now,
        deleted: false,
        status_history: vec![StatusChange {
            status: DoseStatus::Scheduled,
            at: now,
            device_id: device_id.to_string(),
        }],
    }
}

/// Apply a successful `Taken` outcome to a log entry
pub fn record_taken(
    entry: &mut MedicationLogEntry,
    attempt_at: DateTime<Utc>,
    actual_dosage: f64,
    was_late: bool,
    device_id: &str,
) {
    entry.taken_at = Some(attempt_at);
    entry.actual_dosage = Some(actual_dosage);
    entry.was_late = was_late;
    entry.transition(DoseStatus::Taken, attempt_at, device_id);
}

/// Explicit user skip. Only an open (`Scheduled`) entry can be skipped.
pub fn mark_skipped(
    entry: &mut MedicationLogEntry,
    at: DateTime<Utc>,
    device_id: &str,
) -> bool {
    if !entry.status.is_open() {
        return false;
    }
    entry.transition(DoseStatus::Skipped, at, device_id);
    true
}

/// Transition stale `Scheduled` entries to `Missed` once a later due event's
/// window has opened (its due instant has passed) with no action taken.
///
/// Idempotent: resolved entries are untouched, so re-running is a no-op.
pub fn sweep_missed(
    entries: &mut [MedicationLogEntry],
    later_events: &[DoseEvent],
    now: DateTime<Utc>,
    device_id: &str,
) -> usize {
    let mut swept = 0;

    for entry in entries.iter_mut().filter(|e| !e.deleted && e.status.is_open()) {
        let due = match entry.due_at {
            Some(due) => due,
            None => continue,
        };

        let superseded = later_events
            .iter()
            .any(|ev| ev.medication_id == entry.medication_id && ev.due > due && ev.due <= now);

        if superseded {
            entry.transition(DoseStatus::Missed, now, device_id);
            swept += 1;
        }
    }

    if swept > 0 {
        tracing::info!("Marked {} doses as missed", swept);
    }
    swept
}

/// Transition `Scheduled` entries older than `max_age` to `Unknown`.
///
/// This is the periodic timeout sweep; it is the only path into `Unknown`.
/// Idempotent by the same argument as `sweep_missed`.
pub fn sweep_unknown(
    entries: &mut [MedicationLogEntry],
    now: DateTime<Utc>,
    max_age: Duration,
    device_id: &str,
) -> usize {
    let mut swept = 0;

    for entry in entries.iter_mut().filter(|e| !e.deleted && e.status.is_open()) {
        if let Some(due) = entry.due_at {
            if now - due > max_age {
                entry.transition(DoseStatus::Unknown, now, device_id);
                swept += 1;
            }
        }
    }

    if swept > 0 {
        tracing::info!("Marked {} stale doses as unknown", swept);
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExpectedDose;
    use chrono::TimeZone;

    fn medication(as_needed: bool) -> Medication {
        Medication {
            id: Uuid::new_v4(),
            name: "Warfarin".into(),
            fixed_dosage: 5.0,
            dosage_unit: "mg".into(),
            as_needed,
            active: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn due_event(med: &Medication, due: DateTime<Utc>) -> DoseEvent {
        DoseEvent {
            medication_id: med.id,
            schedule_id: Uuid::new_v4(),
            due,
            local_date: due.date_naive(),
            local_time: due.time(),
            expected_dosage: ExpectedDose::Fixed { amount: 5.0 },
            adjusted: false,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, h, m, s).unwrap()
    }

    fn attempt<'a>(
        med: &'a Medication,
        event: &'a DoseEvent,
        when: DateTime<Utc>,
        history: &'a [MedicationLogEntry],
        confirm_late: bool,
    ) -> LogAttempt<'a> {
        LogAttempt {
            medication: med,
            due_event: Some(event),
            attempt_at: when,
            confirm_late,
            history,
            safety_window: Duration::hours(DEFAULT_SAFETY_WINDOW_HOURS),
        }
    }

    #[test]
    fn test_early_dose_is_on_time() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let outcome = classify_attempt(&attempt(&med, &event, at(7, 15, 0), &[], false));
        assert_eq!(outcome, LogOutcome::Taken { was_late: false });
    }

    #[test]
    fn test_exact_window_boundary_is_on_time() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        // Exactly 12h00m00s after due: still safe, inclusive boundary
        let outcome = classify_attempt(&attempt(&med, &event, at(20, 0, 0), &[], false));
        assert_eq!(outcome, LogOutcome::Taken { was_late: false });
    }

    #[test]
    fn test_one_second_past_window_warns() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let outcome = classify_attempt(&attempt(&med, &event, at(20, 0, 1), &[], false));
        assert_eq!(
            outcome,
            LogOutcome::LateWarning {
                elapsed: Duration::hours(12) + Duration::seconds(1)
            }
        );
    }

    #[test]
    fn test_confirmed_late_dose_records_flag() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let outcome = classify_attempt(&attempt(&med, &event, at(21, 0, 0), &[], true));
        assert_eq!(outcome, LogOutcome::Taken { was_late: true });
    }

    #[test]
    fn test_duplicate_same_day_rejected() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let mut first = entry_for_event(&event, "phone", at(7, 0, 0));
        record_taken(&mut first, at(8, 5, 0), 5.0, false, "phone");
        let history = vec![first];

        let outcome = classify_attempt(&attempt(&med, &event, at(9, 0, 0), &history, false));
        assert_eq!(outcome, LogOutcome::DuplicateDoseForDay);
    }

    #[test]
    fn test_duplicate_guard_waived_for_prn() {
        let med = medication(true);
        let event = due_event(&med, at(8, 0, 0));

        let mut first = entry_for_event(&event, "phone", at(7, 0, 0));
        record_taken(&mut first, at(8, 5, 0), 5.0, false, "phone");
        let history = vec![first];

        let outcome = classify_attempt(&attempt(&med, &event, at(9, 0, 0), &history, false));
        assert_eq!(outcome, LogOutcome::Taken { was_late: false });
    }

    #[test]
    fn test_previous_day_taken_does_not_block() {
        let med = medication(false);
        let yesterday = due_event(&med, at(8, 0, 0) - Duration::days(1));
        let today = due_event(&med, at(8, 0, 0));

        let mut earlier = entry_for_event(&yesterday, "phone", at(7, 0, 0) - Duration::days(1));
        record_taken(&mut earlier, yesterday.due, 5.0, false, "phone");
        let history = vec![earlier];

        let outcome = classify_attempt(&attempt(&med, &today, at(8, 10, 0), &history, false));
        assert_eq!(outcome, LogOutcome::Taken { was_late: false });
    }

    #[test]
    fn test_prn_attempt_without_event_allowed() {
        let med = medication(true);
        let outcome = classify_attempt(&LogAttempt {
            medication: &med,
            due_event: None,
            attempt_at: at(3, 0, 0),
            confirm_late: false,
            history: &[],
            safety_window: Duration::hours(DEFAULT_SAFETY_WINDOW_HOURS),
        });
        assert_eq!(outcome, LogOutcome::Taken { was_late: false });
    }

    #[test]
    fn test_skip_only_from_scheduled() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let mut entry = entry_for_event(&event, "phone", at(7, 0, 0));
        assert!(mark_skipped(&mut entry, at(7, 30, 0), "phone"));
        assert_eq!(entry.status, DoseStatus::Skipped);

        // Already resolved: second skip is refused
        assert!(!mark_skipped(&mut entry, at(7, 45, 0), "phone"));
    }

    #[test]
    fn test_sweep_missed_when_next_window_opens() {
        let med = medication(false);
        let morning = due_event(&med, at(8, 0, 0));
        let evening = due_event(&med, at(20, 0, 0));

        let mut entries = vec![entry_for_event(&morning, "phone", at(7, 0, 0))];

        // Evening dose not yet due: nothing to sweep
        let swept = sweep_missed(&mut entries, &[evening.clone()], at(19, 0, 0), "phone");
        assert_eq!(swept, 0);
        assert_eq!(entries[0].status, DoseStatus::Scheduled);

        // Evening window has opened: morning dose is missed
        let swept = sweep_missed(&mut entries, &[evening.clone()], at(20, 30, 0), "phone");
        assert_eq!(swept, 1);
        assert_eq!(entries[0].status, DoseStatus::Missed);

        // Idempotent
        let swept = sweep_missed(&mut entries, &[evening], at(21, 0, 0), "phone");
        assert_eq!(swept, 0);
    }

    #[test]
    fn test_sweep_unknown_idempotent() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));
        let mut entries = vec![entry_for_event(&event, "phone", at(7, 0, 0))];

        let later = at(8, 0, 0) + Duration::hours(72);
        let swept = sweep_unknown(&mut entries, later, Duration::hours(48), "phone");
        assert_eq!(swept, 1);
        assert_eq!(entries[0].status, DoseStatus::Unknown);

        let swept = sweep_unknown(&mut entries, later, Duration::hours(48), "phone");
        assert_eq!(swept, 0);
    }

    #[test]
    fn test_taken_dose_untouched_by_sweeps() {
        let med = medication(false);
        let event = due_event(&med, at(8, 0, 0));

        let mut entry = entry_for_event(&event, "phone", at(7, 0, 0));
        record_taken(&mut entry, at(8, 5, 0), 5.0, false, "phone");
        let mut entries = vec![entry];

        let later = at(8, 0, 0) + Duration::hours(72);
        assert_eq!(sweep_unknown(&mut entries, later, Duration::hours(48), "phone"), 0);
        assert_eq!(entries[0].status, DoseStatus::Taken);
        assert_eq!(entries[0].status_history.len(), 2);
    }
}
