//! Dose variance and adherence statistics.
//!
//! Variance compares what was expected (frozen at log creation) with what was
//! actually taken. Adherence aggregates entry statuses over a window. Both
//! distinguish "nothing to report" from zero.

use crate::{DoseStatus, MedicationLogEntry};
use chrono::{DateTime, Utc};

/// Comparison epsilon for dosage amounts. Decimal dose values go through
/// rounding on entry; exact float equality would flag phantom variances.
pub const DOSAGE_EPSILON: f64 = 0.01;

/// Expected-vs-actual comparison for one log entry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VarianceResult {
    pub expected: f64,
    pub actual: f64,
    /// `actual - expected`
    pub delta: f64,
    pub has_variance: bool,
}

/// Adherence rate over a window
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdherenceRate {
    /// Fraction of accountable doses that were taken, in `[0, 1]`
    Rate(f64),
    /// No accountable doses in the window. Distinct from a rate of zero.
    NoData,
}

/// Compute the dose variance for a log entry.
///
/// Returns `None` when the entry carries no frozen expectation or no actual
/// amount (pending doses, PRN doses logged without a pattern).
pub fn compute_variance(entry: &MedicationLogEntry) -> Option<VarianceResult> {
    let expected = entry.expected_dosage?;
    let actual = entry.actual_dosage?;
    let delta = actual - expected;

    Some(VarianceResult {
        expected,
        actual,
        delta,
        has_variance: delta.abs() > DOSAGE_EPSILON,
    })
}

/// Adherence rate over `[from, to)`.
///
/// Counts `Taken` over `Scheduled + Taken + Missed + Skipped`. `Unknown`
/// entries are excluded entirely: they carry no signal either way. Entries
/// without a due instant (PRN) are not accountable and are skipped.
pub fn adherence_rate(
    entries: &[MedicationLogEntry],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> AdherenceRate {
    let mut taken = 0u32;
    let mut accountable = 0u32;

    for entry in entries.iter().filter(|e| !e.deleted) {
        let due = match entry.due_at {
            Some(due) => due,
            None => continue,
        };
        if due < from || due >= to {
            continue;
        }

        match entry.status {
            DoseStatus::Taken => {
                taken += 1;
                accountable += 1;
            }
            DoseStatus::Scheduled | DoseStatus::Missed | DoseStatus::Skipped => {
                accountable += 1;
            }
            DoseStatus::Unknown => {}
        }
    }

    if accountable == 0 {
        return AdherenceRate::NoData;
    }
    AdherenceRate::Rate(f64::from(taken) / f64::from(accountable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusChange;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn entry(
        status: DoseStatus,
        due: Option<DateTime<Utc>>,
        expected: Option<f64>,
        actual: Option<f64>,
    ) -> MedicationLogEntry {
        let now = Utc::now();
        MedicationLogEntry {
            id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            due_at: due,
            due_date: due.map(|d| d.date_naive()),
            taken_at: None,
            status,
            expected_dosage: expected,
            actual_dosage: actual,
            was_late: false,
            device_id: "phone".into(),
            created_at: now,
            modified_at: now,
            deleted: false,
            status_history: vec![StatusChange {
                status,
                at: now,
                device_id: "phone".into(),
            }],
        }
    }

    #[test]
    fn test_variance_within_epsilon() {
        let e = entry(DoseStatus::Taken, None, Some(5.00), Some(5.005));
        let v = compute_variance(&e).unwrap();
        assert!(!v.has_variance);
    }

    #[test]
    fn test_variance_beyond_epsilon() {
        let e = entry(DoseStatus::Taken, None, Some(5.00), Some(5.02));
        let v = compute_variance(&e).unwrap();
        assert!(v.has_variance);
        assert!((v.delta - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_variance_needs_both_amounts() {
        let e = entry(DoseStatus::Scheduled, None, Some(5.0), None);
        assert!(compute_variance(&e).is_none());

        let e = entry(DoseStatus::Taken, None, None, Some(5.0));
        assert!(compute_variance(&e).is_none());
    }

    #[test]
    fn test_adherence_rate_counts_statuses() {
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        let entries = vec![
            entry(DoseStatus::Taken, Some(base), Some(1.0), Some(1.0)),
            entry(DoseStatus::Taken, Some(base + Duration::days(1)), Some(1.0), Some(1.0)),
            entry(DoseStatus::Missed, Some(base + Duration::days(2)), Some(1.0), None),
            entry(DoseStatus::Skipped, Some(base + Duration::days(3)), Some(1.0), None),
        ];

        let rate = adherence_rate(&entries, base - Duration::days(1), base + Duration::days(7));
        assert_eq!(rate, AdherenceRate::Rate(0.5));
    }

    #[test]
    fn test_adherence_empty_window_is_no_data() {
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        let entries = vec![entry(DoseStatus::Taken, Some(base), Some(1.0), Some(1.0))];

        // Window entirely after the only entry
        let rate = adherence_rate(
            &entries,
            base + Duration::days(10),
            base + Duration::days(17),
        );
        assert_eq!(rate, AdherenceRate::NoData);
    }

    #[test]
    fn test_adherence_excludes_unknown_and_prn() {
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        let entries = vec![
            entry(DoseStatus::Unknown, Some(base), Some(1.0), None),
            // PRN dose with no due instant
            entry(DoseStatus::Taken, None, None, Some(1.0)),
        ];

        let rate = adherence_rate(&entries, base - Duration::days(1), base + Duration::days(1));
        assert_eq!(rate, AdherenceRate::NoData);
    }
}
