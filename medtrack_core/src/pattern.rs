//! Dosage pattern engine: resolve the expected dose for an arbitrary date.
//!
//! Patterns are append-only validity intervals over calendar dates. Resolving
//! a date selects the covering interval and indexes into its cycle in O(1);
//! there is no iteration over elapsed days, so a date years in the past or
//! future costs the same as today.

use crate::{DosagePattern, Error, ExpectedDose, Medication, Result};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

impl DosagePattern {
    /// Create a validated dosage pattern.
    ///
    /// Fails fast with `InvalidPattern` on an empty cycle, non-positive
    /// amounts, or an inverted validity interval. Resolution never has to
    /// re-check these.
    pub fn new(
        medication_id: Uuid,
        cycle: Vec<f64>,
        valid_from: NaiveDate,
        valid_until: Option<NaiveDate>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if cycle.is_empty() {
            return Err(Error::InvalidPattern("cycle must not be empty".into()));
        }
        if let Some(bad) = cycle.iter().find(|a| **a <= 0.0 || !a.is_finite()) {
            return Err(Error::InvalidPattern(format!(
                "cycle amounts must be positive, got {}",
                bad
            )));
        }
        if let Some(until) = valid_until {
            if until < valid_from {
                return Err(Error::InvalidPattern(format!(
                    "valid_until {} precedes valid_from {}",
                    until, valid_from
                )));
            }
        }

        Ok(DosagePattern {
            id: Uuid::new_v4(),
            medication_id,
            cycle,
            valid_from,
            valid_until,
            created_at,
        })
    }

    /// Whether this pattern's validity interval contains the date
    pub fn covers(&self, date: NaiveDate) -> bool {
        if date < self.valid_from {
            return false;
        }
        match self.valid_until {
            Some(until) => date <= until,
            None => true,
        }
    }

    /// Expected dose on the given date, `None` if the date is not covered.
    ///
    /// Cycle indexing uses calendar-date subtraction (not elapsed-time
    /// subtraction) so DST transitions can never skew the day count.
    pub fn dose_on(&self, date: NaiveDate) -> Option<f64> {
        if !self.covers(date) {
            return None;
        }
        let days_since_start = (date - self.valid_from).num_days();
        // Euclidean remainder: covers() keeps days non-negative here, but a
        // negative input must still index correctly.
        let index = days_since_start.rem_euclid(self.cycle.len() as i64) as usize;
        Some(self.cycle[index])
    }
}

/// Resolve the pattern-based dose for a date among a medication's patterns.
///
/// Under the single-active-pattern invariant at most one pattern covers any
/// date; if stored data violates that, the most recently superseding one
/// (latest `valid_from`) wins, and the violation is logged as a fault.
pub fn resolve_pattern_dose<'a, I>(patterns: I, date: NaiveDate) -> Option<f64>
where
    I: IntoIterator<Item = &'a DosagePattern>,
{
    let mut covering: Vec<&DosagePattern> =
        patterns.into_iter().filter(|p| p.covers(date)).collect();

    if covering.len() > 1 {
        tracing::error!(
            "{} patterns cover {}; stored history violates the single-active invariant",
            covering.len(),
            date
        );
        covering.sort_by_key(|p| p.valid_from);
    }

    covering.last().and_then(|p| p.dose_on(date))
}

/// Resolve the expected dose for a medication on a date.
///
/// Falls back to the medication's fixed dosage when no pattern covers the
/// date (including dates before the first pattern started).
pub fn resolve_expected_dose(
    medication: &Medication,
    patterns: &[DosagePattern],
    date: NaiveDate,
) -> ExpectedDose {
    let own_patterns = patterns.iter().filter(|p| p.medication_id == medication.id);
    match resolve_pattern_dose(own_patterns, date) {
        Some(amount) => ExpectedDose::Pattern { amount },
        None => ExpectedDose::Fixed {
            amount: medication.fixed_dosage,
        },
    }
}

/// Append a new pattern to a medication's history, superseding the previous.
///
/// If the latest existing pattern is open-ended (or runs past the new start),
/// it is closed at the day before the new pattern's `valid_from`. Patterns
/// are never mutated otherwise; history stays reproducible.
pub fn supersede(patterns: &mut Vec<DosagePattern>, new: DosagePattern) -> Result<()> {
    if let Some(prev) = patterns.iter_mut().max_by_key(|p| p.valid_from) {
        if prev.valid_from >= new.valid_from {
            return Err(Error::InvalidPattern(format!(
                "new pattern must start after {} (the current pattern's start)",
                prev.valid_from
            )));
        }
        let cutoff = new.valid_from.pred_opt().ok_or_else(|| {
            Error::InvalidPattern("pattern cannot start on the first representable day".into())
        })?;
        if prev.valid_until.map_or(true, |until| until >= new.valid_from) {
            tracing::info!(
                "Closing pattern {} at {} (superseded from {})",
                prev.id,
                cutoff,
                new.valid_from
            );
            prev.valid_until = Some(cutoff);
        }
    }

    patterns.push(new);
    Ok(())
}
