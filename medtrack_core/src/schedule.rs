//! Schedule resolver: expand recurring schedules into concrete due events.
//!
//! Expansion is a pure function of the stored schedules, the pattern history
//! and the caller-supplied current zone. Nothing is persisted: due events are
//! always recomputed, so edits can never leave stale events behind.

use crate::{
    pattern::resolve_expected_dose, timezone, DosagePattern, DoseEvent, Error, Medication,
    MedicationSchedule, Result,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;
use uuid::Uuid;

impl MedicationSchedule {
    /// Create a validated schedule.
    ///
    /// The zone id is checked up front (`InvalidTimezone`) and duplicate
    /// weekdays are rejected (`InvalidSchedule`); expansion never re-checks.
    /// An empty weekday set is allowed and means a fully manual schedule.
    pub fn new(
        medication_id: Uuid,
        time_of_day: NaiveTime,
        weekdays: Vec<Weekday>,
        reminder_lead_minutes: u32,
        zone_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        timezone::parse_zone(zone_id)?;

        let mut seen = HashSet::new();
        for day in &weekdays {
            if !seen.insert(*day) {
                return Err(Error::InvalidSchedule(format!(
                    "weekday {:?} listed more than once",
                    day
                )));
            }
        }

        Ok(MedicationSchedule {
            id: Uuid::new_v4(),
            medication_id,
            time_of_day,
            weekdays,
            reminder_lead_minutes,
            zone_id: zone_id.to_string(),
            enabled: true,
            created_at,
            modified_at: created_at,
        })
    }

    /// Reminder instant for a due event (due instant minus lead time)
    pub fn reminder_at(&self, due: DateTime<Utc>) -> DateTime<Utc> {
        due - Duration::minutes(self.reminder_lead_minutes as i64)
    }
}

/// Lazy, finite, restartable iterator over due events in a date range.
///
/// Events are emitted in chronological order, one day at a time. Within a
/// day, events sharing the same resolved wall-clock time are deduplicated so
/// a fall-back overlap (or two schedules colliding on the same minute) never
/// produces a double reminder.
pub struct DueEventIter<'a> {
    medication: &'a Medication,
    patterns: &'a [DosagePattern],
    schedules: Vec<&'a MedicationSchedule>,
    zone: Tz,
    current_zone_id: String,
    cursor: NaiveDate,
    end: NaiveDate,
    day_buffer: Vec<DoseEvent>,
}

impl<'a> Iterator for DueEventIter<'a> {
    type Item = DoseEvent;

    fn next(&mut self) -> Option<DoseEvent> {
        loop {
            if let Some(event) = self.day_buffer.pop() {
                return Some(event);
            }
            if self.cursor > self.end {
                return None;
            }
            let date = self.cursor;
            self.cursor = self.cursor.succ_opt()?;
            self.fill_day(date);
        }
    }
}

impl<'a> DueEventIter<'a> {
    /// Compute and buffer all events for one calendar date
    fn fill_day(&mut self, date: NaiveDate) {
        let mut emitted_times: HashSet<NaiveTime> = HashSet::new();
        let mut events = Vec::new();

        for schedule in &self.schedules {
            if !schedule.fires_on(date) {
                continue;
            }

            let resolved = match timezone::to_instant(date, schedule.time_of_day, self.zone) {
                Ok(r) => r,
                Err(e) => {
                    // Zone data fault; surfaced loudly, never silently dropped
                    // into a wrong instant.
                    tracing::error!(
                        "Failed to resolve {} {} in {}: {}",
                        date,
                        schedule.time_of_day,
                        self.current_zone_id,
                        e
                    );
                    continue;
                }
            };

            let local = timezone::to_local(resolved.instant, self.zone);
            let local_time = local.time();

            // One event per wall-clock minute per day. A fall-back overlap
            // already collapsed to its first occurrence in the adapter; this
            // guards the emitted sequence itself.
            if !emitted_times.insert(local_time) {
                tracing::debug!(
                    "Deduplicated due event at {} {} for {}",
                    date,
                    local_time,
                    self.medication.name
                );
                continue;
            }

            let adjusted = resolved.shifted || schedule.zone_id != self.current_zone_id;

            events.push(DoseEvent {
                medication_id: self.medication.id,
                schedule_id: schedule.id,
                due: resolved.instant,
                local_date: date,
                local_time,
                expected_dosage: resolve_expected_dose(self.medication, self.patterns, date),
                adjusted,
            });
        }

        // Buffer is popped from the back; store latest-first
        events.sort_by(|a, b| b.due.cmp(&a.due));
        self.day_buffer = events;
    }
}

/// Expand all enabled schedules of a medication into due events over
/// `[from, to]` (inclusive), resolved against the current zone.
///
/// The zone id is validated up front. An empty range (`from > to`) or a
/// schedule with zero active weekdays yields an empty sequence, not an error.
pub fn expand_due_events<'a>(
    medication: &'a Medication,
    schedules: &'a [MedicationSchedule],
    patterns: &'a [DosagePattern],
    current_zone_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<DueEventIter<'a>> {
    let zone = timezone::parse_zone(current_zone_id)?;

    let schedules: Vec<&MedicationSchedule> = schedules
        .iter()
        .filter(|s| s.enabled && s.medication_id == medication.id)
        .collect();

    Ok(DueEventIter {
        medication,
        patterns,
        schedules,
        zone,
        current_zone_id: current_zone_id.to_string(),
        cursor: from,
        end: to,
        day_buffer: Vec::new(),
    })
}
