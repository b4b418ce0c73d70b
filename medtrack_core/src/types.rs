//! Core domain types for the Medtrack system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Medications and their recurring schedules
//! - Dosage patterns (append-only validity intervals)
//! - Derived due events
//! - Dose log entries and their status state machine
//! - Per-device sync metadata

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Medication and Schedule Types
// ============================================================================

/// A medication the user takes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub name: String,
    /// Static fallback dosage, used when no dosage pattern covers a date
    pub fixed_dosage: f64,
    pub dosage_unit: String,
    /// PRN ("as needed") medications are exempt from the duplicate-per-day guard
    pub as_needed: bool,
    /// Soft-deactivation flag; medications are never hard-deleted so that
    /// historical log entries keep a valid reference
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A recurring daily schedule: one time-of-day on a set of weekdays.
///
/// Schedules are stored keyed to a civil time-of-day plus the zone the user
/// was in when they created it. Due instants are always recomputed against
/// the *current* zone, so travel never silently drops a dose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicationSchedule {
    pub id: Uuid,
    pub medication_id: Uuid,
    /// Local wall-clock time the dose is due (no date component)
    pub time_of_day: NaiveTime,
    /// Weekdays the schedule fires on; empty means fully manual (no events)
    pub weekdays: Vec<Weekday>,
    /// Minutes of reminder lead time for notification consumers
    pub reminder_lead_minutes: u32,
    /// IANA zone id the schedule was created under
    pub zone_id: String,
    /// Soft-deactivation flag
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MedicationSchedule {
    /// Whether this schedule fires on the given calendar date's weekday
    pub fn fires_on(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        self.enabled && self.weekdays.contains(&date.weekday())
    }
}

// ============================================================================
// Dosage Pattern Types
// ============================================================================

/// A cyclic dosage pattern valid over a date interval.
///
/// Patterns are append-only history: a pattern is superseded by a newer one,
/// never edited, so expected-dose calculations for historical dates remain
/// stable forever.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DosagePattern {
    pub id: Uuid,
    pub medication_id: Uuid,
    /// Ordered, non-empty cycle of dosage amounts applied across consecutive
    /// calendar days, repeating
    pub cycle: Vec<f64>,
    pub valid_from: NaiveDate,
    /// Open-ended when `None`
    pub valid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Result of resolving the expected dose for a medication on a date
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ExpectedDose {
    /// An active pattern covered the date
    Pattern { amount: f64 },
    /// No pattern covered the date; the medication's fixed dosage applies
    Fixed { amount: f64 },
}

impl ExpectedDose {
    pub fn amount(&self) -> f64 {
        match self {
            ExpectedDose::Pattern { amount } | ExpectedDose::Fixed { amount } => *amount,
        }
    }
}

// ============================================================================
// Due Event (derived, never persisted)
// ============================================================================

/// A single computed instant at which a dose is expected.
///
/// Always recomputed from `MedicationSchedule` + `DosagePattern`; never
/// stored, so pattern or schedule edits can never leave stale events behind.
#[derive(Clone, Debug, PartialEq)]
pub struct DoseEvent {
    pub medication_id: Uuid,
    pub schedule_id: Uuid,
    /// Absolute due instant
    pub due: DateTime<Utc>,
    /// Civil date the dose belongs to, in the resolving zone
    pub local_date: NaiveDate,
    /// Wall-clock time actually resolved (differs from the schedule's
    /// time-of-day when a DST gap shifted it forward)
    pub local_time: NaiveTime,
    pub expected_dosage: ExpectedDose,
    /// True when the instant was shifted past a DST gap, or when the event
    /// was resolved under a different zone than the schedule was created in
    pub adjusted: bool,
}

// ============================================================================
// Log Entry Types
// ============================================================================

/// Status of a dose log entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    /// Due event exists, not yet acted on
    Scheduled,
    Taken,
    Missed,
    Skipped,
    /// Terminal state reached only by the timeout sweep, never by the user
    Unknown,
}

impl DoseStatus {
    /// Whether this status can still transition (only `Scheduled` can)
    pub fn is_open(&self) -> bool {
        matches!(self, DoseStatus::Scheduled)
    }
}

/// One audit-trail entry recording a status transition.
///
/// The history list is append-only and union-merged during sync; it is never
/// overwritten by a losing write.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub status: DoseStatus,
    pub at: DateTime<Utc>,
    pub device_id: String,
}

/// A recorded dosing action (or pending scheduled dose)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicationLogEntry {
    pub id: Uuid,
    pub medication_id: Uuid,
    /// Nominal due instant; `None` for unscheduled/PRN doses
    pub due_at: Option<DateTime<Utc>>,
    /// Civil date the due event belongs to (drives the duplicate-per-day guard)
    pub due_date: Option<NaiveDate>,
    /// When the dose was actually taken; `None` until taken
    pub taken_at: Option<DateTime<Utc>>,
    pub status: DoseStatus,
    /// Expected dosage frozen at creation time from the then-active pattern.
    /// Later pattern edits never retroactively alter historical variance.
    pub expected_dosage: Option<f64>,
    pub actual_dosage: Option<f64>,
    /// Audit flag: the dose was logged past the safety window after an
    /// explicit user confirmation
    pub was_late: bool,
    /// Device that created the entry
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted: bool,
    /// Append-only status transition history (audit requirement)
    pub status_history: Vec<StatusChange>,
}

impl MedicationLogEntry {
    /// Record a status transition, appending to the audit history
    pub fn transition(&mut self, status: DoseStatus, at: DateTime<Utc>, device_id: &str) {
        self.status = status;
        self.modified_at = at;
        self.status_history.push(StatusChange {
            status,
            at,
            device_id: device_id.to_string(),
        });
    }
}

// ============================================================================
// Sync Metadata
// ============================================================================

/// Per-entity sync metadata used by the reconciler.
///
/// Never exposed to UI consumers directly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub device_id: String,
    /// Monotonically increasing per-device version counter
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    /// SHA-256 hash of the entity's serialized fields
    pub content_hash: String,
}
