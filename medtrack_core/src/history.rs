//! Dose log history loading across the WAL and the CSV archive.
//!
//! The duplicate-dose guard, the sweeps and the adherence calculator all
//! need recent log entries; this module assembles them from both stores,
//! deduplicating entries that appear in each.

use crate::{DoseStatus, MedicationLogEntry, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// CSV row format for reading archived entries
#[derive(Debug, Deserialize)]
struct CsvRow {
    id: String,
    medication_id: String,
    due_at: Option<String>,
    due_date: Option<String>,
    taken_at: Option<String>,
    status: String,
    expected_dosage: Option<f64>,
    actual_dosage: Option<f64>,
    was_late: bool,
    device_id: String,
    created_at: String,
    modified_at: String,
    deleted: bool,
}

fn parse_status(s: &str) -> crate::Result<DoseStatus> {
    match s {
        "scheduled" => Ok(DoseStatus::Scheduled),
        "taken" => Ok(DoseStatus::Taken),
        "missed" => Ok(DoseStatus::Missed),
        "skipped" => Ok(DoseStatus::Skipped),
        "unknown" => Ok(DoseStatus::Unknown),
        other => Err(crate::Error::Other(format!("Invalid status: {}", other))),
    }
}

fn parse_instant(s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Other(format!("Invalid date: {}", e)))
}

impl TryFrom<CsvRow> for MedicationLogEntry {
    type Error = crate::Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| crate::Error::Other(format!("Invalid UUID: {}", e)))?;
        let medication_id = Uuid::parse_str(&row.medication_id)
            .map_err(|e| crate::Error::Other(format!("Invalid UUID: {}", e)))?;

        let due_at = row.due_at.as_deref().map(parse_instant).transpose()?;
        let taken_at = row.taken_at.as_deref().map(parse_instant).transpose()?;
        let due_date = row
            .due_date
            .as_deref()
            .map(|s| {
                s.parse::<NaiveDate>()
                    .map_err(|e| crate::Error::Other(format!("Invalid date: {}", e)))
            })
            .transpose()?;

        Ok(MedicationLogEntry {
            id,
            medication_id,
            due_at,
            due_date,
            taken_at,
            status: parse_status(&row.status)?,
            expected_dosage: row.expected_dosage,
            actual_dosage: row.actual_dosage,
            was_late: row.was_late,
            device_id: row.device_id,
            created_at: parse_instant(&row.created_at)?,
            modified_at: parse_instant(&row.modified_at)?,
            deleted: row.deleted,
            status_history: vec![], // Not stored in CSV
        })
    }
}

/// Load log entries from the last N days from both WAL and CSV
///
/// Returns entries sorted by `modified_at` (newest first). Entries appearing
/// in both stores keep the WAL copy, which is the fresher one.
pub fn load_recent_entries(
    wal_path: &Path,
    csv_path: &Path,
    days: i64,
) -> Result<Vec<MedicationLogEntry>> {
    let cutoff = Utc::now() - Duration::days(days);
    let mut entries = Vec::new();
    let mut seen_ids = HashSet::new();

    // Load from WAL first (most recent)
    if wal_path.exists() {
        let wal_entries = crate::wal::read_entries(wal_path)?;
        for entry in wal_entries {
            if entry.modified_at >= cutoff {
                seen_ids.insert(entry.id);
                entries.push(entry);
            }
        }
        tracing::debug!("Loaded {} log entries from WAL", entries.len());
    }

    // Load from CSV (archived)
    if csv_path.exists() {
        let csv_entries = load_entries_from_csv(csv_path)?;
        let mut csv_count = 0;
        for entry in csv_entries {
            if entry.modified_at >= cutoff && !seen_ids.contains(&entry.id) {
                seen_ids.insert(entry.id);
                entries.push(entry);
                csv_count += 1;
            }
        }
        tracing::debug!("Loaded {} log entries from CSV", csv_count);
    }

    entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

    tracing::info!(
        "Loaded {} total log entries from last {} days",
        entries.len(),
        days
    );

    Ok(entries)
}

/// Load all log entries from a CSV archive
fn load_entries_from_csv(path: &Path) -> Result<Vec<MedicationLogEntry>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let mut entries = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        match result {
            Ok(row) => match MedicationLogEntry::try_from(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse CSV row: {}", e);
                    // Continue processing other rows
                }
            },
            Err(e) => {
                tracing::warn!("Failed to deserialize CSV row: {}", e);
            }
        }
    }

    Ok(entries)
}
