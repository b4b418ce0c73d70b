//! CSV rollup for archiving WAL log entries.
//!
//! Resolved dose log entries are rolled up from the JSONL WAL into a CSV
//! archive atomically, so the WAL stays small while the full dosing history
//! remains queryable. The status audit history is not flattened into CSV;
//! it lives only in JSON form.

use crate::{DoseStatus, MedicationLogEntry, Result};
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV archive
#[derive(Debug, serde::Serialize)]
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

impl From<&MedicationLogEntry> for CsvRow {
    fn from(entry: &MedicationLogEntry) -> Self {
        CsvRow {
            id: entry.id.to_string(),
            medication_id: entry.medication_id.to_string(),
            due_at: entry.due_at.map(|t| t.to_rfc3339()),
            due_date: entry.due_date.map(|d| d.to_string()),
            taken_at: entry.taken_at.map(|t| t.to_rfc3339()),
            status: status_str(entry.status).to_string(),
            expected_dosage: entry.expected_dosage,
            actual_dosage: entry.actual_dosage,
            was_late: entry.was_late,
            device_id: entry.device_id.clone(),
            created_at: entry.created_at.to_rfc3339(),
            modified_at: entry.modified_at.to_rfc3339(),
            deleted: entry.deleted,
        }
    }
}

pub(crate) fn status_str(status: DoseStatus) -> &'static str {
    match status {
        DoseStatus::Scheduled => "scheduled",
        DoseStatus::Taken => "taken",
        DoseStatus::Missed => "missed",
        DoseStatus::Skipped => "skipped",
        DoseStatus::Unknown => "unknown",
    }
}

/// Roll up WAL entries into CSV and archive the WAL atomically
///
/// This function:
/// 1. Reads all entries from the WAL
/// 2. Appends them to the CSV file (creates with headers if needed)
/// 3. Syncs the CSV to disk
/// 4. Renames the WAL to .processed
/// 5. Returns the number of entries processed
///
/// # Safety
/// - CSV is fsynced before WAL is renamed
/// - WAL is renamed (not deleted) to allow manual recovery if needed
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let entries = crate::wal::read_entries(wal_path)?;

    if entries.is_empty() {
        tracing::info!("No log entries in WAL to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    // Headers only when the file is empty
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for entry in &entries {
        writer.serialize(CsvRow::from(entry))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} log entries to CSV", entries.len());

    // Atomically archive the WAL by renaming it
    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;

    tracing::info!("Archived WAL to {:?}", processed_path);

    Ok(entries.len())
}

/// Clean up old processed WAL files in a directory
pub fn cleanup_processed_wals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Some(extension) = path.extension() {
            if extension == "processed" {
                std::fs::remove_file(&path)?;
                tracing::debug!("Removed processed WAL: {:?}", path);
                count += 1;
            }
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed WAL files", count);
    }

    Ok(count)
}
