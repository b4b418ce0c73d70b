//! Write-Ahead Log (WAL) for dose log persistence.
//!
//! Log entries are appended to a JSONL (JSON Lines) file with file locking
//! so two processes logging doses at once cannot interleave writes. The pure
//! engine functions never touch this module; it exists for the CLI and other
//! storage collaborators.

use crate::{MedicationLogEntry, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Sink trait for persisting dose log entries
pub trait LogSink {
    fn append(&mut self, entry: &MedicationLogEntry) -> Result<()>;
}

/// JSONL-based log sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl LogSink for JsonlSink {
    fn append(&mut self, entry: &MedicationLogEntry) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // Acquire exclusive lock
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!("Appended log entry {} to WAL", entry.id);
        Ok(())
    }
}

/// Read all log entries from a WAL file.
///
/// A later write of the same entry id supersedes an earlier one, so callers
/// get the final state of each entry, not every intermediate revision.
pub fn read_entries(path: &Path) -> Result<Vec<MedicationLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    // Shared lock for reading
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut entries: Vec<MedicationLogEntry> = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<MedicationLogEntry>(&line) {
            Ok(entry) => {
                if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
                    *existing = entry;
                } else {
                    entries.push(entry);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to parse log entry at line {}: {}", line_num + 1, e);
                // Continue reading, don't fail completely
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} log entries from WAL", entries.len());
    Ok(entries)
}
