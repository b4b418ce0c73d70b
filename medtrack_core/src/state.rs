//! User medication state persistence with file locking.
//!
//! Medications, schedules and pattern history live in one JSON state file,
//! saved atomically and guarded by file locks. Every entity carries a sync
//! record, and writers go through an optimistic version check so two devices
//! editing the same entity cannot silently clobber each other; conflicts
//! that do happen offline are resolved later by `sync::merge`.

use crate::{
    pattern, sync, DosagePattern, Error, Medication, MedicationSchedule, Result, SyncRecord,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// The user's persistent medication state
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct UserMedState {
    pub medications: Vec<Medication>,
    pub schedules: Vec<MedicationSchedule>,
    /// Pattern history per medication, append-only
    pub patterns: HashMap<Uuid, Vec<DosagePattern>>,
    /// Sync metadata per entity id
    pub sync: HashMap<Uuid, SyncRecord>,
}

impl UserMedState {
    /// Look up an active medication by (case-insensitive) name
    pub fn medication_by_name(&self, name: &str) -> Option<&Medication> {
        self.medications
            .iter()
            .find(|m| m.active && m.name.eq_ignore_ascii_case(name))
    }

    /// Pattern history for a medication (empty slice if none)
    pub fn patterns_for(&self, medication_id: Uuid) -> &[DosagePattern] {
        self.patterns
            .get(&medication_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Add a medication, creating its sync record
    pub fn add_medication(
        &mut self,
        medication: Medication,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = SyncRecord::initial(device_id, now, &medication)?;
        self.sync.insert(medication.id, record);
        self.medications.push(medication);
        Ok(())
    }

    /// Add a schedule, creating its sync record
    pub fn add_schedule(
        &mut self,
        schedule: MedicationSchedule,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.medications.iter().any(|m| m.id == schedule.medication_id) {
            return Err(Error::InvalidSchedule(
                "schedule references an unknown medication".into(),
            ));
        }
        let record = SyncRecord::initial(device_id, now, &schedule)?;
        self.sync.insert(schedule.id, record);
        self.schedules.push(schedule);
        Ok(())
    }

    /// Append a dosage pattern, superseding the medication's current one
    pub fn add_pattern(
        &mut self,
        new: DosagePattern,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = SyncRecord::initial(device_id, now, &new)?;
        let id = new.id;
        let history = self.patterns.entry(new.medication_id).or_default();
        pattern::supersede(history, new)?;
        self.sync.insert(id, record);
        Ok(())
    }

    /// Soft-deactivate a medication and its schedules.
    ///
    /// Log entries are never touched (audit requirement).
    pub fn deactivate_medication(
        &mut self,
        medication_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let med = self
            .medications
            .iter_mut()
            .find(|m| m.id == medication_id)
            .ok_or_else(|| Error::State(format!("unknown medication {}", medication_id)))?;
        med.active = false;
        med.modified_at = now;
        let med_snapshot = med.clone();
        self.touch(medication_id, device_id, now, &med_snapshot)?;

        let schedule_ids: Vec<Uuid> = self
            .schedules
            .iter()
            .filter(|s| s.medication_id == medication_id)
            .map(|s| s.id)
            .collect();
        for sid in schedule_ids {
            if let Some(schedule) = self.schedules.iter_mut().find(|s| s.id == sid) {
                schedule.enabled = false;
                schedule.modified_at = now;
                let snapshot = schedule.clone();
                self.touch(sid, device_id, now, &snapshot)?;
            }
        }
        Ok(())
    }

    /// Optimistic-concurrency check: the writer must hold the current version
    pub fn check_version(&self, entity: &str, entity_id: Uuid, expected: u64) -> Result<()> {
        let found = self.sync.get(&entity_id).map(|r| r.version).unwrap_or(0);
        if found != expected {
            return Err(Error::VersionConflict {
                entity: entity.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Bump (or create) an entity's sync record after a local edit
    pub fn touch<T: Serialize>(
        &mut self,
        entity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
        entity: &T,
    ) -> Result<()> {
        match self.sync.get_mut(&entity_id) {
            Some(record) => record.bump(device_id, now, entity),
            None => {
                let record = SyncRecord::initial(device_id, now, entity)?;
                self.sync.insert(entity_id, record);
                Ok(())
            }
        }
    }

    /// Load state from a file with shared locking
    ///
    /// Returns default state if file doesn't exist.
    /// If file is corrupted, logs a warning and returns default state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No state file found, using default state");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open state file {:?}: {}. Using defaults.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock state file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read state file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<UserMedState>(&contents) {
            Ok(state) => {
                tracing::debug!("Loaded user state from {:?}", path);
                Ok(state)
            }
            Err(e) => {
                tracing::warn!("Failed to parse state file {:?}: {}. Using defaults.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save state to a file with exclusive locking
    ///
    /// Atomically writes state by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "state path missing parent")
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        // Atomically replace old state file
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved user state to {:?}", path);
        Ok(())
    }

    /// Load state, modify it, and save it back atomically
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut UserMedState) -> Result<()>,
    {
        let mut state = Self::load(path)?;
        f(&mut state)?;
        state.save(path)?;
        Ok(state)
    }
}

/// Content hash of an entity, exposed for storage collaborators that compare
/// row hashes instead of version counters
pub fn entity_hash<T: Serialize>(entity: &T) -> Result<String> {
    sync::content_hash(entity)
}
