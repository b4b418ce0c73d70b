//! Cross-device reconciliation: last-writer-wins merge with conflict diffs.
//!
//! Each synced entity carries a `SyncRecord` (device id, per-device version,
//! last-modified instant, content hash). Merging two copies picks a winner by
//! timestamp, with a deterministic device-id tie-break, and never discards
//! the loser silently: a field-level diff is surfaced so the user can see
//! what was overwritten. Append-only fields (the status audit history) are
//! unioned, never replaced.

use crate::{MedicationLogEntry, Result, StatusChange, SyncRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// SHA-256 hex digest of an entity's serialized fields
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

impl SyncRecord {
    /// Sync record for a freshly created entity
    pub fn initial<T: Serialize>(device_id: &str, now: DateTime<Utc>, entity: &T) -> Result<Self> {
        Ok(SyncRecord {
            device_id: device_id.to_string(),
            version: 1,
            last_modified: now,
            content_hash: content_hash(entity)?,
        })
    }

    /// Record a local edit: bump the version counter and refresh the hash
    pub fn bump<T: Serialize>(
        &mut self,
        device_id: &str,
        now: DateTime<Utc>,
        entity: &T,
    ) -> Result<()> {
        self.device_id = device_id.to_string();
        self.version += 1;
        self.last_modified = now;
        self.content_hash = content_hash(entity)?;
        Ok(())
    }
}

/// One field that differed between the winning and losing copies
#[derive(Clone, Debug, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub winning: Value,
    pub losing: Value,
}

/// "This was overwritten" notice for the user
#[derive(Clone, Debug, Serialize)]
pub struct ConflictDiff {
    pub losing_device: String,
    pub losing_modified: DateTime<Utc>,
    pub fields: Vec<FieldConflict>,
}

/// A log entry paired with its sync metadata
#[derive(Clone, Debug, Serialize)]
pub struct SyncedEntry {
    pub entry: MedicationLogEntry,
    pub record: SyncRecord,
}

/// Result of merging two copies of the same entity
#[derive(Clone, Debug)]
pub struct MergeResult {
    pub winner: SyncedEntry,
    /// Present when the copies genuinely diverged
    pub conflict: Option<ConflictDiff>,
}

/// Pick the winning record: latest `last_modified`, ties broken by the
/// lexicographically greater device id. Arbitrary but stable, and symmetric
/// under argument order — determinism matters more than the particular
/// tie-break.
fn local_wins(local: &SyncRecord, remote: &SyncRecord) -> bool {
    match local.last_modified.cmp(&remote.last_modified) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => local.device_id > remote.device_id,
    }
}

/// Merge two copies of a log entry from different devices.
///
/// The winner's fields are canonical, except the append-only
/// `status_history`, which becomes the union of both copies. When content
/// hashes match, the copies are identical and no conflict is recorded.
pub fn merge(local: SyncedEntry, remote: SyncedEntry) -> MergeResult {
    let identical = local.record.content_hash == remote.record.content_hash;

    let (mut winner, loser) = if local_wins(&local.record, &remote.record) {
        (local, remote)
    } else {
        (remote, local)
    };

    if identical {
        return MergeResult {
            winner,
            conflict: None,
        };
    }

    let fields = diff_fields(&winner.entry, &loser.entry);

    winner.entry.status_history =
        union_histories(&winner.entry.status_history, &loser.entry.status_history);

    let conflict = if fields.is_empty() {
        None
    } else {
        tracing::info!(
            "Merge conflict on entry {}: {} field(s) from device {} overwritten",
            winner.entry.id,
            fields.len(),
            loser.record.device_id
        );
        Some(ConflictDiff {
            losing_device: loser.record.device_id.clone(),
            losing_modified: loser.record.last_modified,
            fields,
        })
    };

    MergeResult { winner, conflict }
}

/// Field-level diff of the losing copy against the winner.
///
/// The append-only history is excluded: it is unioned, not overwritten, so
/// it can never be "lost".
fn diff_fields(winner: &MedicationLogEntry, loser: &MedicationLogEntry) -> Vec<FieldConflict> {
    let (winner_val, loser_val) = match (
        serde_json::to_value(winner),
        serde_json::to_value(loser),
    ) {
        (Ok(Value::Object(w)), Ok(Value::Object(l))) => (w, l),
        _ => {
            tracing::error!("Log entry did not serialize to an object; diff skipped");
            return Vec::new();
        }
    };

    let mut fields = Vec::new();
    for (key, winning) in &winner_val {
        if key == "status_history" {
            continue;
        }
        if let Some(losing) = loser_val.get(key) {
            if losing != winning {
                fields.push(FieldConflict {
                    field: key.clone(),
                    winning: winning.clone(),
                    losing: losing.clone(),
                });
            }
        }
    }
    fields
}

/// Union of two audit histories, time-ordered and deduplicated
fn union_histories(a: &[StatusChange], b: &[StatusChange]) -> Vec<StatusChange> {
    let mut merged: Vec<StatusChange> = a.to_vec();
    for change in b {
        if !merged.contains(change) {
            merged.push(change.clone());
        }
    }
    merged.sort_by_key(|c| c.at);
    merged
}
