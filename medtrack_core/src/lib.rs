#![forbid(unsafe_code)]

//! Core domain model and business logic for the Medtrack system.
//!
//! This crate provides:
//! - Domain types (medications, schedules, dosage patterns, log entries)
//! - Timezone-aware schedule resolution
//! - Dosage pattern resolution over append-only validity intervals
//! - The safety-window dose-logging state machine
//! - Variance and adherence statistics
//! - Cross-device last-writer-wins reconciliation
//! - Persistence (WAL, CSV archive, state file)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod timezone;
pub mod pattern;
pub mod schedule;
pub mod safety;
pub mod variance;
pub mod sync;
pub mod wal;
pub mod csv_rollup;
pub mod history;
pub mod state;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use pattern::{resolve_expected_dose, resolve_pattern_dose, supersede};
pub use schedule::{expand_due_events, DueEventIter};
pub use safety::{
    classify_attempt, entry_for_event, mark_skipped, record_taken, sweep_missed, sweep_unknown,
    LogAttempt, LogOutcome,
};
pub use variance::{adherence_rate, compute_variance, AdherenceRate, VarianceResult};
pub use sync::{content_hash, merge, ConflictDiff, MergeResult, SyncedEntry};
pub use wal::{JsonlSink, LogSink};
pub use history::load_recent_entries;
pub use state::UserMedState;
