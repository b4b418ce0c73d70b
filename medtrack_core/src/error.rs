//! Error types for the medtrack_core library.
//!
//! Safety advisories (late warnings) and data-gap conditions (no active
//! pattern, no adherence data) are *not* errors; they are carried as tagged
//! result values by the modules that produce them. This enum covers input
//! validation failures, concurrency conflicts, and infrastructure faults.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medtrack_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecognized IANA zone id. Never silently mapped to UTC: a wrong
    /// fallback zone could fire a reminder hours off the intended time.
    #[error("invalid timezone id: {0}")]
    InvalidTimezone(String),

    /// Dosage pattern rejected at creation time (empty cycle, non-positive
    /// amounts, inverted validity interval)
    #[error("invalid dosage pattern: {0}")]
    InvalidPattern(String),

    /// Schedule rejected at creation time
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Medication rejected at creation time (non-positive or non-finite
    /// dosage)
    #[error("invalid medication: {0}")]
    InvalidMedication(String),

    /// Optimistic-concurrency check failed: the stored entity version no
    /// longer matches what the writer read
    #[error("version conflict on {entity}: expected v{expected}, found v{found}")]
    VersionConflict {
        entity: String,
        expected: u64,
        found: u64,
    },

    /// State management error
    #[error("State error: {0}")]
    State(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
