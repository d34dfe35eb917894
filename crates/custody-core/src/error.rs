//! Error types for the custody core.
//!
//! Absence is never an error here: lookups return `Option`, and a resolver
//! that finds nothing returns an empty list. [`CustodyError`] is reserved
//! for faults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustodyError {
    /// Stored bytes no longer hash to the recorded SHA-256. Never repaired.
    #[error("integrity failure for raw file {raw_file_id}: expected sha256 {expected}, found {actual}")]
    IntegrityFailure {
        raw_file_id: String,
        expected: String,
        actual: String,
    },

    /// No row of the file could be parsed.
    #[error("no rows could be parsed from {filename} ({skipped} rows skipped)")]
    ParseFailure { filename: String, skipped: u64 },

    #[error("schema discovery failed for raw file {raw_file_id}: {reason}")]
    SchemaDiscovery { raw_file_id: String, reason: String },

    /// A terminal transition was attempted on an entry that is not `started`.
    #[error("lineage entry {entry_id} is already {status}")]
    LedgerStateViolation { entry_id: String, status: String },

    #[error("format '{0}' cannot be read as rows")]
    UnsupportedFormat(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CustodyError>;

impl CustodyError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CustodyError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error means persisted content can no longer be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CustodyError::IntegrityFailure { .. })
    }
}
