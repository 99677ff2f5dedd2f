//! Engine error kinds.
//!
//! Validation-level problems (out-of-range temperature, missing optional
//! fields) are never errors: they lower the quality score and mark the record
//! invalid. A malformed record is rejected on its own and reported as a
//! `MalformedInput` diagnostic; only `EngineError` stops a run.

use serde::Serialize;

/// Per-record diagnostic for a reading rejected before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedInput {
    /// Zero-based position of the record in the submitted batch.
    pub record_index: usize,
    pub field: &'static str,
    pub reason: String,
}

impl MalformedInput {
    pub fn new(record_index: usize, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            record_index,
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MalformedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "record {}: field '{}' {}",
            self.record_index, self.field, self.reason
        )
    }
}

impl std::error::Error for MalformedInput {}

/// Errors that fail a whole run (or the engine at startup).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The summary stage saw no valid records; percentages are undefined.
    InsufficientData {
        total_records: usize,
        valid_records: usize,
    },
    /// Thresholds or bounds outside sane limits, rejected before any batch.
    Configuration { field: &'static str, reason: String },
}

impl EngineError {
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData {
                total_records,
                valid_records,
            } => write!(
                f,
                "insufficient data: {} valid of {} processed records, run summary undefined",
                valid_records, total_records
            ),
            Self::Configuration { field, reason } => {
                write!(f, "configuration error in '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for EngineError {}
