//! Record validation and data-quality scoring.

use crate::engine::config::EngineConfig;
use crate::engine::reading::Reading;
use serde::{Deserialize, Serialize};

/// Sentinel location for readings without one.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Environment derived from location tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EnvironmentType {
    Outdoor,
    Indoor,
    Unknown,
}

impl EnvironmentType {
    /// Case-insensitive substring match; outdoor tokens take precedence.
    pub fn from_location(location: &str) -> Self {
        let lower = location.to_lowercase();
        if lower.contains("out") {
            Self::Outdoor
        } else if lower.contains("in") || lower.contains("office") {
            Self::Indoor
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outdoor => "Outdoor",
            Self::Indoor => "Indoor",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a record was marked invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationIssue {
    MissingDeviceId,
    MissingTimestamp,
    MissingTemperature,
    TemperatureOutOfRange,
}

/// A deduplicated reading with its validity verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedReading {
    pub reading: Reading,
    /// Location with the `Unknown` sentinel applied.
    pub location: String,
    pub environment_type: EnvironmentType,
    pub is_valid: bool,
    pub data_quality_score: f64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidatedReading {
    /// Device id for valid records (always present once validated).
    pub fn device_id(&self) -> Option<&str> {
        self.reading.device_id.as_deref()
    }

    /// Temperature of a valid record; `None` for invalid ones.
    pub fn valid_temperature(&self) -> Option<f64> {
        if self.is_valid {
            self.reading.temperature
        } else {
            None
        }
    }
}

/// Validate a single reading.
pub fn validate_reading(reading: Reading, config: &EngineConfig) -> ValidatedReading {
    let weights = &config.quality_weights;
    let mut issues = Vec::new();
    let mut score = 0.0;

    let has_device = reading
        .device_id
        .as_deref()
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false);
    if has_device {
        score += weights.device_id;
    } else {
        issues.push(ValidationIssue::MissingDeviceId);
    }

    if reading.reading_timestamp.is_some() {
        score += weights.timestamp;
    } else {
        issues.push(ValidationIssue::MissingTimestamp);
    }

    match reading.temperature {
        None => issues.push(ValidationIssue::MissingTemperature),
        Some(t) if !config.is_in_range(t) => issues.push(ValidationIssue::TemperatureOutOfRange),
        Some(_) => score += weights.temperature,
    }

    let location = reading
        .location
        .clone()
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
    let environment_type = EnvironmentType::from_location(&location);

    ValidatedReading {
        reading,
        location,
        environment_type,
        is_valid: issues.is_empty(),
        data_quality_score: score.clamp(0.0, 1.0),
        issues,
    }
}

/// Validate every deduplicated reading, preserving order.
pub fn validate_all(readings: Vec<Reading>, config: &EngineConfig) -> Vec<ValidatedReading> {
    readings
        .into_iter()
        .map(|r| validate_reading(r, config))
        .collect()
}
