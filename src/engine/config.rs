//! Engine configuration
//!
//! Validity bounds, anomaly thresholds, per-level sample minimums and quality
//! weights. Passed explicitly into every stage; there is no global state.

use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Offset subtracted from the global threshold for sub-population levels.
pub const SUB_LEVEL_THRESHOLD_OFFSET: f64 = 0.5;

/// Lowest accepted global z-score threshold.
pub const MIN_ANOMALY_THRESHOLD: f64 = 1.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lowest admissible temperature (inclusive)
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,

    /// Upper bound of the admissible range (exclusive)
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Global z-score threshold; sub-levels use this minus 0.5
    #[serde(default = "default_anomaly_threshold_multiplier")]
    pub anomaly_threshold_multiplier: f64,

    /// Minimum sample counts before a level's statistics are materialized
    #[serde(default)]
    pub min_samples: MinSampleThresholds,

    /// Per-field weights of the data quality score
    #[serde(default)]
    pub quality_weights: QualityWeights,
}

fn default_min_temperature() -> f64 {
    -50.0
}
fn default_max_temperature() -> f64 {
    100.0
}
fn default_anomaly_threshold_multiplier() -> f64 {
    3.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
            anomaly_threshold_multiplier: default_anomaly_threshold_multiplier(),
            min_samples: MinSampleThresholds::default(),
            quality_weights: QualityWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `ENGINE_CONFIG_PATH` or the default path, falling back to defaults
    pub fn from_env() -> Self {
        let path = std::env::var("ENGINE_CONFIG_PATH")
            .unwrap_or_else(|_| "engine_config.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default engine config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Global level threshold.
    pub fn global_threshold(&self) -> f64 {
        self.anomaly_threshold_multiplier
    }

    /// Device/location/environment threshold. Not clamped; `validate` keeps it positive.
    pub fn sub_level_threshold(&self) -> f64 {
        self.anomaly_threshold_multiplier - SUB_LEVEL_THRESHOLD_OFFSET
    }

    /// Admissible range check, `[min, max)`. A reading at the maximum is out of range.
    pub fn is_in_range(&self, temperature: f64) -> bool {
        temperature >= self.min_temperature && temperature < self.max_temperature
    }

    /// Reject configurations that would make a run meaningless.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.min_temperature.is_finite() {
            return Err(EngineError::configuration(
                "min_temperature",
                format!("must be finite, got {}", self.min_temperature),
            ));
        }
        if !self.max_temperature.is_finite() {
            return Err(EngineError::configuration(
                "max_temperature",
                format!("must be finite, got {}", self.max_temperature),
            ));
        }
        if self.min_temperature >= self.max_temperature {
            return Err(EngineError::configuration(
                "min_temperature",
                format!(
                    "must be below max_temperature ({} >= {})",
                    self.min_temperature, self.max_temperature
                ),
            ));
        }
        if !self.anomaly_threshold_multiplier.is_finite()
            || self.anomaly_threshold_multiplier < MIN_ANOMALY_THRESHOLD
        {
            return Err(EngineError::configuration(
                "anomaly_threshold_multiplier",
                format!(
                    "must be a finite value >= {}, got {}",
                    MIN_ANOMALY_THRESHOLD, self.anomaly_threshold_multiplier
                ),
            ));
        }
        if self.min_samples.global == 0 {
            return Err(EngineError::configuration(
                "min_samples.global",
                "global statistics need at least one sample",
            ));
        }
        self.quality_weights.validate()
    }
}

/// Per-level minimum sample counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinSampleThresholds {
    #[serde(default = "default_global_min")]
    pub global: usize,
    #[serde(default = "default_device_min")]
    pub device: usize,
    #[serde(default = "default_environment_min")]
    pub environment: usize,
    #[serde(default = "default_location_min")]
    pub location: usize,
}

fn default_global_min() -> usize {
    1
}
fn default_device_min() -> usize {
    5
}
fn default_environment_min() -> usize {
    5
}
fn default_location_min() -> usize {
    10
}

impl Default for MinSampleThresholds {
    fn default() -> Self {
        Self {
            global: default_global_min(),
            device: default_device_min(),
            environment: default_environment_min(),
            location: default_location_min(),
        }
    }
}

/// Weights of the quality score; must be non-negative and sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_device_id_weight")]
    pub device_id: f64,
    #[serde(default = "default_timestamp_weight")]
    pub timestamp: f64,
    #[serde(default = "default_temperature_weight")]
    pub temperature: f64,
}

fn default_device_id_weight() -> f64 {
    0.4
}
fn default_timestamp_weight() -> f64 {
    0.4
}
fn default_temperature_weight() -> f64 {
    0.2
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            device_id: default_device_id_weight(),
            timestamp: default_timestamp_weight(),
            temperature: default_temperature_weight(),
        }
    }
}

impl QualityWeights {
    fn validate(&self) -> Result<(), EngineError> {
        for (field, weight) in [
            ("quality_weights.device_id", self.device_id),
            ("quality_weights.timestamp", self.timestamp),
            ("quality_weights.temperature", self.temperature),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::configuration(
                    field,
                    format!("must be a non-negative finite weight, got {}", weight),
                ));
            }
        }
        let sum = self.device_id + self.timestamp + self.temperature;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::configuration(
                "quality_weights",
                format!("weights must sum to 1.0, got {}", sum),
            ));
        }
        Ok(())
    }
}
