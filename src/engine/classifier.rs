//! Multi-level anomaly classification.
//!
//! Every valid record is compared against the statistics of its group at each
//! level. A missing z-score means the statistics were unavailable (suppressed
//! group, single sample, or zero deviation); it never counts as "normal" and
//! never flags a record.

use crate::engine::config::EngineConfig;
use crate::engine::stats::{GroupingLevel, StatisticsSnapshot};
use crate::engine::validator::ValidatedReading;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Score of one record at one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelScore {
    pub z_score: Option<f64>,
    pub is_anomaly: bool,
}

impl LevelScore {
    /// Flag strictly above the threshold.
    pub fn from_z(z_score: Option<f64>, threshold: f64) -> Self {
        Self {
            z_score,
            is_anomaly: z_score.map(|z| z > threshold).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelScores {
    pub global: LevelScore,
    pub device: LevelScore,
    pub location: LevelScore,
    pub environment: LevelScore,
}

impl LevelScores {
    pub fn get(&self, level: GroupingLevel) -> &LevelScore {
        match level {
            GroupingLevel::Global => &self.global,
            GroupingLevel::Device => &self.device,
            GroupingLevel::Location => &self.location,
            GroupingLevel::Environment => &self.environment,
        }
    }

    fn get_mut(&mut self, level: GroupingLevel) -> &mut LevelScore {
        match level {
            GroupingLevel::Global => &mut self.global,
            GroupingLevel::Device => &mut self.device,
            GroupingLevel::Location => &mut self.location,
            GroupingLevel::Environment => &mut self.environment,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &LevelScore> {
        [&self.global, &self.device, &self.location, &self.environment].into_iter()
    }

    /// Logical OR of the level flags.
    pub fn any_anomaly(&self) -> bool {
        self.iter().any(|s| s.is_anomaly)
    }

    /// Largest non-null z-score, 0.0 if none apply.
    pub fn max_z_score(&self) -> f64 {
        self.iter()
            .filter_map(|s| s.z_score)
            .fold(None, |acc: Option<f64>, z| Some(acc.map_or(z, |m| m.max(z))))
            .unwrap_or(0.0)
    }
}

/// A validated reading with its anomaly verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredReading {
    pub validated: ValidatedReading,
    pub scores: LevelScores,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

impl ScoredReading {
    pub fn is_valid(&self) -> bool {
        self.validated.is_valid
    }
}

/// Score one record. Invalid records are not classified: no z-scores, no flags.
pub fn score_record(
    record: ValidatedReading,
    snapshot: &StatisticsSnapshot,
    config: &EngineConfig,
) -> ScoredReading {
    let mut scores = LevelScores::default();

    if let Some(temperature) = record.valid_temperature() {
        for &level in GroupingLevel::all() {
            let z = snapshot
                .for_record(level, &record)
                .and_then(|stats| stats.z_score(temperature));
            *scores.get_mut(level) = LevelScore::from_z(z, level.threshold(config));
        }
    }

    ScoredReading {
        is_anomaly: scores.any_anomaly(),
        anomaly_score: scores.max_z_score(),
        scores,
        validated: record,
    }
}

/// Score all records in parallel. Output order matches input order.
pub fn classify(
    records: Vec<ValidatedReading>,
    snapshot: &StatisticsSnapshot,
    config: &EngineConfig,
) -> Vec<ScoredReading> {
    records
        .into_par_iter()
        .map(|record| score_record(record, snapshot, config))
        .collect()
}
