//! Per-level statistics over the valid records of one run.
//!
//! Each grouping level is aggregated in a single pass with Welford
//! accumulators, one per key. Levels are independent and are aggregated in
//! parallel; within a level records are folded in input order so results
//! are bit-for-bit reproducible. Keys whose sample count is below the level
//! minimum are suppressed: they have no statistics, and every z-score against
//! them is null.

use crate::engine::config::EngineConfig;
use crate::engine::validator::ValidatedReading;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Key of the single global group.
pub const GLOBAL_KEY: &str = "global";

/// Population over which mean and standard deviation are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupingLevel {
    Global,
    Device,
    Location,
    Environment,
}

impl GroupingLevel {
    pub fn all() -> &'static [GroupingLevel] {
        &[Self::Global, Self::Device, Self::Location, Self::Environment]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Device => "device",
            Self::Location => "location",
            Self::Environment => "environment",
        }
    }

    /// Minimum sample count before statistics for a key are materialized.
    pub fn min_samples(&self, config: &EngineConfig) -> usize {
        match self {
            Self::Global => config.min_samples.global,
            Self::Device => config.min_samples.device,
            Self::Location => config.min_samples.location,
            Self::Environment => config.min_samples.environment,
        }
    }

    /// z-score threshold a record must exceed to be flagged at this level.
    pub fn threshold(&self, config: &EngineConfig) -> f64 {
        match self {
            Self::Global => config.global_threshold(),
            Self::Device | Self::Location | Self::Environment => config.sub_level_threshold(),
        }
    }

    /// Group key of a valid record at this level.
    pub fn key_of(&self, record: &ValidatedReading) -> Option<String> {
        match self {
            Self::Global => Some(GLOBAL_KEY.to_string()),
            Self::Device => record.device_id().map(str::to_string),
            Self::Location => Some(record.location.clone()),
            Self::Environment => Some(record.environment_type.as_str().to_string()),
        }
    }
}

impl std::fmt::Display for GroupingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Welford accumulator for mean and sample variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; undefined below two samples.
    pub fn sample_std_dev(&self) -> Option<f64> {
        if self.count < 2 {
            None
        } else {
            Some((self.m2 / (self.count - 1) as f64).max(0.0).sqrt())
        }
    }
}

/// Materialized statistics for one key of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelStatistics {
    pub level: GroupingLevel,
    pub key: String,
    pub mean: f64,
    /// Sample standard deviation; `None` with a single sample.
    pub std_dev: Option<f64>,
    pub sample_count: usize,
}

impl LevelStatistics {
    /// `|value - mean| / std_dev`, or `None` when the deviation is zero or undefined.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        match self.std_dev {
            Some(sd) if sd > 0.0 => Some((value - self.mean).abs() / sd),
            _ => None,
        }
    }
}

/// Statistics of every level for one run. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub levels: BTreeMap<GroupingLevel, BTreeMap<String, LevelStatistics>>,
    /// Keys dropped for falling under the level minimum.
    pub suppressed: BTreeMap<GroupingLevel, Vec<String>>,
}

impl StatisticsSnapshot {
    pub fn get(&self, level: GroupingLevel, key: &str) -> Option<&LevelStatistics> {
        self.levels.get(&level).and_then(|by_key| by_key.get(key))
    }

    /// Statistics a record is compared against at `level`.
    pub fn for_record(
        &self,
        level: GroupingLevel,
        record: &ValidatedReading,
    ) -> Option<&LevelStatistics> {
        level.key_of(record).and_then(|key| self.get(level, &key))
    }

    pub fn materialized_count(&self, level: GroupingLevel) -> usize {
        self.levels.get(&level).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn suppressed_count(&self, level: GroupingLevel) -> usize {
        self.suppressed.get(&level).map(Vec::len).unwrap_or(0)
    }
}

fn aggregate_level(
    level: GroupingLevel,
    records: &[ValidatedReading],
    min_samples: usize,
) -> (BTreeMap<String, LevelStatistics>, Vec<String>) {
    let mut accumulators: BTreeMap<String, RunningStats> = BTreeMap::new();
    for record in records {
        let Some(temperature) = record.valid_temperature() else {
            continue;
        };
        let Some(key) = level.key_of(record) else {
            continue;
        };
        accumulators.entry(key).or_default().update(temperature);
    }

    let mut stats = BTreeMap::new();
    let mut suppressed = Vec::new();
    for (key, acc) in accumulators {
        if acc.count() < min_samples {
            debug!(
                level = %level,
                key = %key,
                samples = acc.count(),
                min_samples,
                "Suppressing small-sample statistics"
            );
            suppressed.push(key);
            continue;
        }
        stats.insert(
            key.clone(),
            LevelStatistics {
                level,
                key,
                mean: acc.mean(),
                std_dev: acc.sample_std_dev(),
                sample_count: acc.count(),
            },
        );
    }
    (stats, suppressed)
}

/// Aggregate all levels over the valid records of a run.
pub fn aggregate(records: &[ValidatedReading], config: &EngineConfig) -> StatisticsSnapshot {
    let per_level: Vec<_> = GroupingLevel::all()
        .par_iter()
        .map(|&level| {
            let (stats, suppressed) = aggregate_level(level, records, level.min_samples(config));
            (level, stats, suppressed)
        })
        .collect();

    let mut snapshot = StatisticsSnapshot::default();
    for (level, stats, suppressed) in per_level {
        snapshot.levels.insert(level, stats);
        snapshot.suppressed.insert(level, suppressed);
    }
    snapshot
}
