//! Run summary: one immutable roll-up per completed run.

use crate::engine::enrichment::{EnrichedReading, TemperatureBucket};
use crate::engine::error::EngineError;
use crate::engine::fingerprint::RunId;
use crate::engine::stats::GroupingLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(count: usize, total: usize) -> f64 {
    round2(count as f64 / total as f64 * 100.0)
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Anomalies flagged at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAnomalySummary {
    pub anomaly_count: usize,
    /// Mean z-score over the records flagged at this level.
    pub mean_z_score: Option<f64>,
}

/// Temperature statistics over valid records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Per-device or per-location roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: String,
    pub reading_count: usize,
    pub valid_count: usize,
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    pub mean_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
}

#[derive(Default)]
struct GroupAccumulator {
    reading_count: usize,
    valid_count: usize,
    anomaly_count: usize,
    temperatures: Vec<f64>,
}

impl GroupAccumulator {
    fn add(&mut self, record: &EnrichedReading) {
        self.reading_count += 1;
        if record.is_anomaly() {
            self.anomaly_count += 1;
        }
        if let Some(t) = record.scored.validated.valid_temperature() {
            self.valid_count += 1;
            self.temperatures.push(t);
        }
    }

    fn finish(self, key: String) -> GroupSummary {
        let range = min_max(&self.temperatures);
        GroupSummary {
            key,
            reading_count: self.reading_count,
            valid_count: self.valid_count,
            anomaly_count: self.anomaly_count,
            anomaly_percentage: percentage(self.anomaly_count, self.reading_count),
            mean_temperature: mean_of(&self.temperatures),
            min_temperature: range.map(|(lo, _)| lo),
            max_temperature: range.map(|(_, hi)| hi),
        }
    }
}

/// Run-level summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    /// The run's reference time (used for freshness).
    pub processed_at: DateTime<Utc>,

    pub total_processed_records: usize,
    pub valid_record_count: usize,
    pub invalid_record_count: usize,
    pub anomalous_record_count: usize,
    /// Malformed records rejected before deduplication.
    pub rejected_record_count: usize,
    /// Records collapsed by deduplication.
    pub duplicate_record_count: usize,

    pub valid_record_percentage: f64,
    pub invalid_record_percentage: f64,
    pub anomaly_percentage: f64,
    pub avg_data_quality_score: f64,

    pub level_anomalies: BTreeMap<GroupingLevel, LevelAnomalySummary>,

    pub unique_devices: usize,
    pub unique_locations: usize,
    pub unique_environments: usize,

    pub earliest_reading: Option<DateTime<Utc>>,
    pub latest_reading: Option<DateTime<Utc>>,

    pub temperature: TemperatureSummary,
    /// Share of valid records per temperature bucket.
    pub temperature_bucket_percentages: BTreeMap<TemperatureBucket, f64>,

    pub device_summaries: Vec<GroupSummary>,
    pub location_summaries: Vec<GroupSummary>,
}

/// Counts carried over from the stages before scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamCounts {
    pub rejected: usize,
    pub duplicates: usize,
}

/// Roll a run's final records into its summary.
///
/// Fails with `InsufficientData` when no record is valid: percentages and
/// temperature statistics are undefined and no summary is produced.
pub fn summarize(
    run_id: RunId,
    records: &[EnrichedReading],
    upstream: UpstreamCounts,
    processed_at: DateTime<Utc>,
) -> Result<RunSummary, EngineError> {
    let total = records.len();
    let valid: Vec<&EnrichedReading> = records.iter().filter(|r| r.is_valid()).collect();
    if valid.is_empty() {
        return Err(EngineError::InsufficientData {
            total_records: total,
            valid_records: 0,
        });
    }

    let valid_count = valid.len();
    let anomalous_count = records.iter().filter(|r| r.is_anomaly()).count();

    let quality: Vec<f64> = records
        .iter()
        .map(|r| r.scored.validated.data_quality_score)
        .collect();

    let mut level_anomalies = BTreeMap::new();
    for &level in GroupingLevel::all() {
        let flagged: Vec<f64> = valid
            .iter()
            .map(|r| r.scored.scores.get(level))
            .filter(|s| s.is_anomaly)
            .filter_map(|s| s.z_score)
            .collect();
        level_anomalies.insert(
            level,
            LevelAnomalySummary {
                anomaly_count: flagged.len(),
                mean_z_score: mean_of(&flagged),
            },
        );
    }

    let mut devices = BTreeSet::new();
    let mut locations = BTreeSet::new();
    let mut environments = BTreeSet::new();
    let mut temperatures = Vec::with_capacity(valid_count);
    let mut buckets: BTreeMap<TemperatureBucket, usize> = BTreeMap::new();
    for r in &valid {
        let v = &r.scored.validated;
        if let Some(device) = v.device_id() {
            devices.insert(device);
        }
        locations.insert(v.location.as_str());
        environments.insert(v.environment_type);
        if let Some(t) = v.valid_temperature() {
            temperatures.push(t);
        }
        *buckets.entry(r.temperature_bucket).or_default() += 1;
    }

    let timestamps = valid.iter().filter_map(|r| r.scored.validated.reading.reading_timestamp);
    let earliest_reading = Iterator::min(timestamps.clone());
    let latest_reading = Iterator::max(timestamps);

    let (min_t, max_t) = min_max(&temperatures).unwrap_or((0.0, 0.0));
    let temperature = TemperatureSummary {
        mean: mean_of(&temperatures).unwrap_or(0.0),
        min: min_t,
        max: max_t,
    };

    let mut by_device: BTreeMap<String, GroupAccumulator> = BTreeMap::new();
    let mut by_location: BTreeMap<String, GroupAccumulator> = BTreeMap::new();
    for r in records {
        let v = &r.scored.validated;
        if let Some(device) = v.device_id().filter(|d| !d.trim().is_empty()) {
            by_device.entry(device.to_string()).or_default().add(r);
        }
        by_location.entry(v.location.clone()).or_default().add(r);
    }

    Ok(RunSummary {
        run_id,
        processed_at,
        total_processed_records: total,
        valid_record_count: valid_count,
        invalid_record_count: total - valid_count,
        anomalous_record_count: anomalous_count,
        rejected_record_count: upstream.rejected,
        duplicate_record_count: upstream.duplicates,
        valid_record_percentage: percentage(valid_count, total),
        invalid_record_percentage: percentage(total - valid_count, total),
        anomaly_percentage: percentage(anomalous_count, total),
        avg_data_quality_score: mean_of(&quality)
            .map(|q| (q * 10_000.0).round() / 10_000.0)
            .unwrap_or(0.0),
        level_anomalies,
        unique_devices: devices.len(),
        unique_locations: locations.len(),
        unique_environments: environments.len(),
        earliest_reading,
        latest_reading,
        temperature,
        temperature_bucket_percentages: buckets
            .into_iter()
            .map(|(bucket, n)| (bucket, percentage(n, valid_count)))
            .collect(),
        device_summaries: by_device.into_iter().map(|(k, acc)| acc.finish(k)).collect(),
        location_summaries: by_location.into_iter().map(|(k, acc)| acc.finish(k)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(95.0), 95.0);
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(95, 100), 95.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(0, 7), 0.0);
    }

    #[test]
    fn test_min_max_and_mean() {
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[3.0, -1.0, 7.5]), Some((-1.0, 7.5)));
        assert_eq!(mean_of(&[]), None);
        assert_eq!(mean_of(&[1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn test_summarize_rejects_empty_run() {
        let err = summarize(
            RunId("run_x".to_string()),
            &[],
            UpstreamCounts::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientData {
                total_records: 0,
                valid_records: 0
            }
        );
    }
}
