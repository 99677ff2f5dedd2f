//! Run orchestration.
//!
//! ```text
//! ingest → dedup → validate → aggregate ║ classify → enrich → summarize
//!                                       ║
//!                          statistics fully materialized here
//! ```
//!
//! A run either returns a complete `RunOutput` or an error; nothing partial
//! escapes.

use crate::engine::classifier::classify;
use crate::engine::config::EngineConfig;
use crate::engine::dedup::deduplicate;
use crate::engine::enrichment::{enrich_all, EnrichedReading};
use crate::engine::error::{EngineError, MalformedInput};
use crate::engine::fingerprint::{RunFingerprint, RunId};
use crate::engine::reading::{ingest, RawReading};
use crate::engine::stats::{aggregate, GroupingLevel, StatisticsSnapshot};
use crate::engine::summary::{summarize, RunSummary, UpstreamCounts};
use crate::engine::validator::validate_all;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Batch id given to readings that arrive without one.
pub const DEFAULT_BATCH_ID: &str = "default";

/// Everything a completed run produces.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: RunId,
    pub fingerprint: RunFingerprint,
    pub rejected: Vec<MalformedInput>,
    pub statistics: StatisticsSnapshot,
    pub records: Vec<EnrichedReading>,
    pub summary: RunSummary,
}

impl RunOutput {
    pub fn anomalies(&self) -> impl Iterator<Item = &EnrichedReading> {
        self.records.iter().filter(|r| r.is_anomaly())
    }
}

/// Configured engine. Construction validates the configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one batch to completion.
    ///
    /// `now` is the run's reference time for freshness; it is the only
    /// wall-clock input and does not affect the run id.
    pub fn run(&self, batch: &[RawReading], now: DateTime<Utc>) -> Result<RunOutput, EngineError> {
        let started = Instant::now();
        let config = &self.config;

        let ingested = ingest(batch, DEFAULT_BATCH_ID);
        let fingerprint =
            RunFingerprint::compute(config, &ingested.readings, &ingested.rejected);
        let run_id = RunId::from_fingerprint(&fingerprint);
        info!(
            run_id = %run_id,
            fingerprint = %fingerprint.format_short(),
            submitted = batch.len(),
            accepted = ingested.readings.len(),
            rejected = ingested.rejected.len(),
            "Starting run"
        );

        let deduped = deduplicate(ingested.readings);
        debug!(
            survivors = deduped.readings.len(),
            duplicates = deduped.duplicates_dropped,
            "Deduplicated"
        );

        let validated = validate_all(deduped.readings, config);
        let valid_count = validated.iter().filter(|v| v.is_valid).count();
        debug!(valid = valid_count, invalid = validated.len() - valid_count, "Validated");

        let statistics = aggregate(&validated, config);
        for &level in GroupingLevel::all() {
            debug!(
                level = %level,
                materialized = statistics.materialized_count(level),
                suppressed = statistics.suppressed_count(level),
                "Aggregated level statistics"
            );
        }

        let scored = classify(validated, &statistics, config);
        let records = enrich_all(scored, now);

        let summary = summarize(
            run_id.clone(),
            &records,
            UpstreamCounts {
                rejected: ingested.rejected.len(),
                duplicates: deduped.duplicates_dropped,
            },
            now,
        )?;

        info!(
            run_id = %run_id,
            total = summary.total_processed_records,
            valid = summary.valid_record_count,
            anomalous = summary.anomalous_record_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );

        Ok(RunOutput {
            run_id,
            fingerprint,
            rejected: ingested.rejected,
            statistics,
            records,
            summary,
        })
    }
}
