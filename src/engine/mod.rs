//! Sensor Data Quality Engine
//!
//! Turns noisy, duplicated temperature readings into a validated,
//! quality-scored, anomaly-annotated record set plus one run summary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Pipeline                               │
//! │  (validates config once, runs a batch to completion or fails)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Ingest    │───▶│ Deduplicate │───▶│  Validate   │
//! │ (malformed) │    │ (max ordinal│    │ (quality,   │
//! │             │    │   wins)     │    │  validity)  │
//! └─────────────┘    └─────────────┘    └──────┬──────┘
//!                                              │
//!                                              ▼
//!                                       ┌─────────────┐
//!                                       │  Aggregate  │  global / device /
//!                                       │ (Welford)   │  location / environment
//!                                       └──────┬──────┘
//!                                    barrier   │
//!                                              ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │  Summarize  │◀───│   Enrich    │◀───│  Classify   │
//! │ (RunSummary)│    │ (buckets)   │    │ (z-scores)  │
//! └─────────────┘    └─────────────┘    └─────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Dedup**: winner chosen by comparator, independent of input order
//! - **Statistics**: folded in input order, stored in ordered maps
//! - **Classification**: parallel per record, collected in input order
//! - **Run id**: derived from a SHA-256 fingerprint of config + batch

pub mod classifier;
pub mod config;
pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod reading;
pub mod stats;
pub mod summary;
pub mod validator;

#[cfg(test)]
mod pipeline_tests;

pub use classifier::{classify, score_record, LevelScore, LevelScores, ScoredReading};
pub use config::{EngineConfig, MinSampleThresholds, QualityWeights};
pub use dedup::{deduplicate, DedupOutcome};
pub use enrichment::{
    enrich, enrich_all, EnrichedReading, EnvironmentCondition, Freshness, TemperatureBucket,
    TimeParts,
};
pub use error::{EngineError, MalformedInput};
pub use fingerprint::{RunFingerprint, RunId, FINGERPRINT_VERSION};
pub use pipeline::{Pipeline, RunOutput, DEFAULT_BATCH_ID};
pub use reading::{ingest, parse_timestamp, IngestOutcome, KaggleRow, RawReading, Reading};
pub use stats::{aggregate, GroupingLevel, LevelStatistics, StatisticsSnapshot};
pub use summary::{summarize, GroupSummary, LevelAnomalySummary, RunSummary, UpstreamCounts};
pub use validator::{
    validate_all, validate_reading, EnvironmentType, ValidatedReading, ValidationIssue,
    UNKNOWN_LOCATION,
};
