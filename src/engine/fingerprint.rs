//! Deterministic run fingerprint and run id.
//!
//! ```text
//! RunFingerprint = SHA256(
//!   "RUNFP_V2" ||
//!   ConfigHash ||
//!   DatasetHash
//! )
//! RunId = "run_" || UUIDv5(RUN_NAMESPACE, RunFingerprint)
//! ```
//!
//! # Canonicalization
//!
//! - Readings are sorted by (device_id, timestamp, ordinal, batch) before hashing
//! - Floats (temperatures, config bounds and weights) are hashed by their IEEE-754 bits
//! - Rejected records contribute their full diagnostic (index, field, reason)
//! - Every variable-length field is length-prefixed; optional fields carry a presence byte
//!
//! The run's wall-clock "now" is not an input, so re-running an identical
//! batch with an identical config yields the same run id.

use crate::engine::config::EngineConfig;
use crate::engine::error::MalformedInput;
use crate::engine::reading::Reading;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fingerprint version string - increment when the canonical format changes.
pub const FINGERPRINT_VERSION: &str = "RUNFP_V2";

/// Namespace for run ids derived from fingerprints.
const RUN_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_53d4_4b7a_9e0f_1d2c_3b4a_5e6f);

/// Content-addressed run identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn from_fingerprint(fingerprint: &RunFingerprint) -> Self {
        let uuid = Uuid::new_v5(&RUN_NAMESPACE, fingerprint.hash_hex.as_bytes());
        Self(format!("run_{}", uuid.simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fingerprint of a run's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub version: String,
    pub config_hash: String,
    pub dataset_hash: String,
    pub record_count: usize,
    pub rejected_count: usize,
    pub hash_hex: String,
}

impl RunFingerprint {
    pub fn compute(
        config: &EngineConfig,
        readings: &[Reading],
        rejected: &[MalformedInput],
    ) -> Self {
        let config_hash = hash_config(config);
        let dataset_hash = hash_dataset(readings, rejected);

        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        hasher.update(config_hash.as_bytes());
        hasher.update(dataset_hash.as_bytes());

        Self {
            version: FINGERPRINT_VERSION.to_string(),
            config_hash,
            dataset_hash,
            record_count: readings.len(),
            rejected_count: rejected.len(),
            hash_hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn format_short(&self) -> String {
        format!("{}:{}", self.version, &self.hash_hex[..16.min(self.hash_hex.len())])
    }
}

fn put_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn put_opt_str(hasher: &mut Sha256, s: Option<&str>) {
    match s {
        Some(s) => {
            hasher.update([1u8]);
            put_str(hasher, s);
        }
        None => hasher.update([0u8]),
    }
}

fn put_f64(hasher: &mut Sha256, v: f64) {
    hasher.update(v.to_bits().to_le_bytes());
}

fn put_opt_i64(hasher: &mut Sha256, v: Option<i64>) {
    match v {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}

fn put_opt_f64(hasher: &mut Sha256, v: Option<f64>) {
    match v {
        Some(v) => {
            hasher.update([1u8]);
            put_f64(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}

fn hash_config(config: &EngineConfig) -> String {
    let mut hasher = Sha256::new();
    put_f64(&mut hasher, config.min_temperature);
    put_f64(&mut hasher, config.max_temperature);
    put_f64(&mut hasher, config.anomaly_threshold_multiplier);
    for n in [
        config.min_samples.global,
        config.min_samples.device,
        config.min_samples.environment,
        config.min_samples.location,
    ] {
        hasher.update((n as u64).to_le_bytes());
    }
    let w = &config.quality_weights;
    for weight in [w.device_id, w.timestamp, w.temperature] {
        put_f64(&mut hasher, weight);
    }
    hex::encode(hasher.finalize())
}

fn hash_dataset(readings: &[Reading], rejected: &[MalformedInput]) -> String {
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by(|a, b| {
        a.key()
            .cmp(&b.key())
            .then_with(|| a.arrival_ordinal.cmp(&b.arrival_ordinal))
            .then_with(|| a.load_batch_id.cmp(&b.load_batch_id))
    });

    let mut hasher = Sha256::new();
    hasher.update((sorted.len() as u64).to_le_bytes());
    for r in sorted {
        put_opt_str(&mut hasher, r.device_id.as_deref());
        put_opt_i64(&mut hasher, r.reading_timestamp.map(|ts| ts.timestamp_micros()));
        put_opt_f64(&mut hasher, r.temperature);
        put_opt_str(&mut hasher, r.location.as_deref());
        put_str(&mut hasher, &r.load_batch_id);
        hasher.update(r.arrival_ordinal.to_le_bytes());
    }

    let mut diagnostics: Vec<&MalformedInput> = rejected.iter().collect();
    diagnostics.sort_by(|a, b| {
        a.record_index
            .cmp(&b.record_index)
            .then_with(|| a.field.cmp(b.field))
            .then_with(|| a.reason.cmp(&b.reason))
    });
    hasher.update((diagnostics.len() as u64).to_le_bytes());
    for d in diagnostics {
        hasher.update((d.record_index as u64).to_le_bytes());
        put_str(&mut hasher, d.field);
        put_str(&mut hasher, &d.reason);
    }
    hex::encode(hasher.finalize())
}
