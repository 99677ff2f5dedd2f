//! End-to-end scenarios for the full pipeline.

use crate::engine::config::EngineConfig;
use crate::engine::enrichment::{EnvironmentCondition, Freshness, TemperatureBucket};
use crate::engine::error::EngineError;
use crate::engine::pipeline::Pipeline;
use crate::engine::reading::RawReading;
use crate::engine::stats::{GroupingLevel, GLOBAL_KEY};
use crate::engine::validator::{EnvironmentType, ValidationIssue};
use chrono::{DateTime, Duration, TimeZone, Utc};

// =============================================================================
// TEST HELPERS
// =============================================================================

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()
}

fn at(minute: i64) -> DateTime<Utc> {
    base() + Duration::minutes(minute)
}

fn now() -> DateTime<Utc> {
    base() + Duration::hours(12)
}

fn pipeline() -> Pipeline {
    Pipeline::new(EngineConfig::default()).unwrap()
}

fn series(device: &str, location: &str, offset: f64, count: i64) -> Vec<RawReading> {
    (0..count)
        .map(|i| {
            let variation = ((i * 7) % 5) as f64 * 0.5;
            RawReading::standard(device, at(i), offset + variation, location)
        })
        .collect()
}

/// Three regular devices plus one spike on d1.
fn fleet() -> Vec<RawReading> {
    let mut batch = Vec::new();
    batch.extend(series("d1", "lab_in", 20.0, 12));
    batch.extend(series("d2", "lab_in", 20.0, 12));
    batch.extend(series("d3", "yard_out", 10.0, 12));
    batch.push(RawReading::standard("d1", at(100), 45.0, "lab_in"));
    batch
}

// =============================================================================
// DEDUPLICATION
// =============================================================================

#[test]
fn test_most_recent_duplicate_survives() {
    let batch = vec![
        RawReading::standard("d1", at(0), 20.0, "room_out").with_ordinal(1),
        RawReading::standard("d1", at(0), 21.0, "room_out").with_ordinal(2),
    ];
    let output = pipeline().run(&batch, now()).unwrap();

    assert_eq!(output.records.len(), 1);
    let record = &output.records[0].scored.validated;
    assert_eq!(record.reading.temperature, Some(21.0));
    assert_eq!(record.environment_type, EnvironmentType::Outdoor);
    assert!(record.is_valid);
    assert_eq!(output.summary.duplicate_record_count, 1);
    assert_eq!(output.summary.total_processed_records, 1);
}

#[test]
fn test_duplicate_order_does_not_matter() {
    let forward = vec![
        RawReading::standard("d1", at(0), 20.0, "room_out").with_ordinal(1),
        RawReading::standard("d1", at(0), 21.0, "room_out").with_ordinal(2),
    ];
    let mut backward = forward.clone();
    backward.reverse();

    let a = pipeline().run(&forward, now()).unwrap();
    let b = pipeline().run(&backward, now()).unwrap();
    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.records, b.records);
}

// =============================================================================
// VALIDATION FLOWING THROUGH
// =============================================================================

#[test]
fn test_out_of_range_reading_is_excluded_from_statistics() {
    let config = EngineConfig {
        max_temperature: 90.0,
        ..EngineConfig::default()
    };
    let mut batch: Vec<RawReading> = (0..4)
        .map(|i| RawReading::standard("dx", at(i), 25.0, "lab_in"))
        .collect();
    batch.push(RawReading::standard("dx", at(10), 90.0, "lab_in"));

    let output = Pipeline::new(config).unwrap().run(&batch, now()).unwrap();
    assert_eq!(output.records.len(), 5);

    let hot = output
        .records
        .iter()
        .find(|r| r.scored.validated.reading.temperature == Some(90.0))
        .unwrap();
    assert!(!hot.is_valid());
    assert_eq!(
        hot.scored.validated.issues,
        vec![ValidationIssue::TemperatureOutOfRange]
    );
    assert!(!hot.is_anomaly());
    assert_eq!(hot.scored.anomaly_score, 0.0);
    for level in GroupingLevel::all() {
        assert_eq!(hot.scored.scores.get(*level).z_score, None);
    }

    let global = output.statistics.get(GroupingLevel::Global, GLOBAL_KEY).unwrap();
    assert_eq!(global.sample_count, 4);
    assert_eq!(global.mean, 25.0);
    assert!(output.statistics.get(GroupingLevel::Device, "dx").is_none());

    assert_eq!(output.summary.valid_record_count, 4);
    assert_eq!(output.summary.invalid_record_count, 1);
    assert_eq!(output.summary.valid_record_percentage, 80.0);
}

#[test]
fn test_invalid_records_are_kept_for_audit() {
    let mut batch = series("d1", "lab_in", 20.0, 6);
    batch.push(RawReading::standard("d1", at(50), 0.0, "lab_in").with_temperature(None));
    let output = pipeline().run(&batch, now()).unwrap();

    assert_eq!(output.records.len(), 7);
    let missing = output.records.iter().find(|r| !r.is_valid()).unwrap();
    assert!((missing.scored.validated.data_quality_score - 0.8).abs() < 1e-9);
    assert_eq!(missing.temperature_bucket, TemperatureBucket::Unknown);
    assert_eq!(missing.environment_condition, EnvironmentCondition::Normal);
}

#[test]
fn test_malformed_records_are_rejected_not_fatal() {
    let mut batch = series("d1", "lab_in", 20.0, 3);
    batch.push(RawReading {
        device_id: None,
        ..RawReading::standard("ignored", at(9), 20.0, "lab_in")
    });
    let output = pipeline().run(&batch, now()).unwrap();

    assert_eq!(output.rejected.len(), 1);
    assert_eq!(output.rejected[0].field, "device_id");
    assert_eq!(output.rejected[0].record_index, 3);
    assert_eq!(output.records.len(), 3);
    assert_eq!(output.summary.rejected_record_count, 1);
}

// =============================================================================
// STATISTICS AND CLASSIFICATION
// =============================================================================

#[test]
fn test_small_device_never_gets_device_z_score() {
    let mut batch = fleet();
    for i in 0..4 {
        batch.push(RawReading::standard("d4", at(200 + i), 80.0, "lab_in"));
    }
    let output = pipeline().run(&batch, now()).unwrap();

    let d4: Vec<_> = output
        .records
        .iter()
        .filter(|r| r.scored.validated.device_id() == Some("d4"))
        .collect();
    assert_eq!(d4.len(), 4);
    for record in d4 {
        assert_eq!(record.scored.scores.device.z_score, None);
        assert!(!record.scored.scores.device.is_anomaly);
        // The global level still sees the extreme values.
        assert!(record.scored.scores.global.z_score.is_some());
    }
}

#[test]
fn test_spike_is_flagged() {
    let output = pipeline().run(&fleet(), now()).unwrap();

    let spike = output
        .records
        .iter()
        .find(|r| r.scored.validated.reading.temperature == Some(45.0))
        .unwrap();
    assert!(spike.is_anomaly());
    assert!(spike.scored.scores.device.is_anomaly);
    assert!(spike.scored.anomaly_score > 2.5);
    assert_eq!(spike.temperature_bucket, TemperatureBucket::Hot);
    assert_eq!(spike.environment_condition, EnvironmentCondition::HotIndoor);

    let flagged = output.summary.level_anomalies[&GroupingLevel::Device].anomaly_count;
    assert!(flagged >= 1);
    assert!(output.summary.level_anomalies[&GroupingLevel::Device]
        .mean_z_score
        .unwrap()
        > 2.5);
}

#[test]
fn test_location_needs_ten_samples() {
    let mut batch = series("d1", "lab_in", 20.0, 12);
    batch.extend(series("d2", "attic_in", 20.0, 9));
    let output = pipeline().run(&batch, now()).unwrap();

    assert!(output.statistics.get(GroupingLevel::Location, "lab_in").is_some());
    assert!(output.statistics.get(GroupingLevel::Location, "attic_in").is_none());
    let attic = output
        .records
        .iter()
        .find(|r| r.scored.validated.location == "attic_in")
        .unwrap();
    assert_eq!(attic.scored.scores.location.z_score, None);
    assert!(attic.scored.scores.environment.z_score.is_some());
}

#[test]
fn test_constant_readings_are_never_anomalous() {
    let batch: Vec<RawReading> = (0..20)
        .map(|i| RawReading::standard("d1", at(i), 22.0, "lab_in"))
        .collect();
    let output = pipeline().run(&batch, now()).unwrap();
    assert!(output.records.iter().all(|r| !r.is_anomaly()));
    assert!(output.records.iter().all(|r| r.scored.anomaly_score == 0.0));
    assert_eq!(output.summary.anomalous_record_count, 0);
    assert_eq!(
        output.summary.level_anomalies[&GroupingLevel::Global].mean_z_score,
        None
    );
}

#[test]
fn test_small_environment_is_suppressed() {
    let mut batch = series("d1", "lab_in", 20.0, 12);
    batch.extend(series("d2", "porch_out", 5.0, 4));
    // Invalid outdoor reading does not count toward the sample size.
    batch.push(RawReading::standard("d2", at(50), 500.0, "porch_out"));
    let output = pipeline().run(&batch, now()).unwrap();

    assert!(output.statistics.get(GroupingLevel::Environment, "Indoor").is_some());
    assert!(output.statistics.get(GroupingLevel::Environment, "Outdoor").is_none());
    assert_eq!(
        output.statistics.suppressed[&GroupingLevel::Environment],
        vec!["Outdoor".to_string()]
    );

    let outdoor: Vec<_> = output
        .records
        .iter()
        .filter(|r| r.scored.validated.environment_type == EnvironmentType::Outdoor)
        .collect();
    assert_eq!(outdoor.len(), 5);
    for record in outdoor {
        assert_eq!(record.scored.scores.environment.z_score, None);
        assert!(!record.scored.scores.environment.is_anomaly);
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

#[test]
fn test_valid_percentage_is_exact() {
    let batch: Vec<RawReading> = (0..100)
        .map(|i| {
            let device = format!("d{}", i % 5);
            let reading = RawReading::standard(device, at(i), 20.0 + (i % 4) as f64, "lab_in");
            if i < 5 {
                reading.with_temperature(None)
            } else {
                reading
            }
        })
        .collect();
    let summary = pipeline().run(&batch, now()).unwrap().summary;

    assert_eq!(summary.total_processed_records, 100);
    assert_eq!(summary.valid_record_count, 95);
    assert_eq!(summary.valid_record_percentage, 95.0);
    assert_eq!(summary.invalid_record_percentage, 5.0);
    assert_eq!(summary.unique_devices, 5);
    assert_eq!(summary.unique_locations, 1);
    assert_eq!(summary.unique_environments, 1);
    assert_eq!(summary.device_summaries.len(), 5);
    assert_eq!(summary.device_summaries[0].key, "d0");
    assert_eq!(summary.device_summaries[0].reading_count, 20);
    assert_eq!(summary.device_summaries[0].valid_count, 19);
}

#[test]
fn test_summary_coverage_and_span() {
    let output = pipeline().run(&fleet(), now()).unwrap();
    let summary = &output.summary;

    assert_eq!(summary.run_id, output.run_id);
    assert_eq!(summary.processed_at, now());
    assert_eq!(summary.unique_devices, 3);
    assert_eq!(summary.unique_locations, 2);
    assert_eq!(summary.unique_environments, 2);
    assert_eq!(summary.earliest_reading, Some(at(0)));
    assert_eq!(summary.latest_reading, Some(at(100)));
    assert_eq!(summary.temperature.max, 45.0);
    assert_eq!(summary.temperature.min, 10.0);
    assert_eq!(summary.location_summaries.len(), 2);
    assert!(output
        .records
        .iter()
        .all(|r| r.freshness == Freshness::Recent));

    let bucket_total: f64 = summary.temperature_bucket_percentages.values().sum();
    assert!((bucket_total - 100.0).abs() < 0.05);
}

#[test]
fn test_all_invalid_run_fails() {
    let batch: Vec<RawReading> = (0..3)
        .map(|i| RawReading::standard("d1", at(i), 500.0, "lab_in"))
        .collect();
    let err = pipeline().run(&batch, now()).unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientData {
            total_records: 3,
            valid_records: 0
        }
    );
}

#[test]
fn test_empty_batch_fails() {
    let err = pipeline().run(&[], now()).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { .. }));
}

// =============================================================================
// CONFIGURATION AND REPRODUCIBILITY
// =============================================================================

#[test]
fn test_bad_configuration_rejected_at_startup() {
    let config = EngineConfig {
        anomaly_threshold_multiplier: 0.3,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Pipeline::new(config),
        Err(EngineError::Configuration { .. })
    ));
}

#[test]
fn test_rerun_is_byte_identical() {
    let batch = fleet();
    let first = pipeline().run(&batch, now()).unwrap();
    let second = pipeline().run(&batch, now()).unwrap();

    assert_eq!(first.run_id, second.run_id);
    assert_eq!(
        serde_json::to_string(&first.records).unwrap(),
        serde_json::to_string(&second.records).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.summary).unwrap(),
        serde_json::to_string(&second.summary).unwrap()
    );
}

#[test]
fn test_run_id_ignores_wall_clock() {
    let batch = fleet();
    let first = pipeline().run(&batch, now()).unwrap();
    let later = pipeline().run(&batch, now() + Duration::days(40)).unwrap();
    assert_eq!(first.run_id, later.run_id);
    assert!(later
        .records
        .iter()
        .all(|r| r.freshness == Freshness::Historical));
}

#[test]
fn test_run_id_depends_on_config() {
    let batch = fleet();
    let strict = Pipeline::new(EngineConfig {
        anomaly_threshold_multiplier: 2.0,
        ..EngineConfig::default()
    })
    .unwrap();
    let a = pipeline().run(&batch, now()).unwrap();
    let b = strict.run(&batch, now()).unwrap();
    assert_ne!(a.run_id, b.run_id);
}

#[test]
fn test_run_id_sees_tiny_temperature_differences() {
    let mut a = fleet();
    a.push(RawReading::standard("d9", at(300), 20.0, "lab_in"));
    let mut b = fleet();
    b.push(RawReading::standard("d9", at(300), 20.0000004, "lab_in"));

    let first = pipeline().run(&a, now()).unwrap();
    let second = pipeline().run(&b, now()).unwrap();
    assert_ne!(first.records, second.records);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_run_id_sees_rejection_reasons() {
    let bad = |stamp: &str| RawReading {
        reading_timestamp: Some(Some(stamp.to_string())),
        ..RawReading::standard("d1", at(0), 20.0, "lab_in")
    };
    let mut a = fleet();
    a.push(bad("first of never"));
    let mut b = fleet();
    b.push(bad("second of never"));

    let first = pipeline().run(&a, now()).unwrap();
    let second = pipeline().run(&b, now()).unwrap();
    assert_eq!(first.rejected.len(), 1);
    assert_ne!(first.rejected, second.rejected);
    assert_eq!(first.records, second.records);
    assert_ne!(first.run_id, second.run_id);
}
