//! Run Inspector CLI
//!
//! Lists stored engine runs and prints a run's summary and anomalies.
//!
//! Usage:
//!   cargo run --bin run_inspector -- --store runs.sqlite
//!   cargo run --bin run_inspector -- --store runs.sqlite --run run_abc123 --anomalies

use anyhow::{Context, Result};
use clap::Parser;
use iot_quality_engine::engine::{EnrichedReading, GroupingLevel, RunSummary};
use iot_quality_engine::store::RunStore;

#[derive(Parser, Debug)]
#[command(name = "run_inspector")]
#[command(about = "Inspect runs persisted by iot-engine")]
struct Args {
    /// Path to SQLite run store
    #[arg(long, env = "ENGINE_STORE_PATH")]
    store: String,

    /// Run id to inspect (lists recent runs when omitted)
    #[arg(long)]
    run: Option<String>,

    /// Number of runs to list
    #[arg(long, default_value = "20")]
    limit: usize,

    /// Print anomalous records of the selected run
    #[arg(long, default_value = "false")]
    anomalies: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("=== Run Inspector ===");
    println!("Store: {}", args.store);
    println!();

    let store = RunStore::new(&args.store).context("Failed to open run store")?;

    match &args.run {
        None => list_runs(&store, args.limit)?,
        Some(run_id) => {
            let summary = store
                .get_summary(run_id)
                .with_context(|| format!("Failed to load run {}", run_id))?;
            print_summary(&summary);
            if args.anomalies {
                let records = store.load_records(run_id, true)?;
                print_anomalies(&records);
            }
        }
    }

    println!("=== Inspection Complete ===");
    Ok(())
}

fn list_runs(store: &RunStore, limit: usize) -> Result<()> {
    let runs = store.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs stored.");
        println!();
        return Ok(());
    }

    println!(
        "{:<40} {:<26} {:>8} {:>8} {:>9}",
        "RUN", "PROCESSED AT", "TOTAL", "VALID", "ANOMALOUS"
    );
    for run in runs {
        println!(
            "{:<40} {:<26} {:>8} {:>8} {:>9}",
            run.run_id, run.processed_at, run.total_records, run.valid_records, run.anomalous_records
        );
    }
    println!();
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("--- Run {} ---", summary.run_id);
    println!("  Processed at:     {}", summary.processed_at.to_rfc3339());
    println!(
        "  Records:          {} ({} valid, {} invalid, {} anomalous)",
        summary.total_processed_records,
        summary.valid_record_count,
        summary.invalid_record_count,
        summary.anomalous_record_count
    );
    println!(
        "  Upstream:         {} rejected, {} duplicates dropped",
        summary.rejected_record_count, summary.duplicate_record_count
    );
    println!(
        "  Percentages:      valid {:.2}%  invalid {:.2}%  anomaly {:.2}%",
        summary.valid_record_percentage,
        summary.invalid_record_percentage,
        summary.anomaly_percentage
    );
    println!("  Avg quality:      {:.4}", summary.avg_data_quality_score);
    println!(
        "  Temperature:      mean {:.2}  min {:.2}  max {:.2}",
        summary.temperature.mean, summary.temperature.min, summary.temperature.max
    );
    println!(
        "  Coverage:         {} devices, {} locations, {} environments",
        summary.unique_devices, summary.unique_locations, summary.unique_environments
    );
    if let (Some(first), Some(last)) = (summary.earliest_reading, summary.latest_reading) {
        println!("  Span:             {} .. {}", first.to_rfc3339(), last.to_rfc3339());
    }

    println!();
    println!("  Level anomalies:");
    for &level in GroupingLevel::all() {
        if let Some(level_summary) = summary.level_anomalies.get(&level) {
            let mean_z = level_summary
                .mean_z_score
                .map(|z| format!("{:.2}", z))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {:<12} {:>6} flagged  mean z {}",
                level.as_str(),
                level_summary.anomaly_count,
                mean_z
            );
        }
    }

    println!();
    println!("  Temperature buckets:");
    for (bucket, pct) in &summary.temperature_bucket_percentages {
        println!("    {:<12} {:>6.2}%", format!("{:?}", bucket), pct);
    }
    println!();
}

fn print_anomalies(records: &[EnrichedReading]) {
    println!("--- Anomalies ({}) ---", records.len());
    for r in records {
        let v = &r.scored.validated;
        let ts = v
            .reading
            .reading_timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let flagged: Vec<&str> = GroupingLevel::all()
            .iter()
            .filter(|level| r.scored.scores.get(**level).is_anomaly)
            .map(|level| level.as_str())
            .collect();
        println!(
            "  {:<20} {:<26} {:>8.2}  score {:.2}  [{}]",
            v.device_id().unwrap_or("-"),
            ts,
            v.reading.temperature.unwrap_or(f64::NAN),
            r.scored.anomaly_score,
            flagged.join(",")
        );
    }
    println!();
}
