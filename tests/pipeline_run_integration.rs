//! Integration tests for the iot-engine CLI
//!
//! Drive the built binaries against scratch input files and check the
//! written output, exit codes and store round trip.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const NOW: &str = "2024-04-02T00:00:00Z";

fn engine_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_iot-engine"))
}

fn inspector_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_run_inspector"))
}

fn command(binary: PathBuf, dir: &Path) -> Command {
    let mut cmd = Command::new(binary);
    cmd.current_dir(dir)
        .env_remove("ENGINE_CONFIG_PATH")
        .env_remove("ENGINE_STORE_PATH")
        .env("RUST_LOG", "error");
    cmd
}

fn run_engine(dir: &Path, args: &[&str]) -> Output {
    command(engine_binary(), dir)
        .args(args)
        .output()
        .expect("Failed to execute iot-engine")
}

/// Twelve steady readings, one spike and one duplicate.
fn sample_records() -> Vec<Value> {
    let mut records: Vec<Value> = (0..12)
        .map(|i| {
            json!({
                "device_id": "sensor-1",
                "timestamp": format!("2024-04-01T08:{:02}:00Z", i),
                "temperature": 20.0 + (i % 3) as f64,
                "location": "lab_in",
            })
        })
        .collect();
    records.push(json!({
        "device_id": "sensor-1",
        "timestamp": "2024-04-01T09:00:00Z",
        "temperature": 75.0,
        "location": "lab_in",
    }));
    records.push(json!({
        "device_id": "sensor-1",
        "timestamp": "2024-04-01T08:00:00Z",
        "temperature": 20.5,
        "location": "lab_in",
    }));
    records
}

fn write_input(dir: &Path, name: &str, records: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    fs::write(&path, lines.join("\n")).expect("Failed to write input");
    path
}

fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("Failed to read output");
    serde_json::from_str(&text).expect("Output is not valid JSON")
}

#[test]
fn test_run_writes_output() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    let out = run_engine(
        dir.path(),
        &["--input", "input.jsonl", "--output", "run.json", "--now", NOW],
    );
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let output = read_json(&dir.path().join("run.json"));
    let run_id = output["run_id"].as_str().unwrap();
    assert!(run_id.starts_with("run_"));

    let summary = &output["summary"];
    assert_eq!(summary["run_id"], output["run_id"]);
    assert_eq!(summary["total_processed_records"], 13);
    assert_eq!(summary["duplicate_record_count"], 1);
    assert_eq!(summary["valid_record_count"], 13);
    assert_eq!(summary["valid_record_percentage"], 100.0);
    assert!(summary["anomalous_record_count"].as_u64().unwrap() >= 1);

    let records = output["records"].as_array().unwrap();
    assert_eq!(records.len(), 13);
    // Duplicate key resolves to the later arrival.
    assert_eq!(records[0]["validated"]["reading"]["temperature"], 20.5);
}

#[test]
fn test_rerun_output_is_identical() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    for name in ["a.json", "b.json"] {
        let out = run_engine(
            dir.path(),
            &["--input", "input.jsonl", "--output", name, "--now", NOW],
        );
        assert!(out.status.success());
    }

    let a = fs::read_to_string(dir.path().join("a.json")).unwrap();
    let b = fs::read_to_string(dir.path().join("b.json")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_summary_only_to_stdout() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    let out = run_engine(
        dir.path(),
        &["--input", "input.jsonl", "--summary-only", "--now", NOW],
    );
    assert!(out.status.success());
    let summary: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["unique_devices"], 1);
    assert!(summary.get("records").is_none());
}

#[test]
fn test_invalid_config_exits_with_2() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());
    fs::write(
        dir.path().join("engine.toml"),
        "anomaly_threshold_multiplier = 0.5\n",
    )
    .unwrap();

    let out = run_engine(
        dir.path(),
        &["--input", "input.jsonl", "--config", "engine.toml", "--now", NOW],
    );
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_bad_now_exits_with_2() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    let out = run_engine(dir.path(), &["--input", "input.jsonl", "--now", "yesterday"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_no_valid_records_exits_with_3() {
    let dir = TempDir::new().unwrap();
    let records = vec![json!({
        "device_id": "sensor-1",
        "timestamp": "2024-04-01T08:00:00Z",
        "temperature": 400.0,
        "location": "lab_in",
    })];
    write_input(dir.path(), "input.jsonl", &records);

    let out = run_engine(dir.path(), &["--input", "input.jsonl", "--now", NOW]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("valid"));
}

#[test]
fn test_missing_input_exits_with_3() {
    let dir = TempDir::new().unwrap();
    let out = run_engine(dir.path(), &["--input", "absent.jsonl", "--now", NOW]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn test_dataset_rows_are_normalized() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<Value> = (0..6)
        .map(|i| {
            json!({
                "id": format!("__export__.temp_log_19613{}_bd201015", i),
                "room_id/id": "Room Admin",
                "noted_date": format!("08-12-2018 09:{:02}", 30 + i),
                "temp": 29 + i,
                "out/in": "In",
            })
        })
        .collect();
    write_input(dir.path(), "rows.jsonl", &rows);

    let out = run_engine(
        dir.path(),
        &["--input", "rows.jsonl", "--format", "kaggle", "--output", "run.json", "--now", NOW],
    );
    assert!(out.status.success());

    let output = read_json(&dir.path().join("run.json"));
    let record = &output["records"][0];
    assert_eq!(record["validated"]["reading"]["device_id"], "IOT_TEMP_BD201015");
    assert_eq!(record["validated"]["location"], "Office_in");
    assert_eq!(record["validated"]["environment_type"], "Indoor");
    assert_eq!(output["summary"]["unique_devices"], 1);
}

#[test]
fn test_store_and_inspect() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    let out = run_engine(
        dir.path(),
        &[
            "--input", "input.jsonl", "--output", "run.json", "--store", "runs.sqlite", "--now",
            NOW,
        ],
    );
    assert!(out.status.success());
    let run_id = read_json(&dir.path().join("run.json"))["run_id"]
        .as_str()
        .unwrap()
        .to_string();

    let listing = command(inspector_binary(), dir.path())
        .args(["--store", "runs.sqlite"])
        .output()
        .expect("Failed to execute run_inspector");
    assert!(listing.status.success());
    assert!(String::from_utf8_lossy(&listing.stdout).contains(&run_id));

    let detail = command(inspector_binary(), dir.path())
        .args(["--store", "runs.sqlite", "--run", &run_id, "--anomalies"])
        .output()
        .expect("Failed to execute run_inspector");
    assert!(detail.status.success());
    let text = String::from_utf8_lossy(&detail.stdout);
    assert!(text.contains("sensor-1"));

    // Same batch, same run id: a second persist is refused.
    let again = run_engine(
        dir.path(),
        &["--input", "input.jsonl", "--store", "runs.sqlite", "--now", NOW],
    );
    assert_eq!(again.status.code(), Some(3));
}

#[test]
fn test_refused_persist_writes_no_output() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path(), "input.jsonl", &sample_records());

    let first = run_engine(
        dir.path(),
        &[
            "--input", "input.jsonl", "--output", "first.json", "--store", "runs.sqlite",
            "--now", NOW,
        ],
    );
    assert!(first.status.success());

    let second = run_engine(
        dir.path(),
        &[
            "--input", "input.jsonl", "--output", "second.json", "--store", "runs.sqlite",
            "--now", NOW,
        ],
    );
    assert_eq!(second.status.code(), Some(3));
    assert!(dir.path().join("first.json").exists());
    assert!(!dir.path().join("second.json").exists());
}
