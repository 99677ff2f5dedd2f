//! Input file decoding for the batch runner.
//!
//! Accepts a JSON array or JSON lines, with records either in the standard
//! shape (`device_id, timestamp, temperature, location`) or as rows of the
//! public IoT temperature dataset.

use crate::engine::{KaggleRow, RawReading};
use anyhow::{Context, Result};
use serde_json::Value;

/// Record shape of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputFormat {
    /// Detect per record (dataset rows carry `noted_date`)
    Auto,
    Standard,
    Kaggle,
}

fn is_kaggle_shaped(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| o.contains_key("noted_date") || o.contains_key("room_id/id"))
        .unwrap_or(false)
}

fn decode_value(value: Value, format: InputFormat) -> Result<RawReading> {
    let kaggle = match format {
        InputFormat::Auto => is_kaggle_shaped(&value),
        InputFormat::Standard => false,
        InputFormat::Kaggle => true,
    };
    if kaggle {
        let row: KaggleRow = serde_json::from_value(value)?;
        Ok(row.into_raw())
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

/// Decode the contents of an input file into raw readings, in file order.
pub fn decode_records(text: &str, format: InputFormat) -> Result<Vec<RawReading>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).context("Failed to parse JSON array input")?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, v)| decode_value(v, format).with_context(|| format!("Invalid record {}", i)))
            .collect();
    }

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse JSON on line {}", line_no + 1))?;
        records.push(
            decode_value(value, format)
                .with_context(|| format!("Invalid record on line {}", line_no + 1))?,
        );
    }
    Ok(records)
}
