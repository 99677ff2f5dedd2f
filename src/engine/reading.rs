//! Raw input records and the ingestion boundary.
//!
//! `RawReading` is what collaborators hand over. It keeps the difference
//! between a field that is absent from the record (structurally malformed,
//! rejected here) and a field that is present but null (flows on and is
//! marked invalid by the validator).

use crate::engine::error::MalformedInput;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Day-first format used by the public IoT temperature dataset.
const DAY_FIRST_FORMAT: &str = "%d-%m-%Y %H:%M";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    DAY_FIRST_FORMAT,
];

/// Device id given to dataset rows without an id.
pub const UNKNOWN_DEVICE_ID: &str = "IOT_TEMP_UNKNOWN";

/// Deserialize a field so that `null` becomes `Some(None)` while an absent
/// field (via `#[serde(default)]`) stays `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Input record as supplied by the ingestion collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Option<String>>,
    #[serde(
        rename = "timestamp",
        alias = "reading_timestamp",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub reading_timestamp: Option<Option<String>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub load_batch_id: Option<String>,
    #[serde(default)]
    pub arrival_ordinal: Option<u64>,
}

impl RawReading {
    /// Fully populated record in the standard shape.
    pub fn standard(
        device_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        temperature: f64,
        location: impl Into<String>,
    ) -> Self {
        Self {
            device_id: Some(Some(device_id.into())),
            reading_timestamp: Some(Some(timestamp.to_rfc3339())),
            temperature: Some(temperature),
            location: Some(location.into()),
            load_batch_id: None,
            arrival_ordinal: None,
        }
    }

    pub fn with_ordinal(mut self, ordinal: u64) -> Self {
        self.arrival_ordinal = Some(ordinal);
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.load_batch_id = Some(batch_id.into());
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Row of the public IoT temperature dataset (`id, room_id/id, noted_date, temp, out/in`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KaggleRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "room_id/id", default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub noted_date: Option<String>,
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(rename = "out/in", default)]
    pub out_in: Option<String>,
}

impl KaggleRow {
    /// Normalize into the standard record shape.
    ///
    /// The device id keeps the first eight characters of the id's last
    /// `_`-separated segment; the location joins the room (with "Room "
    /// stripped and "Admin" read as "Office") and the lowercased in/out flag.
    pub fn into_raw(self) -> RawReading {
        let device_id = match self.id.as_deref() {
            Some(id) => {
                let tail = id.rsplit('_').next().unwrap_or(id);
                let short: String = tail.chars().take(8).collect();
                format!("IOT_TEMP_{}", short.to_uppercase())
            }
            None => UNKNOWN_DEVICE_ID.to_string(),
        };

        let location = match (self.room_id.as_deref(), self.out_in.as_deref()) {
            (Some(room), Some(flag)) => Some(format!(
                "{}_{}",
                room.replace("Room ", "").replace("Admin", "Office"),
                flag.to_lowercase()
            )),
            _ => None,
        };

        RawReading {
            device_id: Some(Some(device_id)),
            reading_timestamp: self.noted_date.map(Some),
            temperature: self.temp,
            location,
            load_batch_id: None,
            arrival_ordinal: None,
        }
    }
}

/// Ingested reading. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: Option<String>,
    pub reading_timestamp: Option<DateTime<Utc>>,
    pub temperature: Option<f64>,
    pub location: Option<String>,
    pub load_batch_id: String,
    pub arrival_ordinal: u64,
}

/// Deduplication key.
pub type ReadingKey = (Option<String>, Option<DateTime<Utc>>);

impl Reading {
    pub fn key(&self) -> ReadingKey {
        (self.device_id.clone(), self.reading_timestamp)
    }
}

/// Result of ingesting one batch.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub readings: Vec<Reading>,
    pub rejected: Vec<MalformedInput>,
}

/// Parse a timestamp in any of the accepted formats.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Convert one raw record, rejecting structural problems.
pub fn ingest_one(
    index: usize,
    raw: &RawReading,
    default_batch_id: &str,
) -> Result<Reading, MalformedInput> {
    let device_id = match &raw.device_id {
        None => return Err(MalformedInput::new(index, "device_id", "is missing")),
        Some(value) => value.clone(),
    };

    let reading_timestamp = match &raw.reading_timestamp {
        None => return Err(MalformedInput::new(index, "reading_timestamp", "is missing")),
        Some(None) => None,
        Some(Some(text)) => match parse_timestamp(text) {
            Some(ts) => Some(ts),
            None => {
                return Err(MalformedInput::new(
                    index,
                    "reading_timestamp",
                    format!("is an unparseable timestamp '{}'", text),
                ))
            }
        },
    };

    if let Some(t) = raw.temperature {
        if !t.is_finite() {
            return Err(MalformedInput::new(
                index,
                "temperature",
                format!("is not a finite number ({})", t),
            ));
        }
    }

    Ok(Reading {
        device_id,
        reading_timestamp,
        temperature: raw.temperature,
        location: raw.location.clone(),
        load_batch_id: raw
            .load_batch_id
            .clone()
            .unwrap_or_else(|| default_batch_id.to_string()),
        arrival_ordinal: raw.arrival_ordinal.unwrap_or(index as u64 + 1),
    })
}

/// Ingest a batch. Records without an ordinal get their 1-based batch position.
pub fn ingest(batch: &[RawReading], default_batch_id: &str) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();
    for (index, raw) in batch.iter().enumerate() {
        match ingest_one(index, raw, default_batch_id) {
            Ok(reading) => outcome.readings.push(reading),
            Err(diagnostic) => {
                warn!(
                    record_index = diagnostic.record_index,
                    field = diagnostic.field,
                    reason = %diagnostic.reason,
                    "Rejected malformed reading"
                );
                outcome.rejected.push(diagnostic);
            }
        }
    }
    outcome
}
