//! Derived categorical dimensions.
//!
//! Every derivation is total: inputs outside the enumerated cases map to an
//! explicit `Unknown` or `Normal` category.

use crate::engine::classifier::ScoredReading;
use crate::engine::validator::EnvironmentType;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TemperatureBucket {
    Freezing,
    Cold,
    Comfortable,
    Warm,
    Hot,
    Unknown,
}

impl TemperatureBucket {
    /// Bucket boundaries are inclusive as listed; values between bands
    /// (e.g. 15.5) fall through to `Unknown`.
    pub fn classify(temperature: Option<f64>) -> Self {
        match temperature {
            Some(t) if t < 0.0 => Self::Freezing,
            Some(t) if (0.0..=15.0).contains(&t) => Self::Cold,
            Some(t) if (16.0..=25.0).contains(&t) => Self::Comfortable,
            Some(t) if (26.0..=35.0).contains(&t) => Self::Warm,
            Some(t) if t > 35.0 => Self::Hot,
            _ => Self::Unknown,
        }
    }
}

/// Calendar parts of the reading timestamp (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeParts {
    pub hour: u32,
    /// 0 = Sunday.
    pub day_of_week: u32,
    pub date: NaiveDate,
    pub month: u32,
    pub year: i32,
}

impl TimeParts {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            hour: ts.hour(),
            day_of_week: ts.weekday().num_days_from_sunday(),
            date: ts.date_naive(),
            month: ts.month(),
            year: ts.year(),
        }
    }
}

/// Environment combined with temperature extremes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EnvironmentCondition {
    #[serde(rename = "Cold_Indoor")]
    ColdIndoor,
    #[serde(rename = "Hot_Indoor")]
    HotIndoor,
    #[serde(rename = "Freezing_Outdoor")]
    FreezingOutdoor,
    #[serde(rename = "Hot_Outdoor")]
    HotOutdoor,
    Normal,
}

impl EnvironmentCondition {
    pub fn classify(environment: EnvironmentType, temperature: Option<f64>) -> Self {
        match (environment, temperature) {
            (EnvironmentType::Indoor, Some(t)) if t < 15.0 => Self::ColdIndoor,
            (EnvironmentType::Indoor, Some(t)) if t > 30.0 => Self::HotIndoor,
            (EnvironmentType::Outdoor, Some(t)) if t < 0.0 => Self::FreezingOutdoor,
            (EnvironmentType::Outdoor, Some(t)) if t > 35.0 => Self::HotOutdoor,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdIndoor => "Cold_Indoor",
            Self::HotIndoor => "Hot_Indoor",
            Self::FreezingOutdoor => "Freezing_Outdoor",
            Self::HotOutdoor => "Hot_Outdoor",
            Self::Normal => "Normal",
        }
    }
}

/// Age of a reading relative to the run's current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Freshness {
    Recent,
    #[serde(rename = "This_Week")]
    ThisWeek,
    #[serde(rename = "This_Month")]
    ThisMonth,
    Historical,
    Unknown,
}

impl Freshness {
    /// Readings stamped after `now` count as recent.
    pub fn classify(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(ts) = timestamp else {
            return Self::Unknown;
        };
        let age = now.signed_duration_since(ts);
        if age <= chrono::Duration::days(1) {
            Self::Recent
        } else if age <= chrono::Duration::days(7) {
            Self::ThisWeek
        } else if age <= chrono::Duration::days(30) {
            Self::ThisMonth
        } else {
            Self::Historical
        }
    }
}

/// A scored reading with its derived dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReading {
    #[serde(flatten)]
    pub scored: ScoredReading,
    pub temperature_bucket: TemperatureBucket,
    pub time_parts: Option<TimeParts>,
    pub environment_condition: EnvironmentCondition,
    pub freshness: Freshness,
}

impl EnrichedReading {
    pub fn is_valid(&self) -> bool {
        self.scored.is_valid()
    }

    pub fn is_anomaly(&self) -> bool {
        self.scored.is_anomaly
    }
}

pub fn enrich(scored: ScoredReading, now: DateTime<Utc>) -> EnrichedReading {
    let reading = &scored.validated.reading;
    let temperature = reading.temperature;
    let timestamp = reading.reading_timestamp;

    EnrichedReading {
        temperature_bucket: TemperatureBucket::classify(temperature),
        time_parts: timestamp.map(TimeParts::from_timestamp),
        environment_condition: EnvironmentCondition::classify(
            scored.validated.environment_type,
            temperature,
        ),
        freshness: Freshness::classify(timestamp, now),
        scored,
    }
}

pub fn enrich_all(scored: Vec<ScoredReading>, now: DateTime<Utc>) -> Vec<EnrichedReading> {
    scored.into_iter().map(|s| enrich(s, now)).collect()
}
