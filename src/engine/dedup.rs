//! Deduplication: one reading per (device_id, reading_timestamp).
//!
//! Among readings sharing a key, the highest arrival ordinal wins. The choice
//! depends only on the input set, never on its order: ties on the ordinal
//! (which should not occur within a batch) fall back to the load batch id and
//! then to the temperature bits, so the winner is still unique.

use crate::engine::reading::{Reading, ReadingKey};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Outcome of one deduplication pass.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Surviving readings, ordered by key then ordinal.
    pub readings: Vec<Reading>,
    /// Number of readings collapsed away.
    pub duplicates_dropped: usize,
}

fn recency(a: &Reading, b: &Reading) -> Ordering {
    a.arrival_ordinal
        .cmp(&b.arrival_ordinal)
        .then_with(|| a.load_batch_id.cmp(&b.load_batch_id))
        .then_with(|| {
            let ta = a.temperature.map(f64::to_bits);
            let tb = b.temperature.map(f64::to_bits);
            ta.cmp(&tb)
        })
        .then_with(|| a.location.cmp(&b.location))
}

/// Collapse repeated observations, keeping the most recently ingested one.
pub fn deduplicate(readings: Vec<Reading>) -> DedupOutcome {
    let input_len = readings.len();
    let mut best: HashMap<ReadingKey, Reading> = HashMap::with_capacity(input_len);

    for reading in readings {
        let key = reading.key();
        match best.get_mut(&key) {
            Some(current) => {
                if recency(&reading, current) == Ordering::Greater {
                    *current = reading;
                }
            }
            None => {
                best.insert(key, reading);
            }
        }
    }

    let mut survivors: Vec<Reading> = best.into_values().collect();
    survivors.sort_by(|a, b| {
        a.key()
            .cmp(&b.key())
            .then_with(|| a.arrival_ordinal.cmp(&b.arrival_ordinal))
    });

    DedupOutcome {
        duplicates_dropped: input_len - survivors.len(),
        readings: survivors,
    }
}
