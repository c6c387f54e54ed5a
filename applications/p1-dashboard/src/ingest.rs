use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A normalized sample as it is kept in memory and on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Ingestion time in ms since epoch; primary key of the sample log.
    pub timestamp: i64,
    pub sample: Sample,
    /// Gas consumed since the previous distinct gas report. Fixed at ingestion.
    pub gas_delta: Option<f64>,
}

/// Tracks the last distinct gas report to derive per-report consumption.
#[derive(Debug, Clone, Default)]
pub struct GasTracker {
    last_timestamp: Option<String>,
    last_value: Option<f64>,
}

impl GasTracker {
    /// Returns the delta when `sample` carries a gas timestamp not seen before.
    /// The very first report yields `0.0`.
    pub fn observe(&mut self, sample: &Sample) -> Option<f64> {
        let ts = sample.gas_timestamp.as_ref()?;
        if self.last_timestamp.as_ref() == Some(ts) {
            return None;
        }
        self.last_timestamp = Some(ts.clone());
        let previous = self.last_value.unwrap_or(sample.total_gas_m3);
        self.last_value = Some(sample.total_gas_m3);
        Some(sample.total_gas_m3 - previous)
    }

    /// Resume from a previously stored reading without emitting a delta for it.
    pub fn seed(&mut self, sample: &Sample) {
        if let Some(ts) = &sample.gas_timestamp {
            self.last_timestamp = Some(ts.clone());
            self.last_value = Some(sample.total_gas_m3);
        }
    }
}

/// Wall-clock milliseconds forced to be strictly increasing.
#[derive(Debug, Clone, Default)]
pub struct MonotonicClock {
    last: Option<i64>,
}

impl MonotonicClock {
    pub fn next(&mut self, wall_ms: i64) -> i64 {
        let ts = match self.last {
            Some(last) if wall_ms <= last => last + 1,
            _ => wall_ms,
        };
        self.last = Some(ts);
        ts
    }
}

/// Turns raw device payloads into [`StoredSample`]s.
#[derive(Debug, Clone, Default)]
pub struct Ingestor {
    clock: MonotonicClock,
    gas: GasTracker,
}

impl Ingestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_gas(&mut self, sample: &Sample) {
        self.gas.seed(sample);
    }

    pub fn ingest(&mut self, raw: &Value, wall_ms: i64) -> StoredSample {
        let sample = Sample::normalize(raw);
        let timestamp = self.clock.next(wall_ms);
        let gas_delta = self.gas.observe(&sample);
        if let Some(delta) = gas_delta {
            debug!(timestamp, delta, "new gas report");
        }
        StoredSample {
            timestamp,
            sample,
            gas_delta,
        }
    }
}
