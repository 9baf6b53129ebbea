//! Timestamp utilities
//!
//! All qdet timestamps are UTC. Durations that take part in sample
//! arithmetic (gaps, lags, pick offsets) are plain `f64` seconds; this
//! module provides the conversions between the two representations and the
//! `TimeWindow` type used throughout the detection pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Shift a timestamp by a (possibly negative) number of seconds.
///
/// The offset is rounded to whole nanoseconds, which is well below the
/// sample period of any stream the detector handles.
pub fn add_seconds(t: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    t + Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Signed difference `end - start` in seconds.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end.signed_duration_since(start);
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        // Only reachable for spans beyond ~292 years
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window from explicit bounds. `end` must not precede `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> crate::Result<Self> {
        if end < start {
            return Err(crate::Error::InvalidTimeWindow(format!(
                "end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Window starting at `start` and extending `length_seconds` forward.
    pub fn from_start(start: DateTime<Utc>, length_seconds: f64) -> crate::Result<Self> {
        Self::new(start, add_seconds(start, length_seconds))
    }

    pub fn length_seconds(&self) -> f64 {
        seconds_between(self.start, self.end)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Window grown by `seconds` on both sides.
    pub fn padded(&self, seconds: f64) -> TimeWindow {
        TimeWindow {
            start: add_seconds(self.start, -seconds),
            end: add_seconds(self.end, seconds),
        }
    }
}
