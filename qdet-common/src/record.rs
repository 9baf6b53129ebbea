//! Record sample frames
//!
//! A `Record` is one contiguous run of equally spaced samples from a single
//! stream. Record sources deliver them in non-decreasing end-time order per
//! stream; the detector consumes them one at a time.
//!
//! Invariants:
//! - `sampling_frequency > 0`
//! - `end_time = start_time + samples.len() / sampling_frequency`, so
//!   `samples.len() == round((end - start) * frequency)` by construction.

use crate::error::{Error, Result};
use crate::stream::StreamId;
use crate::time::{add_seconds, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One contiguous run of samples from a single stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub stream_id: StreamId,
    pub start_time: DateTime<Utc>,
    pub sampling_frequency: f64,
    pub samples: Vec<f64>,
}

impl Record {
    /// Create a record, validating the sampling frequency.
    pub fn new(
        stream_id: StreamId,
        start_time: DateTime<Utc>,
        sampling_frequency: f64,
        samples: Vec<f64>,
    ) -> Result<Self> {
        if !(sampling_frequency > 0.0) || !sampling_frequency.is_finite() {
            return Err(Error::InvalidRecord(format!(
                "{}: sampling frequency {} must be positive",
                stream_id, sampling_frequency
            )));
        }

        Ok(Self {
            stream_id,
            start_time,
            sampling_frequency,
            samples,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample period in seconds.
    pub fn period(&self) -> f64 {
        1.0 / self.sampling_frequency
    }

    /// End time, one sample period past the last sample.
    pub fn end_time(&self) -> DateTime<Utc> {
        add_seconds(
            self.start_time,
            self.samples.len() as f64 / self.sampling_frequency,
        )
    }

    /// Time of the sample at `index` (which need not be in range).
    pub fn sample_time(&self, index: usize) -> DateTime<Utc> {
        add_seconds(self.start_time, index as f64 / self.sampling_frequency)
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time(),
        }
    }
}
