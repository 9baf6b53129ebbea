//! Per-channel stream state and gap handling
//!
//! Each channel of a detector keeps track of record continuity. For every
//! incoming record the gap against the previous record's end time decides
//! how the samples reach the template processors:
//!
//! - `gap <= 0.5 * period` — contiguous, pass through.
//! - `0.5 * period < gap <= tolerance` and interpolation enabled —
//!   synthesize `round(gap * freq) - 1` linearly interpolated samples
//!   between the last seen and the first new sample, then pass through.
//! - anything else — the channel's DSP state is discarded and the stream
//!   starts fresh from this record.
//!
//! The channel filter is created lazily from the first record's sampling
//! frequency and runs across record boundaries, so gap fills flow through
//! it like real samples.

use crate::error::Result;
use crate::waveform::filter::{FilterChain, FilterSpec};
use qdet_common::time::seconds_between;
use qdet_common::{Record, StreamId};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Gap handling configuration
#[derive(Debug, Clone, Copy)]
pub struct GapConfig {
    /// Maximal gap length to be tolerated, in seconds
    pub tolerance_seconds: f64,
    /// Linear interpolation of missing samples within the tolerance
    pub interpolation: bool,
}

/// Why a stream was restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// First record of the stream
    Initial,
    /// Gap beyond the configured tolerance
    GapBeyondTolerance,
    /// Gap within tolerance but interpolation is disabled
    GapNotInterpolatable,
    /// Record overlaps the previous one by more than half a period
    Overlap,
    /// Sampling frequency changed mid-stream
    FrequencyChange,
}

impl ResetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetReason::Initial => "initial record",
            ResetReason::GapBeyondTolerance => "gap beyond tolerance",
            ResetReason::GapNotInterpolatable => "gap without interpolation",
            ResetReason::Overlap => "overlapping record",
            ResetReason::FrequencyChange => "sampling frequency change",
        }
    }
}

/// Prepared samples of one record, ready for the template processors
#[derive(Debug)]
pub struct PreparedFeed {
    /// The stream restarted; processors must re-anchor at `anchor`
    pub reset: Option<ResetReason>,
    /// Start time of the underlying record; the re-anchor point when
    /// `reset` is set
    pub anchor: DateTime<Utc>,
    pub sampling_frequency: f64,
    /// Gap-filled, filtered samples
    pub samples: Vec<f64>,
    /// Number of interpolated samples at the front of `samples`
    pub interpolated: usize,
}

/// Continuity state of a single channel
pub struct StreamState {
    stream_id: StreamId,
    filter_spec: Option<FilterSpec>,
    filter: Option<FilterChain>,
    sampling_frequency: Option<f64>,
    last_end_time: Option<DateTime<Utc>>,
    last_sample: f64,
    config: GapConfig,
    frequency_warned: bool,
}

impl StreamState {
    pub fn new(stream_id: StreamId, filter_spec: Option<FilterSpec>, config: GapConfig) -> Self {
        Self {
            stream_id,
            filter_spec,
            filter: None,
            sampling_frequency: None,
            last_end_time: None,
            last_sample: 0.0,
            config,
            frequency_warned: false,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    /// Discard all continuity and filter state.
    pub fn reset(&mut self) {
        self.filter = None;
        self.sampling_frequency = None;
        self.last_end_time = None;
        self.last_sample = 0.0;
    }

    /// Ingest one record.
    ///
    /// Returns `None` when the record is unusable (empty, or out of order).
    pub fn feed(&mut self, record: &Record) -> Result<Option<PreparedFeed>> {
        if record.is_empty() {
            debug!("{}: ignoring empty record", self.stream_id);
            return Ok(None);
        }

        let freq = record.sampling_frequency;

        let outcome = match (self.sampling_frequency, self.last_end_time) {
            (None, _) | (_, None) => self.restart(record, ResetReason::Initial)?,
            (Some(current), Some(last_end)) => {
                if (current - freq).abs() > current * 1e-9 {
                    if !self.frequency_warned {
                        warn!(
                            "{}: sampling frequency changed from {} to {}, restarting stream",
                            self.stream_id, current, freq
                        );
                        self.frequency_warned = true;
                    }
                    self.restart(record, ResetReason::FrequencyChange)?
                } else if record.end_time() <= last_end {
                    warn!(
                        "{}: dropping out-of-order record ending {}",
                        self.stream_id,
                        record.end_time()
                    );
                    return Ok(None);
                } else {
                    let gap = seconds_between(last_end, record.start_time);
                    let period = record.period();

                    if gap < -0.5 * period {
                        self.restart(record, ResetReason::Overlap)?
                    } else if gap <= 0.5 * period {
                        self.contiguous(record, 0)
                    } else if gap <= self.config.tolerance_seconds {
                        if self.config.interpolation {
                            self.fill_gap(record, gap)
                        } else {
                            self.restart(record, ResetReason::GapNotInterpolatable)?
                        }
                    } else {
                        self.restart(record, ResetReason::GapBeyondTolerance)?
                    }
                }
            }
        };

        self.last_end_time = Some(record.end_time());
        self.last_sample = *record.samples.last().expect("record is non-empty");

        Ok(Some(outcome))
    }

    fn restart(&mut self, record: &Record, reason: ResetReason) -> Result<PreparedFeed> {
        if reason != ResetReason::Initial {
            debug!("{}: stream restart ({})", self.stream_id, reason.as_str());
        }

        self.sampling_frequency = Some(record.sampling_frequency);
        self.filter = match &self.filter_spec {
            Some(spec) => Some(spec.build(record.sampling_frequency)?),
            None => None,
        };

        let mut samples = record.samples.clone();
        self.apply_filter(&mut samples);

        Ok(PreparedFeed {
            reset: Some(reason),
            anchor: record.start_time,
            sampling_frequency: record.sampling_frequency,
            samples,
            interpolated: 0,
        })
    }

    fn contiguous(&mut self, record: &Record, interpolated: usize) -> PreparedFeed {
        let mut samples = record.samples.clone();
        self.apply_filter(&mut samples);

        PreparedFeed {
            reset: None,
            anchor: record.start_time,
            sampling_frequency: record.sampling_frequency,
            samples,
            interpolated,
        }
    }

    fn fill_gap(&mut self, record: &Record, gap: f64) -> PreparedFeed {
        let freq = record.sampling_frequency;
        let missing = ((gap * freq).round() as i64 - 1).max(0) as usize;
        if missing == 0 {
            return self.contiguous(record, 0);
        }

        debug!(
            "{}: interpolating {} missing samples across {:.3}s gap",
            self.stream_id, missing, gap
        );

        let first_new = record.samples[0];
        let step = (first_new - self.last_sample) / (missing + 1) as f64;

        let mut samples = Vec::with_capacity(missing + record.samples.len());
        for k in 1..=missing {
            samples.push(self.last_sample + step * k as f64);
        }
        samples.extend_from_slice(&record.samples);
        self.apply_filter(&mut samples);

        PreparedFeed {
            reset: None,
            anchor: record.start_time,
            sampling_frequency: freq,
            samples,
            interpolated: missing,
        }
    }

    fn apply_filter(&mut self, samples: &mut [f64]) {
        if let Some(chain) = &mut self.filter {
            chain.apply_slice(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdet_common::time::add_seconds;

    fn stream() -> StreamId {
        "CH.TEST..HHZ".parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        "2020-10-25T19:30:00Z".parse().unwrap()
    }

    fn record(start: DateTime<Utc>, samples: Vec<f64>) -> Record {
        Record::new(stream(), start, 100.0, samples).unwrap()
    }

    fn state(tolerance: f64, interpolation: bool) -> StreamState {
        StreamState::new(
            stream(),
            None,
            GapConfig {
                tolerance_seconds: tolerance,
                interpolation,
            },
        )
    }

    #[test]
    fn test_first_record_resets() {
        let mut s = state(1.0, true);
        let feed = s.feed(&record(t0(), vec![1.0; 100])).unwrap().unwrap();
        assert_eq!(feed.reset, Some(ResetReason::Initial));
        assert_eq!(feed.samples.len(), 100);
        assert_eq!(feed.interpolated, 0);
    }

    #[test]
    fn test_contiguous_records() {
        let mut s = state(1.0, true);
        s.feed(&record(t0(), vec![1.0; 100])).unwrap();
        let feed = s
            .feed(&record(add_seconds(t0(), 1.0), vec![2.0; 100]))
            .unwrap()
            .unwrap();
        assert!(feed.reset.is_none());
        assert_eq!(feed.interpolated, 0);
    }

    #[test]
    fn test_gap_within_tolerance_interpolates() {
        // 0.5 s gap in a 100 Hz stream: 49 interpolated samples
        let mut s = state(1.0, true);
        s.feed(&record(t0(), vec![0.0; 100])).unwrap();
        let feed = s
            .feed(&record(add_seconds(t0(), 1.5), vec![1.0; 100]))
            .unwrap()
            .unwrap();
        assert!(feed.reset.is_none());
        assert_eq!(feed.interpolated, 49);
        assert_eq!(feed.samples.len(), 149);
        // Linear ramp from 0.0 towards 1.0
        let step = 1.0 / 50.0;
        assert!((feed.samples[0] - step).abs() < 1e-12);
        assert!((feed.samples[48] - 49.0 * step).abs() < 1e-12);
        assert_eq!(feed.samples[49], 1.0);
    }

    #[test]
    fn test_gap_beyond_tolerance_resets() {
        // 2.0 s gap with 1.0 s tolerance: reset, no interpolation
        let mut s = state(1.0, true);
        s.feed(&record(t0(), vec![0.0; 100])).unwrap();
        let feed = s
            .feed(&record(add_seconds(t0(), 3.0), vec![1.0; 100]))
            .unwrap()
            .unwrap();
        assert_eq!(feed.reset, Some(ResetReason::GapBeyondTolerance));
        assert_eq!(feed.interpolated, 0);
        assert_eq!(feed.samples.len(), 100);
    }

    #[test]
    fn test_gap_without_interpolation_resets() {
        let mut s = state(1.0, false);
        s.feed(&record(t0(), vec![0.0; 100])).unwrap();
        let feed = s
            .feed(&record(add_seconds(t0(), 1.5), vec![1.0; 100]))
            .unwrap()
            .unwrap();
        assert_eq!(feed.reset, Some(ResetReason::GapNotInterpolatable));
    }

    #[test]
    fn test_frequency_change_resets() {
        let mut s = state(1.0, true);
        s.feed(&record(t0(), vec![0.0; 100])).unwrap();
        let changed =
            Record::new(stream(), add_seconds(t0(), 1.0), 50.0, vec![0.0; 50]).unwrap();
        let feed = s.feed(&changed).unwrap().unwrap();
        assert_eq!(feed.reset, Some(ResetReason::FrequencyChange));
        assert_eq!(s.sampling_frequency(), Some(50.0));
    }

    #[test]
    fn test_out_of_order_record_dropped() {
        let mut s = state(1.0, true);
        s.feed(&record(t0(), vec![0.0; 200])).unwrap();
        assert!(s
            .feed(&record(add_seconds(t0(), 0.5), vec![0.0; 50]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_record_ignored() {
        let mut s = state(1.0, true);
        assert!(s.feed(&record(t0(), vec![])).unwrap().is_none());
    }

    #[test]
    fn test_interpolated_count_matches_gap_formula() {
        for gap_s in [0.1, 0.25, 0.5, 0.99] {
            let mut s = state(1.0, true);
            s.feed(&record(t0(), vec![0.0; 100])).unwrap();
            let feed = s
                .feed(&record(add_seconds(t0(), 1.0 + gap_s), vec![0.5; 10]))
                .unwrap()
                .unwrap();
            let expected = ((gap_s * 100.0_f64).round() as usize).saturating_sub(1);
            assert_eq!(feed.interpolated, expected, "gap {gap_s}");
        }
    }
}
