//! Waveform provider contract and trace preparation
//!
//! A waveform provider hands out prepared traces for a stream and time
//! window. Preparation applies, in order: demean → resample → filter →
//! trim. Callers request a window padded by a filter margin so the trim
//! discards the filter transients.

pub mod filter;
pub mod provider;
pub mod resample;

pub use provider::{CachingWaveformProvider, DirectoryWaveformProvider};

use crate::error::{Error, Result};
use qdet_common::time::seconds_between;
use qdet_common::{Record, StreamId, TimeWindow};

use self::filter::FilterSpec;

/// Trace preparation parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessingConfig {
    /// Filter string, e.g. `BW_HP(2,1.5)`; unfiltered when absent
    pub filter: Option<String>,
    /// Margin fetched on both sides of the window to absorb transients
    pub filter_margin_seconds: f64,
    /// Resampling target; native rate when absent
    pub target_frequency: Option<f64>,
    /// Subtract the trace mean before anything else
    pub demean: bool,
}

impl ProcessingConfig {
    /// Stable cache-key fragment describing this configuration.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.filter.as_deref().unwrap_or(""),
            self.filter_margin_seconds,
            self.target_frequency.map(|f| f.to_string()).unwrap_or_default(),
            self.demean,
        )
    }
}

/// Source of prepared waveform traces
pub trait WaveformProvider: Send + Sync {
    /// Fetch the samples of `stream_id` covering `window`, processed
    /// according to `config` and trimmed to exactly `window`.
    fn get(
        &self,
        stream_id: &StreamId,
        window: &TimeWindow,
        config: &ProcessingConfig,
    ) -> Result<Record>;
}

/// Subtract the arithmetic mean in place.
pub fn demean(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    for sample in samples {
        *sample -= mean;
    }
}

/// Cut a record down to `window`.
///
/// Fails with `NoData` when the record does not fully cover the window.
pub fn trim(record: Record, window: &TimeWindow) -> Result<Record> {
    let freq = record.sampling_frequency;
    let offset = (seconds_between(record.start_time, window.start) * freq).round() as i64;
    let count = (window.length_seconds() * freq).round() as i64;

    if offset < 0 {
        return Err(Error::NoData(format!(
            "{}: need {} more samples before {}",
            record.stream_id, -offset, record.start_time
        )));
    }
    if offset + count > record.samples.len() as i64 {
        return Err(Error::NoData(format!(
            "{}: need {} more samples past {}",
            record.stream_id,
            offset + count - record.samples.len() as i64,
            record.end_time()
        )));
    }

    let start = record.sample_time(offset as usize);
    let samples = record.samples[offset as usize..(offset + count) as usize].to_vec();
    Record::new(record.stream_id, start, freq, samples).map_err(Error::from)
}

/// Apply the full preparation pipeline and trim to `window`.
pub fn prepare(mut record: Record, window: &TimeWindow, config: &ProcessingConfig) -> Result<Record> {
    if config.demean {
        demean(&mut record.samples);
    }

    if let Some(target) = config.target_frequency {
        record = resample::resample_record(record, target)?;
    }

    if let Some(filter) = &config.filter {
        let mut chain = FilterSpec::parse(filter)?.build(record.sampling_frequency)?;
        chain.apply_slice(&mut record.samples);
    }

    trim(record, window)
}
