//! Waveform resampling using rubato
//!
//! Template waveforms are prepared at a configured target frequency and
//! lazily re-resampled to the live stream rate; both paths go through this
//! module. Resampling preserves the trace start time.

use crate::error::{Error, Result};
use qdet_common::Record;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Resample a sample run from `source_frequency` to `target_frequency`.
///
/// Returns a copy when the rates already agree.
pub fn resample_samples(
    samples: &[f64],
    source_frequency: f64,
    target_frequency: f64,
) -> Result<Vec<f64>> {
    if !(target_frequency > 0.0) {
        return Err(Error::Processing(format!(
            "target frequency {target_frequency} must be positive"
        )));
    }

    if (source_frequency - target_frequency).abs() < 1e-9 * source_frequency {
        return Ok(samples.to_vec());
    }

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    debug!(
        "Resampling {} samples from {}Hz to {}Hz",
        samples.len(),
        source_frequency,
        target_frequency
    );

    let mut resampler = FastFixedIn::<f64>::new(
        target_frequency / source_frequency,
        1.0, // fixed ratio, no runtime changes
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| Error::Processing(format!("Failed to create resampler: {e}")))?;

    let planar = vec![samples.to_vec()];
    let mut output = resampler
        .process(&planar, None)
        .map_err(|e| Error::Processing(format!("Resampling failed: {e}")))?;

    Ok(output.remove(0))
}

/// Resample a record to `target_frequency`, keeping its start time.
pub fn resample_record(record: Record, target_frequency: f64) -> Result<Record> {
    if (record.sampling_frequency - target_frequency).abs() < 1e-9 * record.sampling_frequency {
        return Ok(record);
    }

    let samples = resample_samples(&record.samples, record.sampling_frequency, target_frequency)?;
    Ok(Record {
        stream_id: record.stream_id,
        start_time: record.start_time,
        sampling_frequency: target_frequency,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_a_copy() {
        let samples = vec![1.0, 2.0, 3.0];
        let out = resample_samples(&samples, 100.0, 100.0).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_downsample_halves_length() {
        let samples: Vec<f64> = (0..1000)
            .map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 / 100.0).sin())
            .collect();
        let out = resample_samples(&samples, 100.0, 50.0).unwrap();
        // Fixed-ratio polynomial resampling: length within a few samples
        assert!((out.len() as i64 - 500).unsigned_abs() < 10, "got {}", out.len());
    }

    #[test]
    fn test_rejects_non_positive_target() {
        assert!(resample_samples(&[0.0; 16], 100.0, 0.0).is_err());
    }

    #[test]
    fn test_record_resample_keeps_start_time() {
        let record = Record::new(
            "CH.TEST..HHZ".parse().unwrap(),
            "2020-10-25T19:30:00Z".parse().unwrap(),
            200.0,
            (0..400).map(|i| (i as f64 * 0.1).sin()).collect(),
        )
        .unwrap();
        let start = record.start_time;
        let out = resample_record(record, 100.0).unwrap();
        assert_eq!(out.start_time, start);
        assert_eq!(out.sampling_frequency, 100.0);
    }
}
