//! Amplitude estimation for published detections
//!
//! Once a detection is published, the amplitude estimator measures the
//! participating arrivals' waveforms. The RMS implementation fetches each
//! arrival's window through the waveform provider, demeans it, and reports
//! the root-mean-square amplitude in the configured signal unit.

use crate::error::Result;
use crate::waveform::{ProcessingConfig, WaveformProvider};
use qdet_common::model::{AmplitudeMeasurement, SignalUnit};
use qdet_common::time::add_seconds;
use qdet_common::{Detection, TimeWindow};
use std::sync::Arc;
use tracing::warn;

/// Post-detection amplitude estimator
pub trait AmplitudeEstimator: Send + Sync {
    /// Compute zero or more amplitude measurements for `detection`.
    fn estimate(&self, detection: &Detection) -> Result<Vec<AmplitudeMeasurement>>;
}

/// RMS amplitude over each participating arrival's window
pub struct RmsAmplitude {
    provider: Arc<dyn WaveformProvider>,
    unit: SignalUnit,
    window_seconds: f64,
}

impl RmsAmplitude {
    pub fn new(provider: Arc<dyn WaveformProvider>, unit: SignalUnit, window_seconds: f64) -> Self {
        Self {
            provider,
            unit,
            window_seconds,
        }
    }
}

impl AmplitudeEstimator for RmsAmplitude {
    fn estimate(&self, detection: &Detection) -> Result<Vec<AmplitudeMeasurement>> {
        let processing = ProcessingConfig {
            demean: true,
            ..Default::default()
        };

        let mut measurements = Vec::new();
        for template_match in detection.template_matches.values() {
            let pick = &template_match.arrival.pick;
            let window = TimeWindow {
                start: pick.time,
                end: add_seconds(pick.time, self.window_seconds),
            };

            let trace = match self.provider.get(&pick.stream_id, &window, &processing) {
                Ok(trace) => trace,
                Err(e) => {
                    // A missing amplitude window must not invalidate the
                    // detection; skip the channel.
                    warn!("{}: amplitude window unavailable: {}", pick.stream_id, e);
                    continue;
                }
            };
            if trace.is_empty() {
                continue;
            }

            let mean_square =
                trace.samples.iter().map(|x| x * x).sum::<f64>() / trace.samples.len() as f64;

            measurements.push(AmplitudeMeasurement {
                stream_id: pick.stream_id.clone(),
                window,
                value: mean_square.sqrt(),
                unit: self.unit,
            });
        }

        Ok(measurements)
    }
}
