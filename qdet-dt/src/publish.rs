//! Detection post-processing and hand-off
//!
//! Bridges the detector output to the configured sink: logs the detection,
//! optionally attaches amplitude measurements, and forwards the final value
//! to the sink. Sink and amplitude failures are logged and never propagate
//! back into the detector.

use crate::amplitude::AmplitudeEstimator;
use crate::sink::ResultSink;
use qdet_common::Detection;
use tracing::{info, warn};

/// Formats, enriches and forwards published detections
pub struct DetectionPublisher {
    sink: Box<dyn ResultSink>,
    amplitude_estimator: Option<Box<dyn AmplitudeEstimator>>,
}

impl DetectionPublisher {
    pub fn new(sink: Box<dyn ResultSink>) -> Self {
        Self {
            sink,
            amplitude_estimator: None,
        }
    }

    pub fn with_amplitudes(mut self, estimator: Box<dyn AmplitudeEstimator>) -> Self {
        self.amplitude_estimator = Some(estimator);
        self
    }

    /// Publish one detection, returning the (possibly enriched) value.
    pub fn publish(&mut self, mut detection: Detection) -> Detection {
        if let Some(estimator) = &self.amplitude_estimator {
            match estimator.estimate(&detection) {
                Ok(amplitudes) => detection.amplitudes = amplitudes,
                Err(e) => warn!(
                    "{}: amplitude estimation failed: {}",
                    detection.detector_id, e
                ),
            }
        }

        info!(
            "{}: publishing detection {} (fit={:.4}, channels {}/{}, stations {}/{})",
            detection.detector_id,
            detection.detection_id,
            detection.fit,
            detection.channels_used,
            detection.channels_associated,
            detection.stations_used,
            detection.stations_associated,
        );

        if let Err(e) = self.sink.publish(&detection) {
            warn!("{}: result sink failure: {}", detection.detector_id, e);
        }

        detection
    }
}
