//! Detection output values and detector event bus types

use crate::model::{AmplitudeMeasurement, Arrival};
use crate::stream::StreamId;
use crate::time::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-template contribution to a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub processor_id: String,
    /// Arrival with the pick time recomputed from the match
    pub arrival: Arrival,
    /// Normalized cross-correlation coefficient in [-1, 1]
    pub coefficient: f64,
    /// Offset of the peak within the match window, in seconds
    pub lag_seconds: f64,
    /// Time span the match covers on the stream
    pub window: TimeWindow,
    /// Canonical fingerprint of the matched template waveform
    pub template_fingerprint: u64,
}

/// A published multi-channel detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub detection_id: Uuid,
    pub detector_id: String,

    /// Mean of the participating correlation coefficients
    pub fit: f64,

    /// Origin time of the detected repeat
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,

    pub stations_associated: usize,
    pub stations_used: usize,
    pub channels_associated: usize,
    pub channels_used: usize,

    /// Per-template results keyed by processor id
    pub template_matches: HashMap<String, TemplateMatch>,

    /// Participating arrivals, when requested in the detector config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrivals: Option<Vec<Arrival>>,

    /// Amplitudes computed after publication, when enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amplitudes: Vec<AmplitudeMeasurement>,
}

/// Events emitted on the detector event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DetectorEvent {
    /// A detection passed all thresholds and was handed to the sink
    DetectionPublished {
        detector_id: String,
        detection: Detection,
        timestamp: DateTime<Utc>,
    },

    /// All template processors of a detector buffered a full window
    DetectorReady {
        detector_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A channel's stream state was discarded (gap, frequency change, ...)
    StreamReset {
        detector_id: String,
        stream_id: StreamId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Detector terminated and flushed its pending events
    DetectorTerminated {
        detector_id: String,
        timestamp: DateTime<Utc>,
    },
}
