//! Detector configuration
//!
//! Two layers of configuration, separating the application surface from
//! the catalog data:
//!
//! - The **application config** is a small TOML file naming the input and
//!   output paths (template catalog, template waveform directory, record
//!   replay file, detection sink, optional debug directory, optional
//!   amplitude computation).
//! - The **detector catalog** is a JSON file with one entry per detector:
//!   the reference origin, detector-scope thresholds and one
//!   template/stream binding per channel.
//!
//! All thresholds are validated at load time; invalid configuration aborts
//! detector construction.

use crate::error::{Error, Result};
use crate::waveform::filter::FilterSpec;
use chrono::{DateTime, Utc};
use qdet_common::model::{validate_phase, Origin, SignalUnit};
use qdet_common::StreamId;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Smallest meaningful arrival-offset threshold in seconds.
///
/// Below this the pairwise offset comparison is dominated by floating-point
/// noise of the pick arithmetic.
pub const MIN_ARRIVAL_OFFSET_THRESHOLD: f64 = 2.0e-6;

/// Application configuration (TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// JSON detector catalog
    pub templates: PathBuf,
    /// Directory of template waveform traces (one JSON record per stream)
    pub waveform_dir: PathBuf,
    /// JSON-lines record replay file
    pub records: PathBuf,
    /// Detections sink path; stdout when absent
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// When set, per-channel match coefficient series are recorded here
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
    /// Amplitude computation for published detections
    #[serde(default)]
    pub amplitudes: Option<AmplitudeConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Amplitude estimation options
#[derive(Debug, Clone, Deserialize)]
pub struct AmplitudeConfig {
    /// Physical unit the input traces are calibrated to
    #[serde(default = "default_signal_unit")]
    pub unit: SignalUnit,
    /// Measurement window length in seconds, starting at each pick
    #[serde(default = "default_amplitude_window")]
    pub window_seconds: f64,
}

fn default_signal_unit() -> SignalUnit {
    SignalUnit::MeterPerSecond
}

fn default_amplitude_window() -> f64 {
    4.0
}

/// Configuration of a single detector (one reference origin)
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub detector_id: String,
    pub origin: Origin,

    /// Maximal gap length to be tolerated, in seconds
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance: f64,

    /// Linear interpolation of missing samples within the gap tolerance
    #[serde(default = "default_true")]
    pub gap_interpolation: bool,

    /// Pairwise arrival-offset tolerance in seconds; negative disables
    #[serde(default = "default_arrival_offset_threshold")]
    pub arrival_offset_threshold: f64,

    /// Minimal fit a detection must reach to be published
    #[serde(default)]
    pub result_threshold: Option<f64>,

    /// Minimal number of arrivals per detection; all registered when absent
    #[serde(default)]
    pub min_arrivals: Option<usize>,

    /// Grace window in seconds during which late channels may join an event
    #[serde(default)]
    pub on_hold: f64,

    /// Append the participating arrivals to published detections
    #[serde(default)]
    pub with_arrivals: bool,

    pub streams: Vec<TemplateStreamConfig>,
}

/// One template/stream binding of a detector
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateStreamConfig {
    pub template_id: String,
    pub stream_id: StreamId,

    /// Cross-correlation trigger threshold
    #[serde(default = "default_xcorr_threshold")]
    pub xcorr_threshold: f64,

    /// Filter string, e.g. `BW_HP(2,1.5)` or `BW(3,1.5,8)`
    #[serde(default)]
    pub filter: Option<String>,

    /// Template preparation sampling frequency; native rate when absent
    #[serde(default)]
    pub target_frequency: Option<f64>,

    #[serde(default = "default_phase")]
    pub phase: String,

    /// Reference pick time of the template
    pub template_pick: DateTime<Utc>,

    /// Template window start relative to the pick, in seconds
    #[serde(default = "default_waveform_start")]
    pub waveform_start: f64,

    /// Template window end relative to the pick, in seconds
    #[serde(default = "default_waveform_end")]
    pub waveform_end: f64,

    /// Extra data fetched on both sides to absorb filter transients
    #[serde(default = "default_filter_margin")]
    pub filter_margin: f64,
}

fn default_gap_tolerance() -> f64 {
    4.5
}

fn default_true() -> bool {
    true
}

fn default_arrival_offset_threshold() -> f64 {
    MIN_ARRIVAL_OFFSET_THRESHOLD
}

fn default_xcorr_threshold() -> f64 {
    0.7
}

fn default_phase() -> String {
    "P".to_string()
}

fn default_waveform_start() -> f64 {
    -2.0
}

fn default_waveform_end() -> f64 {
    2.0
}

fn default_filter_margin() -> f64 {
    10.0
}

/// Load and validate the detector catalog.
pub fn load_detector_configs(path: &Path) -> Result<Vec<DetectorConfig>> {
    let content = std::fs::read_to_string(path)?;
    let configs: Vec<DetectorConfig> = serde_json::from_str(&content)?;

    for config in &configs {
        config.validate()?;
    }

    Ok(configs)
}

impl DetectorConfig {
    /// Arrival-offset threshold with the negative-disables convention folded
    /// into an explicit optional.
    pub fn arrival_offset(&self) -> Option<f64> {
        if self.arrival_offset_threshold < 0.0 {
            None
        } else {
            Some(self.arrival_offset_threshold)
        }
    }

    /// Validate all detector-scope and per-template thresholds.
    pub fn validate(&self) -> Result<()> {
        let id = &self.detector_id;

        if id.is_empty() {
            return Err(Error::Config("detector_id must not be empty".into()));
        }

        if self.streams.is_empty() {
            return Err(Error::Config(format!("{id}: no template streams configured")));
        }

        if !(self.gap_tolerance > 0.0) {
            return Err(Error::Config(format!(
                "{id}: gap_tolerance {} must be positive",
                self.gap_tolerance
            )));
        }

        if !validate_arrival_offset_threshold(self.arrival_offset_threshold) {
            return Err(Error::Config(format!(
                "{id}: arrival_offset_threshold {} must be negative (disabled) or >= {}",
                self.arrival_offset_threshold, MIN_ARRIVAL_OFFSET_THRESHOLD
            )));
        }

        if let Some(threshold) = self.result_threshold {
            if !validate_xcorr_threshold(threshold) {
                return Err(Error::Config(format!(
                    "{id}: result_threshold {threshold} must be in [-1, 1]"
                )));
            }
        }

        if let Some(n) = self.min_arrivals {
            if n < 1 || n > self.streams.len() {
                return Err(Error::Config(format!(
                    "{id}: min_arrivals {n} must be in [1, {}]",
                    self.streams.len()
                )));
            }
        }

        if self.on_hold < 0.0 {
            return Err(Error::Config(format!(
                "{id}: on_hold {} must be non-negative",
                self.on_hold
            )));
        }

        let mut template_ids = HashMap::new();
        let mut channel_processing: HashMap<&StreamId, (&Option<String>, &Option<f64>)> =
            HashMap::new();

        for stream in &self.streams {
            stream.validate(id)?;

            if let Some(previous) = template_ids.insert(&stream.template_id, &stream.stream_id) {
                return Err(Error::Config(format!(
                    "{id}: duplicate template id '{}' (bound to {} and {})",
                    stream.template_id, previous, stream.stream_id
                )));
            }

            // Templates sharing a channel must agree on the channel
            // processing, since the stream state applies a single filter.
            let processing = (&stream.filter, &stream.target_frequency);
            if let Some(existing) = channel_processing.insert(&stream.stream_id, processing) {
                if existing != processing {
                    return Err(Error::Config(format!(
                        "{id}: templates on {} disagree on filter/target_frequency",
                        stream.stream_id
                    )));
                }
            }
        }

        Ok(())
    }
}

impl TemplateStreamConfig {
    fn validate(&self, detector_id: &str) -> Result<()> {
        if self.template_id.is_empty() {
            return Err(Error::Config(format!(
                "{detector_id}: template_id must not be empty"
            )));
        }

        if !validate_xcorr_threshold(self.xcorr_threshold) {
            return Err(Error::Config(format!(
                "{detector_id}/{}: xcorr_threshold {} must be in [-1, 1]",
                self.template_id, self.xcorr_threshold
            )));
        }

        validate_phase(&self.phase).map_err(|_| {
            Error::Config(format!(
                "{detector_id}/{}: unknown phase '{}'",
                self.template_id, self.phase
            ))
        })?;

        if self.waveform_end <= self.waveform_start {
            return Err(Error::Config(format!(
                "{detector_id}/{}: waveform window [{}, {}] is empty",
                self.template_id, self.waveform_start, self.waveform_end
            )));
        }

        if self.filter_margin < 0.0 {
            return Err(Error::Config(format!(
                "{detector_id}/{}: filter_margin {} must be non-negative",
                self.template_id, self.filter_margin
            )));
        }

        if let Some(freq) = self.target_frequency {
            if !(freq > 0.0) {
                return Err(Error::Config(format!(
                    "{detector_id}/{}: target_frequency {freq} must be positive",
                    self.template_id
                )));
            }
        }

        if let Some(filter) = &self.filter {
            FilterSpec::parse(filter).map_err(|e| {
                Error::Config(format!(
                    "{detector_id}/{}: invalid filter '{filter}': {e}",
                    self.template_id
                ))
            })?;
        }

        Ok(())
    }
}

/// True when `threshold` is a valid cross-correlation threshold.
pub fn validate_xcorr_threshold(threshold: f64) -> bool {
    (-1.0..=1.0).contains(&threshold)
}

/// True when `threshold` is negative (disabled) or large enough to be
/// meaningful.
pub fn validate_arrival_offset_threshold(threshold: f64) -> bool {
    threshold < 0.0 || threshold >= MIN_ARRIVAL_OFFSET_THRESHOLD
}
