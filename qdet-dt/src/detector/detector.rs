//! Detector façade
//!
//! A detector owns one linker and N template processors for a single
//! reference origin. Incoming records are routed through the per-channel
//! stream state to every processor subscribed to the record's stream;
//! emitted matches go to the linker, and linker results come back out as
//! [`Detection`] values with geographic attributes inherited from the
//! reference origin.
//!
//! Per-record failures are isolated to the offending channel: its stream
//! state is reset, a warning is logged, and the other channels continue.

use crate::config::TemplateStreamConfig;
use crate::detector::linker::{Linker, LinkerResult};
use crate::detector::processor::{TemplateProcessor, TemplateWaveform};
use crate::detector::stream::{GapConfig, ResetReason, StreamState};
use crate::error::{Error, Result};
use crate::waveform::filter::FilterSpec;
use crate::waveform::{ProcessingConfig, WaveformProvider};
use qdet_common::model::{validate_phase, Arrival, Origin};
use qdet_common::time::{add_seconds, now, seconds_between};
use qdet_common::{Detection, DetectorEvent, Record, StreamId, TemplateMatch, TimeWindow};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Detector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DetectorStatus {
    WaitingForData,
    InProgress,
    Terminated,
}

/// Matched-filter detector for one reference origin
pub struct Detector {
    id: String,
    origin: Arc<Origin>,

    stream_states: HashMap<StreamId, StreamState>,
    subscriptions: HashMap<StreamId, Vec<String>>,
    processors: HashMap<String, TemplateProcessor>,
    linker: Linker,

    status: DetectorStatus,
    with_arrivals: bool,
    ready_reported: bool,

    events: Option<broadcast::Sender<DetectorEvent>>,
    debug_dir: Option<PathBuf>,
}

impl Detector {
    pub fn builder(id: impl Into<String>, origin: Origin) -> DetectorBuilder {
        DetectorBuilder::new(id, origin)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn status(&self) -> DetectorStatus {
        self.status
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Streams this detector consumes.
    pub fn stream_ids(&self) -> impl Iterator<Item = &StreamId> {
        self.subscriptions.keys()
    }

    pub fn subscribed(&self, stream_id: &StreamId) -> bool {
        self.subscriptions.contains_key(stream_id)
    }

    /// Attach the event bus sender.
    pub fn set_event_sender(&mut self, sender: broadcast::Sender<DetectorEvent>) {
        self.events = Some(sender);
    }

    /// True once every processor has a full template window buffered.
    pub fn is_ready(&self) -> bool {
        !self.processors.is_empty() && self.processors.values().all(|p| p.has_enough_data())
    }

    /// Ingest one record, returning any detections it completed.
    pub fn feed(&mut self, record: &Record) -> Result<Vec<Detection>> {
        if self.status >= DetectorStatus::Terminated {
            return Ok(Vec::new());
        }

        let Some(processor_ids) = self.subscriptions.get(&record.stream_id) else {
            return Ok(Vec::new());
        };
        let processor_ids = processor_ids.clone();

        let state = self
            .stream_states
            .get_mut(&record.stream_id)
            .expect("every subscription has a stream state");

        let prepared = match state.feed(record) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => {
                warn!("{}: {}: channel reset after error: {}", self.id, record.stream_id, e);
                state.reset();
                return Ok(Vec::new());
            }
        };

        self.status = DetectorStatus::InProgress;

        let mut linker_results: Vec<LinkerResult> = Vec::new();

        if let Some(reason) = prepared.reset {
            if reason != ResetReason::Initial {
                self.emit(|id| DetectorEvent::StreamReset {
                    detector_id: id,
                    stream_id: record.stream_id.clone(),
                    reason: reason.as_str().to_string(),
                    timestamp: now(),
                });
            }

            // Pending peaks survive the restart; flush them through the
            // linker before the processors re-anchor.
            for processor_id in &processor_ids {
                let processor = self
                    .processors
                    .get_mut(processor_id)
                    .expect("subscription lists only registered processors");

                if reason != ResetReason::Initial {
                    if let Some(pending) = processor.flush() {
                        linker_results.extend(self.linker.feed(processor_id, &pending));
                    }
                }

                if let Err(e) = processor.prime(prepared.anchor, prepared.sampling_frequency) {
                    warn!("{}: {}: processor prime failed: {}", self.id, processor_id, e);
                    processor.reset();
                }
            }
        }

        for processor_id in &processor_ids {
            let processor = self
                .processors
                .get_mut(processor_id)
                .expect("subscription lists only registered processors");

            match processor.feed(&prepared.samples) {
                Ok(Some(match_result)) => {
                    debug!(
                        "{}: {}: match coefficient={:.4} at {}",
                        self.id,
                        processor_id,
                        match_result.coefficient,
                        add_seconds(match_result.window.start, match_result.lag_seconds)
                    );
                    linker_results.extend(self.linker.feed(processor_id, &match_result));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: {}: processing failed, resetting channel: {}", self.id, processor_id, e);
                    processor.reset();
                }
            }
        }

        if let Some(dir) = self.debug_dir.clone() {
            self.record_debug_peaks(&dir, &processor_ids);
        }

        if !self.ready_reported && self.is_ready() {
            self.ready_reported = true;
            debug!("{}: all processors have enough data", self.id);
            self.emit(|id| DetectorEvent::DetectorReady {
                detector_id: id,
                timestamp: now(),
            });
        }

        Ok(linker_results
            .into_iter()
            .map(|result| self.build_detection(result))
            .collect())
    }

    /// Discard all stream, processor and linker state.
    pub fn reset(&mut self) {
        for state in self.stream_states.values_mut() {
            state.reset();
        }
        for processor in self.processors.values_mut() {
            processor.reset();
        }
        self.linker.reset();
        self.status = DetectorStatus::WaitingForData;
        self.ready_reported = false;
    }

    /// Flush pending matches and queued events, then freeze.
    ///
    /// Further feeds are no-ops.
    pub fn terminate(&mut self) -> Vec<Detection> {
        if self.status >= DetectorStatus::Terminated {
            return Vec::new();
        }

        let mut linker_results = Vec::new();
        let processor_ids: Vec<String> = self.processors.keys().cloned().collect();
        for processor_id in &processor_ids {
            let processor = self
                .processors
                .get_mut(processor_id)
                .expect("iterating own processor ids");
            if let Some(pending) = processor.flush() {
                linker_results.extend(self.linker.feed(processor_id, &pending));
            }
        }

        linker_results.extend(self.linker.terminate());
        self.status = DetectorStatus::Terminated;

        self.emit(|id| DetectorEvent::DetectorTerminated {
            detector_id: id,
            timestamp: now(),
        });

        linker_results
            .into_iter()
            .map(|result| self.build_detection(result))
            .collect()
    }

    /// Convert a linker result into a published detection.
    ///
    /// Latitude, longitude and depth come from the reference origin; the
    /// origin time is shifted by the reference arrival's pick delta.
    fn build_detection(&self, result: LinkerResult) -> Detection {
        let ref_result = &result.results[&result.ref_processor_id];
        let ref_processor = &self.processors[&result.ref_processor_id];
        let pick_delta = seconds_between(
            ref_processor.template_pick_time(),
            ref_result.arrival.pick.time,
        );

        let stations_used: HashSet<String> = result
            .results
            .values()
            .map(|r| r.arrival.pick.stream_id.station_key())
            .collect();
        let stations_associated: HashSet<String> = self
            .processors
            .values()
            .map(|p| p.stream_id().station_key())
            .collect();

        let mut arrivals: Option<Vec<Arrival>> = None;
        if self.with_arrivals {
            let mut list: Vec<Arrival> =
                result.results.values().map(|r| r.arrival.clone()).collect();
            list.sort_by_key(|a| a.pick.time);
            arrivals = Some(list);
        }

        let template_matches: HashMap<String, TemplateMatch> = result
            .results
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    TemplateMatch {
                        processor_id: id.clone(),
                        arrival: r.arrival.clone(),
                        coefficient: r.match_result.coefficient,
                        lag_seconds: r.match_result.lag_seconds,
                        window: r.match_result.window,
                        template_fingerprint: r.match_result.template_fingerprint,
                    },
                )
            })
            .collect();

        info!("{}: detection {}", self.id, result.summary());

        Detection {
            detection_id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            fit: result.fit,
            time: add_seconds(self.origin.time, pick_delta),
            latitude: self.origin.latitude,
            longitude: self.origin.longitude,
            depth_km: self.origin.depth_km,
            magnitude: self.origin.magnitude,
            stations_associated: stations_associated.len(),
            stations_used: stations_used.len(),
            channels_associated: self.processors.len(),
            channels_used: result.results.len(),
            template_matches,
            arrivals,
            amplitudes: Vec::new(),
        }
    }

    fn emit(&self, build: impl FnOnce(String) -> DetectorEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(build(self.id.clone()));
        }
    }

    /// Append each processor's strongest window of the last feed to the
    /// per-channel coefficient series in the debug directory.
    fn record_debug_peaks(&self, dir: &PathBuf, processor_ids: &[String]) {
        for processor_id in processor_ids {
            let Some(processor) = self.processors.get(processor_id) else {
                continue;
            };
            let Some((time, coefficient)) = processor.last_feed_peak() else {
                continue;
            };

            let path = dir.join(format!("{}_{}.jsonl", self.id, processor_id));
            let line = serde_json::json!({
                "time": time,
                "coefficient": coefficient,
            });
            let written = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{line}"));
            if let Err(e) = written {
                debug!("{}: debug recording failed: {}", self.id, e);
            }
        }
    }
}

/// Step-wise detector construction with fail-fast validation
pub struct DetectorBuilder {
    id: String,
    origin: Origin,
    gap_config: GapConfig,
    on_hold_seconds: f64,
    arrival_offset_threshold: Option<f64>,
    result_threshold: Option<f64>,
    min_arrivals: Option<usize>,
    with_arrivals: bool,
    debug_dir: Option<PathBuf>,

    stream_filters: HashMap<StreamId, Option<FilterSpec>>,
    subscriptions: HashMap<StreamId, Vec<String>>,
    processors: HashMap<String, TemplateProcessor>,
    registrations: Vec<(String, Arrival, f64)>,
}

impl DetectorBuilder {
    pub fn new(id: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: id.into(),
            origin,
            gap_config: GapConfig {
                tolerance_seconds: 4.5,
                interpolation: true,
            },
            on_hold_seconds: 0.0,
            arrival_offset_threshold: Some(crate::config::MIN_ARRIVAL_OFFSET_THRESHOLD),
            result_threshold: None,
            min_arrivals: None,
            with_arrivals: false,
            debug_dir: None,
            stream_filters: HashMap::new(),
            subscriptions: HashMap::new(),
            processors: HashMap::new(),
            registrations: Vec::new(),
        }
    }

    pub fn gap_tolerance(mut self, seconds: f64) -> Self {
        self.gap_config.tolerance_seconds = seconds;
        self
    }

    pub fn gap_interpolation(mut self, enabled: bool) -> Self {
        self.gap_config.interpolation = enabled;
        self
    }

    pub fn on_hold(mut self, seconds: f64) -> Self {
        self.on_hold_seconds = seconds;
        self
    }

    pub fn arrival_offset_threshold(mut self, threshold: Option<f64>) -> Self {
        self.arrival_offset_threshold = threshold;
        self
    }

    pub fn result_threshold(mut self, threshold: Option<f64>) -> Self {
        self.result_threshold = threshold;
        self
    }

    pub fn min_arrivals(mut self, min_arrivals: Option<usize>) -> Self {
        self.min_arrivals = min_arrivals;
        self
    }

    pub fn with_arrivals(mut self, enabled: bool) -> Self {
        self.with_arrivals = enabled;
        self
    }

    pub fn debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    /// Register one template/stream binding, fetching and preparing the
    /// template waveform through `provider`.
    pub fn stream(
        mut self,
        config: &TemplateStreamConfig,
        provider: &dyn WaveformProvider,
    ) -> Result<Self> {
        if !crate::config::validate_xcorr_threshold(config.xcorr_threshold) {
            return Err(Error::Config(format!(
                "{}/{}: xcorr_threshold {} must be in [-1, 1]",
                self.id, config.template_id, config.xcorr_threshold
            )));
        }
        validate_phase(&config.phase).map_err(|_| {
            Error::Config(format!(
                "{}/{}: unknown phase '{}'",
                self.id, config.template_id, config.phase
            ))
        })?;
        if self.processors.contains_key(&config.template_id) {
            return Err(Error::Config(format!(
                "{}: duplicate template id '{}'",
                self.id, config.template_id
            )));
        }

        let window = TimeWindow::new(
            add_seconds(config.template_pick, config.waveform_start),
            add_seconds(config.template_pick, config.waveform_end),
        )?;
        let processing = ProcessingConfig {
            filter: config.filter.clone(),
            filter_margin_seconds: config.filter_margin,
            target_frequency: config.target_frequency,
            demean: true,
        };

        let trace = provider.get(&config.stream_id, &window, &processing)?;
        if trace.is_empty() {
            return Err(Error::NoData(format!(
                "{}/{}: empty template waveform",
                self.id, config.template_id
            )));
        }

        let template = TemplateWaveform {
            samples: trace.samples,
            start_time: trace.start_time,
            sampling_frequency: trace.sampling_frequency,
            stream_id: config.stream_id.clone(),
            phase: config.phase.clone(),
            pick_time: config.template_pick,
        };

        let filter_spec = match &config.filter {
            Some(filter) => Some(FilterSpec::parse(filter)?),
            None => None,
        };

        let processor = TemplateProcessor::new(
            config.template_id.clone(),
            template,
            config.xcorr_threshold,
        );
        let arrival = Arrival::new(
            config.template_pick,
            config.stream_id.clone(),
            config.phase.clone(),
        );
        let pick_offset = processor.pick_offset_seconds();

        self.stream_filters
            .entry(config.stream_id.clone())
            .or_insert(filter_spec);
        self.subscriptions
            .entry(config.stream_id.clone())
            .or_default()
            .push(config.template_id.clone());
        self.registrations
            .push((config.template_id.clone(), arrival, pick_offset));
        self.processors.insert(config.template_id.clone(), processor);

        Ok(self)
    }

    pub fn build(self) -> Result<Detector> {
        if self.processors.is_empty() {
            return Err(Error::Config(format!(
                "{}: no template streams configured",
                self.id
            )));
        }

        if let Some(n) = self.min_arrivals {
            if n < 1 || n > self.processors.len() {
                return Err(Error::Config(format!(
                    "{}: min_arrivals {} must be in [1, {}]",
                    self.id,
                    n,
                    self.processors.len()
                )));
            }
        }

        let mut linker = Linker::new(self.on_hold_seconds, self.arrival_offset_threshold);
        linker.set_result_threshold(self.result_threshold);
        linker.set_min_arrivals(self.min_arrivals);
        for (processor_id, arrival, pick_offset) in self.registrations {
            linker.add(processor_id, arrival, pick_offset);
        }

        let gap_config = self.gap_config;
        let stream_states: HashMap<StreamId, StreamState> = self
            .stream_filters
            .into_iter()
            .map(|(stream_id, filter_spec)| {
                let state = StreamState::new(stream_id.clone(), filter_spec, gap_config);
                (stream_id, state)
            })
            .collect();

        info!(
            "{}: detector ready with {} template processors on {} streams",
            self.id,
            self.processors.len(),
            self.subscriptions.len()
        );

        Ok(Detector {
            id: self.id,
            origin: Arc::new(self.origin),
            stream_states,
            subscriptions: self.subscriptions,
            processors: self.processors,
            linker,
            status: DetectorStatus::WaitingForData,
            with_arrivals: self.with_arrivals,
            ready_reported: false,
            events: None,
            debug_dir: self.debug_dir,
        })
    }
}
