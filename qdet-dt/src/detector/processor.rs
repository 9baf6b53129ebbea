//! Template waveform processor
//!
//! Streams prepared channel samples through a normalized cross-correlation
//! against a fixed template waveform and emits a match when the coefficient
//! crosses the configured threshold.
//!
//! For a window `x` of template length `L` the coefficient is
//!
//! ```text
//! c = Σ (x_i - x̄)(t_i - t̄) / sqrt(Σ(x_i - x̄)² · Σ(t_i - t̄)²)
//! ```
//!
//! The template terms are precomputed; the stream terms come from running
//! sums Σx and Σx² which are rebuilt from the window every
//! `REBUILD_INTERVAL` samples to bound floating-point drift.
//!
//! Emission is peak-picked: within a contiguous span of above-threshold
//! windows only the local maximum is reported, spans are coalesced to one
//! result per feed, and a span still open at the end of a record is carried
//! into the next feed (the detector force-flushes it on reset/terminate).

use crate::error::{Error, Result};
use crate::waveform::resample::resample_samples;
use crate::waveform::demean;
use qdet_common::time::{add_seconds, seconds_between};
use qdet_common::{StreamId, TimeWindow};
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Running sums are recomputed from the buffered window this often.
///
/// The accumulated relative error of ~1e4 additions stays below 1e-11,
/// keeping the coefficient accurate to 1e-9.
const REBUILD_INTERVAL: usize = 10_000;

/// Absolute guard for the threshold comparison, so an exact template repeat
/// fires a threshold of 1.0 despite rounding in the two accumulation paths.
/// Sized to the 1e-9 accuracy bound of the running sums.
const THRESHOLD_GUARD: f64 = 1e-9;

/// Prepared reference waveform of one (template, channel) pair
#[derive(Debug, Clone)]
pub struct TemplateWaveform {
    /// Demeaned, filtered, trimmed samples
    pub samples: Vec<f64>,
    pub start_time: DateTime<Utc>,
    pub sampling_frequency: f64,
    pub stream_id: StreamId,
    pub phase: String,
    /// Reference pick inside the template window
    pub pick_time: DateTime<Utc>,
}

impl TemplateWaveform {
    /// Offset of the pick from the template start, in seconds.
    pub fn pick_offset_seconds(&self) -> f64 {
        seconds_between(self.start_time, self.pick_time)
    }

    pub fn length_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sampling_frequency
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        add_seconds(self.start_time, self.length_seconds())
    }

    /// Canonical fingerprint of this waveform's identity.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.stream_id.to_string().hash(&mut hasher);
        self.start_time
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .hash(&mut hasher);
        self.pick_time
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .hash(&mut hasher);
        self.phase.hash(&mut hasher);
        hasher.finish()
    }
}

/// A threshold crossing reported by a template processor
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Time span of the contiguous above-threshold region
    pub window: TimeWindow,
    /// Peak coefficient, clamped to [-1, 1]
    pub coefficient: f64,
    /// Offset of the peak window from `window.start`, in seconds
    pub lag_seconds: f64,
    /// Fingerprint of the template waveform that matched
    pub template_fingerprint: u64,
}

/// Processor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No stream anchor yet
    Uninitialized,
    /// Fewer than template-length samples buffered
    Warmup,
    /// Sliding window active
    Armed,
}

/// Template resampled to the live stream rate
#[derive(Debug)]
struct RuntimeTemplate {
    demeaned: Vec<f64>,
    /// sqrt(Σ(t - t̄)²)
    norm: f64,
    sampling_frequency: f64,
}

/// Open above-threshold span
#[derive(Debug, Clone, Copy)]
struct OpenSpan {
    /// Start time of the first above-threshold window
    start: DateTime<Utc>,
    peak_coefficient: f64,
    /// Start time of the peak window
    peak_window_start: DateTime<Utc>,
}

/// Streaming matcher for one (template, channel) pair
pub struct TemplateProcessor {
    id: String,
    template: TemplateWaveform,
    threshold: f64,
    fingerprint: u64,

    runtime: Option<RuntimeTemplate>,
    state: ProcessorState,

    /// Time of the sample at index 0 since the last prime
    anchor: DateTime<Utc>,
    /// Samples consumed since the last prime
    consumed: u64,

    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    since_rebuild: usize,

    span: Option<OpenSpan>,
    last_feed_peak: Option<(DateTime<Utc>, f64)>,
}

impl TemplateProcessor {
    pub fn new(id: impl Into<String>, template: TemplateWaveform, threshold: f64) -> Self {
        let fingerprint = template.fingerprint();
        Self {
            id: id.into(),
            template,
            threshold,
            fingerprint,
            runtime: None,
            state: ProcessorState::Uninitialized,
            anchor: DateTime::<Utc>::MIN_UTC,
            consumed: 0,
            window: VecDeque::new(),
            sum: 0.0,
            sum_sq: 0.0,
            since_rebuild: 0,
            span: None,
            last_feed_peak: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.template.stream_id
    }

    pub fn template(&self) -> &TemplateWaveform {
        &self.template
    }

    pub fn template_start_time(&self) -> DateTime<Utc> {
        self.template.start_time
    }

    pub fn template_end_time(&self) -> DateTime<Utc> {
        self.template.end_time()
    }

    pub fn template_pick_time(&self) -> DateTime<Utc> {
        self.template.pick_time
    }

    /// Pick offset from the template start in seconds.
    ///
    /// Resampling preserves the template start time, so this is stable even
    /// after the template was rebuilt for a new stream rate.
    pub fn pick_offset_seconds(&self) -> f64 {
        self.template.pick_offset_seconds()
    }

    /// True once a full template-length window is buffered.
    pub fn has_enough_data(&self) -> bool {
        match &self.runtime {
            Some(rt) => self.window.len() >= rt.demeaned.len(),
            None => false,
        }
    }

    /// Largest-|c| window of the most recent feed, for debug recording.
    pub fn last_feed_peak(&self) -> Option<(DateTime<Utc>, f64)> {
        self.last_feed_peak
    }

    /// Anchor the processor at a stream restart.
    ///
    /// Rebuilds the runtime template when the stream rate differs from the
    /// rate the template was prepared at.
    pub fn prime(&mut self, anchor: DateTime<Utc>, sampling_frequency: f64) -> Result<()> {
        let needs_rebuild = match &self.runtime {
            Some(rt) => (rt.sampling_frequency - sampling_frequency).abs()
                > rt.sampling_frequency * 1e-9,
            None => true,
        };

        if needs_rebuild {
            let mut samples = resample_samples(
                &self.template.samples,
                self.template.sampling_frequency,
                sampling_frequency,
            )?;
            demean(&mut samples);

            let norm = samples.iter().map(|t| t * t).sum::<f64>().sqrt();
            if !(norm > 0.0) || !norm.is_finite() {
                return Err(Error::Processing(format!(
                    "{}: template has zero variance at {} Hz",
                    self.id, sampling_frequency
                )));
            }

            if (sampling_frequency - self.template.sampling_frequency).abs()
                > self.template.sampling_frequency * 1e-9
            {
                debug!(
                    "{}: template rebuilt for stream rate {} Hz ({} samples)",
                    self.id,
                    sampling_frequency,
                    samples.len()
                );
            }

            self.runtime = Some(RuntimeTemplate {
                demeaned: samples,
                norm,
                sampling_frequency,
            });
        }

        self.anchor = anchor;
        self.consumed = 0;
        self.clear_rolling();
        self.state = ProcessorState::Warmup;
        Ok(())
    }

    /// Drop all stream state; a new `prime` is required before feeding.
    pub fn reset(&mut self) {
        self.clear_rolling();
        self.state = ProcessorState::Uninitialized;
        self.consumed = 0;
    }

    /// Close and emit a span left open by the previous feeds, if any.
    pub fn flush(&mut self) -> Option<MatchResult> {
        let span = self.span.take()?;
        Some(self.finish_span(span))
    }

    /// Slide the correlation across `samples`.
    ///
    /// At most one match is returned per call; several spans closing within
    /// the same call are coalesced to the strongest peak.
    pub fn feed(&mut self, samples: &[f64]) -> Result<Option<MatchResult>> {
        if self.state == ProcessorState::Uninitialized {
            return Err(Error::Processing(format!(
                "{}: feed before prime", self.id
            )));
        }

        let (len, norm, period) = {
            let rt = self.runtime.as_ref().expect("primed processor has a runtime template");
            (
                rt.demeaned.len(),
                rt.norm,
                1.0 / rt.sampling_frequency,
            )
        };

        let mut best: Option<MatchResult> = None;
        let mut feed_peak: Option<(DateTime<Utc>, f64)> = None;

        for &x in samples {
            if !x.is_finite() {
                debug!("{}: non-finite sample, back to warmup", self.id);
                if let Some(span) = self.span.take() {
                    let m = self.finish_span(span);
                    best = keep_stronger(best, m);
                }
                self.clear_rolling();
                self.state = ProcessorState::Warmup;
                self.consumed += 1;
                continue;
            }

            self.window.push_back(x);
            self.sum += x;
            self.sum_sq += x * x;
            if self.window.len() > len {
                let old = self.window.pop_front().expect("window is non-empty");
                self.sum -= old;
                self.sum_sq -= old * old;
            }
            self.since_rebuild += 1;
            self.consumed += 1;

            if self.window.len() < len {
                continue;
            }
            if self.state == ProcessorState::Warmup {
                self.state = ProcessorState::Armed;
            }

            if self.since_rebuild >= REBUILD_INTERVAL {
                self.rebuild_sums();
            }

            // Time of the first sample of the current window
            let window_start = add_seconds(
                self.anchor,
                (self.consumed - len as u64) as f64 * period,
            );

            let n = len as f64;
            let variance_term = self.sum_sq - self.sum * self.sum / n;
            if !(variance_term > self.sum_sq.abs() * 1e-12) {
                // Zero-variance window: coefficient undefined, emits nothing
                if let Some(span) = self.span.take() {
                    let m = self.finish_span(span);
                    best = keep_stronger(best, m);
                }
                continue;
            }

            let rt = self.runtime.as_ref().expect("primed processor has a runtime template");
            let mut numerator = 0.0;
            for (w, t) in self.window.iter().zip(rt.demeaned.iter()) {
                numerator += w * t;
            }

            let coefficient = (numerator / (variance_term.sqrt() * norm)).clamp(-1.0, 1.0);

            match feed_peak {
                Some((_, peak)) if coefficient.abs() <= peak.abs() => {}
                _ => feed_peak = Some((window_start, coefficient)),
            }

            if coefficient.abs() + THRESHOLD_GUARD >= self.threshold {
                match &mut self.span {
                    Some(span) => {
                        if coefficient.abs() > span.peak_coefficient.abs() {
                            span.peak_coefficient = coefficient;
                            span.peak_window_start = window_start;
                        }
                    }
                    None => {
                        self.span = Some(OpenSpan {
                            start: window_start,
                            peak_coefficient: coefficient,
                            peak_window_start: window_start,
                        });
                    }
                }
            } else if let Some(span) = self.span.take() {
                let m = self.finish_span(span);
                best = keep_stronger(best, m);
            }
        }

        self.last_feed_peak = feed_peak;
        Ok(best)
    }

    fn finish_span(&self, span: OpenSpan) -> MatchResult {
        let rt = self.runtime.as_ref().expect("spans only exist on a primed processor");
        let length = rt.demeaned.len() as f64 / rt.sampling_frequency;
        let end = add_seconds(span.peak_window_start, length);

        MatchResult {
            window: TimeWindow {
                start: span.start,
                end,
            },
            coefficient: span.peak_coefficient,
            lag_seconds: seconds_between(span.start, span.peak_window_start),
            template_fingerprint: self.fingerprint,
        }
    }

    fn clear_rolling(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.since_rebuild = 0;
        self.span = None;
        self.last_feed_peak = None;
    }

    fn rebuild_sums(&mut self) {
        self.sum = self.window.iter().sum();
        self.sum_sq = self.window.iter().map(|x| x * x).sum();
        self.since_rebuild = 0;
    }
}

fn keep_stronger(best: Option<MatchResult>, candidate: MatchResult) -> Option<MatchResult> {
    match best {
        Some(current) if current.coefficient.abs() >= candidate.coefficient.abs() => Some(current),
        _ => Some(candidate),
    }
}
