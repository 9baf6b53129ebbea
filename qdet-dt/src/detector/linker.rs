//! Multi-channel match association
//!
//! The linker receives per-channel template match results and associates
//! them into candidate events. Every result may merge into every queued
//! event it is compatible with, and additionally opens a fresh event held
//! for the configured on-hold window so late channels can still join.
//!
//! An event is emitted once it is fully associated (one result per
//! registered processor), or when its on-hold deadline passes with at least
//! `min_arrivals` participants; in both cases the event fit (mean of the
//! participating coefficients) must reach the result threshold. Expired
//! events below `min_arrivals` are dropped.

use crate::detector::pot::{validate_pick_offsets, PickOffsetTable};
use crate::detector::processor::MatchResult;
use qdet_common::model::Arrival;
use qdet_common::time::{add_seconds, now};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

/// Linker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkerStatus {
    WaitingForData,
    InProgress,
    Terminated,
}

/// One processor's contribution to an event
#[derive(Debug, Clone)]
pub struct TemplateResult {
    /// Template arrival with the pick time recomputed from the match
    pub arrival: Arrival,
    pub match_result: MatchResult,
}

impl TemplateResult {
    /// Canonical identity of this result: the arrival plus the coefficient
    /// rounded to 12 decimals.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.arrival.pick.stream_id.to_string().hash(&mut hasher);
        self.arrival
            .pick
            .time
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .hash(&mut hasher);
        self.arrival.phase.hash(&mut hasher);
        ((self.match_result.coefficient * 1e12).round() as i64).hash(&mut hasher);
        hasher.finish()
    }
}

/// A consolidated association, ready to become a detection
#[derive(Debug, Clone)]
pub struct LinkerResult {
    /// Mean of the participating coefficients
    pub fit: f64,
    /// Participant with the earliest pick
    pub ref_processor_id: String,
    /// Participating results keyed by processor id
    pub results: HashMap<String, TemplateResult>,
    pub pot: PickOffsetTable,
}

impl LinkerResult {
    pub fn arrival_count(&self) -> usize {
        self.results.len()
    }

    /// Compact description for logging.
    pub fn summary(&self) -> String {
        let start = self.results[&self.ref_processor_id]
            .match_result
            .window
            .start;
        let end = add_seconds(start, self.pot.pick_offset().unwrap_or(0.0));
        format!(
            "({} - {}): fit={:.6}, arrival_count={}",
            start,
            end,
            self.fit,
            self.arrival_count()
        )
    }
}

/// In-flight candidate association
#[derive(Debug, Clone)]
struct Event {
    expires: DateTime<Utc>,
    result: LinkerResult,
    ref_pick_time: Option<DateTime<Utc>>,
}

impl Event {
    fn new(expires: DateTime<Utc>) -> Self {
        Self {
            expires,
            result: LinkerResult {
                fit: 0.0,
                ref_processor_id: String::new(),
                results: HashMap::new(),
                pot: PickOffsetTable::new(&[]),
            },
            ref_pick_time: None,
        }
    }

    fn arrival_count(&self) -> usize {
        self.result.results.len()
    }

    /// Insert or replace `processor_id`'s contribution and refresh the
    /// event's fit, POT and reference pick.
    fn merge_result(&mut self, processor_id: &str, result: TemplateResult, pot: PickOffsetTable) {
        let pick_time = result.arrival.pick.time;
        self.result
            .results
            .insert(processor_id.to_string(), result);

        let coefficients: f64 = self
            .result
            .results
            .values()
            .map(|r| r.match_result.coefficient)
            .sum();
        self.result.fit = coefficients / self.result.results.len() as f64;
        self.result.pot = pot;

        if self.ref_pick_time.map_or(true, |current| pick_time < current) {
            self.ref_pick_time = Some(pick_time);
            self.result.ref_processor_id = processor_id.to_string();
        }
    }
}

/// Template arrival bound to a registered processor
struct RegisteredProcessor {
    arrival: Arrival,
    /// Template pick offset from the template start, in seconds
    pick_offset_seconds: f64,
}

/// Windowed cross-channel associator of one detector
pub struct Linker {
    processors: HashMap<String, RegisteredProcessor>,
    arrival_offset_threshold: Option<f64>,
    result_threshold: Option<f64>,
    min_arrivals: Option<usize>,
    on_hold_seconds: f64,
    queue: VecDeque<Event>,
    reference_pot: Option<PickOffsetTable>,
    status: LinkerStatus,
}

impl Linker {
    pub fn new(on_hold_seconds: f64, arrival_offset_threshold: Option<f64>) -> Self {
        Self {
            processors: HashMap::new(),
            arrival_offset_threshold,
            result_threshold: None,
            min_arrivals: None,
            on_hold_seconds,
            queue: VecDeque::new(),
            reference_pot: None,
            status: LinkerStatus::WaitingForData,
        }
    }

    pub fn status(&self) -> LinkerStatus {
        self.status
    }

    pub fn set_result_threshold(&mut self, threshold: Option<f64>) {
        self.result_threshold = threshold;
    }

    pub fn result_threshold(&self) -> Option<f64> {
        self.result_threshold
    }

    /// Minimal arrivals per detection; values below 1 disable the limit.
    pub fn set_min_arrivals(&mut self, min_arrivals: Option<usize>) {
        self.min_arrivals = min_arrivals.filter(|&n| n >= 1);
    }

    pub fn min_arrivals(&self) -> Option<usize> {
        self.min_arrivals
    }

    pub fn set_on_hold(&mut self, seconds: f64) {
        self.on_hold_seconds = seconds;
    }

    pub fn on_hold(&self) -> f64 {
        self.on_hold_seconds
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Number of distinct streams among the registered processors.
    pub fn associated_channel_count(&self) -> usize {
        self.processors
            .values()
            .map(|p| &p.arrival.pick.stream_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn queued_event_count(&self) -> usize {
        self.queue.len()
    }

    /// Register a processor. A duplicate id replaces the prior binding.
    pub fn add(&mut self, processor_id: impl Into<String>, arrival: Arrival, pick_offset_seconds: f64) {
        self.processors.insert(
            processor_id.into(),
            RegisteredProcessor {
                arrival,
                pick_offset_seconds,
            },
        );
        self.reference_pot = None;
    }

    pub fn remove(&mut self, processor_id: &str) {
        self.processors.remove(processor_id);
        self.reference_pot = None;
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.reference_pot = None;
        self.status = LinkerStatus::WaitingForData;
    }

    /// Flush pending events, applying the min-arrivals and result-threshold
    /// rule, and freeze the linker.
    pub fn terminate(&mut self) -> Vec<LinkerResult> {
        let min_arrivals = self.min_arrivals.unwrap_or_else(|| self.processor_count());
        let mut emitted = Vec::new();

        while let Some(event) = self.queue.pop_front() {
            if event.arrival_count() >= min_arrivals
                && self
                    .result_threshold
                    .map_or(true, |threshold| event.result.fit >= threshold)
            {
                emitted.push(event.result);
            }
        }

        self.status = LinkerStatus::Terminated;
        emitted
    }

    /// Ingest one match result from `processor_id`.
    ///
    /// The arrival's pick time is recomputed from the match as
    /// `window.start + lag + (template_pick - template_start)`. Results for
    /// unregistered processors are silently dropped.
    pub fn feed(&mut self, processor_id: &str, match_result: &MatchResult) -> Vec<LinkerResult> {
        if self.status >= LinkerStatus::Terminated {
            return Vec::new();
        }

        let Some(registered) = self.processors.get(processor_id) else {
            trace!("dropping match result of unregistered processor '{processor_id}'");
            return Vec::new();
        };

        let pick_time = add_seconds(
            match_result.window.start,
            match_result.lag_seconds + registered.pick_offset_seconds,
        );
        let mut arrival = registered.arrival.clone();
        arrival.pick.time = pick_time;

        self.status = LinkerStatus::InProgress;
        self.process(
            processor_id,
            TemplateResult {
                arrival,
                match_result: match_result.clone(),
            },
        )
    }

    fn process(&mut self, processor_id: &str, result: TemplateResult) -> Vec<LinkerResult> {
        if self.processors.is_empty() {
            return Vec::new();
        }

        if self.reference_pot.is_none() {
            self.rebuild_reference_pot();
        }
        let reference_pot = self
            .reference_pot
            .as_ref()
            .expect("reference POT was just rebuilt");

        let processor_count = self.processors.len();

        // Merge into every eligible queued event
        for event in self.queue.iter_mut() {
            if event.arrival_count() >= processor_count {
                continue;
            }

            let better = match event.result.results.get(processor_id) {
                Some(existing) => {
                    result.match_result.coefficient > existing.match_result.coefficient
                }
                None => true,
            };
            if !better {
                continue;
            }

            // Candidate arrival set: the event's entries with this
            // processor's contribution replaced/inserted
            let mut entries: Vec<(String, Arrival)> = event
                .result
                .results
                .iter()
                .filter(|(id, _)| id.as_str() != processor_id)
                .map(|(id, r)| (id.clone(), r.arrival.clone()))
                .collect();
            entries.push((processor_id.to_string(), result.arrival.clone()));

            let candidate_pot = PickOffsetTable::new(&entries);

            if let Some(threshold) = self.arrival_offset_threshold {
                let validation = validate_pick_offsets(reference_pot, &candidate_pot, threshold);
                if !validation.ok || !validation.exceeded.is_empty() {
                    continue;
                }
            }

            event.merge_result(processor_id, result.clone(), candidate_pot);
        }

        // Always open a fresh event carrying only this result
        let now = now();
        let mut event = Event::new(add_seconds(now, self.on_hold_seconds));
        let single_pot = PickOffsetTable::new(&[(
            processor_id.to_string(),
            result.arrival.clone(),
        )]);
        event.merge_result(processor_id, result, single_pot);
        self.queue.push_back(event);

        self.sweep(now)
    }

    /// Emit ready events and drop expired ones, in insertion order.
    fn sweep(&mut self, now: DateTime<Utc>) -> Vec<LinkerResult> {
        let processor_count = self.processors.len();
        let min_arrivals = self.min_arrivals.unwrap_or(processor_count);
        let result_threshold = self.result_threshold;

        let mut emitted = Vec::new();
        self.queue.retain(|event| {
            let arrival_count = event.arrival_count();
            let expired = now >= event.expires;

            if arrival_count == processor_count || (expired && arrival_count >= min_arrivals) {
                if result_threshold.map_or(true, |threshold| event.result.fit >= threshold) {
                    emitted.push(event.result.clone());
                }
                false
            } else {
                !expired
            }
        });

        emitted
    }

    fn rebuild_reference_pot(&mut self) {
        let entries: Vec<(String, Arrival)> = self
            .processors
            .iter()
            .map(|(id, p)| (id.clone(), p.arrival.clone()))
            .collect();
        self.reference_pot = Some(PickOffsetTable::new(&entries));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdet_common::{StreamId, TimeWindow};

    fn t0() -> DateTime<Utc> {
        "2020-10-25T19:30:00Z".parse().unwrap()
    }

    fn stream(s: &str) -> StreamId {
        s.parse().unwrap()
    }

    /// Register three processors whose template picks are offset by
    /// {0.0, 0.12, 0.25} seconds.
    fn linker_with_three(on_hold: f64, offset_threshold: Option<f64>) -> Linker {
        let mut linker = Linker::new(on_hold, offset_threshold);
        for (id, st, offset) in [
            ("p1", "CH.AAA..HHZ", 0.0),
            ("p2", "CH.BBB..HHZ", 0.12),
            ("p3", "CH.CCC..HHZ", 0.25),
        ] {
            let pick = add_seconds(t0(), offset);
            linker.add(id, Arrival::new(pick, stream(st), "P"), 1.0);
        }
        linker
    }

    /// Match whose recomputed pick lands at `t0 + 60 + offset` given the
    /// registered pick_offset of 1.0 s.
    fn match_at(offset: f64, coefficient: f64) -> MatchResult {
        let start = add_seconds(t0(), 59.0 + offset);
        MatchResult {
            window: TimeWindow {
                start,
                end: add_seconds(start, 3.0),
            },
            coefficient,
            lag_seconds: 0.0,
            template_fingerprint: 7,
        }
    }

    #[test]
    fn test_full_association_emits_immediately() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));

        assert!(linker.feed("p1", &match_at(0.0, 0.9)).is_empty());
        assert!(linker.feed("p2", &match_at(0.12, 0.8)).is_empty());
        let results = linker.feed("p3", &match_at(0.25, 0.7));

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.arrival_count(), 3);
        assert!((result.fit - 0.8).abs() < 1e-12, "fit = mean, got {}", result.fit);
        assert_eq!(result.ref_processor_id, "p1", "earliest pick");
    }

    #[test]
    fn test_offset_violation_excludes_channel() {
        // p3 arrives 0.30 s after p1 instead of the expected 0.25, with a
        // 0.01 s tolerance
        let mut linker = linker_with_three(60.0, Some(0.01));
        linker.set_min_arrivals(Some(2));

        linker.feed("p1", &match_at(0.0, 0.9));
        linker.feed("p2", &match_at(0.12, 0.8));
        let immediate = linker.feed("p3", &match_at(0.30, 0.7));
        assert!(immediate.is_empty(), "no full association possible");

        let flushed = linker.terminate();
        assert_eq!(flushed.len(), 1);
        let result = &flushed[0];
        assert_eq!(result.arrival_count(), 2);
        assert!(result.results.contains_key("p1"));
        assert!(result.results.contains_key("p2"));
        assert!((result.fit - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_offset_violation_with_strict_min_arrivals_yields_nothing() {
        let mut linker = linker_with_three(60.0, Some(0.01));
        // min_arrivals unspecified: defaults to all three

        linker.feed("p1", &match_at(0.0, 0.9));
        linker.feed("p2", &match_at(0.12, 0.8));
        linker.feed("p3", &match_at(0.30, 0.7));

        assert!(linker.terminate().is_empty());
    }

    #[test]
    fn test_on_hold_zero_expires_on_next_feed() {
        let mut linker = linker_with_three(0.0, Some(2.0e-6));
        linker.set_min_arrivals(Some(2));

        linker.feed("p1", &match_at(0.0, 0.9));
        let results = linker.feed("p2", &match_at(0.12, 0.8));

        // The merged {p1, p2} event expired immediately and met min_arrivals
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].arrival_count(), 2);
    }

    #[test]
    fn test_expired_below_min_arrivals_is_dropped() {
        let mut linker = linker_with_three(0.0, Some(2.0e-6));
        linker.set_min_arrivals(Some(2));

        linker.feed("p1", &match_at(0.0, 0.9));
        // A second feed sweeps the queue: with on_hold = 0 every event is
        // already past its deadline, and single-arrival events fall below
        // min_arrivals = 2, so the whole queue drains without emission.
        let results = linker.feed("p1", &match_at(30.0, 0.9));
        assert!(results.is_empty());
        assert_eq!(linker.queued_event_count(), 0, "expired events dropped");
    }

    #[test]
    fn test_result_threshold_filters_emission() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));
        linker.set_result_threshold(Some(0.85));

        linker.feed("p1", &match_at(0.0, 0.8));
        linker.feed("p2", &match_at(0.12, 0.8));
        let results = linker.feed("p3", &match_at(0.25, 0.8));

        // Fully associated but fit 0.8 < 0.85: removed without emission
        assert!(results.is_empty());
        assert_eq!(linker.queued_event_count(), 2, "partial follow-up events remain");
    }

    #[test]
    fn test_better_coefficient_replaces_entry() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));

        linker.feed("p1", &match_at(0.0, 0.6));
        // Same processor, stronger match: replaces the entry in the queued
        // event, and additionally opens its own event. Both fill up below.
        linker.feed("p1", &match_at(0.0, 0.9));
        linker.feed("p2", &match_at(0.12, 0.8));
        let results = linker.feed("p3", &match_at(0.25, 0.7));

        assert_eq!(results.len(), 2, "both full events emit");
        for result in &results {
            assert!((result.fit - 0.8).abs() < 1e-12, "0.9 replaced 0.6");
            assert_eq!(result.results["p1"].match_result.coefficient, 0.9);
        }
    }

    #[test]
    fn test_unregistered_processor_is_dropped() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));
        assert!(linker.feed("nope", &match_at(0.0, 0.9)).is_empty());
        assert_eq!(linker.queued_event_count(), 0);
    }

    #[test]
    fn test_terminated_linker_ignores_feeds() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));
        linker.feed("p1", &match_at(0.0, 0.9));
        linker.terminate();
        assert_eq!(linker.status(), LinkerStatus::Terminated);
        assert!(linker.feed("p2", &match_at(0.12, 0.8)).is_empty());
    }

    #[test]
    fn test_duplicate_add_replaces_binding() {
        let mut linker = linker_with_three(60.0, Some(2.0e-6));
        assert_eq!(linker.processor_count(), 3);
        linker.add("p1", Arrival::new(add_seconds(t0(), 0.5), stream("CH.AAA..HHZ"), "P"), 1.0);
        assert_eq!(linker.processor_count(), 3);
    }

    #[test]
    fn test_terminate_flush_mixed_queue() {
        // One fully associated event cannot linger (it emits immediately),
        // so stage one two-of-three event and one single-arrival event and
        // terminate with min_arrivals = 2: exactly one emission.
        let mut linker = linker_with_three(60.0, Some(2.0e-6));
        linker.set_min_arrivals(Some(2));

        linker.feed("p1", &match_at(0.0, 0.9));
        linker.feed("p2", &match_at(0.12, 0.8));
        // A later, unrelated single-channel match
        linker.feed("p3", &match_at(40.0, 0.95));

        let flushed = linker.terminate();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].arrival_count(), 2);
    }

    #[test]
    fn test_disabled_offset_threshold_merges_anything() {
        let mut linker = linker_with_three(60.0, None);

        linker.feed("p1", &match_at(0.0, 0.9));
        linker.feed("p2", &match_at(5.0, 0.8)); // wildly off the reference
        let results = linker.feed("p3", &match_at(9.0, 0.7));

        assert_eq!(results.len(), 1, "no offset validation when disabled");
        assert_eq!(results[0].arrival_count(), 3);
    }

    #[test]
    fn test_many_merge_semantics() {
        // A result merges into every eligible queued event, not just one
        let mut linker = linker_with_three(60.0, Some(2.0e-6));

        linker.feed("p1", &match_at(0.0, 0.9)); // event A {p1}
        linker.feed("p2", &match_at(0.12, 0.8)); // merges into A, opens B {p2}
        assert_eq!(linker.queued_event_count(), 2);

        // p3 completes A and merges into B
        let results = linker.feed("p3", &match_at(0.25, 0.7));
        assert_eq!(results.len(), 1, "A emitted");
        // B now holds {p2, p3}, C holds {p3}
        assert_eq!(linker.queued_event_count(), 2);
    }
}
