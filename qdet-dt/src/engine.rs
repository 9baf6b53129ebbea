//! Detection engine runtime
//!
//! Owns the detectors and the publisher, consumes a record source in
//! arrival order, and broadcasts detector events. Each detector is a
//! synchronization boundary of its own; the engine serializes all calls
//! into it. Detections are handed to the publisher outside the detector,
//! and the event bus send never blocks, so a slow event consumer cannot
//! stall record processing.

use crate::detector::Detector;
use crate::error::Result;
use crate::publish::DetectionPublisher;
use qdet_common::time::now;
use qdet_common::{DetectorEvent, Record};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Totals of one engine run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub records: u64,
    pub detections: u64,
    pub record_errors: u64,
}

/// Record dispatcher over a set of detectors
pub struct Engine {
    detectors: Vec<Detector>,
    publisher: DetectionPublisher,
    events: broadcast::Sender<DetectorEvent>,
    summary: EngineSummary,
}

impl Engine {
    pub fn new(mut detectors: Vec<Detector>, publisher: DetectionPublisher) -> Self {
        let (events, _) = broadcast::channel(256);
        for detector in &mut detectors {
            detector.set_event_sender(events.clone());
        }

        Self {
            detectors,
            publisher,
            events,
            summary: EngineSummary::default(),
        }
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Subscribe to detector events.
    pub fn subscribe(&self) -> broadcast::Receiver<DetectorEvent> {
        self.events.subscribe()
    }

    /// Consume the record source to exhaustion, then terminate and flush.
    pub fn run<S>(&mut self, source: S) -> Result<EngineSummary>
    where
        S: IntoIterator<Item = Result<Record>>,
    {
        for item in source {
            match item {
                Ok(record) => self.dispatch(&record),
                Err(e) => {
                    // Malformed records are isolated, the stream goes on
                    warn!("skipping record: {e}");
                    self.summary.record_errors += 1;
                }
            }
        }

        self.finish();
        info!(
            "engine finished: {} records, {} detections, {} record errors",
            self.summary.records, self.summary.detections, self.summary.record_errors
        );
        Ok(self.summary)
    }

    /// Route one record to every subscribed detector.
    pub fn dispatch(&mut self, record: &Record) {
        self.summary.records += 1;

        for index in 0..self.detectors.len() {
            if !self.detectors[index].subscribed(&record.stream_id) {
                continue;
            }

            match self.detectors[index].feed(record) {
                Ok(detections) => {
                    for detection in detections {
                        self.publish(detection);
                    }
                }
                Err(e) => {
                    // Per-record failures never poison the other detectors
                    warn!(
                        "{}: {}: record dropped: {}",
                        self.detectors[index].id(),
                        record.stream_id,
                        e
                    );
                }
            }
        }
    }

    /// Terminate all detectors, publishing their flushed detections.
    pub fn finish(&mut self) {
        let mut flushed = Vec::new();
        for detector in &mut self.detectors {
            debug!("{}: terminating", detector.id());
            flushed.extend(detector.terminate());
        }
        for detection in flushed {
            self.publish(detection);
        }
    }

    fn publish(&mut self, detection: qdet_common::Detection) {
        let detection = self.publisher.publish(detection);
        self.summary.detections += 1;
        let _ = self.events.send(DetectorEvent::DetectionPublished {
            detector_id: detection.detector_id.clone(),
            detection,
            timestamp: now(),
        });
    }
}
