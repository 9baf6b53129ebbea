//! Shared helpers for the integration tests
//!
//! Builds deterministic synthetic streams, template trace directories and
//! detector configurations.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use qdet_common::time::add_seconds;
use qdet_common::{Record, StreamId};
use qdet_dt::config::TemplateStreamConfig;
use std::path::Path;

pub fn t(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn stream(s: &str) -> StreamId {
    s.parse().unwrap()
}

/// Decaying 8 Hz wavelet, the reference waveform of all test templates
pub fn wavelet(n: usize, freq: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let time = i as f64 / freq;
            (-3.0 * time).exp() * (2.0 * std::f64::consts::PI * 8.0 * time).sin()
        })
        .collect()
}

/// Deterministic low-amplitude background, phase-shifted per `seed`
pub fn noise(n: usize, seed: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let x = i as f64 + 31.0 * seed;
            0.02 * (0.37 * x).sin() + 0.013 * (1.13 * x + 0.5).sin() + 0.007 * (2.71 * x).cos()
        })
        .collect()
}

/// Split one long sample run into contiguous 1 s records.
pub fn records_from_signal(
    stream_id: &StreamId,
    start: DateTime<Utc>,
    freq: f64,
    signal: &[f64],
) -> Vec<Record> {
    let chunk = freq as usize;
    signal
        .chunks(chunk)
        .enumerate()
        .map(|(i, samples)| {
            Record::new(
                stream_id.clone(),
                add_seconds(start, i as f64 * chunk as f64 / freq),
                freq,
                samples.to_vec(),
            )
            .unwrap()
        })
        .collect()
}

/// Write a template trace file into the provider directory.
pub fn write_trace(dir: &Path, stream_id: &StreamId, start: DateTime<Utc>, samples: Vec<f64>) {
    let record = Record::new(stream_id.clone(), start, 100.0, samples).unwrap();
    let path = dir.join(format!("{stream_id}.json"));
    std::fs::write(path, serde_json::to_string(&record).unwrap()).unwrap();
}

/// Template/stream binding with the test defaults: no filter, no margin,
/// window [pick - 1 s, pick + 2 s].
pub fn stream_config(
    template_id: &str,
    stream_id: &str,
    template_pick: DateTime<Utc>,
    xcorr_threshold: f64,
) -> TemplateStreamConfig {
    serde_json::from_value(serde_json::json!({
        "template_id": template_id,
        "stream_id": stream_id,
        "template_pick": template_pick,
        "xcorr_threshold": xcorr_threshold,
        "waveform_start": -1.0,
        "waveform_end": 2.0,
        "filter_margin": 0.0,
    }))
    .unwrap()
}

/// Interleave per-stream record lists into global arrival order.
pub fn interleave(mut lists: Vec<Vec<Record>>) -> Vec<Record> {
    let mut merged: Vec<Record> = lists.drain(..).flatten().collect();
    merged.sort_by_key(|r| r.start_time);
    merged
}
