//! Gap handling scenarios across the full pipeline

mod helpers;

use helpers::*;
use qdet_common::model::Origin;
use qdet_common::Record;
use qdet_dt::detector::Detector;
use qdet_dt::engine::Engine;
use qdet_dt::publish::DetectionPublisher;
use qdet_dt::sink::MemorySink;
use qdet_dt::waveform::DirectoryWaveformProvider;

fn origin() -> Origin {
    Origin {
        id: "origin-01".into(),
        time: t("2020-10-25T19:30:00Z"),
        latitude: 46.05,
        longitude: 7.53,
        depth_km: 8.4,
        magnitude: None,
    }
}

fn build_detector(dir: &std::path::Path, gap_tolerance: f64, gap_interpolation: bool) -> Detector {
    let stream_id = stream("CH.GRIMS..HHZ");
    write_trace(dir, &stream_id, t("2020-10-25T19:30:00Z"), wavelet(300, 100.0));
    let provider = DirectoryWaveformProvider::new(dir);

    Detector::builder("detector-01", origin())
        .gap_tolerance(gap_tolerance)
        .gap_interpolation(gap_interpolation)
        .on_hold(60.0)
        .stream(
            &stream_config("t1", "CH.GRIMS..HHZ", t("2020-10-25T19:30:01Z"), 0.8),
            &provider,
        )
        .unwrap()
        .build()
        .unwrap()
}

fn run(detector: Detector, records: Vec<Record>) -> MemorySink {
    let sink = MemorySink::new();
    let mut engine = Engine::new(vec![detector], DetectionPublisher::new(Box::new(sink.clone())));
    engine.run(records.into_iter().map(Ok)).unwrap();
    sink
}

#[test]
fn test_tolerated_gap_is_interpolated_and_matching_continues() {
    // 0.5 s gap in a 100 Hz stream with gap_tolerance = 1.0 s and
    // interpolation enabled: the processor keeps running and a template
    // repeat after the gap still fires.
    let dir = tempfile::tempdir().unwrap();
    let detector = build_detector(dir.path(), 1.0, true);
    let stream_id = stream("CH.GRIMS..HHZ");

    // 5 s of noise, then a 0.5 s hole, then more noise with the template
    // inserted 1.5 s after the resumption
    let mut records =
        records_from_signal(&stream_id, t("2020-10-25T19:30:00Z"), 100.0, &noise(500, 0.0));

    let mut tail = noise(1500, 7.0);
    tail[150..450].copy_from_slice(&wavelet(300, 100.0));
    records.extend(records_from_signal(
        &stream_id,
        t("2020-10-25T19:30:05.5Z"),
        100.0,
        tail.as_slice(),
    ));

    let sink = run(detector, records);
    let detections = sink.detections();
    assert_eq!(detections.len(), 1, "match after the interpolated gap fires");
    assert!(detections[0].fit > 0.99);
}

#[test]
fn test_gap_beyond_tolerance_produces_no_straddling_match() {
    // 2.0 s gap with gap_tolerance = 1.0 s: the channel resets, and a
    // template split across the hole must not produce a match.
    let dir = tempfile::tempdir().unwrap();
    let detector = build_detector(dir.path(), 1.0, true);
    let stream_id = stream("CH.GRIMS..HHZ");

    let template = wavelet(300, 100.0);

    // First half of the template ends flush with the pre-gap data
    let mut head = noise(500, 0.0);
    head[350..500].copy_from_slice(&template[..150]);
    let mut records =
        records_from_signal(&stream_id, t("2020-10-25T19:30:00Z"), 100.0, head.as_slice());

    // Second half resumes after a 2 s hole
    let mut tail = noise(1000, 3.0);
    tail[..150].copy_from_slice(&template[150..]);
    records.extend(records_from_signal(
        &stream_id,
        t("2020-10-25T19:30:07Z"),
        100.0,
        tail.as_slice(),
    ));

    let sink = run(detector, records);
    assert!(sink.is_empty(), "no spurious match straddling the gap");
}

#[test]
fn test_gap_within_tolerance_without_interpolation_resets() {
    // Same 0.5 s hole, but interpolation disabled: the stream restarts and
    // a template fully contained in the post-gap data still fires.
    let dir = tempfile::tempdir().unwrap();
    let detector = build_detector(dir.path(), 1.0, false);
    let stream_id = stream("CH.GRIMS..HHZ");

    let mut records =
        records_from_signal(&stream_id, t("2020-10-25T19:30:00Z"), 100.0, &noise(500, 0.0));

    let mut tail = noise(1500, 7.0);
    tail[400..700].copy_from_slice(&wavelet(300, 100.0));
    records.extend(records_from_signal(
        &stream_id,
        t("2020-10-25T19:30:05.5Z"),
        100.0,
        tail.as_slice(),
    ));

    let sink = run(detector, records);
    assert_eq!(sink.len(), 1, "full template after the reset still fires");
}
