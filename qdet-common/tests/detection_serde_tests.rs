//! Round-trip tests for published detection values
//!
//! Serializing and deserializing a detection must preserve the fit bit for
//! bit and all arrival times exactly.

use chrono::{DateTime, Utc};
use qdet_common::model::{AmplitudeMeasurement, Arrival, SignalUnit};
use qdet_common::{Detection, StreamId, TemplateMatch, TimeWindow};
use std::collections::HashMap;
use uuid::Uuid;

fn t(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn stream(s: &str) -> StreamId {
    s.parse().unwrap()
}

fn sample_detection() -> Detection {
    // Deliberately awkward values: odd nanoseconds, a fit that is not
    // representable in decimal exactly.
    let pick_time = qdet_common::time::add_seconds(t("2020-10-25T19:30:05Z"), 0.123456789);
    let arrival = Arrival::new(pick_time, stream("CH.GRIMS..HHZ"), "P");

    let window = TimeWindow::new(t("2020-10-25T19:30:04Z"), t("2020-10-25T19:30:08Z")).unwrap();
    let tm = TemplateMatch {
        processor_id: "grims-hhz".into(),
        arrival: arrival.clone(),
        coefficient: 0.912345678901234,
        lag_seconds: 0.37,
        window,
        template_fingerprint: 0x9e3779b97f4a7c15,
    };

    let mut template_matches = HashMap::new();
    template_matches.insert(tm.processor_id.clone(), tm);

    Detection {
        detection_id: Uuid::new_v4(),
        detector_id: "detector-01".into(),
        fit: 1.0 / 3.0,
        time: pick_time,
        latitude: 46.05,
        longitude: 7.53,
        depth_km: 8.4,
        magnitude: Some(2.7),
        stations_associated: 3,
        stations_used: 1,
        channels_associated: 3,
        channels_used: 1,
        template_matches,
        arrivals: Some(vec![arrival]),
        amplitudes: vec![AmplitudeMeasurement {
            stream_id: stream("CH.GRIMS..HHZ"),
            window,
            value: 3.2e-6,
            unit: SignalUnit::MeterPerSecond,
        }],
    }
}

#[test]
fn test_detection_roundtrip_preserves_fit_exactly() {
    let detection = sample_detection();
    let json = serde_json::to_string(&detection).unwrap();
    let back: Detection = serde_json::from_str(&json).unwrap();

    assert_eq!(back.fit.to_bits(), detection.fit.to_bits());
}

#[test]
fn test_detection_roundtrip_preserves_arrival_times_exactly() {
    let detection = sample_detection();
    let json = serde_json::to_string(&detection).unwrap();
    let back: Detection = serde_json::from_str(&json).unwrap();

    let orig = detection.arrivals.as_ref().unwrap();
    let round = back.arrivals.as_ref().unwrap();
    assert_eq!(orig.len(), round.len());
    for (a, b) in orig.iter().zip(round) {
        assert_eq!(a.pick.time, b.pick.time);
        assert_eq!(a.pick.stream_id, b.pick.stream_id);
    }

    let tm = &back.template_matches["grims-hhz"];
    assert_eq!(
        tm.arrival.pick.time,
        detection.template_matches["grims-hhz"].arrival.pick.time
    );
}

#[test]
fn test_detection_roundtrip_preserves_identity_and_counts() {
    let detection = sample_detection();
    let json = serde_json::to_string(&detection).unwrap();
    let back: Detection = serde_json::from_str(&json).unwrap();

    assert_eq!(back.detection_id, detection.detection_id);
    assert_eq!(back.detector_id, detection.detector_id);
    assert_eq!(back.channels_used, 1);
    assert_eq!(back.channels_associated, 3);
    assert_eq!(
        back.template_matches["grims-hhz"].template_fingerprint,
        0x9e3779b97f4a7c15
    );
    assert_eq!(back.amplitudes.len(), 1);
    assert_eq!(back.amplitudes[0].unit, SignalUnit::MeterPerSecond);
}
