//! Pick-offset table (POT)
//!
//! Square matrix of absolute pairwise pick-time differences over an
//! ordered set of arrivals, keyed by processor id. The linker compares a
//! candidate event's table against the reference table built from the
//! registered template arrivals: an association is only accepted when every
//! shared pair agrees within the configured tolerance.
//!
//! The matrix is immutable; masking is a per-validation membership test
//! rather than mutable enable/disable state, so validating one candidate
//! never disturbs another.

use qdet_common::model::Arrival;
use qdet_common::time::seconds_between;
use qdet_common::StreamId;
use std::collections::HashSet;

/// Immutable table of pairwise pick offsets
#[derive(Debug, Clone)]
pub struct PickOffsetTable {
    ids: Vec<String>,
    streams: Vec<StreamId>,
    /// Symmetric matrix, offsets[i][j] = |pick_i - pick_j| in seconds
    offsets: Vec<Vec<f64>>,
}

impl PickOffsetTable {
    /// Build the table from (processor id, arrival) pairs.
    ///
    /// Rows are ordered by processor id, so tables built from the same set
    /// in any order are identical.
    pub fn new(entries: &[(String, Arrival)]) -> Self {
        let mut sorted: Vec<&(String, Arrival)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let ids: Vec<String> = sorted.iter().map(|(id, _)| id.clone()).collect();
        let streams: Vec<StreamId> = sorted
            .iter()
            .map(|(_, arrival)| arrival.pick.stream_id.clone())
            .collect();
        let picks: Vec<_> = sorted.iter().map(|(_, arrival)| arrival.pick.time).collect();

        let n = picks.len();
        let mut offsets = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let offset = seconds_between(picks[i], picks[j]).abs();
                offsets[i][j] = offset;
                offsets[j][i] = offset;
            }
        }

        Self { ids, streams, offsets }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn processor_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn stream_ids(&self) -> &[StreamId] {
        &self.streams
    }

    fn index_of(&self, processor_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == processor_id)
    }

    /// Offset between two rows, by processor id.
    pub fn offset_between(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.offsets[i][j])
    }

    /// Span `max(pick) - min(pick)` across all rows.
    pub fn pick_offset(&self) -> Option<f64> {
        self.pick_offset_for(|_| true)
    }

    /// Span across the rows accepted by `enabled`.
    pub fn pick_offset_for(&self, enabled: impl Fn(usize) -> bool) -> Option<f64> {
        let mut max = None::<f64>;
        for i in 0..self.len() {
            if !enabled(i) {
                continue;
            }
            for j in (i + 1)..self.len() {
                if !enabled(j) {
                    continue;
                }
                let offset = self.offsets[i][j];
                max = Some(match max {
                    Some(current) => current.max(offset),
                    None => offset,
                });
            }
        }
        max.or(if self.ids.iter().enumerate().any(|(i, _)| enabled(i)) {
            Some(0.0)
        } else {
            None
        })
    }
}

/// Outcome of a pick-offset comparison
#[derive(Debug, Clone)]
pub struct PickOffsetValidation {
    pub ok: bool,
    /// Streams contributing at least one violating pair
    pub exceeded: HashSet<StreamId>,
}

/// Compare a candidate table against the reference within `tolerance`.
///
/// Only the reference rows whose processor id appears in the candidate take
/// part (the remaining rows are masked out). Exactly-equal pairs never
/// violate.
///
/// # Panics
///
/// Panics when the candidate contains a processor id the reference lacks;
/// the linker rebuilds the reference table on registration changes, so this
/// is a programmer error.
pub fn validate_pick_offsets(
    reference: &PickOffsetTable,
    candidate: &PickOffsetTable,
    tolerance: f64,
) -> PickOffsetValidation {
    for id in candidate.processor_ids() {
        assert!(
            reference.index_of(id).is_some(),
            "pick-offset table dimension mismatch: '{id}' missing from reference"
        );
    }

    let mut exceeded = HashSet::new();
    let mut ok = true;

    let ids = candidate.processor_ids();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let candidate_offset = candidate.offsets[i][j];
            let reference_offset = reference
                .offset_between(&ids[i], &ids[j])
                .expect("candidate ids are present in the reference");

            if (reference_offset - candidate_offset).abs() > tolerance {
                ok = false;
                exceeded.insert(candidate.streams[i].clone());
                exceeded.insert(candidate.streams[j].clone());
            }
        }
    }

    PickOffsetValidation { ok, exceeded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use qdet_common::time::add_seconds;

    fn t0() -> DateTime<Utc> {
        "2020-10-25T19:30:00Z".parse().unwrap()
    }

    fn entry(id: &str, stream: &str, offset: f64) -> (String, Arrival) {
        (
            id.to_string(),
            Arrival::new(add_seconds(t0(), offset), stream.parse().unwrap(), "P"),
        )
    }

    fn three_entries() -> Vec<(String, Arrival)> {
        vec![
            entry("p1", "CH.AAA..HHZ", 0.0),
            entry("p2", "CH.BBB..HHZ", 0.12),
            entry("p3", "CH.CCC..HHZ", 0.25),
        ]
    }

    #[test]
    fn test_symmetry_and_zero_diagonal() {
        let pot = PickOffsetTable::new(&three_entries());
        for i in 0..pot.len() {
            assert_eq!(pot.offsets[i][i], 0.0);
            for j in 0..pot.len() {
                assert_eq!(pot.offsets[i][j], pot.offsets[j][i]);
            }
        }
    }

    #[test]
    fn test_order_independent_construction() {
        let entries = three_entries();
        let mut shuffled = entries.clone();
        shuffled.rotate_left(1);
        shuffled.swap(0, 1);

        let a = PickOffsetTable::new(&entries);
        let b = PickOffsetTable::new(&shuffled);

        assert_eq!(a.processor_ids(), b.processor_ids());
        assert_eq!(a.offsets, b.offsets);
    }

    #[test]
    fn test_pick_offset_span() {
        let pot = PickOffsetTable::new(&three_entries());
        assert_eq!(pot.pick_offset(), Some(0.25));

        let single = PickOffsetTable::new(&[entry("p1", "CH.AAA..HHZ", 0.0)]);
        assert_eq!(single.pick_offset(), Some(0.0));

        let empty = PickOffsetTable::new(&[]);
        assert_eq!(empty.pick_offset(), None);
    }

    #[test]
    fn test_pick_offset_masked() {
        let pot = PickOffsetTable::new(&three_entries());
        // Mask out p3; remaining span is |0.12 - 0.0|
        let span = pot.pick_offset_for(|i| pot.processor_ids()[i] != "p3");
        assert_eq!(span, Some(0.12));
    }

    #[test]
    fn test_validate_accepts_matching_offsets() {
        let reference = PickOffsetTable::new(&three_entries());
        let candidate = PickOffsetTable::new(&[
            entry("p1", "CH.AAA..HHZ", 10.0),
            entry("p2", "CH.BBB..HHZ", 10.12),
            entry("p3", "CH.CCC..HHZ", 10.25),
        ]);

        let v = validate_pick_offsets(&reference, &candidate, 2.0e-6);
        assert!(v.ok);
        assert!(v.exceeded.is_empty());
    }

    #[test]
    fn test_validate_masks_absent_processors() {
        let reference = PickOffsetTable::new(&three_entries());
        // Candidate only covers p1/p2; p3's offsets must not participate
        let candidate = PickOffsetTable::new(&[
            entry("p1", "CH.AAA..HHZ", 10.0),
            entry("p2", "CH.BBB..HHZ", 10.12),
        ]);

        let v = validate_pick_offsets(&reference, &candidate, 2.0e-6);
        assert!(v.ok);
    }

    #[test]
    fn test_validate_collects_exceeded_streams() {
        let reference = PickOffsetTable::new(&three_entries());
        let candidate = PickOffsetTable::new(&[
            entry("p1", "CH.AAA..HHZ", 10.0),
            entry("p2", "CH.BBB..HHZ", 10.12),
            entry("p3", "CH.CCC..HHZ", 10.30), // 0.05 off the reference
        ]);

        let v = validate_pick_offsets(&reference, &candidate, 0.01);
        assert!(!v.ok);
        assert!(v.exceeded.contains(&"CH.CCC..HHZ".parse().unwrap()));
        // The violating pairs involve p1 and p2 as well
        assert!(v.exceeded.len() >= 2);
    }

    #[test]
    fn test_validate_exact_equality_never_violates() {
        let reference = PickOffsetTable::new(&three_entries());
        let candidate = PickOffsetTable::new(&[
            entry("p1", "CH.AAA..HHZ", 42.0),
            entry("p2", "CH.BBB..HHZ", 42.12),
            entry("p3", "CH.CCC..HHZ", 42.25),
        ]);

        // Zero tolerance: identical offsets still pass
        let v = validate_pick_offsets(&reference, &candidate, 0.0);
        assert!(v.ok, "exceeded: {:?}", v.exceeded);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn test_validate_unknown_processor_panics() {
        let reference = PickOffsetTable::new(&three_entries()[..2].to_vec());
        let candidate = PickOffsetTable::new(&three_entries());
        validate_pick_offsets(&reference, &candidate, 0.01);
    }
}
