// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Final stream of owned intervals, sorted by `(reference_id, start)` and
//! carrying the reference geometry sliced over each interval.

use crate::error::ConflationError;
use crate::geometry_utils::{haversine_length, slice_reference};
use crate::model::{AssignedMatch, CandidateMatch, MatchKey};
use crate::store::ReferenceLookup;
use geo_types::LineString;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::{debug, error, warn};

/// An assigned match with its geometry, in reference digitisation order.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicedMatch {
    pub assigned: AssignedMatch,
    pub geometry: LineString<f64>,
    /// Haversine length of `geometry` in meters
    pub length: f64,
}

#[derive(Debug)]
pub struct SkippedMatch {
    pub key: MatchKey,
    pub error: ConflationError,
}

#[derive(Debug, Default)]
pub struct AssemblyOutcome {
    pub matches: Vec<SlicedMatch>,
    /// Same-path overlaps clipped away before slicing
    pub fragments_clipped: usize,
    pub skipped: Vec<SkippedMatch>,
}

/// Clips overlaps left inside one reference. Cross-path overlaps were settled
/// by dispute resolution; anything left belongs to a single path, so the
/// later-starting fragment gives way.
fn clip_fragments(sorted: Vec<AssignedMatch>, epsilon: f64) -> (Vec<AssignedMatch>, usize) {
    let mut kept = Vec::with_capacity(sorted.len());
    let mut clipped = 0;

    let chunks = sorted
        .into_iter()
        .chunk_by(|assigned| assigned.reference_id.clone());

    for (_, group) in &chunks {
        let mut running: Option<(f64, String)> = None;

        for mut assigned in group {
            if let Some((running_end, running_path)) = &running {
                if *running_end - assigned.start > epsilon {
                    if *running_path != assigned.key.path_id {
                        error!(
                            "Assigned match {} on {} overlaps path {} after resolution",
                            assigned.key, assigned.reference_id, running_path
                        );
                        debug_assert!(false, "cross-path overlap survived resolution");
                    }

                    clipped += 1;
                    assigned.start = *running_end;
                    if assigned.end - assigned.start <= epsilon {
                        debug!("Dropping fragment {} fully covered by its path", assigned.key);
                        continue;
                    }
                }
            }

            running = match running {
                Some((running_end, running_path)) if running_end >= assigned.end => {
                    Some((running_end, running_path))
                }
                _ => Some((assigned.end, assigned.key.path_id.clone())),
            };
            kept.push(assigned);
        }
    }

    (kept, clipped)
}

/// Merges resolved and undisputed matches into one ordered, sliced stream.
pub fn assemble<L: ReferenceLookup + Sync + ?Sized>(
    resolved: Vec<AssignedMatch>,
    undisputed: Vec<CandidateMatch>,
    lookup: &L,
    epsilon: f64,
) -> AssemblyOutcome {
    let mut combined: Vec<AssignedMatch> = resolved
        .into_iter()
        .chain(undisputed.into_iter().map(AssignedMatch::from))
        .collect();

    combined.sort_by(|a, b| {
        a.reference_id
            .cmp(&b.reference_id)
            .then_with(|| OrderedFloat(a.start).cmp(&OrderedFloat(b.start)))
            .then_with(|| OrderedFloat(a.end).cmp(&OrderedFloat(b.end)))
            .then_with(|| a.key.cmp(&b.key))
    });

    let (normalized, fragments_clipped) = clip_fragments(combined, epsilon);

    let sliced: Vec<Result<SlicedMatch, SkippedMatch>> = normalized
        .into_par_iter()
        .map(|assigned| {
            let Some(reference) = lookup.reference_geometry(&assigned.reference_id) else {
                return Err(SkippedMatch {
                    error: ConflationError::UnknownReference(assigned.reference_id.clone()),
                    key: assigned.key,
                });
            };

            match slice_reference(reference, &assigned.interval()) {
                Some(geometry) => Ok(SlicedMatch {
                    length: haversine_length(&geometry),
                    geometry,
                    assigned,
                }),
                None => Err(SkippedMatch {
                    error: ConflationError::InvalidInterval {
                        key: assigned.key.to_string(),
                        start: assigned.start,
                        end: assigned.end,
                    },
                    key: assigned.key,
                }),
            }
        })
        .collect();

    let mut outcome = AssemblyOutcome {
        fragments_clipped,
        ..Default::default()
    };

    for result in sliced {
        match result {
            Ok(sliced_match) => outcome.matches.push(sliced_match),
            Err(skipped) => {
                warn!("Could not slice assigned match {}: {}", skipped.key, skipped.error);
                outcome.skipped.push(skipped);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interval, ReferenceGeometry};
    use crate::test_fixtures::{candidate, equator_reference};
    use ahash::AHashMap;

    const EPS: f64 = 1e-6;

    fn references() -> AHashMap<String, ReferenceGeometry> {
        let mut references = AHashMap::new();
        for reference in [
            equator_reference("a", 0.0, 100.0),
            equator_reference("b", 100.0, 100.0),
        ] {
            references.insert(reference.id.clone(), reference);
        }
        references
    }

    fn intervals(outcome: &AssemblyOutcome) -> Vec<(String, String, f64, f64)> {
        outcome
            .matches
            .iter()
            .map(|m| {
                (
                    m.assigned.reference_id.clone(),
                    m.assigned.key.path_id.clone(),
                    m.assigned.start,
                    m.assigned.end,
                )
            })
            .collect()
    }

    #[test]
    fn test_streams_are_merged_in_reference_order() {
        let resolved = vec![
            AssignedMatch::from_candidate(
                &candidate("p2", 0, 0, "b", 40.0, 100.0),
                Interval::new(60.0, 100.0),
            ),
            AssignedMatch::from_candidate(
                &candidate("p1", 0, 0, "b", 0.0, 60.0),
                Interval::new(0.0, 60.0),
            ),
        ];
        let undisputed = vec![candidate("p3", 0, 0, "a", 10.0, 90.0)];

        let outcome = assemble(resolved, undisputed, &references(), EPS);

        assert_eq!(
            intervals(&outcome),
            vec![
                ("a".to_string(), "p3".to_string(), 10.0, 90.0),
                ("b".to_string(), "p1".to_string(), 0.0, 60.0),
                ("b".to_string(), "p2".to_string(), 60.0, 100.0),
            ]
        );
        assert_eq!(outcome.fragments_clipped, 0);
        assert!((outcome.matches[0].length - 80.0).abs() < 1e-6);
        assert!((outcome.matches[2].length - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_path_fragments_are_clipped() {
        let undisputed = vec![
            candidate("p1", 0, 0, "a", 0.0, 50.0),
            candidate("p1", 0, 1, "a", 40.0, 70.0),
            candidate("p1", 1, 0, "a", 45.0, 60.0),
        ];

        let outcome = assemble(Vec::new(), undisputed, &references(), EPS);

        assert_eq!(
            intervals(&outcome),
            vec![
                ("a".to_string(), "p1".to_string(), 0.0, 50.0),
                ("a".to_string(), "p1".to_string(), 50.0, 70.0),
            ]
        );
        assert_eq!(outcome.fragments_clipped, 2);
    }

    #[test]
    fn test_unknown_reference_is_skipped() {
        let undisputed = vec![
            candidate("p1", 0, 0, "a", 0.0, 50.0),
            candidate("p1", 1, 0, "gone", 0.0, 50.0),
        ];

        let outcome = assemble(Vec::new(), undisputed, &references(), EPS);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].key, MatchKey::new("p1", 1, 0));
    }

    #[test]
    fn test_no_overlap_after_assembly() {
        let undisputed = vec![
            candidate("p1", 0, 0, "a", 0.0, 30.0),
            candidate("p1", 2, 0, "a", 20.0, 35.0),
            candidate("p1", 3, 0, "a", 25.0, 80.0),
            candidate("p2", 0, 0, "a", 80.0, 100.0),
        ];

        let outcome = assemble(Vec::new(), undisputed, &references(), EPS);
        for pair in outcome.matches.windows(2) {
            assert!(pair[0].assigned.end <= pair[1].assigned.start + EPS);
        }
    }
}
