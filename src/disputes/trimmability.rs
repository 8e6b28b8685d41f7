// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::ConflationConfig;
use crate::geometry_utils::{haversine_distance, point_at_measure};
use crate::model::{CandidateMatch, MatchKey};
use crate::store::ReferenceLookup;
use ahash::AHashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use tracing::trace;

/// Whether each boundary of a match, in reference measure terms, may move
/// inward without opening a new gap in its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrimmabilityFact {
    pub start: bool,
    pub end: bool,
}

/// True when `next` begins exactly where `prev` ends, following the path.
fn is_contiguous<L: ReferenceLookup + ?Sized>(
    prev: &CandidateMatch,
    next: &CandidateMatch,
    lookup: &L,
    config: &ConflationConfig,
) -> bool {
    if prev.reference_id == next.reference_id && prev.is_forward == next.is_forward {
        return (prev.tail_measure() - next.head_measure()).abs() <= config.interval_epsilon;
    }

    let (Some(prev_ref), Some(next_ref)) = (
        lookup.reference_geometry(&prev.reference_id),
        lookup.reference_geometry(&next.reference_id),
    ) else {
        trace!(
            "Missing reference for {} or {}, treating as a gap",
            prev.key, next.key
        );
        return false;
    };

    let tail = point_at_measure(prev_ref, prev.tail_measure());
    let head = point_at_measure(next_ref, next.head_measure());
    haversine_distance(tail, head) <= config.contiguity_tolerance_m
}

/// Analyzes the matches of one path. Input order does not matter; matches are
/// walked in `(path_edge_idx, match_idx)` order.
pub fn analyze_path<L: ReferenceLookup + ?Sized>(
    path_matches: &[&CandidateMatch],
    lookup: &L,
    config: &ConflationConfig,
) -> Vec<(MatchKey, TrimmabilityFact)> {
    let ordered: Vec<&CandidateMatch> = path_matches
        .iter()
        .copied()
        .sorted_by(|a, b| a.key.cmp(&b.key))
        .collect();

    // links[i] is whether ordered[i] flows straight into ordered[i + 1]
    let links: Vec<bool> = ordered
        .iter()
        .tuple_windows()
        .map(|(prev, next)| is_contiguous(prev, next, lookup, config))
        .collect();

    ordered
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let head_trimmable = i == 0 || !links[i - 1];
            let tail_trimmable = i + 1 == ordered.len() || !links[i];

            let fact = if candidate.is_forward {
                TrimmabilityFact {
                    start: head_trimmable,
                    end: tail_trimmable,
                }
            } else {
                TrimmabilityFact {
                    start: tail_trimmable,
                    end: head_trimmable,
                }
            };

            (candidate.key.clone(), fact)
        })
        .collect()
}

/// Runs [`analyze_path`] over every path, in parallel.
pub fn analyze_all_paths<L: ReferenceLookup + Sync + ?Sized>(
    matches: &[CandidateMatch],
    lookup: &L,
    config: &ConflationConfig,
) -> AHashMap<MatchKey, TrimmabilityFact> {
    let by_path = matches
        .iter()
        .into_group_map_by(|candidate| candidate.key.path_id.clone());

    let paths: Vec<Vec<&CandidateMatch>> = by_path.into_values().collect();

    paths
        .par_iter()
        .flat_map_iter(|path_matches| analyze_path(path_matches, lookup, config))
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReferenceGeometry;
    use crate::test_fixtures::{candidate, equator_reference};

    fn references() -> AHashMap<String, ReferenceGeometry> {
        let mut references = AHashMap::new();
        // r1 covers 0..100m, r2 continues from 100m to 200m, r3 sits 500m away
        for reference in [
            equator_reference("r1", 0.0, 100.0),
            equator_reference("r2", 100.0, 100.0),
            equator_reference("r3", 500.0, 100.0),
        ] {
            references.insert(reference.id.clone(), reference);
        }
        references
    }

    fn facts(matches: &[CandidateMatch]) -> AHashMap<MatchKey, TrimmabilityFact> {
        analyze_all_paths(matches, &references(), &ConflationConfig::default())
    }

    #[test]
    fn test_single_match_is_trimmable_both_sides() {
        let matches = vec![candidate("p1", 0, 0, "r1", 20.0, 80.0)];
        let facts = facts(&matches);
        assert_eq!(
            facts[&MatchKey::new("p1", 0, 0)],
            TrimmabilityFact {
                start: true,
                end: true
            }
        );
    }

    #[test]
    fn test_contiguous_interior_boundaries_are_fixed() {
        let matches = vec![
            candidate("p1", 0, 0, "r1", 0.0, 40.0),
            candidate("p1", 1, 0, "r1", 40.0, 70.0),
            candidate("p1", 2, 0, "r1", 70.0, 100.0),
        ];
        let facts = facts(&matches);

        assert_eq!(
            facts[&MatchKey::new("p1", 0, 0)],
            TrimmabilityFact {
                start: true,
                end: false
            }
        );
        assert_eq!(
            facts[&MatchKey::new("p1", 1, 0)],
            TrimmabilityFact {
                start: false,
                end: false
            }
        );
        assert_eq!(
            facts[&MatchKey::new("p1", 2, 0)],
            TrimmabilityFact {
                start: false,
                end: true
            }
        );
    }

    #[test]
    fn test_existing_gap_keeps_boundaries_trimmable() {
        let matches = vec![
            candidate("p1", 0, 0, "r1", 0.0, 40.0),
            candidate("p1", 0, 1, "r1", 45.0, 100.0),
        ];
        let facts = facts(&matches);

        assert!(facts[&MatchKey::new("p1", 0, 0)].end);
        assert!(facts[&MatchKey::new("p1", 0, 1)].start);
    }

    #[test]
    fn test_contiguity_across_references() {
        let matches = vec![
            candidate("p1", 0, 0, "r1", 50.0, 100.0),
            candidate("p1", 1, 0, "r2", 0.0, 50.0),
            candidate("p1", 2, 0, "r3", 0.0, 50.0),
        ];
        let facts = facts(&matches);

        assert!(!facts[&MatchKey::new("p1", 0, 0)].end);
        assert!(!facts[&MatchKey::new("p1", 1, 0)].start);
        // r3 is far away from the end of the r2 match
        assert!(facts[&MatchKey::new("p1", 1, 0)].end);
        assert!(facts[&MatchKey::new("p1", 2, 0)].start);
    }

    #[test]
    fn test_backward_matches_map_head_to_end() {
        // path runs west: r2 backwards, then r1 backwards
        let mut first = candidate("p1", 0, 0, "r2", 0.0, 60.0);
        first.is_forward = false;
        let mut second = candidate("p1", 1, 0, "r1", 30.0, 100.0);
        second.is_forward = false;

        let facts = facts(&[first, second]);

        // the path leaves r2 at measure 0 and enters r1 at measure 100
        assert_eq!(
            facts[&MatchKey::new("p1", 0, 0)],
            TrimmabilityFact {
                start: false,
                end: true
            }
        );
        assert_eq!(
            facts[&MatchKey::new("p1", 1, 0)],
            TrimmabilityFact {
                start: true,
                end: false
            }
        );
    }

    #[test]
    fn test_missing_reference_counts_as_gap() {
        let matches = vec![
            candidate("p1", 0, 0, "r1", 0.0, 100.0),
            candidate("p1", 1, 0, "nowhere", 0.0, 10.0),
        ];
        let facts = facts(&matches);
        assert!(facts[&MatchKey::new("p1", 0, 0)].end);
    }

    #[test]
    fn test_paths_are_independent() {
        let matches = vec![
            candidate("p1", 0, 0, "r1", 0.0, 40.0),
            candidate("p2", 0, 0, "r1", 40.0, 70.0),
        ];
        let facts = facts(&matches);
        assert!(facts[&MatchKey::new("p1", 0, 0)].end);
        assert!(facts[&MatchKey::new("p2", 0, 0)].start);
    }
}
