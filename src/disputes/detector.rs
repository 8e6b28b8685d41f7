// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use super::{Claimant, Dispute};
use crate::model::{CandidateMatch, Interval, ReferenceId};
use ahash::AHashMap;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::debug;

/// Disputes and untouched matches found on one reference geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub reference_id: ReferenceId,
    pub disputes: Vec<Dispute>,
    /// Matches with no overlap against any other path, in sweep order
    pub undisputed: Vec<CandidateMatch>,
}

/// Union-find with path halving. Equal ranks keep the lower index as root so
/// representatives don't depend on union order.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let grandparent = self.parent[self.parent[x]];
            self.parent[x] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }

        let (root, child) = match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => (rb, ra),
            Ordering::Greater => (ra, rb),
            Ordering::Equal => {
                let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
                self.rank[root] += 1;
                (root, child)
            }
        };
        self.parent[child] = root;
    }
}

fn sweep_order(a: &CandidateMatch, b: &CandidateMatch) -> Ordering {
    OrderedFloat(a.start)
        .cmp(&OrderedFloat(b.start))
        .then_with(|| OrderedFloat(a.end).cmp(&OrderedFloat(b.end)))
        .then_with(|| a.key.cmp(&b.key))
}

/// Sweeps the matches of one reference geometry in start order and groups
/// every cross-path overlap longer than `epsilon` into disputes.
///
/// Overlaps between matches of the same path are internal fragmentation and
/// never create or join a dispute on their own.
pub fn detect_disputes(
    reference_id: &str,
    matches: &[CandidateMatch],
    epsilon: f64,
) -> DetectionOutcome {
    let mut order: Vec<usize> = (0..matches.len()).collect();
    order.sort_by(|&a, &b| sweep_order(&matches[a], &matches[b]));

    let mut sets = DisjointSet::new(matches.len());
    let mut contested: Vec<Option<Interval>> = vec![None; matches.len()];
    let mut active: Vec<usize> = Vec::new();

    for &i in &order {
        let current = &matches[i];
        active.retain(|&j| matches[j].end - current.start > epsilon);

        for &j in &active {
            let other = &matches[j];
            if other.key.path_id == current.key.path_id {
                continue;
            }

            let Some(shared) = current.interval().intersection(&other.interval()) else {
                continue;
            };
            if shared.is_empty(epsilon) {
                continue;
            }

            sets.union(i, j);
            for k in [i, j] {
                contested[k] = Some(match contested[k] {
                    Some(existing) => existing.hull(&shared),
                    None => shared,
                });
            }
        }

        active.push(i);
    }

    let mut members: AHashMap<usize, Vec<usize>> = AHashMap::new();
    let mut roots: Vec<usize> = Vec::new();
    let mut undisputed = Vec::new();

    for &i in &order {
        if contested[i].is_some() {
            let root = sets.find(i);
            members
                .entry(root)
                .or_insert_with(|| {
                    roots.push(root);
                    Vec::new()
                })
                .push(i);
        } else {
            undisputed.push(matches[i].clone());
        }
    }

    let mut disputes: Vec<Dispute> = roots
        .iter()
        .filter_map(|root| members.get(root))
        .map(|group| {
            let claimants: Vec<Claimant> = group
                .iter()
                .filter_map(|&i| {
                    contested[i].map(|interval| Claimant {
                        candidate: matches[i].clone(),
                        contested: interval,
                    })
                })
                .collect();

            let contested = claimants
                .iter()
                .map(|claimant| claimant.contested)
                .reduce(|acc, interval| acc.hull(&interval))
                .unwrap_or(Interval::new(0.0, 0.0));

            Dispute {
                dispute_id: String::new(),
                reference_id: reference_id.to_string(),
                contested,
                claimants,
            }
        })
        .collect();

    disputes.sort_by(|a, b| {
        OrderedFloat(a.contested.start)
            .cmp(&OrderedFloat(b.contested.start))
            .then_with(|| OrderedFloat(a.contested.end).cmp(&OrderedFloat(b.contested.end)))
    });
    for (ordinal, dispute) in disputes.iter_mut().enumerate() {
        dispute.dispute_id = format!("{reference_id}#{ordinal}");
    }

    if !disputes.is_empty() {
        debug!(
            "Reference {}: {} disputes, {} undisputed matches",
            reference_id,
            disputes.len(),
            undisputed.len()
        );
    }

    DetectionOutcome {
        reference_id: reference_id.to_string(),
        disputes,
        undisputed,
    }
}

/// Groups matches by reference geometry and runs [`detect_disputes`] on each
/// group in parallel. Outcomes come back ordered by reference id.
pub fn detect_all_disputes(matches: &[CandidateMatch], epsilon: f64) -> Vec<DetectionOutcome> {
    let sorted: Vec<&CandidateMatch> = matches
        .iter()
        .sorted_by(|a, b| a.reference_id.cmp(&b.reference_id))
        .collect();

    let chunks = sorted
        .into_iter()
        .chunk_by(|candidate| candidate.reference_id.clone());
    let groups: Vec<(ReferenceId, Vec<CandidateMatch>)> = chunks
        .into_iter()
        .map(|(reference_id, group)| (reference_id, group.cloned().collect()))
        .collect();

    groups
        .par_iter()
        .map(|(reference_id, group)| detect_disputes(reference_id, group, epsilon))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchKey;
    use crate::test_fixtures::candidate;

    const EPS: f64 = 1e-6;

    fn claimant_keys(dispute: &Dispute) -> Vec<MatchKey> {
        dispute
            .claimants
            .iter()
            .map(|claimant| claimant.candidate.key.clone())
            .collect()
    }

    #[test]
    fn test_two_paths_overlap() {
        let matches = vec![
            candidate("p1", 0, 0, "r", 0.0, 60.0),
            candidate("p2", 0, 0, "r", 40.0, 100.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        assert!(outcome.undisputed.is_empty());
        assert_eq!(outcome.disputes.len(), 1);

        let dispute = &outcome.disputes[0];
        assert_eq!(dispute.dispute_id, "r#0");
        assert_eq!(dispute.contested, Interval::new(40.0, 60.0));
        assert_eq!(dispute.claimants.len(), 2);
        for claimant in &dispute.claimants {
            assert_eq!(claimant.contested, Interval::new(40.0, 60.0));
            assert!(
                claimant
                    .candidate
                    .interval()
                    .contains(&claimant.contested, EPS)
            );
        }
    }

    #[test]
    fn test_same_path_overlap_is_not_a_dispute() {
        let matches = vec![
            candidate("p1", 0, 0, "r", 0.0, 60.0),
            candidate("p1", 1, 0, "r", 50.0, 100.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        assert!(outcome.disputes.is_empty());
        assert_eq!(outcome.undisputed.len(), 2);
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        let matches = vec![
            candidate("p1", 0, 0, "r", 0.0, 50.0),
            candidate("p2", 0, 0, "r", 50.0, 100.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        assert!(outcome.disputes.is_empty());
        assert_eq!(outcome.undisputed.len(), 2);
    }

    #[test]
    fn test_chained_overlaps_form_one_dispute() {
        // p1 overlaps p2, p2 overlaps p3, p1 and p3 never touch
        let matches = vec![
            candidate("p3", 0, 0, "r", 70.0, 100.0),
            candidate("p1", 0, 0, "r", 0.0, 40.0),
            candidate("p2", 0, 0, "r", 30.0, 80.0),
            candidate("p4", 0, 0, "r", 120.0, 150.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        assert_eq!(outcome.disputes.len(), 1);
        assert_eq!(
            claimant_keys(&outcome.disputes[0]),
            vec![
                MatchKey::new("p1", 0, 0),
                MatchKey::new("p2", 0, 0),
                MatchKey::new("p3", 0, 0)
            ]
        );
        assert_eq!(outcome.disputes[0].contested, Interval::new(30.0, 80.0));
        assert_eq!(outcome.disputes[0].claimants[1].contested, Interval::new(30.0, 80.0));

        assert_eq!(outcome.undisputed.len(), 1);
        assert_eq!(outcome.undisputed[0].key, MatchKey::new("p4", 0, 0));
    }

    #[test]
    fn test_same_path_fragment_only_joins_through_other_path() {
        // p1's second fragment overlaps p1's first (ignored) and p2 (dispute)
        let matches = vec![
            candidate("p1", 0, 0, "r", 0.0, 30.0),
            candidate("p1", 0, 1, "r", 20.0, 50.0),
            candidate("p2", 0, 0, "r", 45.0, 70.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        assert_eq!(outcome.disputes.len(), 1);
        assert_eq!(
            claimant_keys(&outcome.disputes[0]),
            vec![MatchKey::new("p1", 0, 1), MatchKey::new("p2", 0, 0)]
        );
        assert_eq!(outcome.undisputed[0].key, MatchKey::new("p1", 0, 0));
    }

    #[test]
    fn test_separate_disputes_are_numbered_by_position() {
        let matches = vec![
            candidate("p3", 0, 0, "r", 200.0, 260.0),
            candidate("p4", 0, 0, "r", 250.0, 300.0),
            candidate("p1", 0, 0, "r", 0.0, 60.0),
            candidate("p2", 0, 0, "r", 40.0, 100.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        let ids: Vec<&str> = outcome
            .disputes
            .iter()
            .map(|dispute| dispute.dispute_id.as_str())
            .collect();
        assert_eq!(ids, vec!["r#0", "r#1"]);
        assert_eq!(outcome.disputes[1].contested, Interval::new(250.0, 260.0));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let matches = vec![
            candidate("p2", 0, 0, "a", 40.0, 100.0),
            candidate("p1", 0, 0, "a", 0.0, 60.0),
            candidate("p1", 1, 0, "b", 0.0, 10.0),
            candidate("p3", 2, 0, "b", 5.0, 10.0),
            candidate("p3", 3, 0, "c", 0.0, 10.0),
        ];

        let first = detect_all_disputes(&matches, EPS);
        let mut reversed = matches.clone();
        reversed.reverse();
        let second = detect_all_disputes(&reversed, EPS);

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].reference_id, "a");
        assert_eq!(first[2].disputes.len(), 0);
    }

    #[test]
    fn test_every_match_in_at_most_one_dispute() {
        let matches = vec![
            candidate("p1", 0, 0, "r", 0.0, 50.0),
            candidate("p2", 0, 0, "r", 10.0, 20.0),
            candidate("p3", 0, 0, "r", 15.0, 60.0),
            candidate("p4", 0, 0, "r", 55.0, 90.0),
            candidate("p5", 0, 0, "r", 95.0, 99.0),
        ];

        let outcome = detect_disputes("r", &matches, EPS);
        let mut seen: Vec<MatchKey> = outcome.disputes.iter().flat_map(claimant_keys).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(total + outcome.undisputed.len(), matches.len());
    }
}
