// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use super::trimmability::TrimmabilityFact;
use super::{Dispute, UnresolvedDispute};
use crate::model::{AssignedMatch, CandidateMatch, Interval, MatchKey, PathId, TargetEdge};
use ahash::AHashMap;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Sort key deciding who keeps a contested interval. Smaller wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimantPriority {
    /// Number of matches in the owning path
    pub path_match_count: usize,
    /// Road class of the claimant's target edge, lower is more major
    pub road_class: Option<u8>,
    pub key: MatchKey,
}

impl ClaimantPriority {
    fn road_class_rank(&self) -> u16 {
        self.road_class.map_or(u16::MAX, u16::from)
    }
}

impl Ord for ClaimantPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path_match_count
            .cmp(&other.path_match_count)
            .then_with(|| self.road_class_rank().cmp(&other.road_class_rank()))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for ClaimantPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityTable {
    path_match_counts: AHashMap<PathId, usize>,
    edge_road_classes: AHashMap<(PathId, u32), u8>,
}

impl PriorityTable {
    pub fn build<'a>(
        matches: impl IntoIterator<Item = &'a CandidateMatch>,
        edges: impl IntoIterator<Item = &'a TargetEdge>,
    ) -> Self {
        let mut table = Self::default();

        for candidate in matches {
            *table
                .path_match_counts
                .entry(candidate.key.path_id.clone())
                .or_insert(0) += 1;
        }

        for edge in edges {
            if let Some(road_class) = edge.road_class {
                table
                    .edge_road_classes
                    .insert((edge.path_id.clone(), edge.path_edge_idx), road_class);
            }
        }

        table
    }

    pub fn priority(&self, candidate: &CandidateMatch) -> ClaimantPriority {
        ClaimantPriority {
            path_match_count: self
                .path_match_counts
                .get(&candidate.key.path_id)
                .copied()
                .unwrap_or(1),
            road_class: self
                .edge_road_classes
                .get(&(candidate.key.path_id.clone(), candidate.key.path_edge_idx))
                .copied(),
            key: candidate.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        dispute_id: String,
        assigned: Vec<AssignedMatch>,
        /// Claimants trimmed down to nothing
        dropped: Vec<MatchKey>,
    },
    Unresolved(UnresolvedDispute),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Yield {
    Trim(Interval),
    Consume,
}

/// How `loser` gives way to `winner`, if its trimmable boundaries allow it.
fn yield_to(
    loser: Interval,
    winner: Interval,
    fact: TrimmabilityFact,
    epsilon: f64,
) -> Option<Yield> {
    let starts_inside = loser.start >= winner.start - epsilon;
    let ends_inside = loser.end <= winner.end + epsilon;

    let remaining = match (starts_inside, ends_inside) {
        // both boundaries have to move for the loser to vanish
        (true, true) => return (fact.start && fact.end).then_some(Yield::Consume),
        (false, true) => fact.end.then(|| Interval::new(loser.start, winner.start)),
        (true, false) => fact.start.then(|| Interval::new(winner.end, loser.end)),
        // splitting around the other claimant would leave one side unowned
        (false, false) => None,
    }?;

    Some(if remaining.is_empty(epsilon) {
        Yield::Consume
    } else {
        Yield::Trim(remaining)
    })
}

/// Splits a dispute among its claimants, or gives up on it entirely.
///
/// Claimants are ranked by [`ClaimantPriority`]. For each overlapping pair of
/// different paths the lower-ranked claimant yields the overlap on the side
/// facing the winner; if that boundary is fixed the winner yields instead. A
/// pair where neither can move makes the whole dispute unresolved, so a
/// dispute is never partially trimmed.
pub fn resolve_dispute(
    dispute: &Dispute,
    facts: &AHashMap<MatchKey, TrimmabilityFact>,
    priorities: &PriorityTable,
    epsilon: f64,
) -> Resolution {
    let claimants = &dispute.claimants;

    let mut order: Vec<usize> = (0..claimants.len()).collect();
    order.sort_by_cached_key(|&i| priorities.priority(&claimants[i].candidate));

    let fact_of = |i: usize| {
        facts
            .get(&claimants[i].candidate.key)
            .copied()
            .unwrap_or_default()
    };

    let mut working: Vec<Option<Interval>> = claimants
        .iter()
        .map(|claimant| Some(claimant.candidate.interval()))
        .collect();

    for (rank, &winner) in order.iter().enumerate() {
        for &loser in &order[rank + 1..] {
            if claimants[winner].candidate.key.path_id == claimants[loser].candidate.key.path_id {
                continue;
            }

            let (Some(winner_interval), Some(loser_interval)) = (working[winner], working[loser])
            else {
                continue;
            };

            if winner_interval.overlap(&loser_interval) <= epsilon {
                continue;
            }

            let loser_yield = yield_to(loser_interval, winner_interval, fact_of(loser), epsilon);
            let (yielding, outcome) = if let Some(outcome) = loser_yield {
                (loser, outcome)
            } else if let Some(outcome) =
                yield_to(winner_interval, loser_interval, fact_of(winner), epsilon)
            {
                (winner, outcome)
            } else {
                warn!(
                    "Dispute {} unresolved: neither {} nor {} can give way",
                    dispute.dispute_id,
                    claimants[winner].candidate.key,
                    claimants[loser].candidate.key
                );
                return Resolution::Unresolved(dispute.to_unresolved());
            };

            working[yielding] = match outcome {
                Yield::Trim(interval) => Some(interval),
                Yield::Consume => None,
            };
        }
    }

    let mut assigned = Vec::with_capacity(claimants.len());
    let mut dropped = Vec::new();

    for (claimant, interval) in claimants.iter().zip(working) {
        match interval {
            Some(interval) => {
                assigned.push(AssignedMatch::from_candidate(&claimant.candidate, interval))
            }
            None => dropped.push(claimant.candidate.key.clone()),
        }
    }

    debug_assert!(
        assigned.iter().enumerate().all(|(i, a)| {
            assigned[i + 1..]
                .iter()
                .filter(|b| b.key.path_id != a.key.path_id)
                .all(|b| a.interval().overlap(&b.interval()) <= epsilon)
        }),
        "resolved dispute {} still overlaps",
        dispute.dispute_id
    );

    debug!(
        "Dispute {} resolved: {} assigned, {} dropped",
        dispute.dispute_id,
        assigned.len(),
        dropped.len()
    );

    Resolution::Resolved {
        dispute_id: dispute.dispute_id.clone(),
        assigned,
        dropped,
    }
}
