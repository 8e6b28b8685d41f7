// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Contention between paths over the same stretch of reference geometry.
//!
//! Detection finds groups of overlapping matches owned by different paths,
//! trimmability says which match boundaries may move without tearing a path
//! apart, and resolution turns each group into non-overlapping assigned
//! matches or keeps it as an unresolved dispute for review.

pub mod detector;
pub mod resolver;
pub mod trimmability;

use crate::model::{CandidateMatch, Interval, ReferenceId};
use serde::{Deserialize, Serialize};

pub use detector::{DetectionOutcome, detect_all_disputes, detect_disputes};
pub use resolver::{ClaimantPriority, PriorityTable, Resolution, resolve_dispute};
pub use trimmability::{TrimmabilityFact, analyze_all_paths, analyze_path};

/// One overlapping match inside a dispute.
#[derive(Debug, Clone, PartialEq)]
pub struct Claimant {
    pub candidate: CandidateMatch,
    /// Hull of this match's overlaps with other-path claimants, always inside
    /// the original interval.
    pub contested: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispute {
    /// `"{reference_id}#{ordinal}"`
    pub dispute_id: String,
    pub reference_id: ReferenceId,
    pub contested: Interval,
    pub claimants: Vec<Claimant>,
}

impl Dispute {
    pub fn to_unresolved(&self) -> UnresolvedDispute {
        UnresolvedDispute {
            dispute_id: self.dispute_id.clone(),
            reference_id: self.reference_id.clone(),
            contested_start: self.contested.start,
            contested_end: self.contested.end,
            claimants: self
                .claimants
                .iter()
                .map(|claimant| UnresolvedClaimant {
                    path_id: claimant.candidate.key.path_id.clone(),
                    path_edge_idx: claimant.candidate.key.path_edge_idx,
                    edge_id: claimant.candidate.edge_id.clone(),
                    match_idx: claimant.candidate.key.match_idx,
                    start: claimant.candidate.start,
                    end: claimant.candidate.end,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedClaimant {
    pub path_id: String,
    pub path_edge_idx: u32,
    pub edge_id: String,
    pub match_idx: u32,
    /// Original (untrimmed) interval of the claimant
    pub start: f64,
    pub end: f64,
}

/// A dispute no claimant could yield on. Kept as-is for external review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedDispute {
    pub dispute_id: String,
    pub reference_id: ReferenceId,
    pub contested_start: f64,
    pub contested_end: f64,
    pub claimants: Vec<UnresolvedClaimant>,
}
