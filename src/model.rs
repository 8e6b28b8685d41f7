// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::error::ConflationError;
use geo_types::LineString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SharedStreets-style reference identifier
pub type ReferenceId = String;
pub type PathId = String;

/// Identity of one candidate match: `(Path, PathEdgeIndex, MatchIndex)`.
///
/// Ordering is path order, which is the traversal order the merger and the
/// trimmability analyzer rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub path_id: PathId,
    pub path_edge_idx: u32,
    pub match_idx: u32,
}

impl MatchKey {
    pub fn new(path_id: impl Into<PathId>, path_edge_idx: u32, match_idx: u32) -> Self {
        Self {
            path_id: path_id.into(),
            path_edge_idx,
            match_idx,
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path_id, self.path_edge_idx, self.match_idx)
    }
}

/// Half-open distance-along interval `[start, end)` on a reference geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self, epsilon: f64) -> bool {
        self.len() <= epsilon
    }

    /// Length of the intersection, zero when disjoint.
    pub fn overlap(&self, other: &Interval) -> f64 {
        (self.end.min(other.end) - self.start.max(other.start)).max(0.0)
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end > start).then_some(Interval { start, end })
    }

    /// Smallest interval covering both.
    pub fn hull(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn contains(&self, other: &Interval, epsilon: f64) -> bool {
        other.start >= self.start - epsilon && other.end <= self.end + epsilon
    }
}

/// An immutable directed line from the baseline network.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGeometry {
    pub id: ReferenceId,
    /// Nominal length in meters. Match intervals are measured against this.
    pub length: f64,
    pub geometry: LineString<f64>,
    /// Road class, lower is more major (0 = motorway)
    pub road_class: Option<u8>,
}

impl ReferenceGeometry {
    pub fn new(
        id: impl Into<ReferenceId>,
        length: f64,
        geometry: LineString<f64>,
        road_class: Option<u8>,
    ) -> Result<Self, ConflationError> {
        let id = id.into();

        if geometry.0.len() < 2 {
            return Err(ConflationError::MalformedReference {
                id,
                reason: format!("{} coordinates, need at least 2", geometry.0.len()),
            });
        }

        if !length.is_finite() || length <= 0.0 {
            return Err(ConflationError::MalformedReference {
                id,
                reason: format!("length {length} is not positive"),
            });
        }

        Ok(Self {
            id,
            length,
            geometry,
            road_class,
        })
    }
}

/// A directed segment of one target dataset, located in its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEdge {
    pub edge_id: String,
    pub path_id: PathId,
    pub path_edge_idx: u32,
    /// Nominal length in meters
    pub length: f64,
    /// Classification mapped onto the reference road class scale
    pub road_class: Option<u8>,
}

/// A claimed interval of a reference geometry for one target edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    #[serde(flatten)]
    pub key: MatchKey,
    pub edge_id: String,
    pub is_forward: bool,
    #[serde(rename = "shst_reference_id")]
    pub reference_id: ReferenceId,
    pub start: f64,
    pub end: f64,
}

impl CandidateMatch {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    /// Measure where the target edge enters this match.
    pub fn head_measure(&self) -> f64 {
        if self.is_forward { self.start } else { self.end }
    }

    /// Measure where the target edge leaves this match.
    pub fn tail_measure(&self) -> f64 {
        if self.is_forward { self.end } else { self.start }
    }
}

/// Final owned interval. No two assigned matches on one reference overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedMatch {
    pub reference_id: ReferenceId,
    pub start: f64,
    pub end: f64,
    #[serde(flatten)]
    pub key: MatchKey,
    pub edge_id: String,
    pub is_forward: bool,
}

impl AssignedMatch {
    pub fn from_candidate(candidate: &CandidateMatch, interval: Interval) -> Self {
        Self {
            reference_id: candidate.reference_id.clone(),
            start: interval.start,
            end: interval.end,
            key: candidate.key.clone(),
            edge_id: candidate.edge_id.clone(),
            is_forward: candidate.is_forward,
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }
}

impl From<CandidateMatch> for AssignedMatch {
    fn from(candidate: CandidateMatch) -> Self {
        Self {
            start: candidate.start,
            end: candidate.end,
            reference_id: candidate.reference_id,
            key: candidate.key,
            edge_id: candidate.edge_id,
            is_forward: candidate.is_forward,
        }
    }
}

/// A candidate match as it comes out of the store, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatchRecord {
    pub path_id: Option<String>,
    pub path_edge_idx: Option<u32>,
    pub edge_id: Option<String>,
    pub match_idx: Option<u32>,
    pub is_forward: Option<bool>,
    #[serde(alias = "shst_reference_id")]
    pub reference_id: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl TryFrom<CandidateMatchRecord> for CandidateMatch {
    type Error = ConflationError;

    fn try_from(record: CandidateMatchRecord) -> Result<Self, Self::Error> {
        let key = MatchKey {
            path_id: record
                .path_id
                .ok_or(ConflationError::MissingField("path_id"))?,
            path_edge_idx: record
                .path_edge_idx
                .ok_or(ConflationError::MissingField("path_edge_idx"))?,
            match_idx: record
                .match_idx
                .ok_or(ConflationError::MissingField("match_idx"))?,
        };
        let edge_id = record
            .edge_id
            .ok_or(ConflationError::MissingField("edge_id"))?;
        let is_forward = record
            .is_forward
            .ok_or(ConflationError::MissingField("is_forward"))?;
        let reference_id = record
            .reference_id
            .ok_or(ConflationError::MissingField("reference_id"))?;
        let start = record.start.ok_or(ConflationError::MissingField("start"))?;
        let end = record.end.ok_or(ConflationError::MissingField("end"))?;

        if !start.is_finite() || !end.is_finite() || start < 0.0 || start >= end {
            return Err(ConflationError::InvalidInterval {
                key: key.to_string(),
                start,
                end,
            });
        }

        Ok(CandidateMatch {
            key,
            edge_id,
            is_forward,
            reference_id,
            start,
            end,
        })
    }
}
