// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::assembler::SlicedMatch;
use crate::config::ConflationConfig;
use crate::error::ConflationError;
use crate::geometry_utils::{haversine_distance, haversine_length};
use crate::model::{MatchKey, PathId, TargetEdge};
use geo_types::{Coord, LineString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One piece of a merged path: a match or the gap bridged between two matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompositionEntry {
    /// Match id (`path:edge:match`), `None` for gaps
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shst_reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    /// Geometric length in meters
    pub length: f64,
    pub is_gap: bool,
}

impl DecompositionEntry {
    pub fn gap(length: f64) -> Self {
        Self {
            id: None,
            shst_reference_id: None,
            start: None,
            end: None,
            length,
            is_gap: true,
        }
    }

    fn from_match(sliced: &SlicedMatch) -> Self {
        Self {
            id: Some(sliced.assigned.key.to_string()),
            shst_reference_id: Some(sliced.assigned.reference_id.clone()),
            start: Some(sliced.assigned.start),
            end: Some(sliced.assigned.end),
            length: sliced.length,
            is_gap: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeAlgorithm {
    /// End and start coincide within the contiguity tolerance
    Contiguous,
    /// A straight segment bridges the gap
    GapBridge,
}

/// Node of the merge history tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStep {
    pub algorithm: MergeAlgorithm,
    pub gap_length: f64,
    pub a_match_ids: Vec<String>,
    pub b_match_ids: Vec<String>,
    /// Histories of the two inputs, `None` for leaves. Omitted when both are leaves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_merges: Option<Box<[Option<MergeStep>; 2]>>,
}

/// Why two merged paths were not joined. Not an error: the caller moves on to
/// another pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeRejection {
    DifferentPaths,
    /// One side has no geometry (unmatched target edge)
    Ungeometric,
    /// Both sides trace back to these matches
    SharedMatches(Vec<MatchKey>),
    /// The two sides interleave in path order
    OutOfOrder,
    GapTooLarge { gap: f64, max_gap: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub edge_id: String,
    pub length: f64,
}

/// Continuous geometry assembled from one or more matches of a single path.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPath {
    pub path_id: PathId,
    /// Follows the target path's direction. `None` for unmatched target edges.
    pub geometry: Option<LineString<f64>>,
    pub path_decomposition_info: Vec<DecompositionEntry>,
    pub merge_history: Option<MergeStep>,
    pub match_ids: BTreeSet<MatchKey>,
    /// Contributing target edges by path edge index
    pub target_edges: BTreeMap<u32, EdgeSummary>,
    pub merged_length: f64,
    pub target_length: f64,
    pub length_difference: f64,
    /// `None` when the target length is zero
    pub length_ratio: Option<f64>,
}

impl MergedPath {
    fn build(
        path_id: PathId,
        geometry: Option<LineString<f64>>,
        path_decomposition_info: Vec<DecompositionEntry>,
        merge_history: Option<MergeStep>,
        match_ids: BTreeSet<MatchKey>,
        target_edges: BTreeMap<u32, EdgeSummary>,
    ) -> Self {
        let merged_length = geometry.as_ref().map_or(0.0, haversine_length);
        let target_length: f64 = target_edges.values().map(|edge| edge.length).sum();

        Self {
            path_id,
            geometry,
            path_decomposition_info,
            merge_history,
            match_ids,
            target_edges,
            merged_length,
            target_length,
            length_difference: (merged_length - target_length).abs(),
            length_ratio: (target_length > 0.0).then(|| merged_length / target_length),
        }
    }

    /// Leaf for one assigned match. Backward matches are reversed so the
    /// geometry runs the way the target edge does.
    pub fn from_match(sliced: &SlicedMatch, edge: EdgeSummary) -> Self {
        let mut coords = sliced.geometry.0.clone();
        if !sliced.assigned.is_forward {
            coords.reverse();
        }

        Self::build(
            sliced.assigned.key.path_id.clone(),
            Some(LineString::new(coords)),
            vec![DecompositionEntry::from_match(sliced)],
            None,
            BTreeSet::from([sliced.assigned.key.clone()]),
            BTreeMap::from([(sliced.assigned.key.path_edge_idx, edge)]),
        )
    }

    /// Pass-through for a target edge the matcher found nothing for.
    pub fn unmatched(edge: &TargetEdge) -> Self {
        Self::build(
            edge.path_id.clone(),
            None,
            Vec::new(),
            None,
            BTreeSet::new(),
            BTreeMap::from([(
                edge.path_edge_idx,
                EdgeSummary {
                    edge_id: edge.edge_id.clone(),
                    length: edge.length,
                },
            )]),
        )
    }

    pub fn first_key(&self) -> Option<&MatchKey> {
        self.match_ids.first()
    }

    pub fn last_key(&self) -> Option<&MatchKey> {
        self.match_ids.last()
    }

    pub fn first_edge_idx(&self) -> Option<u32> {
        self.target_edges.keys().next().copied()
    }

    pub fn last_edge_idx(&self) -> Option<u32> {
        self.target_edges.keys().next_back().copied()
    }

    pub fn start_point(&self) -> Option<Coord> {
        self.geometry.as_ref().and_then(|line| line.0.first().copied())
    }

    pub fn end_point(&self) -> Option<Coord> {
        self.geometry.as_ref().and_then(|line| line.0.last().copied())
    }

    fn match_id_strings(&self) -> Vec<String> {
        self.match_ids.iter().map(ToString::to_string).collect()
    }

    /// Joins two merged paths of the same path, earlier one first.
    pub fn try_merge(
        &self,
        other: &MergedPath,
        config: &ConflationConfig,
    ) -> Result<MergedPath, MergeRejection> {
        if self.path_id != other.path_id {
            return Err(MergeRejection::DifferentPaths);
        }

        let shared: Vec<MatchKey> = self
            .match_ids
            .intersection(&other.match_ids)
            .cloned()
            .collect();
        if !shared.is_empty() {
            return Err(MergeRejection::SharedMatches(shared));
        }

        let (a, b) = if self.first_key() <= other.first_key() {
            (self, other)
        } else {
            (other, self)
        };

        let (Some(a_line), Some(b_line)) = (a.geometry.as_ref(), b.geometry.as_ref()) else {
            return Err(MergeRejection::Ungeometric);
        };
        let (Some(a_end), Some(b_start)) = (a.end_point(), b.start_point()) else {
            return Err(MergeRejection::Ungeometric);
        };

        if a.last_key() >= b.first_key() {
            return Err(MergeRejection::OutOfOrder);
        }

        let gap = haversine_distance(a_end, b_start);
        if gap > config.max_gap_m {
            return Err(MergeRejection::GapTooLarge {
                gap,
                max_gap: config.max_gap_m,
            });
        }

        let mut coords = a_line.0.clone();
        let skip = usize::from(a_end == b_start);
        coords.extend(b_line.0.iter().skip(skip).copied());

        let mut decomposition = a.path_decomposition_info.clone();
        decomposition.push(DecompositionEntry::gap(gap));
        decomposition.extend(b.path_decomposition_info.iter().cloned());

        let algorithm = if gap <= config.contiguity_tolerance_m {
            MergeAlgorithm::Contiguous
        } else {
            MergeAlgorithm::GapBridge
        };

        let sub_merges = (a.merge_history.is_some() || b.merge_history.is_some())
            .then(|| Box::new([a.merge_history.clone(), b.merge_history.clone()]));

        let history = MergeStep {
            algorithm,
            gap_length: gap,
            a_match_ids: a.match_id_strings(),
            b_match_ids: b.match_id_strings(),
            sub_merges,
        };

        let match_ids: BTreeSet<MatchKey> = a.match_ids.union(&b.match_ids).cloned().collect();
        let mut target_edges = a.target_edges.clone();
        target_edges.extend(
            b.target_edges
                .iter()
                .map(|(idx, edge)| (*idx, edge.clone())),
        );

        Ok(Self::build(
            a.path_id.clone(),
            Some(LineString::new(coords)),
            decomposition,
            Some(history),
            match_ids,
            target_edges,
        ))
    }

    /// GeoJSON feature with the QA properties. Unmatched edges get a null geometry.
    pub fn to_feature(&self) -> Result<geojson::Feature, ConflationError> {
        let target_edge_ids: Vec<&str> = self
            .target_edges
            .values()
            .map(|edge| edge.edge_id.as_str())
            .collect();

        let mut properties = geojson::JsonObject::new();
        properties.insert("pathId".to_string(), serde_json::to_value(&self.path_id)?);
        properties.insert(
            "targetEdgeIds".to_string(),
            serde_json::to_value(target_edge_ids)?,
        );
        properties.insert(
            "pathDecompositionInfo".to_string(),
            serde_json::to_value(&self.path_decomposition_info)?,
        );
        properties.insert(
            "mergeHistory".to_string(),
            serde_json::to_value(&self.merge_history)?,
        );
        properties.insert(
            "mergedLength".to_string(),
            serde_json::to_value(self.merged_length)?,
        );
        properties.insert(
            "targetLength".to_string(),
            serde_json::to_value(self.target_length)?,
        );
        properties.insert(
            "lengthDifference".to_string(),
            serde_json::to_value(self.length_difference)?,
        );
        properties.insert(
            "lengthRatio".to_string(),
            serde_json::to_value(self.length_ratio)?,
        );

        Ok(geojson::Feature {
            bbox: None,
            geometry: self
                .geometry
                .as_ref()
                .map(|line| geojson::Geometry::new(geojson::Value::from(line))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        })
    }
}
