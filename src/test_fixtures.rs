// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Shared builders for unit and scenario tests.

use crate::model::{CandidateMatch, MatchKey, ReferenceGeometry, TargetEdge};
use geo::{Distance, Haversine};
use geo_types::{LineString, Point};

/// Longitude delta covering `meters` along the equator.
pub fn meters_to_lon(meters: f64) -> f64 {
    meters / Haversine.distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0))
}

/// Straight line on the equator from `start_m` to `end_m` meters east of (0, 0).
pub fn equator_line(start_m: f64, end_m: f64) -> LineString<f64> {
    LineString::from(vec![
        (meters_to_lon(start_m), 0.0),
        (meters_to_lon(end_m), 0.0),
    ])
}

/// Reference lying on the equator, starting `offset_m` east of (0, 0).
pub fn equator_reference(id: &str, offset_m: f64, length_m: f64) -> ReferenceGeometry {
    ReferenceGeometry::new(
        id,
        length_m,
        equator_line(offset_m, offset_m + length_m),
        Some(4),
    )
    .expect("fixture reference is valid")
}

pub fn candidate(
    path_id: &str,
    path_edge_idx: u32,
    match_idx: u32,
    reference_id: &str,
    start: f64,
    end: f64,
) -> CandidateMatch {
    CandidateMatch {
        key: MatchKey::new(path_id, path_edge_idx, match_idx),
        edge_id: format!("{path_id}_e{path_edge_idx}"),
        is_forward: true,
        reference_id: reference_id.to_string(),
        start,
        end,
    }
}

pub fn target_edge(path_id: &str, path_edge_idx: u32, length: f64) -> TargetEdge {
    TargetEdge {
        edge_id: format!("{path_id}_e{path_edge_idx}"),
        path_id: path_id.to_string(),
        path_edge_idx,
        length,
        road_class: None,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
