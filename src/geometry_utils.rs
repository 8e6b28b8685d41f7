// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Haversine helpers over lon/lat line strings.
//!
//! Match intervals are expressed against a reference's nominal length, which
//! rarely equals its computed Haversine length exactly. Measures are therefore
//! converted to fractions of the nominal length before walking the geometry.

use crate::model::{Interval, ReferenceGeometry};
use geo::{Distance, Haversine};
use geo_types::{Coord, Line, LineString, Point};

/// Rough meters per degree of latitude, used only to size search windows.
const METERS_PER_DEGREE: f64 = 111_000.0;

pub fn haversine_distance(a: Coord, b: Coord) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

pub fn haversine_length(line: &LineString<f64>) -> f64 {
    line.lines()
        .map(|segment| haversine_distance(segment.start, segment.end))
        .sum()
}

/// Converts a metric radius into a degree radius that is never smaller than
/// the true one at latitude `lat`. Results must still be checked with Haversine.
pub fn search_radius_degrees(lat: f64, meters: f64) -> f64 {
    let cos_lat = lat.to_radians().cos().abs().max(0.01);
    meters / (METERS_PER_DEGREE * cos_lat)
}

fn interpolate(segment: Line<f64>, segment_length: f64, distance_on_segment: f64) -> Coord {
    if segment_length <= 0.0 {
        return segment.start;
    }
    let t = (distance_on_segment / segment_length).clamp(0.0, 1.0);
    if t >= 1.0 {
        return segment.end;
    }
    Coord {
        x: segment.start.x + (segment.end.x - segment.start.x) * t,
        y: segment.start.y + (segment.end.y - segment.start.y) * t,
    }
}

/// Extracts the part of `line` between two fractions of its Haversine length.
pub fn line_substring(
    line: &LineString<f64>,
    start_frac: f64,
    end_frac: f64,
) -> Option<LineString<f64>> {
    if line.0.len() < 2 || end_frac <= start_frac {
        return None;
    }

    let segment_lengths: Vec<f64> = line
        .lines()
        .map(|segment| haversine_distance(segment.start, segment.end))
        .collect();
    let total: f64 = segment_lengths.iter().sum();

    let start_dist = start_frac.clamp(0.0, 1.0) * total;
    let end_dist = end_frac.clamp(0.0, 1.0) * total;

    let mut coords: Vec<Coord> = Vec::new();
    let mut current_dist = 0.0;
    let mut finished = false;

    for (segment, seg_len) in line.lines().zip(segment_lengths) {
        let next_dist = current_dist + seg_len;

        if coords.is_empty() {
            if next_dist >= start_dist {
                coords.push(interpolate(segment, seg_len, start_dist - current_dist));

                if next_dist >= end_dist {
                    coords.push(interpolate(segment, seg_len, end_dist - current_dist));
                    finished = true;
                    break;
                }
                coords.push(segment.end);
            }
        } else if next_dist >= end_dist {
            coords.push(interpolate(segment, seg_len, end_dist - current_dist));
            finished = true;
            break;
        } else {
            coords.push(segment.end);
        }

        current_dist = next_dist;
    }

    // accumulated float error can leave the tail unreached
    if !finished {
        if let Some(last) = line.0.last() {
            coords.push(*last);
        }
    }

    coords.dedup();

    if coords.len() < 2 {
        None
    } else {
        Some(LineString::new(coords))
    }
}

/// Coordinate at distance-along `measure` on the reference.
pub fn point_at_measure(reference: &ReferenceGeometry, measure: f64) -> Coord {
    let fraction = (measure / reference.length).clamp(0.0, 1.0);
    let line = &reference.geometry;

    let segment_lengths: Vec<f64> = line
        .lines()
        .map(|segment| haversine_distance(segment.start, segment.end))
        .collect();
    let target = fraction * segment_lengths.iter().sum::<f64>();

    let mut current_dist = 0.0;
    for (segment, seg_len) in line.lines().zip(segment_lengths) {
        if current_dist + seg_len >= target {
            return interpolate(segment, seg_len, target - current_dist);
        }
        current_dist += seg_len;
    }

    line.0.last().copied().unwrap_or(Coord { x: 0.0, y: 0.0 })
}

/// Geometry of `interval` on the reference, in digitisation order.
pub fn slice_reference(
    reference: &ReferenceGeometry,
    interval: &Interval,
) -> Option<LineString<f64>> {
    line_substring(
        &reference.geometry,
        interval.start / reference.length,
        interval.end / reference.length,
    )
}
