// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Rebuilds each target path's geometry from its assigned matches.
//!
//! Matches of one path are nodes of an adjacency graph (consecutive in path
//! order, or end point near start point). Each connected component is walked
//! in path order and greedily merged into as few continuous runs as the gap
//! threshold allows.

pub mod merged_path;

use crate::assembler::SlicedMatch;
use crate::config::ConflationConfig;
use crate::geometry_utils::{haversine_distance, search_radius_degrees};
use crate::model::TargetEdge;
use ahash::AHashMap;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use std::collections::BTreeSet;
use tracing::{debug, trace};

pub use merged_path::{
    DecompositionEntry, EdgeSummary, MergeAlgorithm, MergeRejection, MergeStep, MergedPath,
};

/// Undirected adjacency between leaves, which must be in path order.
fn build_adjacency(leaves: &[MergedPath], config: &ConflationConfig) -> Vec<BTreeSet<usize>> {
    let mut adjacency = vec![BTreeSet::new(); leaves.len()];

    let link = |adjacency: &mut Vec<BTreeSet<usize>>, i: usize, j: usize| {
        if i != j && leaves[i].match_ids.is_disjoint(&leaves[j].match_ids) {
            adjacency[i].insert(j);
            adjacency[j].insert(i);
        }
    };

    // order-adjacent: same target edge or the next one
    for i in 0..leaves.len() {
        let Some(last_edge) = leaves[i].last_edge_idx() else {
            continue;
        };
        for j in (i + 1)..leaves.len() {
            let Some(first_edge) = leaves[j].first_edge_idx() else {
                continue;
            };
            if first_edge > last_edge.saturating_add(1) {
                break;
            }
            link(&mut adjacency, i, j);
        }
    }

    // endpoint-near, whatever the order
    let starts: Vec<GeomWithData<[f64; 2], usize>> = leaves
        .iter()
        .enumerate()
        .filter_map(|(i, leaf)| {
            leaf.start_point()
                .map(|start| GeomWithData::new([start.x, start.y], i))
        })
        .collect();
    let tree = RTree::bulk_load(starts);

    for (i, leaf) in leaves.iter().enumerate() {
        let Some(end) = leaf.end_point() else {
            continue;
        };
        let radius = search_radius_degrees(end.y, config.endpoint_tolerance_m);

        for candidate in tree.locate_within_distance([end.x, end.y], radius * radius) {
            let [x, y] = *candidate.geom();
            let start = geo_types::Coord { x, y };
            if haversine_distance(end, start) <= config.endpoint_tolerance_m {
                link(&mut adjacency, i, candidate.data);
            }
        }
    }

    adjacency
}

/// Connected components, each sorted ascending (path order).
fn connected_components(adjacency: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut visited = vec![false; adjacency.len()];
    let mut components = Vec::new();

    for root in 0..adjacency.len() {
        if visited[root] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![root];
        visited[root] = true;

        while let Some(current) = stack.pop() {
            component.push(current);
            for &neighbor in &adjacency[current] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Greedy pass in path order, then pairwise reduction of the runs until no
/// two runs merge.
fn merge_component(
    leaves: &[MergedPath],
    component: &[usize],
    config: &ConflationConfig,
) -> Vec<MergedPath> {
    let mut runs: Vec<MergedPath> = Vec::new();

    for &idx in component {
        let node = &leaves[idx];
        let mut absorbed = false;

        for run in runs.iter_mut().rev() {
            match run.try_merge(node, config) {
                Ok(merged) => {
                    *run = merged;
                    absorbed = true;
                    break;
                }
                Err(rejection) => {
                    trace!("Not merging {:?} into run: {:?}", node.first_key(), rejection);
                }
            }
        }

        if !absorbed {
            runs.push(node.clone());
        }
    }

    'reduce: loop {
        for i in 0..runs.len() {
            for j in (i + 1)..runs.len() {
                if let Ok(merged) = runs[i].try_merge(&runs[j], config) {
                    runs[i] = merged;
                    runs.remove(j);
                    continue 'reduce;
                }
            }
        }
        break;
    }

    runs
}

/// Merges every assigned match of one path into continuous merged paths.
///
/// `edges` supplies target edge ids and lengths for the QA metrics;
/// `unmatched` edges (no candidate match at all) come out as geometry-less
/// singletons. Output is in path order.
pub fn merge_path(
    path_id: &str,
    matches: &[&SlicedMatch],
    edges: &[&TargetEdge],
    unmatched: &[&TargetEdge],
    config: &ConflationConfig,
) -> Vec<MergedPath> {
    let summaries: AHashMap<u32, EdgeSummary> = edges
        .iter()
        .map(|edge| {
            (
                edge.path_edge_idx,
                EdgeSummary {
                    edge_id: edge.edge_id.clone(),
                    length: edge.length,
                },
            )
        })
        .collect();

    let mut ordered: Vec<&SlicedMatch> = matches.to_vec();
    ordered.sort_by(|a, b| a.assigned.key.cmp(&b.assigned.key));

    let leaves: Vec<MergedPath> = ordered
        .iter()
        .map(|sliced| {
            let edge = summaries
                .get(&sliced.assigned.key.path_edge_idx)
                .cloned()
                .unwrap_or_else(|| EdgeSummary {
                    edge_id: sliced.assigned.edge_id.clone(),
                    length: 0.0,
                });
            MergedPath::from_match(sliced, edge)
        })
        .collect();

    let adjacency = build_adjacency(&leaves, config);
    let components = connected_components(&adjacency);

    let mut merged: Vec<MergedPath> = components
        .iter()
        .flat_map(|component| merge_component(&leaves, component, config))
        .collect();

    merged.extend(unmatched.iter().map(|edge| MergedPath::unmatched(edge)));

    merged.sort_by(|a, b| {
        a.first_edge_idx()
            .cmp(&b.first_edge_idx())
            .then_with(|| a.first_key().cmp(&b.first_key()))
    });

    debug!(
        "Path {}: {} matches merged into {} paths ({} unmatched edges)",
        path_id,
        leaves.len(),
        merged.len(),
        unmatched.len()
    );

    merged
}
