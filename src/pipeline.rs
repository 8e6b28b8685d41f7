// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! End-to-end run: ingest, detect, analyze, resolve, assemble, merge.

use crate::assembler::{SkippedMatch, SlicedMatch, assemble};
use crate::config::ConflationConfig;
use crate::disputes::{
    PriorityTable, Resolution, UnresolvedDispute, analyze_all_paths, detect_all_disputes,
    resolve_dispute,
};
use crate::error::ConflationError;
use crate::merger::{MergedPath, merge_path};
use crate::model::{AssignedMatch, TargetEdge};
use crate::store::{ConflationStore, SkippedRecord, ingest_candidate_matches};
use ahash::AHashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflationStats {
    pub records_read: usize,
    pub records_skipped: usize,
    pub disputes_detected: usize,
    pub disputes_resolved: usize,
    pub disputes_unresolved: usize,
    pub claimants_dropped: usize,
    pub fragments_clipped: usize,
    pub matches_skipped: usize,
    pub merged_paths: usize,
    pub unmatched_edges: usize,
}

#[derive(Debug)]
pub struct ConflationOutput {
    /// Owned intervals sorted by `(reference_id, start)`
    pub assigned: Vec<SlicedMatch>,
    pub unresolved: Vec<UnresolvedDispute>,
    /// Grouped by path id, each group in path order
    pub merged_paths: Vec<MergedPath>,
    /// Records rejected at ingestion
    pub skipped: Vec<SkippedRecord>,
    /// Assigned matches whose geometry could not be sliced
    pub skipped_matches: Vec<SkippedMatch>,
    pub stats: ConflationStats,
}

impl ConflationOutput {
    pub fn to_feature_collection(&self) -> Result<geojson::FeatureCollection, ConflationError> {
        let features = self
            .merged_paths
            .iter()
            .map(MergedPath::to_feature)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

pub struct Conflator<'a, S: ConflationStore + ?Sized> {
    store: &'a S,
    config: ConflationConfig,
}

impl<'a, S: ConflationStore + ?Sized> Conflator<'a, S> {
    pub fn new(store: &'a S, config: ConflationConfig) -> Result<Self, ConflationError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ConflationConfig {
        &self.config
    }

    pub fn run(&self) -> ConflationOutput {
        let start = Instant::now();
        let epsilon = self.config.interval_epsilon;
        let mut stats = ConflationStats::default();

        let ingested = ingest_candidate_matches(self.store, epsilon);
        stats.records_read = ingested.records_read;
        stats.records_skipped = ingested.skipped.len();
        info!(
            "Ingested {} candidate matches ({} records skipped)",
            ingested.matches.len(),
            stats.records_skipped
        );

        let detections = detect_all_disputes(&ingested.matches, epsilon);
        let facts = analyze_all_paths(&ingested.matches, self.store, &self.config);

        let target_edges: Vec<&TargetEdge> = self.store.target_edges().collect();
        let priorities = PriorityTable::build(&ingested.matches, target_edges.iter().copied());

        let mut disputes = Vec::new();
        let mut undisputed = Vec::new();
        for outcome in detections {
            disputes.extend(outcome.disputes);
            undisputed.extend(outcome.undisputed);
        }
        stats.disputes_detected = disputes.len();
        info!(
            "Detected {} disputes, {} undisputed matches",
            disputes.len(),
            undisputed.len()
        );

        let resolutions: Vec<Resolution> = disputes
            .par_iter()
            .map(|dispute| resolve_dispute(dispute, &facts, &priorities, epsilon))
            .collect();

        let mut resolved: Vec<AssignedMatch> = Vec::new();
        let mut unresolved = Vec::new();
        for resolution in resolutions {
            match resolution {
                Resolution::Resolved {
                    assigned, dropped, ..
                } => {
                    stats.disputes_resolved += 1;
                    stats.claimants_dropped += dropped.len();
                    resolved.extend(assigned);
                }
                Resolution::Unresolved(dispute) => {
                    stats.disputes_unresolved += 1;
                    unresolved.push(dispute);
                }
            }
        }
        info!(
            "Resolved {} disputes, {} unresolved",
            stats.disputes_resolved, stats.disputes_unresolved
        );

        let assembly = assemble(resolved, undisputed, self.store, epsilon);
        stats.fragments_clipped = assembly.fragments_clipped;
        stats.matches_skipped = assembly.skipped.len();

        let merged_paths = self.merge_all(&assembly.matches, &target_edges);
        stats.unmatched_edges = merged_paths
            .iter()
            .filter(|path| path.geometry.is_none())
            .count();
        stats.merged_paths = merged_paths.len() - stats.unmatched_edges;

        info!(
            "Conflation finished in {:?}: {} assigned, {} merged paths, {} unmatched edges",
            start.elapsed(),
            assembly.matches.len(),
            stats.merged_paths,
            stats.unmatched_edges
        );

        ConflationOutput {
            assigned: assembly.matches,
            unresolved,
            merged_paths,
            skipped: ingested.skipped,
            skipped_matches: assembly.skipped,
            stats,
        }
    }

    /// Per-path merge. Target edges that ended up with no assigned match are
    /// passed through unmatched.
    fn merge_all(&self, assigned: &[SlicedMatch], target_edges: &[&TargetEdge]) -> Vec<MergedPath> {
        let mut matches_by_path: BTreeMap<&str, Vec<&SlicedMatch>> = BTreeMap::new();
        let mut matched_edges: AHashSet<(&str, u32)> = AHashSet::new();
        for sliced in assigned {
            let key = &sliced.assigned.key;
            matches_by_path
                .entry(key.path_id.as_str())
                .or_default()
                .push(sliced);
            matched_edges.insert((key.path_id.as_str(), key.path_edge_idx));
        }

        let mut edges_by_path: BTreeMap<&str, Vec<&TargetEdge>> = BTreeMap::new();
        for edge in target_edges {
            edges_by_path
                .entry(edge.path_id.as_str())
                .or_default()
                .push(*edge);
        }

        let path_ids: Vec<&str> = matches_by_path
            .keys()
            .chain(edges_by_path.keys())
            .copied()
            .collect::<BTreeSet<&str>>()
            .into_iter()
            .collect();

        debug!("Merging {} paths", path_ids.len());

        path_ids
            .par_iter()
            .flat_map_iter(|path_id| {
                let matches = matches_by_path
                    .get(path_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let edges = edges_by_path
                    .get(path_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let unmatched: Vec<&TargetEdge> = edges
                    .iter()
                    .filter(|edge| !matched_edges.contains(&(*path_id, edge.path_edge_idx)))
                    .copied()
                    .collect();

                merge_path(path_id, matches, edges, &unmatched, &self.config)
            })
            .collect()
    }
}
