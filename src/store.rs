// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Typed read access to the collections the conflation core consumes, and the
//! ingestion boundary that turns raw store rows into [`CandidateMatch`]es.

use crate::error::ConflationError;
use crate::model::{CandidateMatch, CandidateMatchRecord, ReferenceGeometry, TargetEdge};
use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

pub trait ReferenceLookup {
    fn reference_geometry(&self, id: &str) -> Option<&ReferenceGeometry>;
}

impl ReferenceLookup for AHashMap<String, ReferenceGeometry> {
    fn reference_geometry(&self, id: &str) -> Option<&ReferenceGeometry> {
        self.get(id)
    }
}

/// Read side of whatever holds the reference network, the target paths and the
/// matcher output. Streams are restartable only by calling the method again.
pub trait ConflationStore: ReferenceLookup + Sync {
    fn candidate_match_records(&self) -> Box<dyn Iterator<Item = CandidateMatchRecord> + '_>;

    fn target_edges(&self) -> Box<dyn Iterator<Item = &TargetEdge> + '_>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    references: AHashMap<String, ReferenceGeometry>,
    records: Vec<CandidateMatchRecord>,
    target_edges: Vec<TargetEdge>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_reference(&mut self, reference: ReferenceGeometry) {
        self.references.insert(reference.id.clone(), reference);
    }

    pub fn push_record(&mut self, record: CandidateMatchRecord) {
        self.records.push(record);
    }

    pub fn push_candidate(&mut self, candidate: &CandidateMatch) {
        self.records.push(CandidateMatchRecord {
            path_id: Some(candidate.key.path_id.clone()),
            path_edge_idx: Some(candidate.key.path_edge_idx),
            edge_id: Some(candidate.edge_id.clone()),
            match_idx: Some(candidate.key.match_idx),
            is_forward: Some(candidate.is_forward),
            reference_id: Some(candidate.reference_id.clone()),
            start: Some(candidate.start),
            end: Some(candidate.end),
        });
    }

    pub fn push_target_edge(&mut self, edge: TargetEdge) {
        self.target_edges.push(edge);
    }
}

impl ReferenceLookup for InMemoryStore {
    fn reference_geometry(&self, id: &str) -> Option<&ReferenceGeometry> {
        self.references.get(id)
    }
}

impl ConflationStore for InMemoryStore {
    fn candidate_match_records(&self) -> Box<dyn Iterator<Item = CandidateMatchRecord> + '_> {
        Box::new(self.records.iter().cloned())
    }

    fn target_edges(&self) -> Box<dyn Iterator<Item = &TargetEdge> + '_> {
        Box::new(self.target_edges.iter())
    }
}

/// A record dropped at the ingestion boundary, with its position in the stream.
#[derive(Debug)]
pub struct SkippedRecord {
    pub index: usize,
    pub error: ConflationError,
}

#[derive(Debug, Default)]
pub struct IngestedMatches {
    pub matches: Vec<CandidateMatch>,
    pub skipped: Vec<SkippedRecord>,
    pub records_read: usize,
}

/// Checks the interval against its reference and clamps matcher rounding past
/// the reference end. The clamped interval must still be non-empty.
fn fit_to_reference<L: ReferenceLookup + ?Sized>(
    mut candidate: CandidateMatch,
    lookup: &L,
    epsilon: f64,
) -> Result<CandidateMatch, ConflationError> {
    let reference = lookup
        .reference_geometry(&candidate.reference_id)
        .ok_or_else(|| ConflationError::UnknownReference(candidate.reference_id.clone()))?;

    if candidate.end > reference.length + epsilon {
        return Err(ConflationError::IntervalOutOfRange {
            key: candidate.key.to_string(),
            reference_id: reference.id.clone(),
            start: candidate.start,
            end: candidate.end,
            length: reference.length,
        });
    }

    let end = candidate.end.min(reference.length);
    if candidate.start >= end {
        return Err(ConflationError::InvalidInterval {
            key: candidate.key.to_string(),
            start: candidate.start,
            end,
        });
    }
    candidate.end = end;

    Ok(candidate)
}

/// Validates every candidate match record. Bad records are logged and counted,
/// never fatal.
pub fn ingest_candidate_matches<S: ConflationStore + ?Sized>(
    store: &S,
    epsilon: f64,
) -> IngestedMatches {
    let mut ingested = IngestedMatches::default();
    let mut seen = AHashSet::new();

    for (index, record) in store.candidate_match_records().enumerate() {
        ingested.records_read += 1;

        let result = CandidateMatch::try_from(record).and_then(|candidate| {
            let candidate = fit_to_reference(candidate, store, epsilon)?;
            if !seen.insert(candidate.key.clone()) {
                return Err(ConflationError::DuplicateMatch(candidate.key.to_string()));
            }
            Ok(candidate)
        });

        match result {
            Ok(candidate) => ingested.matches.push(candidate),
            Err(error) => {
                warn!("Skipping candidate match record {}: {}", index, error);
                ingested.skipped.push(SkippedRecord { index, error });
            }
        }
    }

    debug!(
        "Ingested {} of {} candidate match records",
        ingested.matches.len(),
        ingested.records_read
    );

    ingested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{candidate, equator_reference};

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.insert_reference(equator_reference("r1", 0.0, 100.0));
        store
    }

    #[test]
    fn test_valid_records_pass_through() {
        let mut store = store();
        store.push_candidate(&candidate("p1", 0, 0, "r1", 0.0, 60.0));
        store.push_candidate(&candidate("p2", 0, 0, "r1", 40.0, 100.0));

        let ingested = ingest_candidate_matches(&store, 1e-6);
        assert_eq!(ingested.records_read, 2);
        assert_eq!(ingested.matches.len(), 2);
        assert!(ingested.skipped.is_empty());
    }

    #[test]
    fn test_bad_records_are_skipped_and_counted() {
        let mut store = store();
        store.push_candidate(&candidate("p1", 0, 0, "r1", 0.0, 60.0));
        // unknown reference
        store.push_candidate(&candidate("p1", 1, 0, "missing", 0.0, 10.0));
        // past the end of the reference
        store.push_candidate(&candidate("p1", 2, 0, "r1", 50.0, 150.0));
        // duplicate key
        store.push_candidate(&candidate("p1", 0, 0, "r1", 70.0, 80.0));
        // missing field
        store.push_record(CandidateMatchRecord::default());

        let ingested = ingest_candidate_matches(&store, 1e-6);
        assert_eq!(ingested.records_read, 5);
        assert_eq!(ingested.matches.len(), 1);

        let skipped_indices: Vec<usize> = ingested.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped_indices, vec![1, 2, 3, 4]);
        assert!(matches!(
            ingested.skipped[0].error,
            ConflationError::UnknownReference(_)
        ));
        assert!(matches!(
            ingested.skipped[1].error,
            ConflationError::IntervalOutOfRange { .. }
        ));
        assert!(matches!(
            ingested.skipped[2].error,
            ConflationError::DuplicateMatch(_)
        ));
        assert!(matches!(
            ingested.skipped[3].error,
            ConflationError::MissingField(_)
        ));
    }

    #[test]
    fn test_rounding_past_end_is_clamped() {
        let mut store = store();
        store.push_candidate(&candidate("p1", 0, 0, "r1", 90.0, 100.0000001));

        let ingested = ingest_candidate_matches(&store, 1e-6);
        assert_eq!(ingested.matches.len(), 1);
        assert_eq!(ingested.matches[0].end, 100.0);
    }

    #[test]
    fn test_interval_emptied_by_clamp_is_rejected() {
        let mut store = store();
        store.push_candidate(&candidate("p1", 0, 0, "r1", 100.0000005, 100.0000009));

        let ingested = ingest_candidate_matches(&store, 1e-6);
        assert!(ingested.matches.is_empty());
        assert_eq!(ingested.skipped.len(), 1);
        assert!(matches!(
            ingested.skipped[0].error,
            ConflationError::InvalidInterval { .. }
        ));
    }
}
