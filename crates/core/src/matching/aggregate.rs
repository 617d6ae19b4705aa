//! Collapses rule output to one entry per stored patient.

use super::rules::MatchCandidate;
use crate::patient::StoredPatient;
use mpi_uuid::PatientId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// A stored patient that looks like the same person as the draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DuplicateMatch {
    #[schema(value_type = String)]
    pub patient_id: PatientId,
    pub match_score: u8,
    pub match_reasons: Vec<String>,
    pub patient: StoredPatient,
}

/// Keeps the highest-scoring candidate per patient id along with that rule's reasons.
///
/// Reasons from other rules are discarded rather than concatenated. When two rules tie, the
/// one that appears first in `candidates` wins. The result is ordered by score (highest
/// first) and then by patient id so output is stable.
pub fn aggregate(candidates: impl IntoIterator<Item = MatchCandidate>) -> Vec<DuplicateMatch> {
    let mut best: HashMap<PatientId, MatchCandidate> = HashMap::new();

    for candidate in candidates {
        match best.get(&candidate.patient.id) {
            Some(current) if current.score >= candidate.score => {}
            _ => {
                best.insert(candidate.patient.id, candidate);
            }
        }
    }

    let mut matches: Vec<DuplicateMatch> = best
        .into_values()
        .map(|c| DuplicateMatch {
            patient_id: c.patient.id,
            match_score: c.score,
            match_reasons: c.reasons,
            patient: c.patient,
        })
        .collect();

    matches.sort_by(|a, b| {
        b.match_score
            .cmp(&a.match_score)
            .then_with(|| a.patient_id.cmp(&b.patient_id))
    });
    matches
}
