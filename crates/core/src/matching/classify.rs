//! Turns aggregated matches into the caller-facing verdict.

use super::aggregate::DuplicateMatch;
use crate::constants::{
    CONFIDENCE_ALLOW, CONFIDENCE_BLOCK, CONFIDENCE_FAILED, CONFIDENCE_WARN, EXACT_MATCH_THRESHOLD,
    POTENTIAL_MATCH_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    /// Registration should not go ahead; an exact match exists.
    Block,
    /// Registration may go ahead after a human has looked at the potential matches.
    Warn,
    Allow,
}

/// Outcome of a duplicate check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DuplicateCheckResult {
    pub has_duplicates: bool,
    pub total_matches: usize,
    /// Matches scoring 90 or more.
    pub exact_matches: Vec<DuplicateMatch>,
    /// Matches scoring 70 to 89.
    pub potential_matches: Vec<DuplicateMatch>,
    pub suggested_action: SuggestedAction,
    pub confidence: u8,
}

impl DuplicateCheckResult {
    /// The verdict returned when the check itself could not run and the caller has chosen to
    /// let registration proceed.
    pub fn fail_open() -> Self {
        Self {
            has_duplicates: false,
            total_matches: 0,
            exact_matches: Vec::new(),
            potential_matches: Vec::new(),
            suggested_action: SuggestedAction::Allow,
            confidence: CONFIDENCE_FAILED,
        }
    }
}

/// Partitions aggregated matches and picks the suggested action.
///
/// Matches below the potential threshold are dropped and do not count towards
/// `total_matches`.
pub fn classify(matches: Vec<DuplicateMatch>) -> DuplicateCheckResult {
    let (exact_matches, rest): (Vec<_>, Vec<_>) = matches
        .into_iter()
        .partition(|m| m.match_score >= EXACT_MATCH_THRESHOLD);
    let potential_matches: Vec<_> = rest
        .into_iter()
        .filter(|m| m.match_score >= POTENTIAL_MATCH_THRESHOLD)
        .collect();

    let (suggested_action, confidence) = if !exact_matches.is_empty() {
        (SuggestedAction::Block, CONFIDENCE_BLOCK)
    } else if !potential_matches.is_empty() {
        (SuggestedAction::Warn, CONFIDENCE_WARN)
    } else {
        (SuggestedAction::Allow, CONFIDENCE_ALLOW)
    };

    let total_matches = exact_matches.len() + potential_matches.len();
    DuplicateCheckResult {
        has_duplicates: total_matches > 0,
        total_matches,
        exact_matches,
        potential_matches,
        suggested_action,
        confidence,
    }
}
