//! Duplicate detection pipeline: rules produce scored candidates, the aggregator collapses
//! them per identity, and the classifier turns the survivors into a suggested action.

pub mod aggregate;
pub mod classify;
pub mod rules;

pub use aggregate::{aggregate, DuplicateMatch};
pub use classify::{classify, DuplicateCheckResult, SuggestedAction};
pub use rules::{MatchCandidate, MatchRule};
