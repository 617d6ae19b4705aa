//! Canonical identifiers for the master patient index.
//!
//! Every record the index stores is keyed by a *canonical* UUID representation:
//! **32 lowercase hexadecimal characters** (no hyphens). Keeping one textual form means store
//! lookups, audit rows and on-disk paths all agree on the same key.
//!
//! This crate provides:
//! - [`PatientId`], the store identifier of a patient record.
//! - [`MergeId`], the identifier of an audited merge operation.
//! - Shared sharding logic to derive record directory locations from an identifier.
//!
//! ## Canonical form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Canonical form is *required* for externally supplied identifiers (CLI arguments, request
//! bodies). Uppercase, hyphenated, wrong-length or non-hex values are rejected rather than
//! normalised.
//!
//! ## Sharded directory layout
//! For a canonical id `u`, file-backed stores place data under
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`, which keeps directory fan-out bounded.

mod id;

pub use id::{MergeId, PatientId};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
