use crate::merge::MergeRecord;
use mpi_uuid::PatientId;
use std::time::Duration;

/// Failures reported by a [`RecordStore`](crate::store::RecordStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("patient not found: {0}")]
    NotFound(PatientId),
    #[error("patient {0} has already been merged")]
    AlreadyMerged(PatientId),
    #[error("record store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialise YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum MpiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid identifier: {0}")]
    Uuid(#[from] mpi_uuid::UuidError),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
    #[error("duplicate check did not complete within {0:?}")]
    CheckTimedOut(Duration),
    #[error("failed to mark duplicates as merged: {0}")]
    MergeUpdateFailed(#[source] StoreError),
    #[error(
        "duplicates merged into {primary} but the audit write failed: {source}",
        primary = .record.primary_id
    )]
    MergeAuditFailed {
        record: Box<MergeRecord>,
        #[source]
        source: StoreError,
    },
}

pub type MpiResult<T> = std::result::Result<T, MpiError>;
