//! # MPI Core
//!
//! Patient entity resolution for the master patient index.
//!
//! This crate contains the matching engine and the record-store contract it runs against:
//! - String similarity and phone normalisation
//! - The five match rules, score aggregation and classification into block / warn / allow
//! - Merging confirmed duplicates into a primary record, with an audit trail
//! - In-memory and sharded-YAML record stores
//!
//! **No API concerns**: HTTP servers and command-line handling belong in `api-rest` and `cli`.

pub mod config;
pub mod constants;
pub mod error;
pub mod matching;
pub mod merge;
pub mod patient;
pub mod resolver;
pub mod similarity;
pub mod store;

pub use config::{CandidateStrategy, FailurePolicy, MatchConfig};
pub use error::{MpiError, MpiResult, StoreError, StoreResult};
pub use matching::{DuplicateCheckResult, DuplicateMatch, SuggestedAction};
pub use merge::MergeRecord;
pub use patient::{Actor, Gender, PatientDraft, PatientStatus, StoredPatient};
pub use resolver::ResolutionService;
pub use store::{CandidateIndex, FileRecordStore, InMemoryRecordStore, PatientStore, RecordStore};

pub use mpi_uuid::{MergeId, PatientId};
