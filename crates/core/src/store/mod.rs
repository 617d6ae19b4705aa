//! The record store contract the resolution engine depends on.
//!
//! The engine never owns patient data. It queries a [`RecordStore`] for candidates and, when
//! merging, asks it to mark duplicates and append an audit row. Query results only ever contain
//! live records: once a record's `merged_into` is set it is terminal and must not be offered as
//! a match candidate again.
//!
//! [`CandidateIndex`] is the blocking-key side of the contract. Instead of a fixed window of
//! "other" records, a store that implements it returns the records sharing a cheap key with the
//! draft (phone prefix/suffix, phonetic name code, birth date), so candidate generation keeps
//! working as the population grows.

pub mod file;
pub mod memory;

use crate::constants::PHONE_BLOCK_DIGITS;
use crate::error::{MpiError, MpiResult, StoreResult};
use crate::merge::MergeRecord;
use crate::patient::{PatientDraft, StoredPatient};
use crate::similarity::{name_code, normalise_phone};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mpi_uuid::PatientId;
use std::collections::BTreeSet;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;

/// Identifier fields the exact-match rules look up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExactField {
    NationalId,
    HealthAccountId,
}

impl ExactField {
    /// The value of this field on a stored record, if set.
    pub fn value_of<'a>(&self, patient: &'a StoredPatient) -> Option<&'a str> {
        match self {
            ExactField::NationalId => patient.national_id.as_deref(),
            ExactField::HealthAccountId => patient.health_account_id.as_deref(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Live records whose `field` equals `value` exactly, excluding `exclude_id`.
    async fn find_by_exact_field(
        &self,
        field: ExactField,
        value: &str,
        exclude_id: Option<PatientId>,
    ) -> StoreResult<Vec<StoredPatient>>;

    /// A bounded window of live records other than `exclude_id`.
    async fn list_candidates(
        &self,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>>;

    /// Sets `merged_into = primary_id` and deactivates every record in `ids`.
    ///
    /// Implementations apply all of the updates or none of them. Unknown ids fail with
    /// `StoreError::NotFound`, already-merged ids with `StoreError::AlreadyMerged`.
    async fn bulk_mark_merged(
        &self,
        ids: &[PatientId],
        primary_id: PatientId,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Appends one immutable merge audit row.
    async fn append_merge_audit(&self, record: &MergeRecord) -> StoreResult<()>;

    /// Every audit row naming `patient_id` as primary or duplicate, newest first.
    async fn merge_history(&self, patient_id: PatientId) -> StoreResult<Vec<MergeRecord>>;

    /// Any record by id, merged or not.
    async fn get(&self, id: PatientId) -> StoreResult<Option<StoredPatient>>;

    /// Marks the duplicates merged and writes the audit row.
    ///
    /// The default is the two-step write: if the update fails nothing is audited
    /// (`MpiError::MergeUpdateFailed`); if the audit fails afterwards the duplicates stay
    /// merged but unaudited (`MpiError::MergeAuditFailed`). Stores with a transactional
    /// boundary override this so both writes land together.
    async fn commit_merge(&self, record: &MergeRecord) -> MpiResult<()> {
        self.bulk_mark_merged(&record.duplicate_ids, record.primary_id, record.merged_at)
            .await
            .map_err(MpiError::MergeUpdateFailed)?;

        self.append_merge_audit(record)
            .await
            .map_err(|source| MpiError::MergeAuditFailed {
                record: Box::new(record.clone()),
                source,
            })
    }
}

/// Cheap indexable attributes used to narrow the candidate set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockingKey {
    PhonePrefix(String),
    PhoneSuffix(String),
    NameCode(String),
    BirthDate(NaiveDate),
}

fn keys_of(
    first_name: &str,
    last_name: &str,
    phone: &str,
    date_of_birth: Option<NaiveDate>,
) -> BTreeSet<BlockingKey> {
    let mut keys = BTreeSet::new();

    let phone = normalise_phone(phone);
    if phone.len() >= PHONE_BLOCK_DIGITS {
        keys.insert(BlockingKey::PhonePrefix(phone[..PHONE_BLOCK_DIGITS].to_string()));
        keys.insert(BlockingKey::PhoneSuffix(
            phone[phone.len() - PHONE_BLOCK_DIGITS..].to_string(),
        ));
    }
    for name in [first_name, last_name] {
        if let Some(code) = name_code(name) {
            keys.insert(BlockingKey::NameCode(code));
        }
    }
    if let Some(dob) = date_of_birth {
        keys.insert(BlockingKey::BirthDate(dob));
    }

    keys
}

/// Blocking keys of a draft.
pub fn blocking_keys(draft: &PatientDraft) -> BTreeSet<BlockingKey> {
    keys_of(
        &draft.first_name,
        &draft.last_name,
        &draft.phone,
        draft.date_of_birth,
    )
}

/// Blocking keys of a stored record.
pub fn patient_blocking_keys(patient: &StoredPatient) -> BTreeSet<BlockingKey> {
    keys_of(
        &patient.first_name,
        &patient.last_name,
        &patient.phone,
        patient.date_of_birth,
    )
}

#[async_trait]
pub trait CandidateIndex: Send + Sync {
    /// Live records, other than `exclude_id`, sharing at least one of `keys`, capped at `limit`.
    async fn indexed_candidates(
        &self,
        keys: &BTreeSet<BlockingKey>,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>>;
}

/// A store that can serve every query the resolution service makes.
///
/// Lets callers hold `Arc<dyn PatientStore>` and pick the backend at runtime.
pub trait PatientStore: RecordStore + CandidateIndex {}

impl<T: RecordStore + CandidateIndex + ?Sized> PatientStore for T {}

/// Whether `patient` may be offered as a candidate for a check excluding `exclude_id`.
pub(crate) fn is_candidate(patient: &StoredPatient, exclude_id: Option<PatientId>) -> bool {
    !patient.is_merged() && Some(patient.id) != exclude_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_keys_cover_phone_name_and_dob() {
        let draft = PatientDraft {
            first_name: "Robert".into(),
            last_name: "Smith".into(),
            phone: "+91 98765 43210".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 2),
            ..Default::default()
        };

        let keys = blocking_keys(&draft);

        assert!(keys.contains(&BlockingKey::PhonePrefix("98765".into())));
        assert!(keys.contains(&BlockingKey::PhoneSuffix("43210".into())));
        assert!(keys.contains(&BlockingKey::NameCode("R163".into())));
        assert!(keys.contains(&BlockingKey::NameCode("S530".into())));
        assert!(keys.contains(&BlockingKey::BirthDate(
            NaiveDate::from_ymd_opt(1980, 1, 2).unwrap()
        )));
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_short_phone_yields_no_phone_keys() {
        let draft = PatientDraft {
            phone: "123".into(),
            ..Default::default()
        };
        assert!(blocking_keys(&draft).is_empty());
    }

    #[test]
    fn test_one_digit_typo_keeps_a_shared_phone_key() {
        let a = PatientDraft {
            phone: "9876543210".into(),
            ..Default::default()
        };
        let b = PatientDraft {
            phone: "9876543211".into(),
            ..Default::default()
        };
        let shared: Vec<_> = blocking_keys(&a)
            .intersection(&blocking_keys(&b))
            .cloned()
            .collect();
        assert_eq!(shared, vec![BlockingKey::PhonePrefix("98765".into())]);
    }
}
