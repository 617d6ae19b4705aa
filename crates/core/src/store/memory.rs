//! In-memory record store.
//!
//! Holds patients and merge audit rows behind `tokio` locks. `commit_merge` applies the
//! patient updates and the audit append under one write lock, so a merge is never visible
//! half-applied. Used by tests and by callers that keep the population in memory.

use super::{is_candidate, patient_blocking_keys, BlockingKey, CandidateIndex, ExactField, RecordStore};
use crate::error::{MpiError, MpiResult, StoreError, StoreResult};
use crate::merge::MergeRecord;
use crate::patient::StoredPatient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mpi_uuid::PatientId;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    patients: HashMap<PatientId, StoredPatient>,
    // insertion order, so scans are stable
    order: Vec<PatientId>,
    audit: Vec<MergeRecord>,
}

impl Inner {
    fn live(&self, exclude_id: Option<PatientId>) -> impl Iterator<Item = &StoredPatient> {
        self.order
            .iter()
            .filter_map(|id| self.patients.get(id))
            .filter(move |p| is_candidate(p, exclude_id))
    }

    fn check_mergeable(&self, ids: &[PatientId]) -> StoreResult<()> {
        for id in ids {
            match self.patients.get(id) {
                None => return Err(StoreError::NotFound(*id)),
                Some(p) if p.is_merged() => return Err(StoreError::AlreadyMerged(*id)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn mark_merged(&mut self, ids: &[PatientId], primary_id: PatientId, at: DateTime<Utc>) {
        for id in ids {
            if let Some(p) = self.patients.get_mut(id) {
                p.mark_merged(primary_id, at);
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `patients`, in order.
    pub fn with_patients(patients: impl IntoIterator<Item = StoredPatient>) -> Self {
        let mut inner = Inner::default();
        for patient in patients {
            if !inner.patients.contains_key(&patient.id) {
                inner.order.push(patient.id);
            }
            inner.patients.insert(patient.id, patient);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Inserts or replaces a record.
    pub async fn insert(&self, patient: StoredPatient) {
        let mut inner = self.inner.write().await;
        if !inner.patients.contains_key(&patient.id) {
            inner.order.push(patient.id);
        }
        inner.patients.insert(patient.id, patient);
    }

    pub async fn audit_len(&self) -> usize {
        self.inner.read().await.audit.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_exact_field(
        &self,
        field: ExactField,
        value: &str,
        exclude_id: Option<PatientId>,
    ) -> StoreResult<Vec<StoredPatient>> {
        let inner = self.inner.read().await;
        Ok(inner
            .live(exclude_id)
            .filter(|p| field.value_of(p) == Some(value))
            .cloned()
            .collect())
    }

    async fn list_candidates(
        &self,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>> {
        let inner = self.inner.read().await;
        Ok(inner.live(exclude_id).take(limit).cloned().collect())
    }

    async fn bulk_mark_merged(
        &self,
        ids: &[PatientId],
        primary_id: PatientId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.check_mergeable(ids)?;
        inner.mark_merged(ids, primary_id, at);
        Ok(())
    }

    async fn append_merge_audit(&self, record: &MergeRecord) -> StoreResult<()> {
        self.inner.write().await.audit.push(record.clone());
        Ok(())
    }

    async fn merge_history(&self, patient_id: PatientId) -> StoreResult<Vec<MergeRecord>> {
        let inner = self.inner.read().await;
        let mut history: Vec<MergeRecord> = inner
            .audit
            .iter()
            .filter(|r| r.involves(patient_id))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
        Ok(history)
    }

    async fn get(&self, id: PatientId) -> StoreResult<Option<StoredPatient>> {
        Ok(self.inner.read().await.patients.get(&id).cloned())
    }

    async fn commit_merge(&self, record: &MergeRecord) -> MpiResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .check_mergeable(&record.duplicate_ids)
            .map_err(MpiError::MergeUpdateFailed)?;
        inner.mark_merged(&record.duplicate_ids, record.primary_id, record.merged_at);
        inner.audit.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl CandidateIndex for InMemoryRecordStore {
    async fn indexed_candidates(
        &self,
        keys: &BTreeSet<BlockingKey>,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>> {
        let inner = self.inner.read().await;
        Ok(inner
            .live(exclude_id)
            .filter(|p| !patient_blocking_keys(p).is_disjoint(keys))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::{Actor, PatientDraft};
    use crate::store::blocking_keys;

    fn patient(first: &str, phone: &str, national_id: Option<&str>) -> StoredPatient {
        let draft = PatientDraft {
            first_name: first.into(),
            phone: phone.into(),
            national_id: national_id.map(str::to_string),
            ..Default::default()
        };
        StoredPatient::from_draft(&draft, Utc::now())
    }

    #[tokio::test]
    async fn test_exact_lookup_excludes_own_id() {
        let a = patient("Asha", "9000000001", Some("123456789012"));
        let b = patient("Asha", "9000000002", Some("123456789012"));
        let store = InMemoryRecordStore::with_patients([a.clone(), b.clone()]);

        let found = store
            .find_by_exact_field(ExactField::NationalId, "123456789012", Some(a.id))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);
    }

    #[tokio::test]
    async fn test_list_candidates_respects_limit_and_order() {
        let patients: Vec<_> = (0..15)
            .map(|i| patient(&format!("P{i}"), "9000000000", None))
            .collect();
        let store = InMemoryRecordStore::with_patients(patients.clone());

        let window = store.list_candidates(None, 10).await.unwrap();

        assert_eq!(window.len(), 10);
        assert_eq!(window[0].id, patients[0].id);
        assert_eq!(window[9].id, patients[9].id);
    }

    #[tokio::test]
    async fn test_merged_records_are_not_candidates() {
        let primary = patient("Ravi", "9111111111", Some("111111111111"));
        let dup = patient("Ravi", "9111111111", Some("111111111111"));
        let store = InMemoryRecordStore::with_patients([primary.clone(), dup.clone()]);

        store
            .bulk_mark_merged(&[dup.id], primary.id, Utc::now())
            .await
            .unwrap();

        let window = store.list_candidates(None, 10).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, primary.id);

        let exact = store
            .find_by_exact_field(ExactField::NationalId, "111111111111", Some(primary.id))
            .await
            .unwrap();
        assert!(exact.is_empty());

        let stored = store.get(dup.id).await.unwrap().unwrap();
        assert_eq!(stored.merged_into, Some(primary.id));
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_bulk_mark_merged_is_all_or_nothing() {
        let primary = patient("A", "", None);
        let dup = patient("B", "", None);
        let store = InMemoryRecordStore::with_patients([primary.clone(), dup.clone()]);

        let missing = PatientId::new();
        let result = store
            .bulk_mark_merged(&[dup.id, missing], primary.id, Utc::now())
            .await;

        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == missing));
        assert!(!store.get(dup.id).await.unwrap().unwrap().is_merged());
    }

    #[tokio::test]
    async fn test_commit_merge_is_atomic() {
        let primary = patient("A", "", None);
        let dup = patient("B", "", None);
        let store = InMemoryRecordStore::with_patients([primary.clone(), dup.clone()]);

        let record = MergeRecord::new(primary.id, vec![dup.id], Actor::system(), Utc::now());
        store.commit_merge(&record).await.unwrap();

        assert_eq!(store.audit_len().await, 1);
        assert!(store.get(dup.id).await.unwrap().unwrap().is_merged());

        let again = MergeRecord::new(primary.id, vec![dup.id], Actor::system(), Utc::now());
        let result = store.commit_merge(&again).await;
        assert!(matches!(
            result,
            Err(MpiError::MergeUpdateFailed(StoreError::AlreadyMerged(_)))
        ));
        assert_eq!(store.audit_len().await, 1);
    }

    #[tokio::test]
    async fn test_merge_history_newest_first() {
        let primary = patient("A", "", None);
        let d1 = patient("B", "", None);
        let d2 = patient("C", "", None);
        let store =
            InMemoryRecordStore::with_patients([primary.clone(), d1.clone(), d2.clone()]);

        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let first = MergeRecord::new(primary.id, vec![d1.id], Actor::system(), earlier);
        let second = MergeRecord::new(primary.id, vec![d2.id], Actor::system(), Utc::now());
        store.commit_merge(&first).await.unwrap();
        store.commit_merge(&second).await.unwrap();

        let history = store.merge_history(primary.id).await.unwrap();
        assert_eq!(history, vec![second.clone(), first.clone()]);

        let history_d1 = store.merge_history(d1.id).await.unwrap();
        assert_eq!(history_d1, vec![first]);
    }

    #[tokio::test]
    async fn test_indexed_candidates_share_a_key() {
        let near = patient("Jane", "9876543211", None);
        let far = patient("Zubin", "7000000000", None);
        let store = InMemoryRecordStore::with_patients([near.clone(), far]);

        let draft = PatientDraft {
            first_name: "Jayne".into(),
            phone: "9876543210".into(),
            ..Default::default()
        };
        let found = store
            .indexed_candidates(&blocking_keys(&draft), None, 10)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near.id);
    }
}
