//! File-backed record store.
//!
//! Patients are stored as YAML in a sharded directory structure, and every merge audit row is
//! its own YAML file:
//!
//! ```text
//! <data_dir>/
//!   patients/
//!     <s1>/<s2>/<id>/patient.yaml
//!   merge_audit/
//!     pending/<merge_id>.yaml     # written before any patient is touched
//!     committed/<merge_id>.yaml   # the append-only audit trail
//! ```
//!
//! `commit_merge` is a durable outbox: the audit row lands in `pending/` first, the duplicates
//! are marked merged, and only then is the row moved into `committed/`. A crash in between
//! leaves the row in `pending/`, and [`FileRecordStore::recover_pending_merges`] finishes it on
//! the next start. Duplicates are therefore never left merged without an audit row.
//!
//! Candidate queries scan the whole population; the store keeps no index on disk.

use super::{is_candidate, patient_blocking_keys, BlockingKey, CandidateIndex, ExactField, RecordStore};
use crate::constants::{
    COMMITTED_DIR_NAME, MERGE_AUDIT_DIR_NAME, PATIENTS_DIR_NAME, PATIENT_YAML_FILENAME,
    PENDING_DIR_NAME,
};
use crate::error::{MpiError, MpiResult, StoreError, StoreResult};
use crate::merge::MergeRecord;
use crate::patient::StoredPatient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mpi_uuid::PatientId;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Clone, Debug)]
pub struct FileRecordStore {
    data_dir: PathBuf,
}

impl FileRecordStore {
    /// Opens (and creates if needed) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory layout cannot be created.
    pub async fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self {
            data_dir: data_dir.into(),
        };
        fs::create_dir_all(store.patients_dir()).await?;
        fs::create_dir_all(store.pending_dir()).await?;
        fs::create_dir_all(store.committed_dir()).await?;
        Ok(store)
    }

    fn patients_dir(&self) -> PathBuf {
        self.data_dir.join(PATIENTS_DIR_NAME)
    }

    fn pending_dir(&self) -> PathBuf {
        self.data_dir.join(MERGE_AUDIT_DIR_NAME).join(PENDING_DIR_NAME)
    }

    fn committed_dir(&self) -> PathBuf {
        self.data_dir
            .join(MERGE_AUDIT_DIR_NAME)
            .join(COMMITTED_DIR_NAME)
    }

    fn patient_file(&self, id: PatientId) -> PathBuf {
        id.sharded_dir(&self.patients_dir())
            .join(PATIENT_YAML_FILENAME)
    }

    fn audit_file(dir: &Path, record: &MergeRecord) -> PathBuf {
        dir.join(format!("{}.yaml", record.id))
    }

    /// Inserts or replaces a patient record.
    pub async fn insert(&self, patient: &StoredPatient) -> StoreResult<()> {
        let path = self.patient_file(patient.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_yaml(&path, patient).await
    }

    /// Every stored patient, merged or not, oldest first.
    pub async fn list_patients(&self) -> StoreResult<Vec<StoredPatient>> {
        let mut patients = Vec::new();

        for s1 in subdirs(&self.patients_dir()).await? {
            for s2 in subdirs(&s1).await? {
                for record_dir in subdirs(&s2).await? {
                    let path = record_dir.join(PATIENT_YAML_FILENAME);
                    match read_yaml::<StoredPatient>(&path).await {
                        Ok(Some(patient)) => patients.push(patient),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("skipping unreadable patient file {}: {}", path.display(), e)
                        }
                    }
                }
            }
        }

        patients.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(patients)
    }

    async fn live_patients(&self, exclude_id: Option<PatientId>) -> StoreResult<Vec<StoredPatient>> {
        Ok(self
            .list_patients()
            .await?
            .into_iter()
            .filter(|p| is_candidate(p, exclude_id))
            .collect())
    }

    async fn read_audit_dir(&self, dir: &Path) -> StoreResult<Vec<MergeRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            match read_yaml::<MergeRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping unreadable merge audit file {}: {}", path.display(), e)
                }
            }
        }
        Ok(records)
    }

    /// Loads the duplicates and checks every one is present and still live.
    async fn load_mergeable(&self, ids: &[PatientId]) -> StoreResult<Vec<StoredPatient>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            let patient = self.get(*id).await?.ok_or(StoreError::NotFound(*id))?;
            if patient.is_merged() {
                return Err(StoreError::AlreadyMerged(*id));
            }
            loaded.push(patient);
        }
        Ok(loaded)
    }

    /// Marks `patients` merged, one file at a time.
    ///
    /// If a write fails, the records already written are put back from `patients` before the
    /// error is returned. The second element of the error says whether that rollback succeeded.
    async fn write_merged(
        &self,
        patients: &[StoredPatient],
        primary_id: PatientId,
        at: DateTime<Utc>,
    ) -> Result<(), (StoreError, bool)> {
        for (written, original) in patients.iter().enumerate() {
            let mut merged = original.clone();
            merged.mark_merged(primary_id, at);
            if let Err(e) = self.insert(&merged).await {
                let restored = self.restore(&patients[..written]).await;
                return Err((e, restored));
            }
        }
        Ok(())
    }

    /// Rewrites `originals` as they were loaded. Returns false if any of them could not be put
    /// back.
    async fn restore(&self, originals: &[StoredPatient]) -> bool {
        let mut restored = true;
        for original in originals {
            if let Err(e) = self.insert(original).await {
                tracing::error!(patient = %original.id, error = %e, "failed to roll back merged patient");
                restored = false;
            }
        }
        restored
    }

    /// Completes merges interrupted between the pending write and the commit.
    ///
    /// Duplicates not yet marked are marked, then the row is moved into the committed trail.
    /// A row that cannot be finished (a duplicate is missing, unreadable or was meanwhile merged
    /// into a *different* primary, or a write fails) is logged and left pending; the other rows
    /// are still processed. Returns the number of merges completed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` only if the pending directory itself cannot be read; unreadable
    /// rows are skipped with a warning.
    pub async fn recover_pending_merges(&self) -> StoreResult<usize> {
        let mut recovered = 0;

        'records: for record in self.read_audit_dir(&self.pending_dir()).await? {
            let mut to_mark = Vec::new();
            for id in &record.duplicate_ids {
                let loaded = match self.get(*id).await {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        tracing::error!(merge = %record.id, patient = %id, error = %e, "pending merge names an unreadable patient");
                        continue 'records;
                    }
                };
                match loaded {
                    None => {
                        tracing::error!(merge = %record.id, patient = %id, "pending merge names a missing patient");
                        continue 'records;
                    }
                    Some(p) => match p.merged_into {
                        None => to_mark.push(p),
                        Some(into) if into == record.primary_id => {}
                        Some(into) => {
                            tracing::error!(
                                merge = %record.id,
                                patient = %id,
                                merged_into = %into,
                                "pending merge conflicts with a later merge"
                            );
                            continue 'records;
                        }
                    },
                }
            }

            if let Err((e, _)) = self
                .write_merged(&to_mark, record.primary_id, record.merged_at)
                .await
            {
                tracing::error!(merge = %record.id, error = %e, "could not finish pending merge; left pending");
                continue;
            }
            if let Err(e) = fs::rename(
                Self::audit_file(&self.pending_dir(), &record),
                Self::audit_file(&self.committed_dir(), &record),
            )
            .await
            {
                tracing::error!(merge = %record.id, error = %e, "could not commit recovered merge; left pending");
                continue;
            }

            tracing::info!(merge = %record.id, primary = %record.primary_id, "recovered pending merge");
            recovered += 1;
        }

        Ok(recovered)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn find_by_exact_field(
        &self,
        field: ExactField,
        value: &str,
        exclude_id: Option<PatientId>,
    ) -> StoreResult<Vec<StoredPatient>> {
        Ok(self
            .live_patients(exclude_id)
            .await?
            .into_iter()
            .filter(|p| field.value_of(p) == Some(value))
            .collect())
    }

    async fn list_candidates(
        &self,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>> {
        let mut live = self.live_patients(exclude_id).await?;
        live.truncate(limit);
        Ok(live)
    }

    async fn bulk_mark_merged(
        &self,
        ids: &[PatientId],
        primary_id: PatientId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let patients = self.load_mergeable(ids).await?;
        self.write_merged(&patients, primary_id, at)
            .await
            .map_err(|(e, _)| e)
    }

    async fn append_merge_audit(&self, record: &MergeRecord) -> StoreResult<()> {
        let path = Self::audit_file(&self.committed_dir(), record);
        if fs::try_exists(&path).await? {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("merge audit row {} already written", record.id),
            )));
        }
        write_yaml(&path, record).await
    }

    async fn merge_history(&self, patient_id: PatientId) -> StoreResult<Vec<MergeRecord>> {
        let mut history: Vec<MergeRecord> = self
            .read_audit_dir(&self.committed_dir())
            .await?
            .into_iter()
            .filter(|r| r.involves(patient_id))
            .collect();
        history.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
        Ok(history)
    }

    async fn get(&self, id: PatientId) -> StoreResult<Option<StoredPatient>> {
        read_yaml(&self.patient_file(id)).await
    }

    async fn commit_merge(&self, record: &MergeRecord) -> MpiResult<()> {
        let patients = self
            .load_mergeable(&record.duplicate_ids)
            .await
            .map_err(MpiError::MergeUpdateFailed)?;

        let pending = Self::audit_file(&self.pending_dir(), record);
        write_yaml(&pending, record)
            .await
            .map_err(MpiError::MergeUpdateFailed)?;

        if let Err((e, restored)) = self
            .write_merged(&patients, record.primary_id, record.merged_at)
            .await
        {
            if restored {
                if let Err(remove_err) = fs::remove_file(&pending).await {
                    tracing::error!(merge = %record.id, error = %remove_err, "failed to drop pending row of rolled-back merge");
                }
            } else {
                // some duplicates stay merged; the pending row lets recovery finish the merge
                tracing::error!(merge = %record.id, "merge rollback incomplete; left pending for recovery");
            }
            return Err(MpiError::MergeUpdateFailed(e));
        }

        fs::rename(&pending, Self::audit_file(&self.committed_dir(), record))
            .await
            .map_err(|e| MpiError::MergeAuditFailed {
                record: Box::new(record.clone()),
                source: StoreError::Io(e),
            })
    }
}

#[async_trait]
impl CandidateIndex for FileRecordStore {
    async fn indexed_candidates(
        &self,
        keys: &BTreeSet<BlockingKey>,
        exclude_id: Option<PatientId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredPatient>> {
        Ok(self
            .live_patients(exclude_id)
            .await?
            .into_iter()
            .filter(|p| !patient_blocking_keys(p).is_disjoint(keys))
            .take(limit)
            .collect())
    }
}

async fn subdirs(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

async fn read_yaml<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_yaml::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes via a sibling temp file and a rename so readers never see a torn file.
async fn write_yaml<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, yaml).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::{Actor, PatientDraft};
    use tempfile::TempDir;

    fn patient(first: &str, national_id: Option<&str>) -> StoredPatient {
        let draft = PatientDraft {
            first_name: first.into(),
            phone: "9876543210".into(),
            national_id: national_id.map(str::to_string),
            ..Default::default()
        };
        StoredPatient::from_draft(&draft, Utc::now())
    }

    async fn open_store(temp_dir: &TempDir) -> FileRecordStore {
        FileRecordStore::open(temp_dir.path())
            .await
            .expect("store should open")
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip_through_sharded_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let p = patient("Meera", Some("123456789012"));

        store.insert(&p).await.unwrap();

        let expected_path = p
            .id
            .sharded_dir(&temp_dir.path().join(PATIENTS_DIR_NAME))
            .join(PATIENT_YAML_FILENAME);
        assert!(expected_path.is_file());
        assert_eq!(store.get(p.id).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        assert_eq!(store.get(PatientId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exact_lookup_skips_self_and_merged() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let a = patient("A", Some("123456789012"));
        let b = patient("B", Some("123456789012"));
        let c = patient("C", Some("123456789012"));
        for p in [&a, &b, &c] {
            store.insert(p).await.unwrap();
        }
        store
            .bulk_mark_merged(&[c.id], a.id, Utc::now())
            .await
            .unwrap();

        let found = store
            .find_by_exact_field(ExactField::NationalId, "123456789012", Some(a.id))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);
    }

    #[tokio::test]
    async fn test_commit_merge_writes_committed_row_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        let dup = patient("B", None);
        store.insert(&primary).await.unwrap();
        store.insert(&dup).await.unwrap();

        let record = MergeRecord::new(primary.id, vec![dup.id], Actor::system(), Utc::now());
        store.commit_merge(&record).await.unwrap();

        assert!(FileRecordStore::audit_file(&store.committed_dir(), &record).is_file());
        assert!(!FileRecordStore::audit_file(&store.pending_dir(), &record).exists());
        assert_eq!(
            store.get(dup.id).await.unwrap().unwrap().merged_into,
            Some(primary.id)
        );
        assert_eq!(store.merge_history(dup.id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_commit_merge_of_missing_duplicate_writes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        store.insert(&primary).await.unwrap();

        let record =
            MergeRecord::new(primary.id, vec![PatientId::new()], Actor::system(), Utc::now());
        let result = store.commit_merge(&record).await;

        assert!(matches!(
            result,
            Err(MpiError::MergeUpdateFailed(StoreError::NotFound(_)))
        ));
        assert!(store.merge_history(primary.id).await.unwrap().is_empty());
        assert!(store.read_audit_dir(&store.pending_dir()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_pending_merge_finishes_interrupted_merge() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        let dup = patient("B", None);
        store.insert(&primary).await.unwrap();
        store.insert(&dup).await.unwrap();

        // simulate a crash right after the outbox write
        let record = MergeRecord::new(primary.id, vec![dup.id], Actor::system(), Utc::now());
        write_yaml(&FileRecordStore::audit_file(&store.pending_dir(), &record), &record)
            .await
            .unwrap();

        let recovered = store.recover_pending_merges().await.unwrap();

        assert_eq!(recovered, 1);
        assert!(store.get(dup.id).await.unwrap().unwrap().is_merged());
        assert_eq!(store.merge_history(primary.id).await.unwrap(), vec![record]);
        assert_eq!(store.recover_pending_merges().await.unwrap(), 0);
    }

    /// Makes the next write of `id` fail by occupying its temp-file path with a directory.
    fn block_writes_to(store: &FileRecordStore, id: PatientId) {
        std::fs::create_dir_all(store.patient_file(id).with_extension("yaml.tmp")).unwrap();
    }

    #[tokio::test]
    async fn test_failed_duplicate_write_rolls_back_merge() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        let first = patient("B", None);
        let second = patient("C", None);
        for p in [&primary, &first, &second] {
            store.insert(p).await.unwrap();
        }
        block_writes_to(&store, second.id);

        let record = MergeRecord::new(
            primary.id,
            vec![first.id, second.id],
            Actor::system(),
            Utc::now(),
        );
        let result = store.commit_merge(&record).await;

        assert!(matches!(result, Err(MpiError::MergeUpdateFailed(_))));
        assert_eq!(store.get(first.id).await.unwrap(), Some(first));
        assert_eq!(store.get(second.id).await.unwrap(), Some(second));
        assert!(store.merge_history(primary.id).await.unwrap().is_empty());
        assert!(store.read_audit_dir(&store.pending_dir()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_mark_merged_is_all_or_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        let first = patient("B", None);
        let second = patient("C", None);
        for p in [&primary, &first, &second] {
            store.insert(p).await.unwrap();
        }
        block_writes_to(&store, second.id);

        let result = store
            .bulk_mark_merged(&[first.id, second.id], primary.id, Utc::now())
            .await;

        assert!(result.is_err());
        assert!(!store.get(first.id).await.unwrap().unwrap().is_merged());
        assert!(!store.get(second.id).await.unwrap().unwrap().is_merged());
    }

    #[tokio::test]
    async fn test_recovery_skips_unfinishable_row_and_finishes_the_rest() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let primary = patient("A", None);
        let stuck = patient("B", None);
        let fine = patient("C", None);
        for p in [&primary, &stuck, &fine] {
            store.insert(p).await.unwrap();
        }

        let stuck_record =
            MergeRecord::new(primary.id, vec![stuck.id], Actor::system(), Utc::now());
        let fine_record = MergeRecord::new(primary.id, vec![fine.id], Actor::system(), Utc::now());
        for record in [&stuck_record, &fine_record] {
            write_yaml(&FileRecordStore::audit_file(&store.pending_dir(), record), record)
                .await
                .unwrap();
        }
        block_writes_to(&store, stuck.id);
        std::fs::write(store.pending_dir().join("torn.yaml"), ": not yaml :").unwrap();

        let recovered = store.recover_pending_merges().await.unwrap();

        assert_eq!(recovered, 1);
        assert!(store.get(fine.id).await.unwrap().unwrap().is_merged());
        assert!(!store.get(stuck.id).await.unwrap().unwrap().is_merged());
        assert_eq!(store.merge_history(fine.id).await.unwrap(), vec![fine_record]);
        assert_eq!(
            store.read_audit_dir(&store.pending_dir()).await.unwrap(),
            vec![stuck_record]
        );
    }

    #[tokio::test]
    async fn test_append_merge_audit_is_append_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        let record =
            MergeRecord::new(PatientId::new(), vec![PatientId::new()], Actor::system(), Utc::now());

        store.append_merge_audit(&record).await.unwrap();
        assert!(store.append_merge_audit(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_list_candidates_window_and_unreadable_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(&temp_dir).await;
        for i in 0..4 {
            store.insert(&patient(&format!("P{i}"), None)).await.unwrap();
        }
        let junk_dir = temp_dir.path().join(PATIENTS_DIR_NAME).join("ff").join("ff").join("junk");
        std::fs::create_dir_all(&junk_dir).unwrap();
        std::fs::write(junk_dir.join(PATIENT_YAML_FILENAME), ": not yaml :").unwrap();

        let window = store.list_candidates(None, 3).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(store.list_patients().await.unwrap().len(), 4);
    }
}
