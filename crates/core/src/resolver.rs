//! The resolution service: duplicate checks and merges over a record store.

use crate::config::{FailurePolicy, MatchConfig};
use crate::error::{MpiError, MpiResult, StoreError};
use crate::matching::{aggregate, classify, rules, DuplicateCheckResult};
use crate::merge::{MergeLocks, MergeRecord};
use crate::patient::{Actor, PatientDraft};
use crate::store::{CandidateIndex, RecordStore};
use chrono::Utc;
use mpi_uuid::PatientId;
use std::collections::HashSet;
use std::sync::Arc;

/// Entry point for duplicate checks and merges.
///
/// Cheap to share: wrap it in an `Arc` and hand it to every request handler.
pub struct ResolutionService<S: ?Sized> {
    store: Arc<S>,
    cfg: Arc<MatchConfig>,
    locks: MergeLocks,
}

impl<S> ResolutionService<S>
where
    S: RecordStore + CandidateIndex + ?Sized,
{
    pub fn new(store: Arc<S>, cfg: Arc<MatchConfig>) -> Self {
        Self {
            store,
            cfg,
            locks: MergeLocks::new(),
        }
    }

    /// Runs every match rule against `draft` and classifies the result.
    ///
    /// Rule-level store failures never fail the check; the affected rule just contributes
    /// nothing. A check that cannot run at all (invalid draft, timeout) is handled per the
    /// configured [`FailurePolicy`].
    ///
    /// # Errors
    ///
    /// Only under `FailurePolicy::FailClosed`: `MpiError::InvalidInput` for a draft with no
    /// searchable field, `MpiError::CheckTimedOut` if the check overran its deadline.
    pub async fn check_duplicates(&self, draft: &PatientDraft) -> MpiResult<DuplicateCheckResult> {
        let outcome = match draft.validate() {
            Ok(()) => self.run_check_with_deadline(draft).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    total = result.total_matches,
                    exact = result.exact_matches.len(),
                    potential = result.potential_matches.len(),
                    action = ?result.suggested_action,
                    "duplicate check complete"
                );
                Ok(result)
            }
            Err(e) => match self.cfg.failure_policy() {
                FailurePolicy::FailOpen => {
                    tracing::error!(error = %e, "duplicate check failed; allowing registration");
                    Ok(DuplicateCheckResult::fail_open())
                }
                FailurePolicy::FailClosed => Err(e),
            },
        }
    }

    async fn run_check_with_deadline(&self, draft: &PatientDraft) -> MpiResult<DuplicateCheckResult> {
        match self.cfg.check_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run_check(draft))
                .await
                .map_err(|_| MpiError::CheckTimedOut(limit)),
            None => Ok(self.run_check(draft).await),
        }
    }

    async fn run_check(&self, draft: &PatientDraft) -> DuplicateCheckResult {
        let store = self.store.as_ref();
        let cfg = self.cfg.as_ref();

        let (national_id, health_account, phone, name_dob, name_phone) = tokio::join!(
            rules::national_id_rule(store, cfg, draft),
            rules::health_account_rule(store, cfg, draft),
            rules::phone_rule(store, cfg, draft),
            rules::name_and_dob_rule(store, cfg, draft),
            rules::name_and_phone_rule(store, cfg, draft),
        );

        let candidates = national_id
            .into_iter()
            .chain(health_account)
            .chain(phone)
            .chain(name_dob)
            .chain(name_phone);

        classify(aggregate(candidates))
    }

    /// Folds `duplicate_ids` into `primary_id` and records who did it.
    ///
    /// Merges touching the same identifiers are serialised; the state checks run again once
    /// the locks are held.
    ///
    /// # Errors
    ///
    /// - `MpiError::InvalidInput` for an empty duplicate list, repeated ids, or a primary that
    ///   is also listed as a duplicate.
    /// - `MpiError::Store(StoreError::NotFound)` if any id is unknown.
    /// - `MpiError::Store(StoreError::AlreadyMerged)` if the primary or any duplicate is
    ///   already merged.
    /// - `MpiError::MergeUpdateFailed` / `MpiError::MergeAuditFailed` from the store commit.
    pub async fn merge_patients(
        &self,
        primary_id: PatientId,
        duplicate_ids: Vec<PatientId>,
        actor: Actor,
    ) -> MpiResult<MergeRecord> {
        if duplicate_ids.is_empty() {
            return Err(MpiError::InvalidInput(
                "at least one duplicate id is required".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(duplicate_ids.len());
        if !duplicate_ids.iter().all(|id| seen.insert(*id)) {
            return Err(MpiError::InvalidInput(
                "duplicate ids must not repeat".into(),
            ));
        }
        if seen.contains(&primary_id) {
            return Err(MpiError::InvalidInput(format!(
                "primary {primary_id} cannot also be a duplicate"
            )));
        }

        let _guard = self
            .locks
            .acquire(std::iter::once(primary_id).chain(duplicate_ids.iter().copied()))
            .await;

        for id in std::iter::once(primary_id).chain(duplicate_ids.iter().copied()) {
            match self.store.get(id).await? {
                None => return Err(StoreError::NotFound(id).into()),
                Some(p) if p.is_merged() => return Err(StoreError::AlreadyMerged(id).into()),
                Some(_) => {}
            }
        }

        let record = MergeRecord::new(primary_id, duplicate_ids, actor, Utc::now());
        self.store.commit_merge(&record).await?;

        tracing::info!(
            merge = %record.id,
            primary = %record.primary_id,
            duplicates = record.duplicate_ids.len(),
            merged_by = %record.merged_by,
            "patients merged"
        );
        Ok(record)
    }

    /// Every merge naming `patient_id`, newest first.
    pub async fn merge_history(&self, patient_id: PatientId) -> MpiResult<Vec<MergeRecord>> {
        Ok(self.store.merge_history(patient_id).await?)
    }
}
