//! Merge audit rows and per-identifier merge serialisation.

use crate::patient::Actor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mpi_uuid::{MergeId, PatientId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use utoipa::ToSchema;

/// One consolidation of duplicate records into a primary record. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MergeRecord {
    #[schema(value_type = String)]
    pub id: MergeId,
    #[schema(value_type = String)]
    pub primary_id: PatientId,
    #[schema(value_type = Vec<String>)]
    pub duplicate_ids: Vec<PatientId>,
    pub merged_at: DateTime<Utc>,
    pub merged_by: Actor,
}

impl MergeRecord {
    pub fn new(
        primary_id: PatientId,
        duplicate_ids: Vec<PatientId>,
        merged_by: Actor,
        merged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MergeId::new(),
            primary_id,
            duplicate_ids,
            merged_at,
            merged_by,
        }
    }

    /// Whether this row names `patient_id` as primary or as one of the duplicates.
    pub fn involves(&self, patient_id: PatientId) -> bool {
        self.primary_id == patient_id || self.duplicate_ids.contains(&patient_id)
    }
}

type LockTable = DashMap<PatientId, Arc<Mutex<()>>>;

/// Held for the duration of one merge; releases every identifier lock on drop.
pub struct MergeGuard {
    table: Arc<LockTable>,
    guards: Vec<(PatientId, OwnedMutexGuard<()>)>,
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        for (id, guard) in self.guards.drain(..) {
            drop(guard);
            // the table's own Arc is the only one left once nobody holds or waits on the lock
            self.table
                .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

/// Per-identifier locks so that two merges touching the same record never interleave.
///
/// Locks are always taken in ascending identifier order, so merges over overlapping sets
/// cannot deadlock. An identifier's entry lives only while some merge holds or waits on it.
#[derive(Default)]
pub struct MergeLocks {
    table: Arc<LockTable>,
}

impl MergeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every id in `ids` is free and returns a guard holding all of them.
    pub async fn acquire(&self, ids: impl IntoIterator<Item = PatientId>) -> MergeGuard {
        let ordered: BTreeSet<PatientId> = ids.into_iter().collect();
        let mut guard = MergeGuard {
            table: self.table.clone(),
            guards: Vec::with_capacity(ordered.len()),
        };

        for id in ordered {
            // clone the Arc out so the shard lock is not held across the await
            let lock = self.table.entry(id).or_default().clone();
            guard.guards.push((id, lock.lock_owned().await));
        }

        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_involves_primary_and_duplicates() {
        let primary = PatientId::new();
        let dup = PatientId::new();
        let record = MergeRecord::new(primary, vec![dup], Actor::system(), Utc::now());

        assert!(record.involves(primary));
        assert!(record.involves(dup));
        assert!(!record.involves(PatientId::new()));
    }

    #[tokio::test]
    async fn test_overlapping_merges_are_serialised() {
        let locks = Arc::new(MergeLocks::new());
        let shared = PatientId::new();

        let first = locks.acquire([shared, PatientId::new()]).await;

        let locks_clone = locks.clone();
        let waiter =
            tokio::spawn(async move { locks_clone.acquire([PatientId::new(), shared]).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second merge should acquire once the first releases")
            .expect("task should not panic");
        drop(second);
    }

    #[tokio::test]
    async fn test_released_locks_leave_no_entries() {
        let locks = Arc::new(MergeLocks::new());
        let shared = PatientId::new();

        let first = locks.acquire([shared, PatientId::new()]).await;
        assert_eq!(locks.table.len(), 2);

        let locks_clone = locks.clone();
        let waiter = tokio::spawn(async move { locks_clone.acquire([shared]).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the waiter still needs the shared entry
        drop(first);
        let second = waiter.await.expect("task should not panic");
        assert_eq!(locks.table.len(), 1);

        drop(second);
        assert!(locks.table.is_empty());
    }

    #[tokio::test]
    async fn test_disjoint_merges_do_not_block() {
        let locks = MergeLocks::new();
        let _first = locks.acquire([PatientId::new()]).await;
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire([PatientId::new()]),
        )
        .await;
        assert!(second.is_ok());
    }
}
