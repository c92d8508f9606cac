//! In-memory implementation of every repository.
//!
//! Backs tests and single-process deployments. Clones share the same maps.

use crate::repository::{
    ComparisonHistoryRepository, PendingChangeRepository, SnapshotRepository, StoreMaintenance,
    SubscriptionRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use schemasync_core::{
    ChangeId, ComparisonId, ComparisonResult, DetectedChange, EntityType, SchemaSnapshot,
    SnapshotId, StorageError, Subscription, SubscriptionId, SubscriptionState, SyncResult,
    Timestamp,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
    snapshots: Arc<RwLock<HashMap<SnapshotId, SchemaSnapshot>>>,
    comparisons: Arc<RwLock<HashMap<ComparisonId, ComparisonResult>>>,
    changes: Arc<RwLock<HashMap<ChangeId, DetectedChange>>>,
    compactions: Arc<AtomicU64>,
    fail_compaction: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> SyncResult<usize> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len())
    }

    pub fn comparison_count(&self) -> SyncResult<usize> {
        Ok(self
            .comparisons
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len())
    }

    pub fn change_count(&self) -> SyncResult<usize> {
        Ok(self
            .changes
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .len())
    }

    /// All change records, processed or not, oldest first.
    pub fn changes_for(&self, subscription_id: SubscriptionId) -> SyncResult<Vec<DetectedChange>> {
        let changes = self
            .changes
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<_> = changes
            .values()
            .filter(|c| c.subscription_id == subscription_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.detected_at, c.id));
        Ok(found)
    }

    /// Number of successful compactions.
    pub fn compaction_count(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Make every subsequent `compact` call fail until reset.
    pub fn set_compaction_failure(&self, fail: bool) {
        self.fail_compaction.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn subscription_insert(&self, subscription: &Subscription) -> SyncResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if subscriptions.contains_key(&subscription.id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Subscription,
                reason: "already exists".to_string(),
            }
            .into());
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn subscription_get(&self, id: SubscriptionId) -> SyncResult<Option<Subscription>> {
        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(subscriptions.get(&id).cloned())
    }

    async fn subscription_list(&self) -> SyncResult<Vec<Subscription>> {
        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut all: Vec<_> = subscriptions.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn subscription_update_state(
        &self,
        id: SubscriptionId,
        state: SubscriptionState,
    ) -> SyncResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let subscription = subscriptions.get_mut(&id).ok_or(StorageError::NotFound {
            entity_type: EntityType::Subscription,
            id,
        })?;
        subscription.transition_to(state);
        Ok(())
    }

    async fn subscription_record_compared(
        &self,
        id: SubscriptionId,
        compared_at: Timestamp,
    ) -> SyncResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let subscription = subscriptions.get_mut(&id).ok_or(StorageError::NotFound {
            entity_type: EntityType::Subscription,
            id,
        })?;
        subscription.last_compared_at = Some(compared_at);
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryStore {
    async fn snapshot_save(&self, snapshot: &SchemaSnapshot) -> SyncResult<()> {
        self.snapshots
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn snapshot_latest(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Option<SchemaSnapshot>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(snapshots
            .values()
            .filter(|s| s.subscription_id == subscription_id)
            .max_by_key(|s| (s.captured_at, s.id))
            .cloned())
    }

    async fn snapshot_list(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Vec<SchemaSnapshot>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<_> = snapshots
            .values()
            .filter(|s| s.subscription_id == subscription_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| (b.captured_at, b.id).cmp(&(a.captured_at, a.id)));
        Ok(found)
    }

    async fn snapshot_subscription_ids(&self) -> SyncResult<Vec<SubscriptionId>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let ids: BTreeSet<_> = snapshots.values().map(|s| s.subscription_id).collect();
        Ok(ids.into_iter().collect())
    }

    async fn snapshot_delete_older_than(&self, cutoff: Timestamp) -> SyncResult<usize> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = snapshots.len();
        snapshots.retain(|_, s| s.captured_at >= cutoff);
        Ok(before - snapshots.len())
    }

    async fn snapshot_delete_excess(
        &self,
        subscription_id: SubscriptionId,
        keep: usize,
    ) -> SyncResult<usize> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut owned: Vec<_> = snapshots
            .values()
            .filter(|s| s.subscription_id == subscription_id)
            .map(|s| (s.captured_at, s.id))
            .collect();
        if owned.len() <= keep {
            return Ok(0);
        }

        owned.sort_by(|a, b| b.cmp(a));
        let excess: Vec<SnapshotId> = owned.into_iter().skip(keep).map(|(_, id)| id).collect();
        for id in &excess {
            snapshots.remove(id);
        }
        Ok(excess.len())
    }
}

#[async_trait]
impl ComparisonHistoryRepository for InMemoryStore {
    async fn comparison_append(&self, result: &ComparisonResult) -> SyncResult<()> {
        let mut comparisons = self
            .comparisons
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if comparisons.contains_key(&result.id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::ComparisonResult,
                reason: "comparison results are append-only".to_string(),
            }
            .into());
        }
        comparisons.insert(result.id, result.clone());
        Ok(())
    }

    async fn comparison_list(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Vec<ComparisonResult>> {
        let comparisons = self
            .comparisons
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<_> = comparisons
            .values()
            .filter(|c| c.subscription_id == subscription_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| (b.compared_at, b.id).cmp(&(a.compared_at, a.id)));
        Ok(found)
    }

    async fn comparison_delete_older_than(&self, cutoff: Timestamp) -> SyncResult<usize> {
        let mut comparisons = self
            .comparisons
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = comparisons.len();
        comparisons.retain(|_, c| c.compared_at >= cutoff);
        Ok(before - comparisons.len())
    }
}

#[async_trait]
impl PendingChangeRepository for InMemoryStore {
    async fn change_record(&self, change: &DetectedChange) -> SyncResult<()> {
        let mut changes = self
            .changes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if changes.contains_key(&change.id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::DetectedChange,
                reason: "already exists".to_string(),
            }
            .into());
        }
        changes.insert(change.id, change.clone());
        Ok(())
    }

    async fn change_mark_processed(
        &self,
        ids: &[ChangeId],
        processed_at: Timestamp,
    ) -> SyncResult<usize> {
        let mut changes = self
            .changes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut marked = 0;
        for id in ids {
            if let Some(change) = changes.get_mut(id) {
                if !change.is_processed {
                    change.is_processed = true;
                    change.processed_at = Some(processed_at);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn change_list_unprocessed(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Vec<DetectedChange>> {
        let changes = self
            .changes
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<_> = changes
            .values()
            .filter(|c| c.subscription_id == subscription_id && !c.is_processed)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.detected_at, c.id));
        Ok(found)
    }

    async fn change_delete_processed_older_than(&self, cutoff: Timestamp) -> SyncResult<usize> {
        let mut changes = self
            .changes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = changes.len();
        changes.retain(|_, c| !c.is_processed || c.detected_at >= cutoff);
        Ok(before - changes.len())
    }
}

#[async_trait]
impl StoreMaintenance for InMemoryStore {
    async fn compact(&self) -> SyncResult<()> {
        if self.fail_compaction.load(Ordering::Relaxed) {
            return Err(StorageError::CompactionFailed {
                reason: "compaction disabled".to_string(),
            }
            .into());
        }

        self.snapshots
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .shrink_to_fit();
        self.comparisons
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .shrink_to_fit();
        self.changes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .shrink_to_fit();

        let total = self.compactions.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(compactions = total, at = %Utc::now(), "In-memory store compacted");
        Ok(())
    }
}
