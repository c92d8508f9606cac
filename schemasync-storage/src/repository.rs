//! Async repository contracts.
//!
//! Every method is an independently atomic single-record (or single-sweep)
//! operation. No cross-record transactions are assumed; callers enforce
//! invariants spanning records by ordering their calls.

use async_trait::async_trait;
use schemasync_core::{
    ChangeId, ComparisonResult, DetectedChange, SchemaSnapshot, Subscription, SubscriptionId,
    SubscriptionState, SyncResult, Timestamp,
};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a new subscription.
    async fn subscription_insert(&self, subscription: &Subscription) -> SyncResult<()>;

    /// Get a subscription by ID.
    async fn subscription_get(&self, id: SubscriptionId) -> SyncResult<Option<Subscription>>;

    /// List all subscriptions.
    async fn subscription_list(&self) -> SyncResult<Vec<Subscription>>;

    /// Move a subscription to `state`, stamping the transition time.
    async fn subscription_update_state(
        &self,
        id: SubscriptionId,
        state: SubscriptionState,
    ) -> SyncResult<()>;

    /// Record the completion time of the latest comparison.
    async fn subscription_record_compared(
        &self,
        id: SubscriptionId,
        compared_at: Timestamp,
    ) -> SyncResult<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or replace a snapshot by ID.
    async fn snapshot_save(&self, snapshot: &SchemaSnapshot) -> SyncResult<()>;

    /// Most recently captured snapshot for a subscription.
    async fn snapshot_latest(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Option<SchemaSnapshot>>;

    /// All snapshots for a subscription, newest first.
    async fn snapshot_list(&self, subscription_id: SubscriptionId)
        -> SyncResult<Vec<SchemaSnapshot>>;

    /// Subscriptions that own at least one snapshot.
    async fn snapshot_subscription_ids(&self) -> SyncResult<Vec<SubscriptionId>>;

    /// Delete snapshots captured before `cutoff`. Returns the count deleted.
    async fn snapshot_delete_older_than(&self, cutoff: Timestamp) -> SyncResult<usize>;

    /// Keep only the `keep` most recent snapshots of a subscription.
    async fn snapshot_delete_excess(
        &self,
        subscription_id: SubscriptionId,
        keep: usize,
    ) -> SyncResult<usize>;
}

#[async_trait]
pub trait ComparisonHistoryRepository: Send + Sync {
    /// Append a comparison result. Results are never updated.
    async fn comparison_append(&self, result: &ComparisonResult) -> SyncResult<()>;

    /// History for a subscription, newest first.
    async fn comparison_list(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Vec<ComparisonResult>>;

    /// Delete results compared before `cutoff`.
    async fn comparison_delete_older_than(&self, cutoff: Timestamp) -> SyncResult<usize>;
}

#[async_trait]
pub trait PendingChangeRepository: Send + Sync {
    /// Persist a detected change.
    async fn change_record(&self, change: &DetectedChange) -> SyncResult<()>;

    /// Mark changes processed. Unknown or already processed IDs are skipped.
    /// Returns how many records changed.
    async fn change_mark_processed(
        &self,
        ids: &[ChangeId],
        processed_at: Timestamp,
    ) -> SyncResult<usize>;

    /// Unprocessed changes of a subscription, oldest first.
    async fn change_list_unprocessed(
        &self,
        subscription_id: SubscriptionId,
    ) -> SyncResult<Vec<DetectedChange>>;

    /// Delete processed changes detected before `cutoff`. Unprocessed changes
    /// are never deleted.
    async fn change_delete_processed_older_than(&self, cutoff: Timestamp) -> SyncResult<usize>;
}

#[async_trait]
pub trait StoreMaintenance: Send + Sync {
    /// Reclaim space after deletions.
    async fn compact(&self) -> SyncResult<()>;
}

/// Every repository the pipeline needs, behind one handle.
pub trait SyncStore:
    SubscriptionRepository
    + SnapshotRepository
    + ComparisonHistoryRepository
    + PendingChangeRepository
    + StoreMaintenance
{
}

impl<T> SyncStore for T where
    T: SubscriptionRepository
        + SnapshotRepository
        + ComparisonHistoryRepository
        + PendingChangeRepository
        + StoreMaintenance
{
}
