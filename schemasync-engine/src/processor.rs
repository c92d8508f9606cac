//! Change Processor
//!
//! Consumes debounced batches. Every change is persisted before any decision
//! is taken, so nothing observed is lost even when no comparison runs. A batch
//! is marked processed only when every comparison it triggered completed;
//! anything else leaves it for reconciliation.

use crate::constants::{TRIGGER_DATABASE_CHANGE, TRIGGER_FILE_CHANGE};
use crate::orchestrator::{ComparisonOrchestrator, ComparisonOutcome};
use chrono::Utc;
use schemasync_core::{
    ChangeEvent, ChangeId, ChangeSource, DetectedChange, ObjectIdentifier, PendingChangeBatch,
    SubscriptionId, SubscriptionState, SyncResult,
};
use schemasync_storage::SyncStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    /// Non-empty batches taken off the channel
    pub batches_processed: AtomicU64,

    /// Changes written to the pending-change store
    pub changes_persisted: AtomicU64,

    /// Orchestrator calls made
    pub comparisons_triggered: AtomicU64,

    /// Batches left unprocessed because a comparison was already running
    pub batches_deferred: AtomicU64,

    /// Orchestrator calls that failed, were rejected or were cancelled
    pub comparisons_failed: AtomicU64,

    /// Changes marked processed
    pub changes_marked: AtomicU64,

    /// Storage errors hit while processing
    pub errors: AtomicU64,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            changes_persisted: self.changes_persisted.load(Ordering::Relaxed),
            comparisons_triggered: self.comparisons_triggered.load(Ordering::Relaxed),
            batches_deferred: self.batches_deferred.load(Ordering::Relaxed),
            comparisons_failed: self.comparisons_failed.load(Ordering::Relaxed),
            changes_marked: self.changes_marked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSnapshot {
    pub batches_processed: u64,
    pub changes_persisted: u64,
    pub comparisons_triggered: u64,
    pub batches_deferred: u64,
    pub comparisons_failed: u64,
    pub changes_marked: u64,
    pub errors: u64,
}

// ============================================================================
// BATCH OUTCOME
// ============================================================================

/// What processing one batch led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to do.
    Empty,
    /// The subscription does not exist. Changes were persisted, unmarked.
    SubscriptionMissing,
    /// The subscription is not `Active`. Changes were persisted, unmarked.
    SubscriptionInactive(SubscriptionState),
    /// The subscription's options did not call for a comparison.
    NotTriggered,
    /// Every comparison completed and the batch was marked processed.
    Processed { marked: usize },
    /// A comparison was already running; the batch stays unprocessed.
    Deferred,
    /// A comparison was cancelled; the batch stays unprocessed.
    Cancelled,
    /// A comparison failed or was refused; the batch stays unprocessed.
    ComparisonFailed { reason: String },
}

/// How a batch's changes split across the two comparison entry points.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    /// Database objects with a known type, compared one by one.
    pub targeted: Vec<ObjectIdentifier>,
    /// Whether any change needs a whole-schema pass.
    pub needs_full_pass: bool,
    /// Whether that pass must recapture the database.
    pub full_pass_touches_database: bool,
}

/// Partition changes. Database changes with a known object type and a
/// parseable name are targeted; everything else goes to the full pass.
pub(crate) fn plan_batch(changes: &[ChangeEvent]) -> BatchPlan {
    let mut plan = BatchPlan::default();
    for change in changes {
        let targeted = if change.is_targetable() {
            change.to_object_identifier().and_then(Result::ok)
        } else {
            None
        };

        match targeted {
            Some(identifier) => plan.targeted.push(identifier),
            None => {
                plan.needs_full_pass = true;
                if change.source == ChangeSource::Database {
                    plan.full_pass_touches_database = true;
                }
            }
        }
    }
    plan
}

// ============================================================================
// PROCESSOR
// ============================================================================

pub struct ChangeProcessor {
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<dyn ComparisonOrchestrator>,
    metrics: Arc<ProcessorMetrics>,
}

impl ChangeProcessor {
    pub fn new(store: Arc<dyn SyncStore>, orchestrator: Arc<dyn ComparisonOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            metrics: Arc::new(ProcessorMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Persist a batch and trigger the comparisons it calls for.
    ///
    /// Errors are storage failures only. Expected conditions (unknown
    /// subscription, contention, failed comparisons) are reported through
    /// [`BatchOutcome`].
    pub async fn process_batch(&self, batch: PendingChangeBatch) -> SyncResult<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::Empty);
        }
        let subscription_id = batch.subscription_id;
        self.metrics.batches_processed.fetch_add(1, Ordering::Relaxed);

        let mut change_ids: Vec<ChangeId> = Vec::with_capacity(batch.len());
        for event in &batch.changes {
            let detected = DetectedChange::from_event(event);
            self.store.change_record(&detected).await?;
            change_ids.push(detected.id);
        }
        self.metrics
            .changes_persisted
            .fetch_add(change_ids.len() as u64, Ordering::Relaxed);

        let Some(subscription) = self.store.subscription_get(subscription_id).await? else {
            tracing::warn!(
                subscription_id = %subscription_id,
                changes = batch.len(),
                "Batch for unknown subscription"
            );
            return Ok(BatchOutcome::SubscriptionMissing);
        };
        if subscription.state != SubscriptionState::Active {
            tracing::debug!(
                subscription_id = %subscription_id,
                state = %subscription.state,
                "Subscription not active, batch not compared"
            );
            return Ok(BatchOutcome::SubscriptionInactive(subscription.state));
        }
        if !subscription
            .options
            .should_trigger(batch.has_file_changes(), batch.has_database_changes())
        {
            tracing::debug!(
                subscription_id = %subscription_id,
                changes = batch.len(),
                "Subscription options do not trigger a comparison"
            );
            return Ok(BatchOutcome::NotTriggered);
        }

        let plan = plan_batch(&batch.changes);
        tracing::debug!(
            subscription_id = %subscription_id,
            targeted = plan.targeted.len(),
            full_pass = plan.needs_full_pass,
            "Batch planned"
        );

        if !plan.targeted.is_empty() {
            self.metrics
                .comparisons_triggered
                .fetch_add(1, Ordering::Relaxed);
            let outcome = self
                .orchestrator
                .compare_objects(subscription_id, &plan.targeted, TRIGGER_DATABASE_CHANGE)
                .await;
            if let Some(stop) = self.stop_on(subscription_id, outcome) {
                return Ok(stop);
            }
        }

        if plan.needs_full_pass {
            let trigger = if plan.full_pass_touches_database {
                TRIGGER_DATABASE_CHANGE
            } else {
                TRIGGER_FILE_CHANGE
            };
            self.metrics
                .comparisons_triggered
                .fetch_add(1, Ordering::Relaxed);
            let outcome = self
                .orchestrator
                .run_comparison(subscription_id, plan.full_pass_touches_database, trigger)
                .await;
            if let Some(stop) = self.stop_on(subscription_id, outcome) {
                return Ok(stop);
            }
        }

        let marked = self
            .store
            .change_mark_processed(&change_ids, Utc::now())
            .await?;
        self.metrics
            .changes_marked
            .fetch_add(marked as u64, Ordering::Relaxed);
        tracing::debug!(subscription_id = %subscription_id, marked, "Batch processed");
        Ok(BatchOutcome::Processed { marked })
    }

    /// Map a non-completed outcome to the batch outcome that ends processing.
    fn stop_on(
        &self,
        subscription_id: SubscriptionId,
        outcome: ComparisonOutcome,
    ) -> Option<BatchOutcome> {
        match outcome {
            ComparisonOutcome::Completed(_) => None,
            ComparisonOutcome::AlreadyRunning => {
                self.metrics.batches_deferred.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    subscription_id = %subscription_id,
                    "Comparison already running, batch left for reconciliation"
                );
                Some(BatchOutcome::Deferred)
            }
            ComparisonOutcome::Cancelled => {
                self.metrics
                    .comparisons_failed
                    .fetch_add(1, Ordering::Relaxed);
                Some(BatchOutcome::Cancelled)
            }
            ComparisonOutcome::Rejected { reason } | ComparisonOutcome::Failed { reason } => {
                self.metrics
                    .comparisons_failed
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscription_id = %subscription_id,
                    reason = %reason,
                    "Comparison did not complete, batch left unprocessed"
                );
                Some(BatchOutcome::ComparisonFailed { reason })
            }
        }
    }

    /// Consume batches until shutdown, then drain what was already emitted.
    ///
    /// Batches are handled one at a time, so a subscription's batches are
    /// processed in emission order.
    pub async fn run(
        self: Arc<Self>,
        mut batch_rx: mpsc::Receiver<PendingChangeBatch>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<ProcessorMetrics> {
        tracing::info!("Change processor started");

        loop {
            tokio::select! {
                biased;

                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => self.handle(batch).await,
                        None => {
                            tracing::debug!("Batch channel closed");
                            break;
                        }
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        while let Ok(batch) = batch_rx.try_recv() {
                            self.handle(batch).await;
                        }
                        break;
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            batches_processed = snapshot.batches_processed,
            changes_persisted = snapshot.changes_persisted,
            comparisons_triggered = snapshot.comparisons_triggered,
            batches_deferred = snapshot.batches_deferred,
            comparisons_failed = snapshot.comparisons_failed,
            errors = snapshot.errors,
            "Change processor stopped"
        );
        Arc::clone(&self.metrics)
    }

    async fn handle(&self, batch: PendingChangeBatch) {
        let subscription_id = batch.subscription_id;
        if let Err(e) = self.process_batch(batch).await {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(subscription_id = %subscription_id, error = %e, "Failed to process batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_core::{ChangeKind, SqlObjectType};
    use uuid::Uuid;

    fn event(
        name: &str,
        source: ChangeSource,
        object_type: Option<SqlObjectType>,
    ) -> ChangeEvent {
        ChangeEvent::new(Uuid::nil(), name, source, ChangeKind::Modified, object_type)
    }

    #[test]
    fn test_plan_typed_database_change_is_targeted() {
        let plan = plan_batch(&[event(
            "dbo.Foo",
            ChangeSource::Database,
            Some(SqlObjectType::StoredProcedure),
        )]);
        assert_eq!(
            plan.targeted,
            vec![ObjectIdentifier::new(
                "dbo",
                "Foo",
                SqlObjectType::StoredProcedure
            )]
        );
        assert!(!plan.needs_full_pass);
    }

    #[test]
    fn test_plan_file_change_goes_to_full_pass() {
        let plan = plan_batch(&[
            event("dbo.Foo", ChangeSource::Database, Some(SqlObjectType::View)),
            event("Views/Bar.sql", ChangeSource::FileSystem, None),
        ]);
        assert_eq!(plan.targeted.len(), 1);
        assert!(plan.needs_full_pass);
        assert!(!plan.full_pass_touches_database);
    }

    #[test]
    fn test_plan_untyped_database_change_needs_recapture() {
        let plan = plan_batch(&[event("dbo.Foo", ChangeSource::Database, None)]);
        assert!(plan.targeted.is_empty());
        assert!(plan.needs_full_pass);
        assert!(plan.full_pass_touches_database);
    }

    #[test]
    fn test_plan_unparseable_name_falls_back_to_full_pass() {
        let plan = plan_batch(&[event("dbo.", ChangeSource::Database, Some(SqlObjectType::Table))]);
        assert!(plan.targeted.is_empty());
        assert!(plan.full_pass_touches_database);
    }

    #[test]
    fn test_metrics_snapshot_starts_at_zero() {
        let snapshot = ProcessorMetrics::new().snapshot();
        assert_eq!(snapshot.batches_processed, 0);
        assert_eq!(snapshot.changes_marked, 0);
    }
}
