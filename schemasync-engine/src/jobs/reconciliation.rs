//! Reconciliation Background Task
//!
//! Catches what the event-driven path left behind. Every tick first returns
//! subscriptions stuck in `Comparing` with no live run to `Active`. Then each
//! auto-comparing subscription in `Active` or `Error` with unprocessed changes
//! gets a full comparison; when it completes, the changes seen before the run
//! are marked processed. A subscription whose comparison is already running
//! is skipped until the next tick.

use crate::constants::{DEFAULT_RECONCILIATION_INTERVAL_SECS, TRIGGER_RECONCILIATION};
use crate::orchestrator::{ComparisonOrchestrator, ComparisonOutcome};
use chrono::Utc;
use schemasync_core::{ChangeId, ConfigError, SubscriptionState};
use schemasync_storage::SyncStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// How often to look for unprocessed changes (default: 5 minutes)
    pub check_interval: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_RECONCILIATION_INTERVAL_SECS),
        }
    }
}

impl ReconciliationConfig {
    /// # Environment Variables
    /// - `SCHEMASYNC_RECONCILIATION_INTERVAL_SECS` (default: 300)
    pub fn from_env() -> Self {
        let check_interval = Duration::from_secs(
            std::env::var("SCHEMASYNC_RECONCILIATION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECONCILIATION_INTERVAL_SECS),
        );
        Self { check_interval }
    }

    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconciliation.check_interval".to_string(),
                value: "0".to_string(),
                reason: "interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ReconciliationMetrics {
    pub cycles: AtomicU64,
    pub states_recovered: AtomicU64,
    pub comparisons_run: AtomicU64,
    pub changes_marked: AtomicU64,
    pub skipped_busy: AtomicU64,
    pub failures: AtomicU64,
    pub errors: AtomicU64,
}

impl ReconciliationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReconciliationSnapshot {
        ReconciliationSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            states_recovered: self.states_recovered.load(Ordering::Relaxed),
            comparisons_run: self.comparisons_run.load(Ordering::Relaxed),
            changes_marked: self.changes_marked.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationSnapshot {
    pub cycles: u64,
    pub states_recovered: u64,
    pub comparisons_run: u64,
    pub changes_marked: u64,
    pub skipped_busy: u64,
    pub failures: u64,
    pub errors: u64,
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub states_recovered: usize,
    pub comparisons_run: usize,
    pub changes_marked: usize,
    pub skipped_busy: usize,
    pub failures: usize,
    pub errors: usize,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

pub async fn reconciliation_task(
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<dyn ComparisonOrchestrator>,
    config: ReconciliationConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ReconciliationMetrics> {
    let metrics = Arc::new(ReconciliationMetrics::new());

    let mut reconcile_interval = interval(config.check_interval);
    reconcile_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        "Reconciliation task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Reconciliation task shutting down");
                    break;
                }
            }

            _ = reconcile_interval.tick() => {
                run_reconciliation_cycle(
                    store.as_ref(),
                    orchestrator.as_ref(),
                    &metrics,
                    &shutdown_rx,
                )
                .await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        states_recovered = snapshot.states_recovered,
        comparisons_run = snapshot.comparisons_run,
        changes_marked = snapshot.changes_marked,
        skipped_busy = snapshot.skipped_busy,
        errors = snapshot.errors,
        "Reconciliation task completed"
    );

    metrics
}

/// Perform one reconciliation cycle over every subscription.
pub async fn run_reconciliation_cycle(
    store: &dyn SyncStore,
    orchestrator: &dyn ComparisonOrchestrator,
    metrics: &ReconciliationMetrics,
    shutdown_rx: &watch::Receiver<bool>,
) -> ReconciliationReport {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let mut report = ReconciliationReport::default();

    match orchestrator.recover_stale_states().await {
        Ok(recovered) => {
            report.states_recovered = recovered;
            metrics
                .states_recovered
                .fetch_add(recovered as u64, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to recover stale comparison states");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            report.errors += 1;
        }
    }

    let subscriptions = match store.subscription_list().await {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list subscriptions for reconciliation");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            report.errors += 1;
            return report;
        }
    };

    for subscription in subscriptions {
        if *shutdown_rx.borrow() {
            break;
        }
        // `Error` is retried here; the event path only acts on `Active`.
        let eligible = matches!(
            subscription.state,
            SubscriptionState::Active | SubscriptionState::Error
        );
        if !eligible || !subscription.options.auto_compare {
            continue;
        }

        let pending: Vec<ChangeId> = match store.change_list_unprocessed(subscription.id).await {
            Ok(changes) => changes.into_iter().map(|c| c.id).collect(),
            Err(e) => {
                tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to list unprocessed changes");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                report.errors += 1;
                continue;
            }
        };
        if pending.is_empty() {
            continue;
        }

        tracing::debug!(
            subscription_id = %subscription.id,
            unprocessed = pending.len(),
            "Reconciling subscription"
        );
        report.comparisons_run += 1;
        metrics.comparisons_run.fetch_add(1, Ordering::Relaxed);

        match orchestrator
            .run_comparison(subscription.id, true, TRIGGER_RECONCILIATION)
            .await
        {
            ComparisonOutcome::Completed(_) => {
                match store.change_mark_processed(&pending, Utc::now()).await {
                    Ok(marked) => {
                        report.changes_marked += marked;
                        metrics
                            .changes_marked
                            .fetch_add(marked as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to mark reconciled changes");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        report.errors += 1;
                    }
                }
            }
            ComparisonOutcome::AlreadyRunning => {
                tracing::info!(subscription_id = %subscription.id, "Comparison running, reconciliation skipped");
                report.skipped_busy += 1;
                metrics.skipped_busy.fetch_add(1, Ordering::Relaxed);
            }
            other => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    outcome = other.label(),
                    "Reconciliation comparison did not complete"
                );
                report.failures += 1;
                metrics.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if report.comparisons_run > 0 || report.states_recovered > 0 {
        tracing::info!(
            states_recovered = report.states_recovered,
            comparisons = report.comparisons_run,
            changes_marked = report.changes_marked,
            skipped_busy = report.skipped_busy,
            failures = report.failures,
            "Reconciliation cycle completed"
        );
    }
    report
}
