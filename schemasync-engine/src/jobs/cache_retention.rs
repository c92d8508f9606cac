//! Cache Retention Background Task
//!
//! Periodically bounds what the pipeline leaves behind in the store:
//!
//! - Snapshots older than the snapshot retention
//! - Snapshots beyond the per-subscription cap, oldest first
//! - Comparison history older than the history retention
//! - Processed pending changes older than the change retention
//!
//! Unprocessed pending changes are never deleted. When a cycle deleted
//! anything the store is compacted; a failed compaction is logged and retried
//! on the next cycle.
//!
//! # Configuration
//!
//! ```rust
//! use schemasync_engine::jobs::RetentionConfig;
//! use std::time::Duration;
//!
//! let config = RetentionConfig {
//!     check_interval: Duration::from_secs(3600),
//!     snapshot_retention: Duration::from_secs(7 * 24 * 3600),
//!     max_cached_snapshots: 10,
//!     comparison_history_retention: Duration::from_secs(30 * 24 * 3600),
//!     pending_change_retention: Duration::from_secs(7 * 24 * 3600),
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::constants::{
    DEFAULT_COMPARISON_HISTORY_RETENTION_SECS, DEFAULT_MAX_CACHED_SNAPSHOTS,
    DEFAULT_PENDING_CHANGE_RETENTION_SECS, DEFAULT_RETENTION_CHECK_INTERVAL_SECS,
    DEFAULT_SNAPSHOT_RETENTION_SECS,
};
use chrono::{DateTime, Utc};
use schemasync_core::{ConfigError, Timestamp};
use schemasync_storage::SyncStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache retention background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// How often to sweep (default: 1 hour)
    pub check_interval: Duration,

    /// Snapshots captured longer ago than this are deleted (default: 7 days)
    pub snapshot_retention: Duration,

    /// Snapshots kept per subscription, newest first (default: 10)
    pub max_cached_snapshots: usize,

    /// Comparison results older than this are deleted (default: 30 days)
    pub comparison_history_retention: Duration,

    /// Processed pending changes older than this are deleted (default: 7 days)
    pub pending_change_retention: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_RETENTION_CHECK_INTERVAL_SECS),
            snapshot_retention: Duration::from_secs(DEFAULT_SNAPSHOT_RETENTION_SECS),
            max_cached_snapshots: DEFAULT_MAX_CACHED_SNAPSHOTS,
            comparison_history_retention: Duration::from_secs(
                DEFAULT_COMPARISON_HISTORY_RETENTION_SECS,
            ),
            pending_change_retention: Duration::from_secs(DEFAULT_PENDING_CHANGE_RETENTION_SECS),
        }
    }
}

impl RetentionConfig {
    /// Create RetentionConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `SCHEMASYNC_RETENTION_CHECK_INTERVAL_SECS`: Sweep interval (default: 3600)
    /// - `SCHEMASYNC_SNAPSHOT_RETENTION_SECS`: Snapshot age limit (default: 604800)
    /// - `SCHEMASYNC_MAX_CACHED_SNAPSHOTS`: Snapshots kept per subscription (default: 10)
    /// - `SCHEMASYNC_COMPARISON_HISTORY_RETENTION_SECS`: History age limit (default: 2592000)
    /// - `SCHEMASYNC_PENDING_CHANGE_RETENTION_SECS`: Processed change age limit (default: 604800)
    pub fn from_env() -> Self {
        let check_interval = Duration::from_secs(
            std::env::var("SCHEMASYNC_RETENTION_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETENTION_CHECK_INTERVAL_SECS),
        );

        let snapshot_retention = Duration::from_secs(
            std::env::var("SCHEMASYNC_SNAPSHOT_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SNAPSHOT_RETENTION_SECS),
        );

        let max_cached_snapshots = std::env::var("SCHEMASYNC_MAX_CACHED_SNAPSHOTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CACHED_SNAPSHOTS);

        let comparison_history_retention = Duration::from_secs(
            std::env::var("SCHEMASYNC_COMPARISON_HISTORY_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COMPARISON_HISTORY_RETENTION_SECS),
        );

        let pending_change_retention = Duration::from_secs(
            std::env::var("SCHEMASYNC_PENDING_CHANGE_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PENDING_CHANGE_RETENTION_SECS),
        );

        Self {
            check_interval,
            snapshot_retention,
            max_cached_snapshots,
            comparison_history_retention,
            pending_change_retention,
        }
    }

    /// Short intervals and limits for development.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            snapshot_retention: Duration::from_secs(3600),
            max_cached_snapshots: 3,
            comparison_history_retention: Duration::from_secs(24 * 3600),
            pending_change_retention: Duration::from_secs(3600),
        }
    }

    /// Longer history for production deployments.
    pub fn production() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_RETENTION_CHECK_INTERVAL_SECS),
            snapshot_retention: Duration::from_secs(DEFAULT_SNAPSHOT_RETENTION_SECS),
            max_cached_snapshots: DEFAULT_MAX_CACHED_SNAPSHOTS,
            comparison_history_retention: Duration::from_secs(90 * 24 * 3600), // 90 days
            pending_change_retention: Duration::from_secs(DEFAULT_PENDING_CHANGE_RETENTION_SECS),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "retention.check_interval".to_string(),
                value: "0".to_string(),
                reason: "interval must be greater than zero".to_string(),
            });
        }
        if self.max_cached_snapshots == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retention.max_cached_snapshots".to_string(),
                value: "0".to_string(),
                reason: "at least one snapshot must be kept".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for retention activity since startup.
#[derive(Debug, Default)]
pub struct RetentionMetrics {
    pub snapshots_deleted: AtomicU64,
    pub excess_snapshots_deleted: AtomicU64,
    pub comparisons_deleted: AtomicU64,
    pub pending_changes_deleted: AtomicU64,
    pub compactions: AtomicU64,
    pub compaction_failures: AtomicU64,
    pub cycles: AtomicU64,
    pub errors: AtomicU64,
}

impl RetentionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RetentionSnapshot {
        RetentionSnapshot {
            snapshots_deleted: self.snapshots_deleted.load(Ordering::Relaxed),
            excess_snapshots_deleted: self.excess_snapshots_deleted.load(Ordering::Relaxed),
            comparisons_deleted: self.comparisons_deleted.load(Ordering::Relaxed),
            pending_changes_deleted: self.pending_changes_deleted.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            compaction_failures: self.compaction_failures.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSnapshot {
    pub snapshots_deleted: u64,
    pub excess_snapshots_deleted: u64,
    pub comparisons_deleted: u64,
    pub pending_changes_deleted: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
    pub cycles: u64,
    pub errors: u64,
}

/// What one retention cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub snapshots_deleted: usize,
    pub excess_snapshots_deleted: usize,
    pub comparisons_deleted: usize,
    pub pending_changes_deleted: usize,
    pub compacted: bool,
    pub errors: usize,
    /// The cycle stopped early on shutdown.
    pub cancelled: bool,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.snapshots_deleted
            + self.excess_snapshots_deleted
            + self.comparisons_deleted
            + self.pending_changes_deleted
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that runs a retention cycle on every tick until the
/// shutdown signal is received.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_retention_task(store, RetentionConfig::default(), shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_retention_task(
    store: Arc<dyn SyncStore>,
    config: RetentionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RetentionMetrics> {
    let metrics = Arc::new(RetentionMetrics::new());

    let mut retention_interval = interval(config.check_interval);
    retention_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        snapshot_retention_secs = config.snapshot_retention.as_secs(),
        max_cached_snapshots = config.max_cached_snapshots,
        "Cache retention task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache retention task shutting down");
                    break;
                }
            }

            _ = retention_interval.tick() => {
                run_retention_cycle(store.as_ref(), &config, &metrics, &shutdown_rx).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        snapshots_deleted = snapshot.snapshots_deleted,
        excess_snapshots_deleted = snapshot.excess_snapshots_deleted,
        comparisons_deleted = snapshot.comparisons_deleted,
        pending_changes_deleted = snapshot.pending_changes_deleted,
        cycles = snapshot.cycles,
        errors = snapshot.errors,
        "Cache retention task completed"
    );

    metrics
}

/// `now - age`, saturating at the earliest representable time.
pub(crate) fn cutoff(now: Timestamp, age: Duration) -> Timestamp {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Perform one retention cycle. Each step's failure is logged and counted;
/// the remaining steps still run.
pub async fn run_retention_cycle(
    store: &dyn SyncStore,
    config: &RetentionConfig,
    metrics: &RetentionMetrics,
    shutdown_rx: &watch::Receiver<bool>,
) -> RetentionReport {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let mut report = RetentionReport::default();
    let now = Utc::now();
    let stopping = || *shutdown_rx.borrow();

    match store
        .snapshot_delete_older_than(cutoff(now, config.snapshot_retention))
        .await
    {
        Ok(deleted) => {
            report.snapshots_deleted = deleted;
            metrics
                .snapshots_deleted
                .fetch_add(deleted as u64, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete expired snapshots");
            report.errors += 1;
        }
    }
    if stopping() {
        report.cancelled = true;
        return finish_cycle(report, metrics);
    }

    match store.snapshot_subscription_ids().await {
        Ok(subscription_ids) => {
            for subscription_id in subscription_ids {
                match store
                    .snapshot_delete_excess(subscription_id, config.max_cached_snapshots)
                    .await
                {
                    Ok(deleted) => {
                        report.excess_snapshots_deleted += deleted;
                        metrics
                            .excess_snapshots_deleted
                            .fetch_add(deleted as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(
                            subscription_id = %subscription_id,
                            error = %e,
                            "Failed to trim cached snapshots"
                        );
                        report.errors += 1;
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list subscriptions with snapshots");
            report.errors += 1;
        }
    }
    if stopping() {
        report.cancelled = true;
        return finish_cycle(report, metrics);
    }

    match store
        .comparison_delete_older_than(cutoff(now, config.comparison_history_retention))
        .await
    {
        Ok(deleted) => {
            report.comparisons_deleted = deleted;
            metrics
                .comparisons_deleted
                .fetch_add(deleted as u64, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete expired comparison history");
            report.errors += 1;
        }
    }
    if stopping() {
        report.cancelled = true;
        return finish_cycle(report, metrics);
    }

    match store
        .change_delete_processed_older_than(cutoff(now, config.pending_change_retention))
        .await
    {
        Ok(deleted) => {
            report.pending_changes_deleted = deleted;
            metrics
                .pending_changes_deleted
                .fetch_add(deleted as u64, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete processed pending changes");
            report.errors += 1;
        }
    }

    if report.total_deleted() > 0 && !stopping() {
        match store.compact().await {
            Ok(()) => {
                report.compacted = true;
                metrics.compactions.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Store compaction failed, retrying next cycle");
                metrics.compaction_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    finish_cycle(report, metrics)
}

fn finish_cycle(report: RetentionReport, metrics: &RetentionMetrics) -> RetentionReport {
    metrics
        .errors
        .fetch_add(report.errors as u64, Ordering::Relaxed);

    if report.total_deleted() > 0 || report.errors > 0 {
        tracing::info!(
            snapshots = report.snapshots_deleted,
            excess_snapshots = report.excess_snapshots_deleted,
            comparisons = report.comparisons_deleted,
            pending_changes = report.pending_changes_deleted,
            compacted = report.compacted,
            errors = report.errors,
            cancelled = report.cancelled,
            "Cache retention cycle completed"
        );
    } else {
        tracing::trace!("Cache retention cycle completed with nothing to delete");
    }
    report
}
