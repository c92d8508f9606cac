//! Lock-serialized comparison runs.
//!
//! Every run follows the same shape:
//!
//! 1. Take the subscription's lock or return `AlreadyRunning`.
//! 2. Load the subscription and refuse runs it cannot start from.
//! 3. Move it to `Comparing`, announce the start.
//! 4. Resolve the database side (cached or captured snapshot), load the
//!    project side, diff.
//! 5. Persist the result, move back to `Active`, announce completion.
//!
//! Snapshot writes only ever happen inside step 4, under the lock, so a full
//! recapture and a targeted refresh of the same subscription never
//! interleave. A cancelled run persists no result and restores the previous
//! state.

use super::{
    ComparisonLockRegistry, ComparisonOrchestrator, ComparisonOutcome, DefinitionHashDiffer,
    SchemaDiffer, SchemaSource,
};
use crate::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_NORMALIZATION_VERSION, DEFAULT_STALE_COMPARING_SECS,
};
use crate::events::{ComparisonEvent, ComparisonNotifier};
use async_trait::async_trait;
use schemasync_core::{
    assess_subscription, ComparisonResult, ComparisonScope, ConfigError, HealthCheck,
    ObjectIdentifier, SchemaDifference, SchemaObjectSummary, SchemaSnapshot, SourceError,
    Subscription, SubscriptionId, SubscriptionOptions, SubscriptionState, SyncError, SyncResult,
    Timestamp, UnsupportedObject, ValidationError,
};
use schemasync_storage::SyncStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Normalization version stamped on captured snapshots. A cached
    /// snapshot with another version is recaptured instead of reused.
    pub normalization_version: u32,

    /// Age after which a persisted `Comparing` state with no live lock is
    /// reported as stale (default: 30 minutes)
    pub stale_comparing_after: Duration,

    /// Capacity of the broadcast channel used for lifecycle events
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            normalization_version: DEFAULT_NORMALIZATION_VERSION,
            stale_comparing_after: Duration::from_secs(DEFAULT_STALE_COMPARING_SECS),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// # Environment Variables
    /// - `SCHEMASYNC_NORMALIZATION_VERSION` (default: 1)
    /// - `SCHEMASYNC_STALE_COMPARING_SECS` (default: 1800)
    /// - `SCHEMASYNC_EVENT_CHANNEL_CAPACITY` (default: 1024)
    pub fn from_env() -> Self {
        let normalization_version = std::env::var("SCHEMASYNC_NORMALIZATION_VERSION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NORMALIZATION_VERSION);

        let stale_comparing_after = Duration::from_secs(
            std::env::var("SCHEMASYNC_STALE_COMPARING_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STALE_COMPARING_SECS),
        );

        let event_channel_capacity = std::env::var("SCHEMASYNC_EVENT_CHANNEL_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CHANNEL_CAPACITY);

        Self {
            normalization_version,
            stale_comparing_after,
            event_channel_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.normalization_version == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.normalization_version".to_string(),
                value: "0".to_string(),
                reason: "normalization version starts at 1".to_string(),
            });
        }
        if self.stale_comparing_after.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.stale_comparing_after".to_string(),
                value: format!("{:?}", self.stale_comparing_after),
                reason: "stale threshold must be greater than zero".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.event_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "channel capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// RUN ERRORS
// ============================================================================

/// Why a run stopped before producing a result.
#[derive(Debug)]
enum RunError {
    Cancelled,
    Failed(SyncError),
}

impl From<SyncError> for RunError {
    fn from(e: SyncError) -> Self {
        RunError::Failed(e)
    }
}

impl From<SourceError> for RunError {
    fn from(e: SourceError) -> Self {
        RunError::Failed(e.into())
    }
}

impl From<ValidationError> for RunError {
    fn from(e: ValidationError) -> Self {
        RunError::Failed(e.into())
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: cancellation can no longer be requested.
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct SchemaComparisonOrchestrator {
    store: Arc<dyn SyncStore>,
    source: Arc<dyn SchemaSource>,
    differ: Arc<dyn SchemaDiffer>,
    notifier: Arc<dyn ComparisonNotifier>,
    locks: ComparisonLockRegistry,
    config: OrchestratorConfig,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl SchemaComparisonOrchestrator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        source: Arc<dyn SchemaSource>,
        notifier: Arc<dyn ComparisonNotifier>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            source,
            differ: Arc::new(DefinitionHashDiffer),
            notifier,
            locks: ComparisonLockRegistry::new(),
            config,
            cancel_rx: None,
        }
    }

    pub fn with_differ(mut self, differ: Arc<dyn SchemaDiffer>) -> Self {
        self.differ = differ;
        self
    }

    /// Abort in-flight runs once `true` is sent on the channel.
    pub fn with_cancellation(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Share a lock registry with other orchestrators in the process.
    pub fn with_lock_registry(mut self, locks: ComparisonLockRegistry) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &ComparisonLockRegistry {
        &self.locks
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Health of every subscription as of `now`.
    pub async fn subscription_health(&self, now: Timestamp) -> SyncResult<Vec<HealthCheck>> {
        let stale_after = chrono::Duration::from_std(self.config.stale_comparing_after)
            .unwrap_or(chrono::Duration::MAX);
        let subscriptions = self.store.subscription_list().await?;
        Ok(subscriptions
            .iter()
            .map(|subscription| {
                if subscription.state == SubscriptionState::Comparing
                    && self.locks.is_held(subscription.id)
                {
                    HealthCheck::healthy(format!("subscription:{}", subscription.id))
                        .with_metadata("state", serde_json::json!("Comparing"))
                } else {
                    assess_subscription(subscription, now, stale_after)
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Run scaffolding
    // ------------------------------------------------------------------------

    fn is_cancelled(&self) -> bool {
        self.cancel_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await `fut` unless cancellation is requested first.
    async fn cancellable<F, T>(&self, fut: F) -> Result<T, RunError>
    where
        F: Future<Output = T> + Send,
    {
        let Some(rx) = &self.cancel_rx else {
            return Ok(fut.await);
        };
        let mut rx = rx.clone();
        if *rx.borrow() {
            return Err(RunError::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = wait_for_cancel(&mut rx) => Err(RunError::Cancelled),
        }
    }

    fn progress(&self, subscription_id: SubscriptionId, stage: &str, percent: u8) {
        self.notifier.notify(ComparisonEvent::ComparisonProgress {
            subscription_id,
            stage: stage.to_string(),
            percent,
        });
    }

    /// Load a subscription a run may start from.
    async fn load_startable(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Subscription, ComparisonOutcome> {
        match self.store.subscription_get(subscription_id).await {
            Ok(Some(subscription)) if subscription.state.can_start_comparison() => Ok(subscription),
            Ok(Some(subscription)) => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    state = %subscription.state,
                    "Comparison refused for subscription state"
                );
                Err(ComparisonOutcome::Rejected {
                    reason: format!("subscription is {}", subscription.state),
                })
            }
            Ok(None) => {
                tracing::warn!(subscription_id = %subscription_id, "Comparison requested for unknown subscription");
                Err(ComparisonOutcome::Rejected {
                    reason: "subscription not found".to_string(),
                })
            }
            Err(e) => {
                tracing::error!(subscription_id = %subscription_id, error = %e, "Failed to load subscription");
                Err(ComparisonOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn begin(
        &self,
        subscription: &Subscription,
        scope: ComparisonScope,
        trigger: &str,
    ) -> Result<(), RunError> {
        self.store
            .subscription_update_state(subscription.id, SubscriptionState::Comparing)
            .await?;
        self.notifier.notify(ComparisonEvent::ComparisonStarted {
            subscription_id: subscription.id,
            scope,
            trigger: trigger.to_string(),
        });
        tracing::info!(
            subscription_id = %subscription.id,
            scope = %scope,
            trigger,
            "Comparison started"
        );
        Ok(())
    }

    /// Persist the outcome of a run and move the subscription out of
    /// `Comparing`.
    async fn finish(
        &self,
        subscription: &Subscription,
        scope: ComparisonScope,
        trigger: &str,
        started: Instant,
        run: Result<ComparisonResult, RunError>,
    ) -> ComparisonOutcome {
        let subscription_id = subscription.id;
        match run {
            Ok(result) => {
                if let Err(e) = self.store.comparison_append(&result).await {
                    return self
                        .fail(subscription_id, scope, trigger, started, RunError::Failed(e))
                        .await;
                }
                self.set_state(subscription_id, SubscriptionState::Active)
                    .await;
                if let Err(e) = self
                    .store
                    .subscription_record_compared(subscription_id, result.compared_at)
                    .await
                {
                    tracing::warn!(subscription_id = %subscription_id, error = %e, "Failed to record comparison time");
                }

                let duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX);
                self.notifier.notify(ComparisonEvent::ComparisonCompleted {
                    subscription_id,
                    comparison_id: result.id,
                    status: result.status,
                    total_differences: result.summary.total_differences,
                    duration_ms,
                });
                tracing::info!(
                    subscription_id = %subscription_id,
                    comparison_id = %result.id,
                    scope = %result.scope,
                    status = %result.status,
                    differences = result.summary.total_differences,
                    unsupported = result.summary.unsupported,
                    duration_ms,
                    "Comparison completed"
                );
                ComparisonOutcome::Completed(Box::new(result))
            }
            Err(RunError::Cancelled) => {
                let restored = match subscription.state {
                    SubscriptionState::Comparing => SubscriptionState::Active,
                    previous => previous,
                };
                self.set_state(subscription_id, restored).await;
                self.notifier.notify(ComparisonEvent::ComparisonFailed {
                    subscription_id,
                    reason: "cancelled".to_string(),
                });
                tracing::info!(subscription_id = %subscription_id, trigger, "Comparison cancelled");
                ComparisonOutcome::Cancelled
            }
            Err(error) => self.fail(subscription_id, scope, trigger, started, error).await,
        }
    }

    async fn fail(
        &self,
        subscription_id: SubscriptionId,
        scope: ComparisonScope,
        trigger: &str,
        started: Instant,
        error: RunError,
    ) -> ComparisonOutcome {
        let reason = match error {
            RunError::Failed(e) => e.to_string(),
            RunError::Cancelled => "cancelled".to_string(),
        };
        tracing::error!(subscription_id = %subscription_id, trigger, error = %reason, "Comparison failed");

        let result =
            ComparisonResult::failed(subscription_id, scope, trigger, &reason, started.elapsed());
        if let Err(e) = self.store.comparison_append(&result).await {
            tracing::error!(subscription_id = %subscription_id, error = %e, "Failed to persist failed comparison");
        }
        self.set_state(subscription_id, SubscriptionState::Error).await;
        self.notifier.notify(ComparisonEvent::ComparisonFailed {
            subscription_id,
            reason: reason.clone(),
        });
        ComparisonOutcome::Failed { reason }
    }

    async fn set_state(&self, subscription_id: SubscriptionId, state: SubscriptionState) {
        if let Err(e) = self
            .store
            .subscription_update_state(subscription_id, state)
            .await
        {
            tracing::error!(
                subscription_id = %subscription_id,
                state = %state,
                error = %e,
                "Failed to update subscription state"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Database side
    // ------------------------------------------------------------------------

    async fn capture_snapshot(&self, subscription: &Subscription) -> Result<SchemaSnapshot, RunError> {
        let objects = self
            .cancellable(self.source.capture_database(subscription))
            .await??;
        let snapshot =
            SchemaSnapshot::capture(subscription.id, self.config.normalization_version, objects)?;
        self.check_cancelled()?;
        self.store.snapshot_save(&snapshot).await?;
        tracing::debug!(
            subscription_id = %subscription.id,
            snapshot_id = %snapshot.id,
            objects = snapshot.len(),
            "Database snapshot captured"
        );
        Ok(snapshot)
    }

    /// Latest cached snapshot usable at the current normalization version.
    async fn cached_snapshot(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<SchemaSnapshot>, RunError> {
        match self.store.snapshot_latest(subscription_id).await? {
            Some(cached) if cached.normalization_version == self.config.normalization_version => {
                Ok(Some(cached))
            }
            Some(cached) => {
                tracing::info!(
                    subscription_id = %subscription_id,
                    cached_version = cached.normalization_version,
                    current_version = self.config.normalization_version,
                    "Cached snapshot predates normalization version, recapturing"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn resolve_snapshot(
        &self,
        subscription: &Subscription,
        full_comparison: bool,
    ) -> Result<(SchemaSnapshot, ComparisonScope), RunError> {
        if !full_comparison {
            if let Some(cached) = self.cached_snapshot(subscription.id).await? {
                let changed = self
                    .cancellable(
                        self.source
                            .database_changed_since(subscription, cached.captured_at),
                    )
                    .await??;
                if !changed {
                    tracing::debug!(
                        subscription_id = %subscription.id,
                        snapshot_id = %cached.id,
                        "Reusing cached snapshot"
                    );
                    return Ok((cached, ComparisonScope::Incremental));
                }
            }
        }
        Ok((self.capture_snapshot(subscription).await?, ComparisonScope::Full))
    }

    // ------------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------------

    async fn execute_full(
        &self,
        subscription: &Subscription,
        full_comparison: bool,
        trigger: &str,
        started: Instant,
    ) -> Result<ComparisonResult, RunError> {
        self.progress(subscription.id, "resolving-database", 10);
        let (snapshot, scope) = self.resolve_snapshot(subscription, full_comparison).await?;

        self.progress(subscription.id, "loading-project", 40);
        let project = self
            .cancellable(self.source.load_project(subscription))
            .await??;

        self.progress(subscription.id, "diffing", 70);
        let (differences, unsupported, compared) =
            self.diff_all(&subscription.options, &snapshot, project);
        self.check_cancelled()?;

        Ok(ComparisonResult::completed(
            subscription.id,
            scope,
            trigger,
            compared,
            differences,
            unsupported,
            started.elapsed(),
        ))
    }

    async fn execute_targeted(
        &self,
        subscription: &Subscription,
        objects: &[ObjectIdentifier],
        trigger: &str,
        started: Instant,
    ) -> Result<ComparisonResult, RunError> {
        let (requested, unsupported) = partition_requested(&subscription.options, objects);

        self.progress(subscription.id, "resolving-database", 10);
        let mut snapshot = match self.cached_snapshot(subscription.id).await? {
            Some(cached) => cached,
            None => self.capture_snapshot(subscription).await?,
        };

        if !requested.is_empty() {
            let fetched = self
                .cancellable(self.source.fetch_database_objects(subscription, &requested))
                .await??;
            let changed = snapshot.apply_targeted_update(&requested, fetched);
            self.check_cancelled()?;
            if changed > 0 {
                self.store.snapshot_save(&snapshot).await?;
                tracing::debug!(
                    subscription_id = %subscription.id,
                    snapshot_id = %snapshot.id,
                    changed,
                    "Cached snapshot entries refreshed"
                );
            }
        }

        self.progress(subscription.id, "loading-project", 50);
        let project: HashMap<String, SchemaObjectSummary> = self
            .cancellable(self.source.load_project(subscription))
            .await??
            .into_iter()
            .map(|object| (object.canonical_key(), object))
            .collect();

        self.progress(subscription.id, "diffing", 80);
        let differences: Vec<SchemaDifference> = requested
            .iter()
            .filter_map(|identifier| {
                self.differ.diff(
                    identifier,
                    snapshot.get(identifier),
                    project.get(&identifier.canonical_key()),
                )
            })
            .collect();
        self.check_cancelled()?;

        Ok(ComparisonResult::completed(
            subscription.id,
            ComparisonScope::Targeted,
            trigger,
            requested.len(),
            differences,
            unsupported,
            started.elapsed(),
        ))
    }

    /// Diff every object present on either side.
    fn diff_all(
        &self,
        options: &SubscriptionOptions,
        snapshot: &SchemaSnapshot,
        project: Vec<SchemaObjectSummary>,
    ) -> (Vec<SchemaDifference>, Vec<UnsupportedObject>, usize) {
        let project: BTreeMap<String, SchemaObjectSummary> = project
            .into_iter()
            .map(|object| (object.canonical_key(), object))
            .collect();
        let keys: BTreeSet<&String> = snapshot.objects.keys().chain(project.keys()).collect();

        let mut differences = Vec::new();
        let mut unsupported = Vec::new();
        let mut compared = 0;
        for key in keys {
            let database = snapshot.objects.get(key);
            let file = project.get(key);
            let Some(identifier) = database.or(file).map(SchemaObjectSummary::identifier) else {
                continue;
            };
            if !options.allows_object_type(identifier.object_type) {
                continue;
            }
            if !identifier.object_type.is_supported() {
                unsupported.push(unsupported_entry(identifier));
                continue;
            }
            compared += 1;
            if let Some(difference) = self.differ.diff(&identifier, database, file) {
                differences.push(difference);
            }
        }
        (differences, unsupported, compared)
    }
}

fn unsupported_entry(object: ObjectIdentifier) -> UnsupportedObject {
    let reason = format!("{} objects are not compared", object.object_type);
    UnsupportedObject { object, reason }
}

/// Split requested objects into comparable ones and unsupported entries.
///
/// Duplicates collapse to their first occurrence; types excluded by the
/// subscription's filters are dropped.
fn partition_requested(
    options: &SubscriptionOptions,
    objects: &[ObjectIdentifier],
) -> (Vec<ObjectIdentifier>, Vec<UnsupportedObject>) {
    let mut seen = HashSet::new();
    let mut requested = Vec::new();
    let mut unsupported = Vec::new();
    for object in objects {
        if !seen.insert(object.canonical_key()) {
            continue;
        }
        if !options.allows_object_type(object.object_type) {
            continue;
        }
        if object.object_type.is_supported() {
            requested.push(object.clone());
        } else {
            unsupported.push(unsupported_entry(object.clone()));
        }
    }
    (requested, unsupported)
}

#[async_trait]
impl ComparisonOrchestrator for SchemaComparisonOrchestrator {
    async fn run_comparison(
        &self,
        subscription_id: SubscriptionId,
        full_comparison: bool,
        trigger: &str,
    ) -> ComparisonOutcome {
        let Some(_lease) = self.locks.try_acquire(subscription_id, trigger) else {
            tracing::info!(subscription_id = %subscription_id, trigger, "Comparison already running");
            return ComparisonOutcome::AlreadyRunning;
        };
        let subscription = match self.load_startable(subscription_id).await {
            Ok(subscription) => subscription,
            Err(outcome) => return outcome,
        };

        let scope = if full_comparison {
            ComparisonScope::Full
        } else {
            ComparisonScope::Incremental
        };
        let started = Instant::now();
        let run = match self.begin(&subscription, scope, trigger).await {
            Ok(()) => {
                self.execute_full(&subscription, full_comparison, trigger, started)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish(&subscription, scope, trigger, started, run).await
    }

    async fn compare_objects(
        &self,
        subscription_id: SubscriptionId,
        objects: &[ObjectIdentifier],
        trigger: &str,
    ) -> ComparisonOutcome {
        if objects.is_empty() {
            return ComparisonOutcome::Rejected {
                reason: "no objects requested".to_string(),
            };
        }
        let Some(_lease) = self.locks.try_acquire(subscription_id, trigger) else {
            tracing::info!(
                subscription_id = %subscription_id,
                trigger,
                objects = objects.len(),
                "Comparison already running"
            );
            return ComparisonOutcome::AlreadyRunning;
        };
        let subscription = match self.load_startable(subscription_id).await {
            Ok(subscription) => subscription,
            Err(outcome) => return outcome,
        };

        let scope = ComparisonScope::Targeted;
        let started = Instant::now();
        let run = match self.begin(&subscription, scope, trigger).await {
            Ok(()) => {
                self.execute_targeted(&subscription, objects, trigger, started)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish(&subscription, scope, trigger, started, run).await
    }

    async fn recover_stale_states(&self) -> SyncResult<usize> {
        let mut recovered = 0;
        for subscription in self.store.subscription_list().await? {
            if subscription.state != SubscriptionState::Comparing {
                continue;
            }
            let Some(_lease) = self.locks.try_acquire(subscription.id, "stale-state-recovery")
            else {
                continue;
            };

            let still_comparing = self
                .store
                .subscription_get(subscription.id)
                .await?
                .map(|s| s.state == SubscriptionState::Comparing)
                .unwrap_or(false);
            if still_comparing {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    since = %subscription.state_changed_at,
                    "Clearing stale comparing state"
                );
                self.store
                    .subscription_update_state(subscription.id, SubscriptionState::Active)
                    .await?;
                recovered += 1;
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "Stale comparison states recovered");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_core::SqlObjectType;

    #[test]
    fn test_config_default_is_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.normalization_version, DEFAULT_NORMALIZATION_VERSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_version() {
        let config = OrchestratorConfig {
            normalization_version: 0,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partition_requested_dedups_and_flags_unsupported() {
        let options = SubscriptionOptions::default();
        let objects = vec![
            ObjectIdentifier::new("dbo", "Foo", SqlObjectType::StoredProcedure),
            ObjectIdentifier::new("DBO", "foo", SqlObjectType::StoredProcedure),
            ObjectIdentifier::new("dbo", "app", SqlObjectType::Login),
        ];

        let (requested, unsupported) = partition_requested(&options, &objects);
        assert_eq!(requested.len(), 1);
        assert_eq!(unsupported.len(), 1);
        assert_eq!(unsupported[0].object.object_type, SqlObjectType::Login);
    }

    #[test]
    fn test_partition_requested_respects_filters() {
        let options = SubscriptionOptions {
            object_type_filters: vec![SqlObjectType::Table],
            ..SubscriptionOptions::default()
        };
        let objects = vec![
            ObjectIdentifier::new("dbo", "Orders", SqlObjectType::Table),
            ObjectIdentifier::new("dbo", "OrdersView", SqlObjectType::View),
        ];

        let (requested, unsupported) = partition_requested(&options, &objects);
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].object_name, "Orders");
        assert!(unsupported.is_empty());
    }
}
