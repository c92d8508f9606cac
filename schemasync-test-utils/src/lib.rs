//! SchemaSync Test Utilities
//!
//! Shared test infrastructure for the SchemaSync workspace:
//! - Mock schema source, notifier and orchestrator
//! - Proptest generators for change events and identifiers
//! - Fixtures for subscriptions, snapshots and history entries
//! - Assertions on comparison outcomes

pub use schemasync_storage::InMemoryStore;

pub use schemasync_core::{
    ChangeEvent, ChangeKind, ChangeSource, ComparisonResult, ComparisonScope, DetectedChange,
    ObjectIdentifier, SchemaObjectSummary, SchemaSnapshot, SourceError, SqlObjectType,
    Subscription, SubscriptionId, SubscriptionOptions, SubscriptionState, SyncResult, Timestamp,
};

use async_trait::async_trait;
use schemasync_engine::{
    ComparisonEvent, ComparisonNotifier, ComparisonOrchestrator, ComparisonOutcome, SchemaSource,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK SCHEMA SOURCE
// ============================================================================

#[derive(Default)]
struct SourceState {
    database: Mutex<BTreeMap<String, SchemaObjectSummary>>,
    project: Mutex<BTreeMap<String, SchemaObjectSummary>>,
    fail_database: AtomicBool,
    fail_project: AtomicBool,
    database_changed: AtomicBool,
    track_changes: AtomicBool,
    last_database_change: Mutex<Option<Timestamp>>,
    delay: Mutex<Option<Duration>>,
    capture_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    project_calls: AtomicUsize,
    fetched: Mutex<Vec<Vec<ObjectIdentifier>>>,
}

/// Scriptable database and project side.
///
/// Clones share state, so a test can keep a handle after passing one to the
/// orchestrator. The database reports itself unchanged unless told otherwise.
#[derive(Clone, Default)]
pub struct MockSchemaSource {
    state: Arc<SourceState>,
}

impl MockSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, objects: Vec<SchemaObjectSummary>) -> Self {
        for object in objects {
            self.set_database_object(object);
        }
        self
    }

    pub fn with_project(self, objects: Vec<SchemaObjectSummary>) -> Self {
        for object in objects {
            self.set_project_object(object);
        }
        self
    }

    /// Answer `database_changed_since` from the time of the latest database
    /// edit instead of the fixed flag.
    pub fn with_change_tracking(self) -> Self {
        self.state.track_changes.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_database_object(&self, object: SchemaObjectSummary) {
        lock(&self.state.database).insert(object.canonical_key(), object);
        self.stamp_database_change();
    }

    pub fn remove_database_object(&self, identifier: &ObjectIdentifier) {
        lock(&self.state.database).remove(&identifier.canonical_key());
        self.stamp_database_change();
    }

    fn stamp_database_change(&self) {
        *lock(&self.state.last_database_change) = Some(chrono::Utc::now());
    }

    pub fn set_project_object(&self, object: SchemaObjectSummary) {
        lock(&self.state.project).insert(object.canonical_key(), object);
    }

    pub fn fail_database(&self, fail: bool) {
        self.state.fail_database.store(fail, Ordering::SeqCst);
    }

    pub fn fail_project(&self, fail: bool) {
        self.state.fail_project.store(fail, Ordering::SeqCst);
    }

    pub fn set_database_changed(&self, changed: bool) {
        self.state.database_changed.store(changed, Ordering::SeqCst);
    }

    /// Sleep this long inside every source call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.state.delay) = delay;
    }

    pub fn capture_calls(&self) -> usize {
        self.state.capture_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn project_calls(&self) -> usize {
        self.state.project_calls.load(Ordering::SeqCst)
    }

    /// Object lists passed to `fetch_database_objects`, in call order.
    pub fn fetched_objects(&self) -> Vec<Vec<ObjectIdentifier>> {
        lock(&self.state.fetched).clone()
    }

    async fn pause(&self) {
        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SchemaSource for MockSchemaSource {
    async fn capture_database(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SchemaObjectSummary>, SourceError> {
        self.state.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.state.fail_database.load(Ordering::SeqCst) {
            return Err(SourceError::Database {
                subscription_id: subscription.id,
                reason: "connection refused".to_string(),
            });
        }
        Ok(lock(&self.state.database).values().cloned().collect())
    }

    async fn fetch_database_objects(
        &self,
        subscription: &Subscription,
        objects: &[ObjectIdentifier],
    ) -> Result<Vec<SchemaObjectSummary>, SourceError> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.fetched).push(objects.to_vec());
        self.pause().await;
        if self.state.fail_database.load(Ordering::SeqCst) {
            return Err(SourceError::Database {
                subscription_id: subscription.id,
                reason: "connection refused".to_string(),
            });
        }
        let database = lock(&self.state.database);
        Ok(objects
            .iter()
            .filter_map(|identifier| database.get(&identifier.canonical_key()).cloned())
            .collect())
    }

    async fn load_project(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SchemaObjectSummary>, SourceError> {
        self.state.project_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.state.fail_project.load(Ordering::SeqCst) {
            return Err(SourceError::Project {
                subscription_id: subscription.id,
                reason: "project file not found".to_string(),
            });
        }
        Ok(lock(&self.state.project).values().cloned().collect())
    }

    async fn database_changed_since(
        &self,
        _subscription: &Subscription,
        since: Timestamp,
    ) -> Result<bool, SourceError> {
        if self.state.track_changes.load(Ordering::SeqCst) {
            return Ok(lock(&self.state.last_database_change).is_some_and(|at| at >= since));
        }
        Ok(self.state.database_changed.load(Ordering::SeqCst))
    }
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

/// Keeps every published event.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<ComparisonEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ComparisonEvent> {
        lock(&self.events).clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(|e| e.event_type()).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl ComparisonNotifier for RecordingNotifier {
    fn notify(&self, event: ComparisonEvent) {
        lock(&self.events).push(event);
    }
}

// ============================================================================
// SCRIPTED ORCHESTRATOR
// ============================================================================

/// One call received by [`ScriptedOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCall {
    Full {
        subscription_id: SubscriptionId,
        full_comparison: bool,
        trigger: String,
    },
    Objects {
        subscription_id: SubscriptionId,
        objects: Vec<ObjectIdentifier>,
        trigger: String,
    },
}

/// Orchestrator that records calls and replays queued outcomes.
///
/// With nothing queued every call completes with an empty result.
#[derive(Clone, Default)]
pub struct ScriptedOrchestrator {
    calls: Arc<Mutex<Vec<OrchestratorCall>>>,
    outcomes: Arc<Mutex<VecDeque<ComparisonOutcome>>>,
    recovery_calls: Arc<AtomicUsize>,
}

impl ScriptedOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: ComparisonOutcome) {
        lock(&self.outcomes).push_back(outcome);
    }

    pub fn calls(&self) -> Vec<OrchestratorCall> {
        lock(&self.calls).clone()
    }

    pub fn recovery_calls(&self) -> usize {
        self.recovery_calls.load(Ordering::SeqCst)
    }

    fn next_outcome(
        &self,
        subscription_id: SubscriptionId,
        scope: ComparisonScope,
        trigger: &str,
    ) -> ComparisonOutcome {
        lock(&self.outcomes).pop_front().unwrap_or_else(|| {
            ComparisonOutcome::Completed(Box::new(ComparisonResult::completed(
                subscription_id,
                scope,
                trigger,
                0,
                Vec::new(),
                Vec::new(),
                Duration::ZERO,
            )))
        })
    }
}

#[async_trait]
impl ComparisonOrchestrator for ScriptedOrchestrator {
    async fn run_comparison(
        &self,
        subscription_id: SubscriptionId,
        full_comparison: bool,
        trigger: &str,
    ) -> ComparisonOutcome {
        lock(&self.calls).push(OrchestratorCall::Full {
            subscription_id,
            full_comparison,
            trigger: trigger.to_string(),
        });
        let scope = if full_comparison {
            ComparisonScope::Full
        } else {
            ComparisonScope::Incremental
        };
        self.next_outcome(subscription_id, scope, trigger)
    }

    async fn compare_objects(
        &self,
        subscription_id: SubscriptionId,
        objects: &[ObjectIdentifier],
        trigger: &str,
    ) -> ComparisonOutcome {
        lock(&self.calls).push(OrchestratorCall::Objects {
            subscription_id,
            objects: objects.to_vec(),
            trigger: trigger.to_string(),
        });
        self.next_outcome(subscription_id, ComparisonScope::Targeted, trigger)
    }

    async fn recover_stale_states(&self) -> SyncResult<usize> {
        self.recovery_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_subscription_id() -> impl Strategy<Value = SubscriptionId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    pub fn arb_sql_object_type() -> impl Strategy<Value = SqlObjectType> {
        prop::sample::select(SqlObjectType::ALL.to_vec())
    }

    pub fn arb_supported_object_type() -> impl Strategy<Value = SqlObjectType> {
        prop::sample::select(
            SqlObjectType::ALL
                .iter()
                .copied()
                .filter(SqlObjectType::is_supported)
                .collect::<Vec<_>>(),
        )
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Created),
            Just(ChangeKind::Modified),
            Just(ChangeKind::Deleted),
            Just(ChangeKind::Renamed),
        ]
    }

    pub fn arb_change_source() -> impl Strategy<Value = ChangeSource> {
        prop_oneof![Just(ChangeSource::Database), Just(ChangeSource::FileSystem)]
    }

    /// Identifiers drawn from a small name pool so sequences collide.
    pub fn arb_object_identifier() -> impl Strategy<Value = ObjectIdentifier> {
        (
            prop::sample::select(vec!["dbo", "sales", "hr"]),
            prop::sample::select(vec!["Orders", "Customers", "Foo", "Bar"]),
            arb_supported_object_type(),
        )
            .prop_map(|(schema, name, object_type)| {
                ObjectIdentifier::new(schema, name, object_type)
            })
    }

    pub fn arb_change_event(subscription_id: SubscriptionId) -> impl Strategy<Value = ChangeEvent> {
        (
            arb_object_identifier(),
            arb_change_source(),
            arb_change_kind(),
            any::<bool>(),
        )
            .prop_map(move |(identifier, source, kind, typed)| {
                let object_type = typed.then_some(identifier.object_type);
                ChangeEvent::new(
                    subscription_id,
                    identifier.qualified_name(),
                    source,
                    kind,
                    object_type,
                )
            })
    }

    pub fn arb_change_sequence(
        subscription_id: SubscriptionId,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<ChangeEvent>> {
        prop::collection::vec(arb_change_event(subscription_id), 1..=max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::Utc;
    use schemasync_core::{compute_snapshot_hash, new_entity_id};
    use schemasync_storage::SubscriptionRepository;

    pub fn active_subscription(name: &str) -> Subscription {
        Subscription::new(name, format!("/projects/{}", name))
    }

    pub fn subscription_with_options(name: &str, options: SubscriptionOptions) -> Subscription {
        active_subscription(name).with_options(options)
    }

    /// Compares on database changes only.
    pub fn database_only_options() -> SubscriptionOptions {
        SubscriptionOptions {
            compare_on_file_change: false,
            ..SubscriptionOptions::default()
        }
    }

    pub fn manual_options() -> SubscriptionOptions {
        SubscriptionOptions {
            auto_compare: false,
            ..SubscriptionOptions::default()
        }
    }

    pub fn identifier(schema: &str, name: &str, object_type: SqlObjectType) -> ObjectIdentifier {
        ObjectIdentifier::new(schema, name, object_type)
    }

    pub fn summary(
        schema: &str,
        name: &str,
        object_type: SqlObjectType,
        script: &str,
    ) -> SchemaObjectSummary {
        SchemaObjectSummary::new(&identifier(schema, name, object_type), script)
    }

    pub fn procedure(name: &str, body: &str) -> SchemaObjectSummary {
        summary(
            "dbo",
            name,
            SqlObjectType::StoredProcedure,
            &format!("CREATE PROCEDURE dbo.{} AS {}", name, body),
        )
    }

    pub fn table(name: &str, columns: &str) -> SchemaObjectSummary {
        summary(
            "dbo",
            name,
            SqlObjectType::Table,
            &format!("CREATE TABLE dbo.{} ({})", name, columns),
        )
    }

    /// Empty snapshot with a chosen capture time.
    pub fn snapshot_at(
        subscription_id: SubscriptionId,
        captured_at: Timestamp,
        normalization_version: u32,
    ) -> SchemaSnapshot {
        let objects = BTreeMap::new();
        SchemaSnapshot {
            id: new_entity_id(),
            subscription_id,
            captured_at,
            refreshed_at: None,
            normalization_version,
            hash: compute_snapshot_hash(&objects),
            objects,
        }
    }

    pub fn comparison_at(subscription_id: SubscriptionId, compared_at: Timestamp) -> ComparisonResult {
        let mut result = ComparisonResult::completed(
            subscription_id,
            ComparisonScope::Full,
            "manual",
            0,
            Vec::new(),
            Vec::new(),
            Duration::from_millis(5),
        );
        result.compared_at = compared_at;
        result
    }

    pub fn change_at(
        subscription_id: SubscriptionId,
        detected_at: Timestamp,
        processed: bool,
    ) -> DetectedChange {
        DetectedChange {
            id: new_entity_id(),
            subscription_id,
            object_identifier: "dbo.Foo".to_string(),
            source: ChangeSource::Database,
            kind: ChangeKind::Modified,
            object_type: Some(SqlObjectType::StoredProcedure),
            detected_at,
            is_processed: processed,
            processed_at: processed.then(Utc::now),
        }
    }

    /// Store holding the given subscriptions.
    pub async fn store_with(subscriptions: &[Subscription]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for subscription in subscriptions {
            if let Err(e) = store.subscription_insert(subscription).await {
                panic!("fixture subscription insert failed: {}", e);
            }
        }
        store
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert the outcome completed and return its result.
    pub fn assert_completed(outcome: &ComparisonOutcome) -> &ComparisonResult {
        match outcome.result() {
            Some(result) => result,
            None => panic!("expected completed comparison, got {:?}", outcome),
        }
    }

    pub fn assert_already_running(outcome: &ComparisonOutcome) {
        assert!(
            outcome.is_already_running(),
            "expected AlreadyRunning, got {:?}",
            outcome
        );
    }

    pub fn assert_failed(outcome: &ComparisonOutcome) -> &str {
        match outcome {
            ComparisonOutcome::Failed { reason } => reason,
            other => panic!("expected failed comparison, got {:?}", other),
        }
    }
}
